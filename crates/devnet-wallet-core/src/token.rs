use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MAX_TOKEN_LEN: usize = 256;

/// Per-provider secret that authenticates page messages to the relay bridge.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HandshakeToken(String);

impl HandshakeToken {
    pub fn generate() -> Self {
        let mut buf = [0u8; 16];
        match getrandom::getrandom(&mut buf) {
            Ok(()) => {
                let groups: Vec<String> = buf
                    .chunks_exact(4)
                    .map(|c| format!("{:08x}", u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                    .collect();
                Self(groups.join("-"))
            }
            Err(e) => {
                tracing::warn!(error = %e, "secure randomness unavailable, using fallback token");
                Self::fallback()
            }
        }
    }

    fn fallback() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let salt = std::process::id() as u64 ^ (now as u64).rotate_left(17);
        Self(format!("fallback-{now}-{salt:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, candidate: Option<&str>) -> bool {
        candidate == Some(self.0.as_str())
    }
}

impl fmt::Debug for HandshakeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandshakeToken(<redacted>)")
    }
}

impl From<&str> for HandshakeToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_has_four_hex_groups() {
        let token = HandshakeToken::generate();
        let groups: Vec<&str> = token.as_str().split('-').collect();
        assert_eq!(groups.len(), 4);
        for g in groups {
            assert_eq!(g.len(), 8);
            assert!(g.bytes().all(|b| b.is_ascii_hexdigit()));
        }
        assert!(token.as_str().len() <= MAX_TOKEN_LEN);
    }

    #[test]
    fn tokens_differ_between_instances() {
        assert_ne!(HandshakeToken::generate(), HandshakeToken::generate());
    }

    #[test]
    fn debug_does_not_print_secret() {
        let token = HandshakeToken::from("abc");
        assert!(!format!("{token:?}").contains("abc"));
    }
}
