use std::time::{SystemTime, UNIX_EPOCH};

use devnet_wallet_core::{ClockPort, PortError};

/// Milliseconds since the Unix epoch, used to stamp vault unlocks and to age
/// sessions against the configured TTL.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl ClockPort for WallClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PortError::Validation(format!("system clock is before 1970: {e}")))?;
        u64::try_from(elapsed.as_millis())
            .map_err(|_| PortError::Validation("system clock is past u64 milliseconds".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_plausible_epoch_time() {
        // 2024-01-01T00:00:00Z
        const JAN_2024_MS: u64 = 1_704_067_200_000;
        let first = WallClock.now_ms().expect("clock");
        let second = WallClock.now_ms().expect("clock");
        assert!(first > JAN_2024_MS);
        assert!(second >= first);
    }
}
