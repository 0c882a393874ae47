use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::hex;
use serde_json::Value;

const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

pub const GENERIC_REVERT_MESSAGE: &str =
    "Transaction reverted on-chain. Please review the contract logic or see the explorer for details.";

/// Decode `Error(string)` or `Panic(uint256)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, payload) = data.split_at(4);
    if selector == ERROR_SELECTOR {
        return match DynSolType::Tuple(vec![DynSolType::String]).abi_decode_params(payload) {
            Ok(DynSolValue::Tuple(values)) => match values.into_iter().next() {
                Some(DynSolValue::String(reason)) => Some(reason),
                _ => None,
            },
            _ => None,
        };
    }
    if selector == PANIC_SELECTOR {
        let code = match DynSolType::Tuple(vec![DynSolType::Uint(256)]).abi_decode_params(payload)
        {
            Ok(DynSolValue::Tuple(values)) => match values.into_iter().next() {
                Some(DynSolValue::Uint(code, _)) => Some(code),
                _ => None,
            },
            _ => None,
        };
        return Some(match code {
            Some(code) => format!("Panic code 0x{:0>4}", format!("{code:x}")),
            None => "Solidity panic".to_owned(),
        });
    }
    None
}

/// Decode revert data carried in an RPC error: a hex string, a JSON string
/// wrapping `{ data }`, or an object nesting either.
pub fn decode_revert_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.trim_start().starts_with('{') => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|parsed| parsed.get("data").and_then(decode_revert_value)),
        Value::String(s) => hex::decode(s).ok().and_then(|b| decode_revert_reason(&b)),
        Value::Object(obj) => ["data", "error", "body"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(decode_revert_value),
        _ => None,
    }
}

pub fn revert_message(reason: Option<String>) -> String {
    match reason {
        Some(reason) => format!("Transaction reverted: {reason}"),
        None => GENERIC_REVERT_MESSAGE.to_owned(),
    }
}
