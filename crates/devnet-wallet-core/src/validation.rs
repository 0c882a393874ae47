use serde_json::Value;

use crate::error::WalletError;

const BLOCK_TAGS: [&str; 5] = ["latest", "earliest", "pending", "safe", "finalized"];

/// Read-only methods the page provider forwards straight to the RPC endpoints.
pub const PASSTHROUGH_METHODS: &[&str] = &[
    "eth_getBalance",
    "eth_blockNumber",
    "eth_getBlockByNumber",
    "eth_getBlockByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_getTransactionByHash",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getUncleCountByBlockHash",
    "eth_getUncleCountByBlockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_gasPrice",
    "eth_maxPriorityFeePerGas",
    "eth_feeHistory",
    "eth_syncing",
    "eth_getCode",
    "eth_getLogs",
    "web3_clientVersion",
];

pub fn is_passthrough(method: &str) -> bool {
    PASSTHROUGH_METHODS.contains(&method)
}

fn hex_digits(value: &Value) -> Option<&str> {
    value.as_str()?.strip_prefix("0x")
}

fn all_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn is_data(value: &Value) -> bool {
    hex_digits(value).is_some_and(all_hex)
}

pub fn is_address(value: &Value) -> bool {
    hex_digits(value).is_some_and(|h| h.len() == 40 && all_hex(h))
}

pub fn is_hash(value: &Value) -> bool {
    hex_digits(value).is_some_and(|h| h.len() == 64 && all_hex(h))
}

pub fn is_quantity(value: &Value) -> bool {
    hex_digits(value).is_some_and(|h| (1..=64).contains(&h.len()) && all_hex(h))
}

pub fn is_block_tag(value: &Value) -> bool {
    value.as_str().is_some_and(|s| BLOCK_TAGS.contains(&s)) || is_quantity(value)
}

fn is_object(value: &Value) -> bool {
    value.is_object()
}

fn is_call_object(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let to_ok = obj.get("to").map_or(true, |v| v.is_null() || is_address(v));
    let data_ok = obj.get("data").map_or(true, |v| v.is_null() || is_data(v));
    to_ok && data_ok
}

fn address_with_optional_tag(p: &[Value]) -> bool {
    matches!(p.len(), 1 | 2) && is_address(&p[0]) && p.get(1).map_or(true, is_block_tag)
}

fn check(method: &str, p: &[Value]) -> Option<bool> {
    let ok = match method {
        "eth_getBalance" | "eth_getCode" => address_with_optional_tag(p),
        "eth_getTransactionCount" => p.len() == 2 && is_address(&p[0]) && is_block_tag(&p[1]),
        "eth_call" => {
            matches!(p.len(), 1 | 2) && is_call_object(&p[0]) && p.get(1).map_or(true, is_block_tag)
        }
        "eth_estimateGas" => {
            matches!(p.len(), 1 | 2) && is_object(&p[0]) && p.get(1).map_or(true, is_block_tag)
        }
        "eth_getTransactionReceipt"
        | "eth_getTransactionByHash"
        | "eth_getBlockTransactionCountByHash"
        | "eth_getUncleCountByBlockHash" => p.len() == 1 && is_hash(&p[0]),
        "eth_getBlockByHash" => p.len() == 2 && is_hash(&p[0]) && p[1].is_boolean(),
        "eth_getBlockByNumber" => p.len() == 2 && is_block_tag(&p[0]) && p[1].is_boolean(),
        "eth_getTransactionByBlockHashAndIndex" => {
            p.len() == 2 && is_hash(&p[0]) && is_quantity(&p[1])
        }
        "eth_getTransactionByBlockNumberAndIndex" => {
            p.len() == 2 && is_block_tag(&p[0]) && is_quantity(&p[1])
        }
        "eth_getBlockTransactionCountByNumber" | "eth_getUncleCountByBlockNumber" => {
            p.len() == 1 && is_block_tag(&p[0])
        }
        "eth_gasPrice" | "eth_maxPriorityFeePerGas" | "eth_blockNumber" | "net_version"
        | "web3_clientVersion" => p.is_empty(),
        "eth_feeHistory" => {
            p.len() == 3 && is_quantity(&p[0]) && is_block_tag(&p[1]) && p[2].is_array()
        }
        "eth_getLogs" => p.len() == 1 && is_object(&p[0]),
        _ => return None,
    };
    Some(ok)
}

/// Check `params` against the shape table for `method`. Methods without an
/// entry pass. A non-array value is checked as an empty list.
pub fn validate_rpc_params(method: &str, params: &Value) -> Result<(), WalletError> {
    let list: &[Value] = match params {
        Value::Array(items) => items,
        _ => &[],
    };
    match check(method, list) {
        Some(false) => Err(WalletError::InvalidParameters(format!(
            "Invalid parameters for {method}"
        ))),
        _ => Ok(()),
    }
}
