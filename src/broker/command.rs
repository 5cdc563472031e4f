//! Normalization of untrusted RPC payloads into typed commands.
//!
//! Params may be positional (`[a, b]`) or named (`{"a": .., "b": ..}`).
//! Anything that does not fit the method's shape is an invalid-params error;
//! nothing downstream sees raw JSON.

use alloy::dyn_abi::TypedData;
use alloy::hex;
use alloy::primitives::{Address, Bytes, U256};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::broker::error::ProviderError;
use crate::connections::Capability;

/// A page-supplied transaction (`eth_sendTransaction`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionCall {
    pub from: Option<String>,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    /// Raw chain id as sent by the page, validated by the broker.
    pub chain_id: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum RpcCommand {
    Accounts,
    RequestAccounts,
    ChainId,
    NetVersion,
    SendTransaction(TransactionCall),
    PersonalSign {
        message: Bytes,
        account: Option<String>,
    },
    SignTypedData {
        account: Option<String>,
        typed_data: Box<TypedData>,
    },
    SwitchChain {
        chain_id: Value,
    },
    GetPermissions,
    RequestPermissions {
        capabilities: BTreeSet<Capability>,
    },
    RevokePermissions,
}

enum Params<'a> {
    Positional(&'a [Value]),
    Named(&'a Map<String, Value>),
}

impl RpcCommand {
    pub fn parse(method: &str, params: &Value) -> Result<Self, ProviderError> {
        let params = match params {
            Value::Null => Params::Positional(&[]),
            Value::Array(items) => Params::Positional(items),
            Value::Object(map) => Params::Named(map),
            _ => return Err(ProviderError::invalid_params("params must be an array or object")),
        };

        match method {
            "eth_accounts" => Ok(Self::Accounts),
            "eth_requestAccounts" => Ok(Self::RequestAccounts),
            "eth_chainId" => Ok(Self::ChainId),
            "net_version" => Ok(Self::NetVersion),
            "wallet_getPermissions" => Ok(Self::GetPermissions),
            "wallet_revokePermissions" => Ok(Self::RevokePermissions),
            "eth_sendTransaction" => parse_send_transaction(params).map(Self::SendTransaction),
            "personal_sign" => parse_personal_sign(params),
            "eth_signTypedData_v4" => parse_sign_typed_data(params),
            "wallet_switchEthereumChain" => parse_switch_chain(params),
            "wallet_requestPermissions" => parse_request_permissions(params),
            other => Err(ProviderError::method_not_found(other)),
        }
    }
}

fn parse_send_transaction(params: Params<'_>) -> Result<TransactionCall, ProviderError> {
    let tx = match params {
        Params::Positional([Value::Object(tx), ..]) => tx,
        Params::Named(tx) => tx,
        _ => return Err(ProviderError::invalid_params("expected a transaction object")),
    };

    let to = match tx.get("to") {
        Some(Value::String(raw)) => parse_address(raw)?,
        Some(_) => return Err(ProviderError::invalid_params("'to' must be an address")),
        None => return Err(ProviderError::invalid_params("missing 'to' address")),
    };

    let value = match tx.get("value") {
        None | Some(Value::Null) => U256::ZERO,
        Some(raw) => parse_quantity(raw)
            .ok_or_else(|| ProviderError::invalid_params("'value' must be a quantity"))?,
    };

    let data = match tx.get("data").or_else(|| tx.get("input")) {
        None | Some(Value::Null) => Bytes::new(),
        Some(Value::String(raw)) => parse_hex_bytes(raw)
            .ok_or_else(|| ProviderError::invalid_params("'data' must be hex"))?,
        Some(_) => return Err(ProviderError::invalid_params("'data' must be hex")),
    };

    let from = match tx.get("from") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(raw.clone()),
        Some(_) => return Err(ProviderError::invalid_params("'from' must be an address")),
    };

    Ok(TransactionCall {
        from,
        to,
        value,
        data,
        chain_id: tx.get("chainId").filter(|v| !v.is_null()).cloned(),
    })
}

fn parse_personal_sign(params: Params<'_>) -> Result<RpcCommand, ProviderError> {
    let (message, account) = match params {
        Params::Positional([Value::String(first), Value::String(second), ..]) => {
            // Some pages send [address, message].
            if looks_like_address(first) && !looks_like_address(second) {
                (second, Some(first.clone()))
            } else {
                (first, Some(second.clone()))
            }
        }
        Params::Positional([Value::String(message)]) => (message, None),
        Params::Named(map) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::invalid_params("missing 'message'"))?;
            let account = map
                .get("address")
                .or_else(|| map.get("account"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(RpcCommand::PersonalSign {
                message: message_bytes(message),
                account,
            });
        }
        _ => return Err(ProviderError::invalid_params("expected [message, address]")),
    };

    Ok(RpcCommand::PersonalSign {
        message: message_bytes(message),
        account,
    })
}

fn parse_sign_typed_data(params: Params<'_>) -> Result<RpcCommand, ProviderError> {
    let (account, raw) = match params {
        Params::Positional([Value::String(account), raw, ..]) => (Some(account.clone()), raw),
        Params::Named(map) => {
            let raw = map
                .get("typedData")
                .ok_or_else(|| ProviderError::invalid_params("missing 'typedData'"))?;
            let account = map
                .get("address")
                .or_else(|| map.get("account"))
                .and_then(Value::as_str)
                .map(str::to_string);
            (account, raw)
        }
        _ => return Err(ProviderError::invalid_params("expected [address, typedData]")),
    };

    let typed_data: TypedData = match raw {
        Value::String(json) => serde_json::from_str(json),
        other => serde_json::from_value(other.clone()),
    }
    .map_err(|e| ProviderError::invalid_params(format!("invalid typed data: {e}")))?;

    Ok(RpcCommand::SignTypedData {
        account,
        typed_data: Box::new(typed_data),
    })
}

fn parse_switch_chain(params: Params<'_>) -> Result<RpcCommand, ProviderError> {
    let map = match params {
        Params::Positional([Value::Object(map), ..]) => map,
        Params::Named(map) => map,
        _ => return Err(ProviderError::invalid_params("expected [{ chainId }]")),
    };
    let chain_id = map
        .get("chainId")
        .cloned()
        .ok_or_else(|| ProviderError::invalid_params("missing 'chainId'"))?;
    Ok(RpcCommand::SwitchChain { chain_id })
}

fn parse_request_permissions(params: Params<'_>) -> Result<RpcCommand, ProviderError> {
    let map = match params {
        Params::Positional([Value::Object(map), ..]) => map,
        Params::Named(map) => map,
        _ => return Err(ProviderError::invalid_params("expected [{ <permission>: {} }]")),
    };

    let mut capabilities = BTreeSet::new();
    for name in map.keys() {
        let capability = Capability::parse(name)
            .ok_or_else(|| ProviderError::invalid_params(format!("unknown permission '{name}'")))?;
        capabilities.insert(capability);
    }
    if capabilities.is_empty() {
        return Err(ProviderError::invalid_params("no permissions requested"));
    }
    Ok(RpcCommand::RequestPermissions { capabilities })
}

fn looks_like_address(raw: &str) -> bool {
    raw.len() == 42 && raw.starts_with("0x") && raw[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_address(raw: &str) -> Result<Address, ProviderError> {
    if !looks_like_address(raw) {
        return Err(ProviderError::invalid_params(format!("invalid address '{raw}'")));
    }
    Address::from_str(raw).map_err(|_| ProviderError::invalid_params(format!("invalid address '{raw}'")))
}

/// Hex (`0x..`) or decimal quantity, as a string or JSON number.
fn parse_quantity(raw: &Value) -> Option<U256> {
    match raw {
        Value::String(s) => U256::from_str(s.trim()).ok(),
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}

fn parse_hex_bytes(raw: &str) -> Option<Bytes> {
    if raw.is_empty() || raw == "0x" {
        return Some(Bytes::new());
    }
    raw.strip_prefix("0x")?;
    hex::decode(raw).ok().map(Bytes::from)
}

/// `0x`-hex messages are signed as bytes, anything else as UTF-8 text.
fn message_bytes(message: &str) -> Bytes {
    if message.starts_with("0x") {
        if let Some(bytes) = parse_hex_bytes(message) {
            return bytes;
        }
    }
    Bytes::copy_from_slice(message.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDR: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn test_send_transaction_positional_and_named() {
        let tx = json!({"to": ADDR, "value": "0xde0b6b3a7640000", "data": "0x", "chainId": "0x38"});
        let positional = RpcCommand::parse("eth_sendTransaction", &json!([tx.clone()])).unwrap();
        let named = RpcCommand::parse("eth_sendTransaction", &tx).unwrap();

        for command in [positional, named] {
            let RpcCommand::SendTransaction(call) = command else {
                panic!("expected a transaction");
            };
            assert_eq!(call.to, Address::from_str(ADDR).unwrap());
            assert_eq!(call.value, U256::from(1_000_000_000_000_000_000u64));
            assert!(call.data.is_empty());
            assert_eq!(call.chain_id, Some(json!("0x38")));
        }
    }

    #[test]
    fn test_send_transaction_rejects_bad_shapes() {
        for params in [
            json!([]),
            json!(["0x1234"]),
            json!([{"value": "0x1"}]),
            json!([{"to": "0x1234"}]),
            json!([{"to": ADDR, "value": "lots"}]),
            json!([{"to": ADDR, "data": "zz"}]),
            json!("nope"),
        ] {
            let err = RpcCommand::parse("eth_sendTransaction", &params).unwrap_err();
            assert_eq!(err.code, -32602, "params: {params}");
        }
    }

    #[test]
    fn test_personal_sign_orders() {
        let cmd = RpcCommand::parse("personal_sign", &json!(["0x68656c6c6f", ADDR])).unwrap();
        let RpcCommand::PersonalSign { message, account } = cmd else {
            panic!("expected personal_sign");
        };
        assert_eq!(message.as_ref(), b"hello");
        assert_eq!(account.as_deref(), Some(ADDR));

        let cmd = RpcCommand::parse("personal_sign", &json!([ADDR, "hello"])).unwrap();
        let RpcCommand::PersonalSign { message, account } = cmd else {
            panic!("expected personal_sign");
        };
        assert_eq!(message.as_ref(), b"hello");
        assert_eq!(account.as_deref(), Some(ADDR));

        let cmd = RpcCommand::parse("personal_sign", &json!({"message": "hi"})).unwrap();
        assert!(matches!(cmd, RpcCommand::PersonalSign { account: None, .. }));

        assert!(RpcCommand::parse("personal_sign", &json!([1, 2])).is_err());
    }

    #[test]
    fn test_typed_data_as_string_or_object() {
        let typed = json!({
            "types": {"EIP712Domain": [{"name": "chainId", "type": "uint256"}]},
            "primaryType": "EIP712Domain",
            "domain": {"chainId": 56},
            "message": {}
        });
        let as_string = json!([ADDR, typed.to_string()]);
        let as_object = json!([ADDR, typed]);
        for params in [as_string, as_object] {
            let cmd = RpcCommand::parse("eth_signTypedData_v4", &params).unwrap();
            let RpcCommand::SignTypedData { typed_data, .. } = cmd else {
                panic!("expected typed data");
            };
            assert_eq!(typed_data.domain.chain_id, Some(U256::from(56u64)));
        }
        assert!(RpcCommand::parse("eth_signTypedData_v4", &json!([ADDR, "{"])).is_err());
    }

    #[test]
    fn test_switch_chain() {
        let cmd = RpcCommand::parse("wallet_switchEthereumChain", &json!([{"chainId": "0x38"}])).unwrap();
        assert!(matches!(cmd, RpcCommand::SwitchChain { chain_id } if chain_id == json!("0x38")));
        assert!(RpcCommand::parse("wallet_switchEthereumChain", &json!([])).is_err());
    }

    #[test]
    fn test_request_permissions() {
        let cmd = RpcCommand::parse(
            "wallet_requestPermissions",
            &json!([{"eth_accounts": {}, "sign_message": {}}]),
        )
        .unwrap();
        let RpcCommand::RequestPermissions { capabilities } = cmd else {
            panic!("expected permissions");
        };
        assert!(capabilities.contains(&Capability::EthAccounts));
        assert!(capabilities.contains(&Capability::SignMessage));

        assert!(RpcCommand::parse("wallet_requestPermissions", &json!([{"root": {}}])).is_err());
        assert!(RpcCommand::parse("wallet_requestPermissions", &json!([{}])).is_err());
    }

    #[test]
    fn test_unknown_method() {
        let err = RpcCommand::parse("eth_mine", &json!([])).unwrap_err();
        assert_eq!(err.code, -32601);
    }
}
