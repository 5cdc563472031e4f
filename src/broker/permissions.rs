//! The method → requirement table.
//!
//! Every inbound method is listed here once. A method that is not listed is
//! not supported, and only a method tagged `approval` can ever open a
//! pending request.

use crate::connections::Capability;

/// What an origin must hold before a method runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Anyone may call.
    Public,
    /// The origin must be connected.
    Connection,
    /// The origin must be connected and hold the capability.
    Capability(Capability),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodPolicy {
    pub requirement: Requirement,
    /// The user must approve each call.
    pub approval: bool,
}

const fn policy_of(requirement: Requirement, approval: bool) -> MethodPolicy {
    MethodPolicy {
        requirement,
        approval,
    }
}

const POLICIES: &[(&str, MethodPolicy)] = &[
    ("eth_accounts", policy_of(Requirement::Public, false)),
    ("eth_requestAccounts", policy_of(Requirement::Public, true)),
    ("eth_chainId", policy_of(Requirement::Public, false)),
    ("net_version", policy_of(Requirement::Public, false)),
    (
        "eth_sendTransaction",
        policy_of(Requirement::Capability(Capability::SendTransaction), true),
    ),
    (
        "personal_sign",
        policy_of(Requirement::Capability(Capability::SignMessage), true),
    ),
    (
        "eth_signTypedData_v4",
        policy_of(Requirement::Capability(Capability::SignTypedData), true),
    ),
    (
        "wallet_switchEthereumChain",
        policy_of(Requirement::Capability(Capability::SwitchChain), false),
    ),
    ("wallet_getPermissions", policy_of(Requirement::Public, false)),
    ("wallet_requestPermissions", policy_of(Requirement::Public, true)),
    ("wallet_revokePermissions", policy_of(Requirement::Connection, false)),
];

/// Policy for `method`, or `None` when it is not supported.
pub fn policy(method: &str) -> Option<MethodPolicy> {
    POLICIES
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, policy)| *policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_methods_are_public() {
        for method in ["eth_chainId", "net_version", "eth_accounts"] {
            let policy = policy(method).unwrap();
            assert_eq!(policy.requirement, Requirement::Public);
            assert!(!policy.approval);
        }
    }

    #[test]
    fn test_signing_methods_need_capability_and_approval() {
        for (method, cap) in [
            ("eth_sendTransaction", Capability::SendTransaction),
            ("personal_sign", Capability::SignMessage),
            ("eth_signTypedData_v4", Capability::SignTypedData),
        ] {
            let policy = policy(method).unwrap();
            assert_eq!(policy.requirement, Requirement::Capability(cap));
            assert!(policy.approval);
        }
    }

    #[test]
    fn test_unknown_method() {
        assert!(policy("eth_getBalance").is_none());
        assert!(policy("").is_none());
    }

    #[test]
    fn test_approval_methods() {
        let gated: Vec<_> = POLICIES
            .iter()
            .filter(|(_, policy)| policy.approval)
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(
            gated,
            vec![
                "eth_requestAccounts",
                "eth_sendTransaction",
                "personal_sign",
                "eth_signTypedData_v4",
                "wallet_requestPermissions",
            ]
        );
    }
}
