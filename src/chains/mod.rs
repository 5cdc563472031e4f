//! Chain subsystem.
//!
//! - registry.rs: static chain table, id normalization (`56`, `"56"`, `"0x38"`)
//! - active.rs: the wallet's currently selected chain, persisted

pub mod active;
pub mod registry;

pub use active::{ActiveChain, ActiveChainSnapshot};
pub use registry::{chain_id_hex, parse_chain_id, resolve_chain_id, Chain, ChainRegistry};
