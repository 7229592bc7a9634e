//! Shared plumbing for the sasrig workspace: wire error codes, store path
//! derivation, and test support helpers.

pub mod error;
pub mod paths;
