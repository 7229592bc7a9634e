//! Sasrig Trust — certificate lifecycle for a mutual-TLS test harness.
//!
//! Owns the on-disk certificate store and everything that keeps it usable:
//! inspection of existing material, `rcgen`-based bundle generation, staged
//! atomic replacement, CRL distribution over HTTP, and the orchestrator that
//! decides per run whether the store is reused or regenerated before the
//! harness is launched against it.

pub mod error;
pub mod generate;
pub mod http;
pub mod inspect;
pub mod lifecycle;
pub mod store;
pub mod swap;

pub use error::TrustError;
