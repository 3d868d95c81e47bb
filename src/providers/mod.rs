//! Payment provider integration module.
//!
//! One adapter per external payment network behind a uniform contract, plus
//! the registry the orchestrators resolve providers through.

pub mod direct;
pub mod hosted;
pub mod legacy;
pub mod onsite;
pub mod registry;
pub mod retry;
pub mod traits;
pub mod types;

pub use registry::{ProviderName, ProviderRegistry};
pub use traits::PaymentProvider;
