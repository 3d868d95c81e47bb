//! Payment processing and reconciliation for car rental reservations.
//!
//! The crate is organized around a small set of seams: provider adapters
//! behind one trait ([`providers`]), a registry that routes by provider
//! name, orchestrators that own the payment and refund lifecycles
//! ([`orchestrator`]), a webhook reconciler that converges local records
//! towards the provider's view ([`reconciler`]), and a store that owns all
//! persistence and guarded status transitions ([`store`]).

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod idempotency;
pub mod orchestrator;
pub mod providers;
pub mod reconciler;
pub mod reservations;
pub mod store;
