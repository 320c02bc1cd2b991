//! Mutation protocol for the stock ledger.
//!
//! This crate provides:
//! - [`MutationRequest`] unifying direct and event-driven writes
//! - [`MutationSerializer`] for per-item, arrival-ordered application
//! - [`LedgerGateway`] for the get / set / adjust request surface
//! - [`parse_set_payload`] and [`parse_delta`] to validate raw input

pub mod error;
pub mod gateway;
pub mod mutation;
pub mod serializer;

pub use error::{LedgerError, Result};
pub use gateway::LedgerGateway;
pub use mutation::{
    MutationKind, MutationOrigin, MutationRequest, parse_delta, parse_set_payload,
};
pub use serializer::MutationSerializer;
