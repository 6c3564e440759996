//! # tether-core
//!
//! Foundation types for the Tether real-time connection layer.
//!
//! This crate provides the shared vocabulary the client crates depend on:
//!
//! - **Connection state**: [`ConnectionState`] lifecycle enum and [`DisconnectReason`]
//! - **Wire frames**: [`Frame`] (`{ "type", "data" }`) and the reserved frame types
//! - **Branded IDs**: [`MessageId`], [`SubscriptionId`] as newtypes for type safety
//! - **Errors**: [`TetherError`] taxonomy via `thiserror`
//! - **Backoff**: [`BackoffScheduler`] with injectable [`Jitter`]

#![deny(unsafe_code)]

pub mod backoff;
pub mod credential;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod state;

pub use backoff::{BackoffConfig, BackoffScheduler, FixedJitter, Jitter, RandomJitter, SeededJitter};
pub use credential::Credential;
pub use errors::{Result, TetherError};
pub use frame::{Frame, events};
pub use ids::{MessageId, SubscriptionId};
pub use state::{ConnectionState, DisconnectReason};
