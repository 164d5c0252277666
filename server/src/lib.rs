//! # Service Bus Explorer Engine
//!
//! Topology discovery, non-destructive browsing and message lifecycle
//! operations for a Service Bus namespace. A presentation layer drives the
//! [`coordinator::Coordinator`] and renders its tree and message pages.
//!
//! ## Modules
//!
//! - [`broker`] - Client traits, the Azure adapter and an in-memory broker
//! - [`helper`] - Listing, peeking and scan-based lifecycle operations
//! - [`model`] - Entity arena, connections, paths and message projection
//! - [`filter`] - Search predicate and filtered tree construction
//! - [`coordinator`] - Selection, concurrent refresh and reconciliation
//! - [`config`] - Engine limits and management-plane settings
//! - [`common`] - Error taxonomy
//! - [`utils`] - Environment helpers

pub mod broker;
pub mod common;
pub mod config;
pub mod coordinator;
pub mod filter;
pub mod helper;
pub mod model;
pub mod utils;

pub use common::{ServiceBusError, ServiceBusResult};
