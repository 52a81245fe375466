//! # waldur-core
//!
//! Request orchestration layer for the Waldur REST API.
//!
//! Every domain operation in the sibling crates is a URL plus a payload handed
//! to the primitives defined here.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy shared by all Waldur crates
//! - [`identifier`] - Name-or-UUID identifier parsing
//! - [`types`] - Endpoint enumeration and the opaque resource representation
//! - [`query`] - Query parameter builder
//! - [`config`] - Client configuration
//! - [`client`] - Transport executor with retry-on-conflict and redirect handling
//! - [`pagination`] - `Link` header cursor and the page accumulator
//! - [`resolver`] - Name-or-UUID resource resolution
//! - [`poll`] - State polling for long-running operations

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod identifier;
pub mod pagination;
pub mod poll;
pub mod query;
pub mod resolver;
pub mod types;

// Re-export commonly used types
pub use client::{ApiRequest, ApiResponse, RetryPolicy, ServiceClient, ServiceClientBuilder};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use identifier::Identifier;
pub use pagination::PageCursor;
pub use poll::{RecordingSleeper, Sleeper, TokioSleeper, WaitOptions};
pub use query::Query;
pub use resolver::{Lookup, Multiplicity};
pub use types::{Endpoint, Resource, ResourceState};
