//! Organizational structure of a Waldur deployment.
//!
//! Customers own projects; users are granted roles on customers, projects
//! and offerings. Invoices are issued per customer and month.

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::{StructureClient, StructureClientBuilder};
pub use models::{
    CustomerRequest, InvoiceState, PaymentProfileType, PermissionFilter, PermissionRequest,
    PermissionScope, ProjectFields,
};

/// Convenient result alias that reuses the shared Waldur error type.
pub type Result<T> = waldur_core::Result<T>;
