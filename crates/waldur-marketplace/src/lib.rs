//! Marketplace client and request models for the Waldur REST API.
//!
//! Orders are the way resources are created, changed and terminated in
//! Waldur. This crate wraps the order lifecycle, consumer and provider views
//! of marketplace resources, offerings and plans, component usage reporting,
//! and the OpenStack instance and volume provisioning flows built on top of
//! orders.

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::{MarketplaceClient, MarketplaceClientBuilder};
pub use models::{
    ComponentUsage, ComponentUsageFilter, CreateComponentUsagesRequest, CreatedResource,
    FlavorChoice, InstanceRequest, OfferingType, OrderRequest, ReportSection, ResourceListParams,
    VolumeRequest,
};

/// Convenient result alias that reuses the shared Waldur error type.
pub type Result<T> = waldur_core::Result<T>;
