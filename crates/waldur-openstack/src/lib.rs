//! OpenStack operations for the Waldur REST API.
//!
//! Provides typed request payloads and an asynchronous client for tenants,
//! networks, subnets, security groups, instances, volumes and snapshots.

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::{OpenStackClient, OpenStackClientBuilder};
pub use models::{
    AllocationPool, CreateSecurityGroupRequest, CreateSnapshotRequest, CreateSubnetRequest,
    FloatingIpAssignment, FloatingIpChoice, FloatingIpRef, NetworkAttachment, PortRef,
    ResourceRef, SecurityGroupRule, UpdateSubnetRequest,
};

/// Convenient result alias that reuses the shared Waldur error type.
pub type Result<T> = waldur_core::Result<T>;
