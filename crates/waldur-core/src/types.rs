//! Core Waldur domain types.
//!
//! This module provides the closed set of API collections and the opaque
//! JSON representation used for every resource returned by the server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::{Error, Result};

macro_rules! endpoints {
    ($($(#[$meta:meta])* $variant:ident => $path:literal,)+) => {
        /// Resource collections exposed by the Waldur API.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Endpoint {
            $($(#[$meta])* #[serde(rename = $path)] $variant,)+
        }

        impl Endpoint {
            /// Returns the collection path segment.
            #[must_use]
            pub const fn path(&self) -> &'static str {
                match self {
                    $(Self::$variant => $path,)+
                }
            }

            /// Returns all known endpoints.
            #[must_use]
            pub const fn all() -> &'static [Self] {
                &[$(Self::$variant,)+]
            }
        }

        impl FromStr for Endpoint {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim_matches('/') {
                    $($path => Ok(Self::$variant),)+
                    _ => Err(Error::InvalidEndpoint(format!("Unknown endpoint: {s}"))),
                }
            }
        }
    };
}

endpoints! {
    /// Deployment configuration
    Configuration => "configuration",
    /// Organizations
    Customers => "customers",
    /// Invoices
    Invoices => "invoices",
    /// Invoice line items
    InvoiceItems => "invoice-items",
    /// Component usage reports
    MarketplaceComponentUsages => "marketplace-component-usages",
    /// Marketplace orders
    MarketplaceOrders => "marketplace-orders",
    /// Offerings as seen by their provider
    MarketplaceProviderOfferings => "marketplace-provider-offerings",
    /// Offerings as seen by consumers
    MarketplacePublicOfferings => "marketplace-public-offerings",
    /// Marketplace resources as seen by consumers
    MarketplaceResources => "marketplace-resources",
    /// Marketplace resources as seen by providers
    MarketplaceProviderResources => "marketplace-provider-resources",
    /// Offering users
    MarketplaceOfferingUsers => "marketplace-offering-users",
    /// OpenStack flavors
    OpenStackFlavors => "openstack-flavors",
    /// OpenStack floating IPs
    OpenStackFloatingIps => "openstack-floating-ips",
    /// OpenStack images
    OpenStackImages => "openstack-images",
    /// OpenStack instances
    OpenStackInstances => "openstack-instances",
    /// OpenStack networks
    OpenStackNetworks => "openstack-networks",
    /// OpenStack security groups
    OpenStackSecurityGroups => "openstack-security-groups",
    /// OpenStack server groups
    OpenStackServerGroups => "openstack-server-groups",
    /// OpenStack volume snapshots
    OpenStackSnapshots => "openstack-snapshots",
    /// OpenStack subnets
    OpenStackSubnets => "openstack-subnets",
    /// OpenStack tenants
    OpenStackTenants => "openstack-tenants",
    /// OpenStack volumes
    OpenStackVolumes => "openstack-volumes",
    /// OpenStack volume types
    OpenStackVolumeTypes => "openstack-volume-types",
    /// Payment profiles
    PaymentProfiles => "payment-profiles",
    /// Projects
    Projects => "projects",
    /// Project types
    ProjectTypes => "project-types",
    /// Remote eduTEAMS users
    RemoteEduteams => "remote-eduteams",
    /// Roles
    Roles => "roles",
    /// SSH public keys
    SshKeys => "keys",
    /// Users
    Users => "users",
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Provisioning state reported in a resource's `state` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Stable success terminal state
    Ok,
    /// Error terminal state
    Erred,
    /// Any other value (creating, updating, deleting, ...)
    Transitional(String),
}

impl ResourceState {
    /// Parses the server's state label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "OK" => Self::Ok,
            "Erred" => Self::Erred,
            other => Self::Transitional(other.to_string()),
        }
    }

    /// Returns true for `OK` and `Erred`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Erred)
    }
}

/// Opaque JSON object returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Map<String, Value>);

impl Resource {
    /// Wraps a JSON object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Converts a JSON value, rejecting anything but an object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the value is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::Parse(format!("Expected a JSON object, got: {other}"))),
        }
    }

    /// Returns a raw field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a string field.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns a string field or fails naming the missing key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the field is missing or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.str_field(key)
            .ok_or_else(|| Error::Parse(format!("Response has no `{key}` field")))
    }

    /// The `uuid` field.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        self.str_field("uuid")
    }

    /// The `url` field.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.str_field("url")
    }

    /// The `name` field.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    /// The parsed `state` field.
    #[must_use]
    pub fn state(&self) -> Option<ResourceState> {
        self.str_field("state").map(ResourceState::from_label)
    }

    /// Borrow the underlying object.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwraps into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        resource.into_value()
    }
}
