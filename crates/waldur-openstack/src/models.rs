//! Request payloads for the OpenStack endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waldur_core::Error;

use crate::Result;

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

fn check_gateway(gateway_ip: Option<&str>, disable_gateway: bool) -> Result<()> {
    match (gateway_ip.filter(|ip| !ip.is_empty()), disable_gateway) {
        (Some(_), true) => Err(Error::Validation(
            "Gateway IP cannot be set if disabling gateway is requested".to_string(),
        )),
        (None, false) => Err(Error::Validation(
            "Either gateway IP must be set or it must be disabled".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Contiguous address range handed out by DHCP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationPool {
    /// First address of the pool.
    pub start: String,
    /// Last address of the pool.
    pub end: String,
}

/// Payload for `openstack-networks/<uuid>/create_subnet/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSubnetRequest {
    /// Subnet name.
    pub name: String,
    /// Address range in CIDR notation.
    pub cidr: String,
    /// DHCP allocation pools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocation_pools: Vec<AllocationPool>,
    /// Enable DHCP on the subnet.
    #[serde(default)]
    pub enable_dhcp: bool,
    /// DNS servers advertised to instances.
    #[serde(default)]
    pub dns_nameservers: Vec<String>,
    /// Create the subnet without a gateway.
    #[serde(default)]
    pub disable_gateway: bool,
    /// Gateway address; mutually exclusive with `disable_gateway`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<String>,
}

impl CreateSubnetRequest {
    /// Create a request routed through `gateway_ip`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        cidr: impl Into<String>,
        gateway_ip: impl Into<String>,
    ) -> Self {
        Self {
            gateway_ip: Some(gateway_ip.into()),
            ..Self::without_gateway(name, cidr)
        }
    }

    /// Create a request for a subnet with its gateway disabled.
    #[must_use]
    pub fn without_gateway(name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
            allocation_pools: Vec::new(),
            enable_dhcp: false,
            dns_nameservers: Vec::new(),
            disable_gateway: true,
            gateway_ip: None,
        }
    }

    /// Checks the gateway flags: exactly one of `gateway_ip` and
    /// `disable_gateway` must be given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] otherwise.
    pub fn validate(&self) -> Result<()> {
        check_gateway(self.gateway_ip.as_deref(), self.disable_gateway)
    }
}

/// Changes applied by [`crate::OpenStackClient::update_subnet`].
///
/// The connectivity flags trigger the matching subnet actions before the
/// fields are written; they are never part of the `PUT` body.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UpdateSubnetRequest {
    /// New subnet name.
    pub name: String,
    /// Tenant URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Gateway address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<String>,
    /// Remove the gateway.
    #[serde(skip_serializing_if = "is_false")]
    pub disable_gateway: bool,
    /// Enable DHCP.
    #[serde(skip_serializing_if = "is_false")]
    pub enable_dhcp: bool,
    /// DNS servers; left untouched when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns_nameservers: Vec<String>,
    /// Connect the subnet to the tenant router.
    #[serde(skip)]
    pub connect: bool,
    /// Disconnect the subnet from the tenant router.
    #[serde(skip)]
    pub disconnect: bool,
    /// Remove the subnet from Waldur without touching the backend.
    #[serde(skip)]
    pub unlink: bool,
}

impl UpdateSubnetRequest {
    /// Checks gateway and connectivity flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for conflicting or missing gateway flags,
    /// or when both `connect` and `disconnect` are requested.
    pub fn validate(&self) -> Result<()> {
        check_gateway(self.gateway_ip.as_deref(), self.disable_gateway)?;
        if self.connect && self.disconnect {
            return Err(Error::Validation(
                "connect_subnet and disconnect_subnet cannot both be True".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single security group rule as understood by Waldur.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroupRule {
    /// `IPv4` or `IPv6`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethertype: Option<String>,
    /// `ingress` or `egress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// `tcp`, `udp`, `icmp` or empty for any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Lower port bound (ICMP type for `icmp`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<i32>,
    /// Upper port bound (ICMP code for `icmp`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<i32>,
    /// Remote address range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    /// Remote security group URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_group: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SecurityGroupRule {
    /// Ingress TCP rule for a single port from a CIDR.
    #[must_use]
    pub fn tcp_ingress(port: i32, cidr: impl Into<String>) -> Self {
        Self {
            ethertype: Some("IPv4".to_string()),
            direction: Some("ingress".to_string()),
            protocol: Some("tcp".to_string()),
            from_port: Some(port),
            to_port: Some(port),
            cidr: Some(cidr.into()),
            ..Self::default()
        }
    }
}

/// Payload for `openstack-tenants/<uuid>/create_security_group/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSecurityGroupRequest {
    /// Group name.
    pub name: String,
    /// Rules of the group.
    pub rules: Vec<SecurityGroupRule>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Payload for `openstack-volumes/<uuid>/snapshot/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSnapshotRequest {
    /// Snapshot name.
    pub name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Guaranteed retention; kept forever when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kept_until: Option<DateTime<Utc>>,
}

/// Reference to another resource by URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    /// Resource URL.
    pub url: String,
}

/// Port of an instance on a subnet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRef {
    /// Subnet URL.
    pub subnet: String,
}

/// Floating IP bound to a subnet. Without `url` Waldur allocates one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FloatingIpRef {
    /// Subnet URL.
    pub subnet: String,
    /// Existing floating IP URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Existing floating IP to move onto an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIpAssignment {
    /// Floating IP address.
    pub address: String,
    /// Subnet name or UUID.
    pub subnet: String,
}

/// How a network attachment obtains its floating IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloatingIpChoice {
    /// Allocate a new one.
    Auto,
    /// Use an existing address.
    Address(String),
}

impl FloatingIpChoice {
    /// Interprets `auto` as [`FloatingIpChoice::Auto`] and anything else as an address.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "auto" {
            Self::Auto
        } else {
            Self::Address(value.to_string())
        }
    }
}

/// A subnet the instance is attached to, optionally with a floating IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    /// Subnet name or UUID.
    pub subnet: String,
    /// Floating IP to attach.
    pub floating_ip: Option<FloatingIpChoice>,
}

impl NetworkAttachment {
    /// Attachment without a floating IP.
    #[must_use]
    pub fn subnet(subnet: impl Into<String>) -> Self {
        Self {
            subnet: subnet.into(),
            floating_ip: None,
        }
    }

    /// Attach a floating IP as well.
    #[must_use]
    pub fn with_floating_ip(mut self, choice: FloatingIpChoice) -> Self {
        self.floating_ip = Some(choice);
        self
    }
}
