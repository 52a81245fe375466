//! Marketplace request models and list parameters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use waldur_core::{Endpoint, Error, Query};
use waldur_openstack::NetworkAttachment;

use crate::Result;

/// Marketplace offering types with an OpenStack scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferingType {
    /// Virtual machine
    #[serde(rename = "OpenStack.Instance")]
    OpenStackInstance,
    /// Block storage volume
    #[serde(rename = "OpenStack.Volume")]
    OpenStackVolume,
}

impl OfferingType {
    /// Wire value of the `offering_type` filter.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenStackInstance => "OpenStack.Instance",
            Self::OpenStackVolume => "OpenStack.Volume",
        }
    }

    /// Collection holding the scope objects of this type.
    #[must_use]
    pub const fn scope_endpoint(&self) -> Endpoint {
        match self {
            Self::OpenStackInstance => Endpoint::OpenStackInstances,
            Self::OpenStackVolume => Endpoint::OpenStackVolumes,
        }
    }
}

impl fmt::Display for OfferingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order for a new resource, addressed by UUIDs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderRequest {
    /// Project UUID.
    pub project_uuid: String,
    /// Public offering UUID.
    pub offering_uuid: String,
    /// Plan UUID.
    pub plan_uuid: Option<String>,
    /// Offering-specific attributes.
    pub attributes: Map<String, Value>,
    /// Component limits.
    pub limits: Map<String, Value>,
    /// URL notified when the order changes state.
    pub callback_url: Option<String>,
}

impl OrderRequest {
    /// Order without plan, attributes or limits.
    #[must_use]
    pub fn new(project_uuid: impl Into<String>, offering_uuid: impl Into<String>) -> Self {
        Self {
            project_uuid: project_uuid.into(),
            offering_uuid: offering_uuid.into(),
            ..Self::default()
        }
    }

    /// Set the plan.
    #[must_use]
    pub fn with_plan(mut self, plan_uuid: impl Into<String>) -> Self {
        self.plan_uuid = Some(plan_uuid.into());
        self
    }

    /// Set the attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Map<String, Value>) -> Self {
        self.limits = limits;
        self
    }
}

/// Result of ordering a generic marketplace resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    /// UUID of the creation order.
    pub create_order_uuid: String,
    /// UUID of the marketplace resource.
    pub marketplace_resource_uuid: String,
}

/// Filters for the marketplace resource lists.
#[derive(Debug, Default, Clone)]
pub struct ResourceListParams {
    /// Filter by service provider UUID.
    pub provider_uuid: Option<String>,
    /// Filter by resource state.
    pub state: Option<String>,
    /// Filter by offering UUID.
    pub offering_uuid: Option<String>,
    /// Filter by project UUID.
    pub project_uuid: Option<String>,
    /// Restrict the returned fields.
    pub fields: Vec<String>,
}

impl ResourceListParams {
    /// Convert the parameters into a query.
    #[must_use]
    pub fn to_query(&self) -> Query {
        let mut params = Query::new();
        params.push_opt("provider_uuid", self.provider_uuid.as_deref());
        params.push_opt("state", self.state.as_deref());
        params.push_opt("offering_uuid", self.offering_uuid.as_deref());
        params.push_opt("project_uuid", self.project_uuid.as_deref());
        params.push_all("field", &self.fields);
        params
    }
}

/// Section of a resource report submitted by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    /// Section title.
    pub header: String,
    /// Section text.
    pub body: String,
}

/// Usage of one offering component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentUsage {
    /// Component type, e.g. `cpu` or `storage`.
    #[serde(rename = "type")]
    pub component_type: String,
    /// Consumed amount.
    pub amount: f64,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ComponentUsage {
    /// Usage without description.
    #[must_use]
    pub fn new(component_type: impl Into<String>, amount: f64) -> Self {
        Self {
            component_type: component_type.into(),
            amount,
            description: None,
        }
    }
}

/// Payload for `marketplace-component-usages/set_usage/`.
///
/// The usages are attached to a plan period when one is given, otherwise to
/// the resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateComponentUsagesRequest {
    /// Reported usages.
    pub usages: Vec<ComponentUsage>,
    /// Plan period UUID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_period: Option<String>,
    /// Marketplace resource UUID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl CreateComponentUsagesRequest {
    /// Report for a plan period.
    #[must_use]
    pub fn for_plan_period(plan_period: impl Into<String>, usages: Vec<ComponentUsage>) -> Self {
        Self {
            usages,
            plan_period: Some(plan_period.into()),
            resource: None,
        }
    }

    /// Report for a resource.
    #[must_use]
    pub fn for_resource(resource: impl Into<String>, usages: Vec<ComponentUsage>) -> Self {
        Self {
            usages,
            plan_period: None,
            resource: Some(resource.into()),
        }
    }

    /// Returns the payload actually sent: the plan period wins over the resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if neither target is given.
    pub fn normalized(&self) -> Result<Self> {
        match (&self.plan_period, &self.resource) {
            (Some(plan_period), _) => Ok(Self::for_plan_period(
                plan_period.clone(),
                self.usages.clone(),
            )),
            (None, Some(resource)) => Ok(Self::for_resource(resource.clone(), self.usages.clone())),
            (None, None) => Err(Error::Validation(
                "Neither plan_period_uuid nor resource_uuid provided".to_string(),
            )),
        }
    }
}

/// Filters for listing component usages of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentUsageFilter {
    /// Marketplace resource UUID.
    pub resource_uuid: String,
    /// Only usages on or after this date.
    pub date_after: Option<NaiveDate>,
    /// Only usages on or before this date.
    pub date_before: Option<NaiveDate>,
}

impl ComponentUsageFilter {
    /// Filter by resource only.
    #[must_use]
    pub fn new(resource_uuid: impl Into<String>) -> Self {
        Self {
            resource_uuid: resource_uuid.into(),
            date_after: None,
            date_before: None,
        }
    }

    /// Convert the filter into a query.
    #[must_use]
    pub fn to_query(&self) -> Query {
        let mut params = Query::with("resource_uuid", &self.resource_uuid);
        params.push_opt_with("date_after", self.date_after, |d| d.format("%Y-%m-%d").to_string());
        params.push_opt_with("date_before", self.date_before, |d| d.format("%Y-%m-%d").to_string());
        params
    }
}

/// How the flavor of a new instance is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlavorChoice {
    /// Flavor name or UUID.
    Named(String),
    /// Smallest flavor with at least this many cores and MiB of RAM.
    Capacity {
        /// Minimum cores.
        min_cpu: Option<u32>,
        /// Minimum RAM in MiB.
        min_ram: Option<u32>,
    },
}

impl Default for FlavorChoice {
    fn default() -> Self {
        Self::Capacity {
            min_cpu: None,
            min_ram: None,
        }
    }
}

/// Parameters of an OpenStack instance ordered through the marketplace.
///
/// Sizes are given in GiB; the order carries MiB.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceRequest {
    /// Instance name.
    pub name: String,
    /// Offering name or UUID.
    pub offering: String,
    /// Project name or UUID.
    pub project: String,
    /// Image name or UUID.
    pub image: String,
    /// Flavor selection.
    pub flavor: FlavorChoice,
    /// System volume size in GiB.
    pub system_volume_size: u64,
    /// System volume type name or UUID.
    pub system_volume_type: Option<String>,
    /// Data volume size in GiB; no data volume when absent.
    pub data_volume_size: Option<u64>,
    /// Data volume type name or UUID.
    pub data_volume_type: Option<String>,
    /// Subnets and floating IPs.
    pub networks: Vec<NetworkAttachment>,
    /// Security group names of the tenant.
    pub security_groups: Vec<String>,
    /// SSH key name or UUID.
    pub ssh_key: Option<String>,
    /// Server group name or UUID.
    pub server_group: Option<String>,
    /// Cloud-init user data.
    pub user_data: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
}

/// Parameters of an OpenStack volume ordered through the marketplace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRequest {
    /// Volume name.
    pub name: String,
    /// Offering name or UUID.
    pub offering: String,
    /// Project name or UUID.
    pub project: String,
    /// Size in GiB.
    pub size: u64,
    /// Volume type name or UUID.
    pub volume_type: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
}
