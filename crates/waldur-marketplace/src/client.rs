//! Asynchronous marketplace client implementation.

use crate::models::{
    ComponentUsageFilter, CreateComponentUsagesRequest, CreatedResource, FlavorChoice,
    InstanceRequest, OfferingType, OrderRequest, ReportSection, ResourceListParams, VolumeRequest,
};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;
use waldur_core::client::{STATUS_ACCEPTED, STATUS_CREATED, STATUS_OK};
use waldur_core::identifier::{is_uuid, NAME_FILTER};
use waldur_core::{
    ClientConfig, Endpoint, Error, Query, Resource, ServiceClient, ServiceClientBuilder, Sleeper,
    WaitOptions,
};
use waldur_openstack::{FloatingIpRef, OpenStackClient, PortRef, ResourceRef};

const USER_AGENT: &str = concat!("waldur-marketplace/", env!("CARGO_PKG_VERSION"));

/// Marketplace resource states matched when a scope is looked up by name.
const SCOPE_STATES: [&str; 5] = ["Creating", "OK", "Erred", "Updating", "Terminating"];

/// Offering states accepted when an offering is looked up by name.
const ORDERABLE_OFFERING_STATES: [&str; 2] = ["Active", "Paused"];

const MIB_PER_GIB: u64 = 1024;

#[derive(Serialize)]
struct OrderPayload<'a> {
    project: String,
    offering: String,
    attributes: &'a Map<String, Value>,
    limits: &'a Map<String, Value>,
    accepting_terms_of_service: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Serialize)]
struct InstanceAttributes<'a> {
    name: &'a str,
    flavor: String,
    image: String,
    system_volume_size: u64,
    ports: Vec<PortRef>,
    floating_ips: Vec<FloatingIpRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_groups: Vec<ResourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_volume_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_group: Option<String>,
}

#[derive(Serialize)]
struct VolumeAttributes<'a> {
    name: &'a str,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    volume_type: Option<String>,
}

fn to_attributes<T: Serialize>(attributes: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(attributes)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Parse(format!("Attributes must be an object, got {other}"))),
    }
}

fn gib_to_mib(size: u64) -> Result<u64> {
    size.checked_mul(MIB_PER_GIB)
        .ok_or_else(|| Error::Validation(format!("Size of {size} GiB is too large")))
}

fn url_of(resource: &Resource) -> Result<String> {
    resource.require_str("url").map(str::to_string)
}

fn order_uuid_of(reply: &Value) -> Result<String> {
    reply
        .get("order_uuid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Parse("Response has no `order_uuid` field".to_string()))
}

fn termination_body(
    options: Option<&Map<String, Value>>,
    callback_url: Option<&str>,
) -> Option<Value> {
    let mut body = Map::new();
    if let Some(options) = options.filter(|o| !o.is_empty()) {
        body.insert("attributes".to_string(), Value::Object(options.clone()));
    }
    if let Some(callback_url) = callback_url {
        body.insert("callback_url".to_string(), Value::String(callback_url.to_string()));
    }
    (!body.is_empty()).then_some(Value::Object(body))
}

/// Builder for [`MarketplaceClient`].
pub struct MarketplaceClientBuilder {
    inner: ServiceClientBuilder,
}

impl MarketplaceClientBuilder {
    /// Create a builder from the client configuration.
    #[must_use]
    pub fn new(mut config: ClientConfig) -> Self {
        if config.user_agent.is_none() {
            config = config.with_user_agent(USER_AGENT);
        }
        Self {
            inner: ServiceClientBuilder::new(config),
        }
    }

    /// Override how the client pauses between retries and polls.
    #[must_use]
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.inner = self.inner.with_sleeper(sleeper);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<MarketplaceClient> {
        Ok(MarketplaceClient::from(self.inner.build()?))
    }
}

/// Asynchronous client for the Waldur marketplace.
#[derive(Debug, Clone)]
pub struct MarketplaceClient {
    inner: ServiceClient,
    openstack: OpenStackClient,
}

impl From<ServiceClient> for MarketplaceClient {
    fn from(inner: ServiceClient) -> Self {
        let openstack = OpenStackClient::from(inner.clone());
        Self { inner, openstack }
    }
}

impl MarketplaceClient {
    /// Construct a client directly from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        MarketplaceClientBuilder::new(config).build()
    }

    /// Start a builder for the configuration.
    #[must_use]
    pub fn builder(config: ClientConfig) -> MarketplaceClientBuilder {
        MarketplaceClientBuilder::new(config)
    }

    /// Return the API root URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    /// OpenStack client sharing this client's connection pool.
    #[must_use]
    pub const fn openstack(&self) -> &OpenStackClient {
        &self.openstack
    }

    // ----- orders -----

    /// Order a resource in a project. Project, offering and plan may be given
    /// by name or UUID; an offering name is looked up within the project.
    pub async fn create_order(
        &self,
        project: &str,
        offering: &str,
        plan: Option<&str>,
        attributes: Map<String, Value>,
        limits: Map<String, Value>,
    ) -> Result<Resource> {
        let project_resource = self
            .inner
            .get_resource(Endpoint::Projects, project, None)
            .await?;
        let project_uuid = project_resource.require_str("uuid")?;
        let offering = self.get_offering(offering, Some(project_uuid)).await?;
        let offering_uuid = offering.require_str("uuid")?;

        let mut request = OrderRequest::new(project_uuid, offering_uuid)
            .with_attributes(attributes)
            .with_limits(limits);
        if let Some(plan) = plan {
            let plan = self.get_plan_details(offering_uuid, plan).await?;
            request = request.with_plan(plan.require_str("uuid")?);
        }
        self.submit_order(&request).await
    }

    /// Submit an order addressed by UUIDs.
    pub async fn submit_order(&self, request: &OrderRequest) -> Result<Resource> {
        let payload = OrderPayload {
            project: self
                .inner
                .resource_url(Endpoint::Projects, &request.project_uuid, None)?
                .to_string(),
            offering: self
                .inner
                .resource_url(Endpoint::MarketplacePublicOfferings, &request.offering_uuid, None)?
                .to_string(),
            attributes: &request.attributes,
            limits: &request.limits,
            accepting_terms_of_service: true,
            plan: request
                .plan_uuid
                .as_deref()
                .map(|plan| self.plan_url(&request.offering_uuid, plan))
                .transpose()?
                .map(|url| url.to_string()),
            callback_url: request.callback_url.as_deref(),
        };
        let order = self.inner.create(Endpoint::MarketplaceOrders, &payload).await?;
        info!(order = ?order.uuid(), "Submitted marketplace order");
        Ok(order)
    }

    /// Order a generic resource and wait until the order exposes the
    /// marketplace resource.
    pub async fn create_resource(
        &self,
        request: &OrderRequest,
        wait: &WaitOptions,
    ) -> Result<CreatedResource> {
        let order = self.submit_order(request).await?;
        let order_uuid = order.require_str("uuid")?;
        let marketplace_resource_uuid = self
            .inner
            .wait_for_order_resource(
                order_uuid,
                "marketplace_resource_uuid",
                wait.interval,
                wait.timeout,
            )
            .await?;
        Ok(CreatedResource {
            create_order_uuid: order_uuid.to_string(),
            marketplace_resource_uuid,
        })
    }

    /// Fetch an order by UUID.
    pub async fn get_order(&self, order_uuid: &str) -> Result<Resource> {
        self.inner
            .get_resource(Endpoint::MarketplaceOrders, order_uuid, None)
            .await
    }

    /// List orders.
    pub async fn list_orders(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::MarketplaceOrders, filters)
            .await
    }

    /// Approve an order as the consumer.
    pub async fn approve_order_by_consumer(&self, order_uuid: &str) -> Result<Value> {
        self.order_action(order_uuid, "approve_by_consumer", STATUS_OK, None)
            .await
    }

    /// Approve an order as the provider.
    pub async fn approve_order_by_provider(&self, order_uuid: &str) -> Result<Value> {
        self.order_action(order_uuid, "approve_by_provider", STATUS_OK, None)
            .await
    }

    /// Reject an order as the consumer.
    pub async fn reject_order_by_consumer(&self, order_uuid: &str) -> Result<Value> {
        self.order_action(order_uuid, "reject_by_consumer", STATUS_OK, None)
            .await
    }

    /// Reject an order as the provider.
    pub async fn reject_order_by_provider(&self, order_uuid: &str) -> Result<Value> {
        self.order_action(order_uuid, "reject_by_provider", STATUS_OK, None)
            .await
    }

    /// Cancel a pending order.
    pub async fn cancel_order(&self, order_uuid: &str) -> Result<Value> {
        self.order_action(order_uuid, "cancel", STATUS_ACCEPTED, None)
            .await
    }

    /// Mark an order as being executed.
    pub async fn set_order_executing(&self, order_uuid: &str) -> Result<Value> {
        self.order_action(order_uuid, "set_state_executing", STATUS_OK, None)
            .await
    }

    /// Mark an order as done.
    pub async fn set_order_done(&self, order_uuid: &str) -> Result<Value> {
        self.order_action(order_uuid, "set_state_done", STATUS_OK, None)
            .await
    }

    /// Mark an order as failed.
    pub async fn set_order_erred(
        &self,
        order_uuid: &str,
        error_message: &str,
        error_traceback: &str,
    ) -> Result<Value> {
        let payload = json!({
            "error_message": error_message,
            "error_traceback": error_traceback,
        });
        self.order_action(order_uuid, "set_state_erred", STATUS_OK, Some(&payload))
            .await
    }

    async fn order_action(
        &self,
        order_uuid: &str,
        action: &str,
        expected: &[u16],
        body: Option<&Value>,
    ) -> Result<Value> {
        self.inner
            .action(Endpoint::MarketplaceOrders, order_uuid, action, expected, body)
            .await
    }

    // ----- resources -----

    /// Fetch a marketplace resource by name or UUID.
    pub async fn get_resource(&self, resource: &str) -> Result<Resource> {
        self.inner
            .get_resource(Endpoint::MarketplaceResources, resource, None)
            .await
    }

    /// Fetch a marketplace resource from the provider view.
    pub async fn get_provider_resource(&self, resource: &str) -> Result<Resource> {
        self.inner
            .get_resource(Endpoint::MarketplaceProviderResources, resource, None)
            .await
    }

    /// List marketplace resources.
    pub async fn list_resources(&self, params: &ResourceListParams) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::MarketplaceResources, Some(&params.to_query()))
            .await
    }

    /// List marketplace resources from the provider view.
    pub async fn list_provider_resources(
        &self,
        params: &ResourceListParams,
    ) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::MarketplaceProviderResources, Some(&params.to_query()))
            .await
    }

    /// Count marketplace resources matching the filters.
    pub async fn count_resources(&self, filters: &Query) -> Result<u64> {
        let url = self.inner.url_for(Endpoint::MarketplaceResources)?;
        self.inner.count(&url, filters).await
    }

    /// Count marketplace resources from the provider view.
    pub async fn count_provider_resources(&self, filters: &Query) -> Result<u64> {
        let url = self.inner.url_for(Endpoint::MarketplaceProviderResources)?;
        self.inner.count(&url, filters).await
    }

    /// Partially update a marketplace resource.
    pub async fn update_resource(
        &self,
        resource_uuid: &str,
        fields: &Map<String, Value>,
    ) -> Result<Resource> {
        self.inner
            .partial_update(Endpoint::MarketplaceResources, resource_uuid, fields)
            .await
    }

    /// Request new limits; returns the UUID of the update order.
    pub async fn update_resource_limits(
        &self,
        resource_uuid: &str,
        limits: &Map<String, Value>,
        callback_url: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({ "limits": limits });
        if let Some(callback_url) = callback_url {
            payload["callback_url"] = Value::String(callback_url.to_string());
        }
        let reply = self
            .inner
            .action(
                Endpoint::MarketplaceResources,
                resource_uuid,
                "update_limits",
                STATUS_OK,
                Some(&payload),
            )
            .await?;
        order_uuid_of(&reply)
    }

    /// Request termination; returns the UUID of the termination order.
    /// Options are sent as the order `attributes`.
    pub async fn terminate_resource(
        &self,
        resource_uuid: &str,
        options: Option<&Map<String, Value>>,
        callback_url: Option<&str>,
    ) -> Result<String> {
        self.terminate(Endpoint::MarketplaceResources, resource_uuid, options, callback_url)
            .await
    }

    /// Request termination from the provider view.
    pub async fn terminate_provider_resource(
        &self,
        resource_uuid: &str,
        options: Option<&Map<String, Value>>,
        callback_url: Option<&str>,
    ) -> Result<String> {
        self.terminate(
            Endpoint::MarketplaceProviderResources,
            resource_uuid,
            options,
            callback_url,
        )
        .await
    }

    async fn terminate(
        &self,
        endpoint: Endpoint,
        resource_uuid: &str,
        options: Option<&Map<String, Value>>,
        callback_url: Option<&str>,
    ) -> Result<String> {
        let body = termination_body(options, callback_url);
        let reply = self
            .inner
            .action(endpoint, resource_uuid, "terminate", STATUS_OK, body.as_ref())
            .await?;
        order_uuid_of(&reply)
    }

    /// Replace the options of a resource.
    pub async fn update_resource_options(
        &self,
        resource_uuid: &str,
        options: &Map<String, Value>,
    ) -> Result<Value> {
        let payload = json!({ "options": options });
        self.inner
            .action(
                Endpoint::MarketplaceResources,
                resource_uuid,
                "update_options",
                STATUS_OK,
                Some(&payload),
            )
            .await
    }

    /// Plan periods of a resource.
    pub async fn resource_plan_periods(&self, resource_uuid: &str) -> Result<Value> {
        let url = self.inner.resource_url(
            Endpoint::MarketplaceResources,
            resource_uuid,
            Some("plan_periods"),
        )?;
        self.inner.get(&url, &Query::new()).await
    }

    /// Record the backend identifier of a resource.
    pub async fn set_backend_id(&self, resource_uuid: &str, backend_id: &str) -> Result<Value> {
        let payload = json!({ "backend_id": backend_id });
        self.provider_action(resource_uuid, "set_backend_id", Some(&payload))
            .await
    }

    /// Record backend metadata of a resource.
    pub async fn set_backend_metadata(
        &self,
        resource_uuid: &str,
        backend_metadata: &Map<String, Value>,
    ) -> Result<Value> {
        let payload = json!({ "backend_metadata": backend_metadata });
        self.provider_action(resource_uuid, "set_backend_metadata", Some(&payload))
            .await
    }

    /// Mark a resource as erred, optionally with error details.
    pub async fn set_resource_erred(
        &self,
        resource_uuid: &str,
        error_details: Option<&Map<String, Value>>,
    ) -> Result<Value> {
        let payload = error_details.map(|details| Value::Object(details.clone()));
        self.provider_action(resource_uuid, "set_as_erred", payload.as_ref())
            .await
    }

    /// Mark a resource as OK.
    pub async fn set_resource_ok(&self, resource_uuid: &str) -> Result<Value> {
        self.provider_action(resource_uuid, "set_as_ok", None).await
    }

    /// Attach a report to a resource.
    pub async fn submit_report(
        &self,
        resource_uuid: &str,
        report: &[ReportSection],
    ) -> Result<Value> {
        let payload = json!({ "report": report });
        self.provider_action(resource_uuid, "submit_report", Some(&payload))
            .await
    }

    /// Team of the project owning a resource, from the provider view.
    pub async fn resource_team(&self, resource_uuid: &str) -> Result<Value> {
        let url = self.inner.resource_url(
            Endpoint::MarketplaceProviderResources,
            resource_uuid,
            Some("team"),
        )?;
        self.inner.get(&url, &Query::new()).await
    }

    async fn provider_action(
        &self,
        resource_uuid: &str,
        action: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        self.inner
            .action(
                Endpoint::MarketplaceProviderResources,
                resource_uuid,
                action,
                STATUS_OK,
                body,
            )
            .await
    }

    /// Find the marketplace resource and its scope object (instance or
    /// volume). A UUID is matched against the scope URL; a name is matched
    /// within live resource states and, when given, the project.
    ///
    /// # Errors
    ///
    /// * [`Error::Validation`] for a name without a project
    /// * [`Error::ObjectDoesNotExist`] when nothing matched or the scope is empty
    /// * [`Error::MultipleObjectsReturned`] when several resources matched
    pub async fn resource_scope(
        &self,
        name: &str,
        offering_type: OfferingType,
        project: Option<&str>,
    ) -> Result<(Resource, Resource)> {
        let project = project.filter(|p| !p.is_empty());
        if !is_uuid(name) && project.is_none() {
            return Err(Error::Validation(
                "You should specify project name if name is not UUID".to_string(),
            ));
        }

        let mut query = Query::with("offering_type", offering_type);
        if is_uuid(name) {
            let scope_url = self
                .inner
                .resource_url(offering_type.scope_endpoint(), name, None)?;
            query.push("scope", scope_url);
        } else {
            query.push_all("state", SCOPE_STATES);
            query.push(NAME_FILTER, name);
        }
        if let Some(project) = project {
            let key = if is_uuid(project) {
                "project_uuid"
            } else {
                "project_name"
            };
            query.push(key, project);
        }

        let url = self.inner.url_for(Endpoint::MarketplaceResources)?;
        let mut matches: Vec<Resource> = self.inner.get_json(&url, &query).await?;
        let resource = match matches.len() {
            0 => {
                return Err(Error::ObjectDoesNotExist(format!(
                    "Result is empty. Endpoint: {}. Query: {query}",
                    Endpoint::MarketplaceResources
                )))
            }
            1 => matches.remove(0),
            _ => {
                return Err(Error::MultipleObjectsReturned(format!(
                    "Ambiguous result. Endpoint: {url}. Query: {query}"
                )))
            }
        };

        let scope_url = self.inner.absolute_url(resource.require_str("scope")?)?;
        let scope = self.inner.get(&scope_url, &Query::new()).await?;
        let scope = match scope {
            Value::Object(fields) if !fields.is_empty() => Resource::new(fields),
            _ => {
                return Err(Error::ObjectDoesNotExist(format!(
                    "Result is empty. Endpoint: {}. Query: {query}",
                    Endpoint::MarketplaceResources
                )))
            }
        };
        Ok((resource, scope))
    }

    // ----- offerings and plans -----

    /// Resolve a public offering. A UUID is fetched directly; a name is
    /// looked up among the active or paused offerings of the project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a name without a project.
    pub async fn get_offering(&self, offering: &str, project: Option<&str>) -> Result<Resource> {
        if is_uuid(offering) {
            return self
                .inner
                .get_resource_by_uuid(Endpoint::MarketplacePublicOfferings, offering)
                .await;
        }
        let Some(project) = project.filter(|p| !p.is_empty()) else {
            return Err(Error::Validation(
                "You should specify project name if offering is not UUID".to_string(),
            ));
        };
        let project_uuid = if is_uuid(project) {
            project.to_string()
        } else {
            self.inner
                .get_resource(Endpoint::Projects, project, None)
                .await?
                .require_str("uuid")?
                .to_string()
        };

        let mut extra = Query::with("project_uuid", project_uuid);
        extra.push_all("state", ORDERABLE_OFFERING_STATES);
        self.inner
            .get_resource(Endpoint::MarketplacePublicOfferings, offering, Some(&extra))
            .await
    }

    /// Fetch a public offering by UUID.
    pub async fn get_public_offering(&self, offering_uuid: &str) -> Result<Resource> {
        self.inner
            .get_resource_by_uuid(Endpoint::MarketplacePublicOfferings, offering_uuid)
            .await
    }

    /// Fetch an offering from the provider view by UUID.
    pub async fn get_provider_offering(&self, offering_uuid: &str) -> Result<Resource> {
        self.inner
            .get_resource_by_uuid(Endpoint::MarketplaceProviderOfferings, offering_uuid)
            .await
    }

    /// List public offerings.
    pub async fn list_public_offerings(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::MarketplacePublicOfferings, filters)
            .await
    }

    /// List offerings from the provider view.
    pub async fn list_provider_offerings(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::MarketplaceProviderOfferings, filters)
            .await
    }

    /// Plans of a public offering.
    pub async fn get_offering_plans(&self, offering_uuid: &str) -> Result<Vec<Resource>> {
        let url = self.inner.resource_url(
            Endpoint::MarketplacePublicOfferings,
            offering_uuid,
            Some("plans"),
        )?;
        self.inner.get_json(&url, &Query::new()).await
    }

    /// Details of one plan of a public offering.
    pub async fn get_plan_details(&self, offering_uuid: &str, plan_uuid: &str) -> Result<Resource> {
        let url = self.plan_url(offering_uuid, plan_uuid)?;
        self.inner.get_json(&url, &Query::new()).await
    }

    fn plan_url(&self, offering_uuid: &str, plan_uuid: &str) -> Result<Url> {
        if offering_uuid.trim().is_empty() || plan_uuid.trim().is_empty() {
            return Err(Error::Validation("Empty ID is not allowed.".to_string()));
        }
        self.inner.path_url(&format!(
            "{}/{}/plans/{}",
            Endpoint::MarketplacePublicOfferings,
            offering_uuid.trim(),
            plan_uuid.trim()
        ))
    }

    // ----- OpenStack provisioning -----

    /// Order an OpenStack instance and return its UUID.
    ///
    /// The order is followed until it references the instance. With
    /// `wait.wait` the instance is then polled until `OK`, and until it has
    /// an external IP when floating IPs were requested.
    pub async fn create_instance(
        &self,
        request: &InstanceRequest,
        wait: &WaitOptions,
    ) -> Result<String> {
        let system_volume_size = gib_to_mib(request.system_volume_size)?;
        let data_volume_size = request
            .data_volume_size
            .filter(|size| *size > 0)
            .map(gib_to_mib)
            .transpose()?;
        let offering = self
            .get_offering(&request.offering, Some(&request.project))
            .await?;
        let tenant_uuid = offering.require_str("scope_uuid")?;
        let openstack = &self.openstack;

        let flavor = match &request.flavor {
            FlavorChoice::Named(flavor) => openstack.get_flavor(flavor, tenant_uuid).await?,
            FlavorChoice::Capacity { min_cpu, min_ram } => {
                openstack.get_flavor_by_capacity(*min_cpu, *min_ram).await?
            }
        };
        let image = openstack.get_image(&request.image, tenant_uuid).await?;
        let (ports, floating_ips) = openstack.networks_to_payload(&request.networks).await?;
        let wants_external_ip = !floating_ips.is_empty();

        let mut security_groups = Vec::with_capacity(request.security_groups.len());
        for group in &request.security_groups {
            let group = openstack.get_tenant_security_group(tenant_uuid, group).await?;
            security_groups.push(ResourceRef { url: url_of(&group)? });
        }

        let ssh_public_key = match &request.ssh_key {
            Some(key) => Some(url_of(
                &self.inner.get_resource(Endpoint::SshKeys, key, None).await?,
            )?),
            None => None,
        };
        let system_volume_type = match &request.system_volume_type {
            Some(kind) => Some(url_of(&openstack.get_volume_type(kind, tenant_uuid).await?)?),
            None => None,
        };
        let data_volume_type = match &request.data_volume_type {
            Some(kind) => Some(url_of(&openstack.get_volume_type(kind, tenant_uuid).await?)?),
            None => None,
        };
        let server_group = match &request.server_group {
            Some(group) => Some(url_of(
                &self
                    .inner
                    .get_resource(Endpoint::OpenStackServerGroups, group, None)
                    .await?,
            )?),
            None => None,
        };

        let attributes = to_attributes(&InstanceAttributes {
            name: &request.name,
            flavor: url_of(&flavor)?,
            image: url_of(&image)?,
            system_volume_size,
            ports,
            floating_ips,
            security_groups,
            data_volume_size,
            user_data: request.user_data.as_deref().filter(|data| !data.is_empty()),
            ssh_public_key,
            description: request.description.as_deref().filter(|d| !d.is_empty()),
            tags: &request.tags,
            system_volume_type,
            data_volume_type,
            server_group,
        })?;

        let instance_uuid = self
            .create_scope(
                offering.require_str("uuid")?,
                &request.project,
                attributes,
                OfferingType::OpenStackInstance,
                wait,
            )
            .await?;

        if wait.wait && wants_external_ip {
            self.inner
                .wait_for_external_ip(&instance_uuid, wait.interval, wait.timeout)
                .await?;
        }
        Ok(instance_uuid)
    }

    /// Order an OpenStack volume and return its UUID.
    pub async fn create_volume(
        &self,
        request: &VolumeRequest,
        wait: &WaitOptions,
    ) -> Result<String> {
        let size = gib_to_mib(request.size)?;
        let offering = self
            .get_offering(&request.offering, Some(&request.project))
            .await?;
        let tenant_uuid = offering.require_str("scope_uuid")?;

        let volume_type = match &request.volume_type {
            Some(kind) => Some(url_of(
                &self.openstack.get_volume_type(kind, tenant_uuid).await?,
            )?),
            None => None,
        };
        let attributes = to_attributes(&VolumeAttributes {
            name: &request.name,
            size,
            description: request.description.as_deref().filter(|d| !d.is_empty()),
            tags: &request.tags,
            volume_type,
        })?;

        self.create_scope(
            offering.require_str("uuid")?,
            &request.project,
            attributes,
            OfferingType::OpenStackVolume,
            wait,
        )
        .await
    }

    /// Terminate an OpenStack instance; returns the termination order UUID.
    pub async fn delete_instance(
        &self,
        instance_uuid: &str,
        options: Option<&Map<String, Value>>,
    ) -> Result<String> {
        self.delete_scope(instance_uuid, OfferingType::OpenStackInstance, options)
            .await
    }

    /// Terminate an OpenStack volume; returns the termination order UUID.
    pub async fn delete_volume(&self, volume_uuid: &str) -> Result<String> {
        self.delete_scope(volume_uuid, OfferingType::OpenStackVolume, None)
            .await
    }

    async fn create_scope(
        &self,
        offering_uuid: &str,
        project: &str,
        attributes: Map<String, Value>,
        offering_type: OfferingType,
        wait: &WaitOptions,
    ) -> Result<String> {
        let order = self
            .create_order(project, offering_uuid, None, attributes, Map::new())
            .await?;
        let order_uuid = order.require_str("uuid")?;
        let scope_uuid = self
            .inner
            .wait_for_order_resource(order_uuid, "resource_uuid", wait.interval, wait.timeout)
            .await?;
        debug!(order_uuid, scope_uuid = %scope_uuid, %offering_type, "Order references scope");

        self.inner
            .wait_if_requested(offering_type.scope_endpoint(), &scope_uuid, wait)
            .await?;
        Ok(scope_uuid)
    }

    async fn delete_scope(
        &self,
        scope_uuid: &str,
        offering_type: OfferingType,
        options: Option<&Map<String, Value>>,
    ) -> Result<String> {
        let (resource, _scope) = self.resource_scope(scope_uuid, offering_type, None).await?;
        self.terminate_resource(resource.require_str("uuid")?, options, None)
            .await
    }

    // ----- component usages -----

    /// List component usages of a resource.
    pub async fn list_component_usages(
        &self,
        filter: &ComponentUsageFilter,
    ) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::MarketplaceComponentUsages, Some(&filter.to_query()))
            .await
    }

    /// Report component usages for a plan period or a resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before any request when neither target
    /// is given.
    pub async fn create_component_usages(
        &self,
        request: &CreateComponentUsagesRequest,
    ) -> Result<Value> {
        let payload = request.normalized()?;
        let url = self.inner.path_url(&format!(
            "{}/set_usage",
            Endpoint::MarketplaceComponentUsages
        ))?;
        self.inner.post(&url, STATUS_CREATED, Some(&payload)).await
    }

    /// Report the share of a component usage consumed by one user.
    pub async fn create_component_user_usage(
        &self,
        component_usage_uuid: &str,
        usage: f64,
        username: &str,
        offering_user_uuid: Option<&str>,
    ) -> Result<Value> {
        let mut payload = json!({ "usage": usage, "username": username });
        if let Some(user) = offering_user_uuid.filter(|uuid| is_uuid(uuid)) {
            let user_url =
                self.inner
                    .resource_url(Endpoint::MarketplaceOfferingUsers, user, None)?;
            payload["user"] = Value::String(user_url.to_string());
        }
        self.inner
            .action(
                Endpoint::MarketplaceComponentUsages,
                component_usage_uuid,
                "set_user_usage",
                STATUS_CREATED,
                Some(&payload),
            )
            .await
    }
}
