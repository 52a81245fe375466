//! Asynchronous OpenStack client implementation.

use crate::models::{
    CreateSecurityGroupRequest, CreateSnapshotRequest, CreateSubnetRequest, FloatingIpAssignment,
    FloatingIpChoice, FloatingIpRef, NetworkAttachment, PortRef, ResourceRef, SecurityGroupRule,
    UpdateSubnetRequest,
};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;
use waldur_core::client::{STATUS_ACCEPTED, STATUS_CREATED};
use waldur_core::identifier::{is_uuid, NAME_FILTER};
use waldur_core::resolver::optional;
use waldur_core::{
    ClientConfig, Endpoint, Error, Query, Resource, ServiceClient, ServiceClientBuilder, Sleeper,
    WaitOptions,
};

const USER_AGENT: &str = concat!("waldur-openstack/", env!("CARGO_PKG_VERSION"));

/// Builder for [`OpenStackClient`].
pub struct OpenStackClientBuilder {
    inner: ServiceClientBuilder,
}

impl OpenStackClientBuilder {
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
    pub fn build(self) -> Result<OpenStackClient> {
        let inner = self.inner.build()?;
        Ok(OpenStackClient { inner })
    }
}

/// Asynchronous client for the OpenStack part of the Waldur API.
#[derive(Debug, Clone)]
pub struct OpenStackClient {
    inner: ServiceClient,
}

impl From<ServiceClient> for OpenStackClient {
    fn from(inner: ServiceClient) -> Self {
        Self { inner }
    }
}

impl OpenStackClient {
    /// Construct a client directly from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        OpenStackClientBuilder::new(config).build()
    }

    /// Start a builder for the configuration.
    #[must_use]
    pub fn builder(config: ClientConfig) -> OpenStackClientBuilder {
        OpenStackClientBuilder::new(config)
    }

    /// Return the API root URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    /// Borrow the underlying service client.
    #[must_use]
    pub const fn service(&self) -> &ServiceClient {
        &self.inner
    }

    // ----- tenants and networks -----

    /// Resolve a tenant by name or UUID. With a project (name or UUID) the
    /// lookup is restricted to that project.
    ///
    /// # Errors
    ///
    /// Fails if the project or the tenant does not resolve to exactly one record.
    pub async fn get_tenant(&self, tenant: &str, project: Option<&str>) -> Result<Resource> {
        let extra = match project.filter(|p| !p.is_empty()) {
            Some(project) => {
                let project = self
                    .inner
                    .get_resource(Endpoint::Projects, project, None)
                    .await?;
                Some(Query::with("project_uuid", project.require_str("uuid")?))
            }
            None => None,
        };
        self.inner
            .get_resource(Endpoint::OpenStackTenants, tenant, extra.as_ref())
            .await
    }

    /// List tenants.
    pub async fn list_tenants(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::OpenStackTenants, filters)
            .await
    }

    /// List networks.
    pub async fn list_networks(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::OpenStackNetworks, filters)
            .await
    }

    // ----- subnets -----

    /// Create a subnet in a network and optionally wait for it to settle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for inconsistent gateway flags before any
    /// request is sent.
    pub async fn create_subnet(
        &self,
        network_uuid: &str,
        request: &CreateSubnetRequest,
        wait: &WaitOptions,
    ) -> Result<Resource> {
        request.validate()?;
        let url = self.inner.resource_url(
            Endpoint::OpenStackNetworks,
            network_uuid,
            Some("create_subnet"),
        )?;
        let subnet = Resource::from_value(
            self.inner
                .post(&url, STATUS_CREATED, Some(request))
                .await?,
        )?;
        self.inner
            .wait_if_requested(Endpoint::OpenStackSubnets, subnet.require_str("uuid")?, wait)
            .await?;
        Ok(subnet)
    }

    /// Update a subnet. Connectivity flags run the `connect`, `disconnect`
    /// and `unlink` actions first, then the fields are written with `PUT`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before any request for inconsistent flags.
    pub async fn update_subnet(&self, uuid: &str, request: &UpdateSubnetRequest) -> Result<Resource> {
        request.validate()?;
        if request.connect {
            self.connect_subnet(uuid).await?;
        }
        if request.disconnect {
            self.disconnect_subnet(uuid).await?;
        }
        if request.unlink {
            self.unlink_subnet(uuid).await?;
        }
        self.inner
            .update(Endpoint::OpenStackSubnets, uuid, request)
            .await
    }

    /// Connect a subnet to the tenant router.
    pub async fn connect_subnet(&self, uuid: &str) -> Result<Value> {
        self.subnet_action(uuid, "connect").await
    }

    /// Disconnect a subnet from the tenant router.
    pub async fn disconnect_subnet(&self, uuid: &str) -> Result<Value> {
        self.subnet_action(uuid, "disconnect").await
    }

    /// Remove a subnet from Waldur only.
    pub async fn unlink_subnet(&self, uuid: &str) -> Result<Value> {
        self.subnet_action(uuid, "unlink").await
    }

    async fn subnet_action(&self, uuid: &str, action: &str) -> Result<Value> {
        self.inner
            .action(
                Endpoint::OpenStackSubnets,
                uuid,
                action,
                STATUS_ACCEPTED,
                Option::<&()>::None,
            )
            .await
    }

    /// Resolve a subnet by name or UUID.
    pub async fn get_subnet(&self, subnet: &str) -> Result<Resource> {
        self.inner
            .get_resource(Endpoint::OpenStackSubnets, subnet, None)
            .await
    }

    /// Fetch a subnet by UUID; `None` when it does not exist.
    pub async fn get_subnet_by_uuid(&self, uuid: &str) -> Result<Option<Resource>> {
        let lookup = optional(
            self.inner
                .get_resource_by_uuid(Endpoint::OpenStackSubnets, uuid)
                .await,
        )?;
        Ok(lookup.into_option())
    }

    /// List subnets.
    pub async fn list_subnets(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::OpenStackSubnets, filters)
            .await
    }

    /// Delete a subnet.
    pub async fn delete_subnet(&self, uuid: &str) -> Result<()> {
        self.inner.destroy(Endpoint::OpenStackSubnets, uuid).await
    }

    // ----- security groups -----

    /// Create a security group in a tenant and optionally wait for it to
    /// settle. Returns the group as reported by the creation call.
    pub async fn create_security_group(
        &self,
        tenant: &str,
        project: Option<&str>,
        request: &CreateSecurityGroupRequest,
        wait: &WaitOptions,
    ) -> Result<Resource> {
        let tenant = self.get_tenant(tenant, project).await?;
        let url = self.inner.resource_url(
            Endpoint::OpenStackTenants,
            tenant.require_str("uuid")?,
            Some("create_security_group"),
        )?;
        let group = Resource::from_value(
            self.inner
                .post(&url, STATUS_CREATED, Some(request))
                .await?,
        )?;
        debug!(name = %request.name, "Created security group");
        self.inner
            .wait_if_requested(
                Endpoint::OpenStackSecurityGroups,
                group.require_str("uuid")?,
                wait,
            )
            .await?;
        Ok(group)
    }

    /// Find a security group of a tenant by exact name.
    pub async fn get_tenant_security_group(&self, tenant_uuid: &str, name: &str) -> Result<Resource> {
        let query: Query = [(NAME_FILTER, name), ("tenant_uuid", tenant_uuid)]
            .into_iter()
            .collect();
        self.inner
            .query_one(Endpoint::OpenStackSecurityGroups, &query)
            .await
    }

    /// Find a security group by tenant (name or UUID) and group name;
    /// `None` when no group matches.
    pub async fn get_security_group(&self, tenant: &str, name: &str) -> Result<Option<Resource>> {
        let tenant = self.get_tenant(tenant, None).await?;
        let lookup = optional(
            self.get_tenant_security_group(tenant.require_str("uuid")?, name)
                .await,
        )?;
        Ok(lookup.into_option())
    }

    /// List the security groups of a tenant.
    pub async fn list_security_groups(&self, tenant: &str) -> Result<Vec<Resource>> {
        let tenant = self.get_tenant(tenant, None).await?;
        let filters = Query::with("tenant_uuid", tenant.require_str("uuid")?);
        self.inner
            .list_resources(Endpoint::OpenStackSecurityGroups, Some(&filters))
            .await
    }

    /// Replace the description of a security group.
    pub async fn update_security_group_description(
        &self,
        group: &Resource,
        description: &str,
    ) -> Result<Resource> {
        let payload = json!({
            "name": group.require_str("name")?,
            "description": description,
        });
        self.inner
            .update(
                Endpoint::OpenStackSecurityGroups,
                group.require_str("uuid")?,
                &payload,
            )
            .await
    }

    /// Replace the rules of a security group.
    pub async fn update_security_group_rules(
        &self,
        group_uuid: &str,
        rules: &[SecurityGroupRule],
    ) -> Result<Value> {
        self.inner
            .action(
                Endpoint::OpenStackSecurityGroups,
                group_uuid,
                "set_rules",
                STATUS_ACCEPTED,
                Some(rules),
            )
            .await
    }

    /// Delete a security group.
    pub async fn delete_security_group(&self, uuid: &str) -> Result<()> {
        self.inner
            .destroy(Endpoint::OpenStackSecurityGroups, uuid)
            .await
    }

    // ----- instances -----

    /// Resolve an instance by UUID, or by name within a project (name or UUID).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a name without a project.
    pub async fn get_instance(&self, name: &str, project: Option<&str>) -> Result<Resource> {
        self.get_project_resource(Endpoint::OpenStackInstances, name, project)
            .await
    }

    /// Stop an instance.
    pub async fn stop_instance(&self, uuid: &str, wait: &WaitOptions) -> Result<()> {
        self.run_action(Endpoint::OpenStackInstances, uuid, "stop", Option::<&()>::None, wait)
            .await
    }

    /// Replace the security groups of an instance with the named groups of
    /// its tenant.
    pub async fn update_instance_security_groups(
        &self,
        instance_uuid: &str,
        security_groups: &[&str],
        wait: &WaitOptions,
    ) -> Result<()> {
        let instance = self
            .inner
            .get_resource(Endpoint::OpenStackInstances, instance_uuid, None)
            .await?;
        let tenant_uuid = instance.require_str("tenant_uuid")?;

        let mut groups = Vec::with_capacity(security_groups.len());
        for name in security_groups {
            let group = self.get_tenant_security_group(tenant_uuid, name).await?;
            groups.push(ResourceRef {
                url: group.require_str("url")?.to_string(),
            });
        }

        let payload = json!({ "security_groups": groups });
        self.run_action(
            Endpoint::OpenStackInstances,
            instance_uuid,
            "update_security_groups",
            Some(&payload),
            wait,
        )
        .await
    }

    /// Replace the ports of an instance with one port per subnet.
    pub async fn update_instance_ports(
        &self,
        instance_uuid: &str,
        subnets: &[&str],
        wait: &WaitOptions,
    ) -> Result<()> {
        let mut ports = Vec::with_capacity(subnets.len());
        for subnet in subnets {
            let subnet = self.get_subnet(subnet).await?;
            ports.push(PortRef {
                subnet: subnet.require_str("url")?.to_string(),
            });
        }

        let payload = json!({ "ports": ports });
        self.run_action(
            Endpoint::OpenStackInstances,
            instance_uuid,
            "update_ports",
            Some(&payload),
            wait,
        )
        .await
    }

    /// Move existing floating IPs onto an instance.
    pub async fn assign_floating_ips(
        &self,
        instance: &str,
        floating_ips: &[FloatingIpAssignment],
        wait: &WaitOptions,
    ) -> Result<Value> {
        let instance = self
            .inner
            .get_resource(Endpoint::OpenStackInstances, instance, None)
            .await?;
        let instance_uuid = instance.require_str("uuid")?;

        let mut assignments = Vec::with_capacity(floating_ips.len());
        for ip in floating_ips {
            let floating_ip = self.get_floating_ip(&ip.address).await?;
            let subnet = self.get_subnet(&ip.subnet).await?;
            assignments.push(FloatingIpRef {
                subnet: subnet.require_str("url")?.to_string(),
                url: Some(floating_ip.require_str("url")?.to_string()),
            });
        }

        let payload = json!({ "floating_ips": assignments });
        let reply = self
            .inner
            .action(
                Endpoint::OpenStackInstances,
                instance_uuid,
                "update_floating_ips",
                STATUS_ACCEPTED,
                Some(&payload),
            )
            .await?;
        self.inner
            .wait_if_requested(Endpoint::OpenStackInstances, instance_uuid, wait)
            .await?;
        Ok(reply)
    }

    /// Find a floating IP by address.
    pub async fn get_floating_ip(&self, address: &str) -> Result<Resource> {
        self.inner
            .query_one(Endpoint::OpenStackFloatingIps, &Query::with("address", address))
            .await
    }

    /// Resolve subnets and floating IPs for an instance request.
    ///
    /// Every attachment yields a port; attachments with a floating IP also
    /// yield a floating IP entry on the same subnet.
    pub async fn networks_to_payload(
        &self,
        networks: &[NetworkAttachment],
    ) -> Result<(Vec<PortRef>, Vec<FloatingIpRef>)> {
        let mut ports = Vec::with_capacity(networks.len());
        let mut floating_ips = Vec::new();

        for network in networks {
            if network.subnet.trim().is_empty() {
                return Err(Error::Validation(
                    "Wrong networks format. subnet key is required.".to_string(),
                ));
            }
            let subnet = self.get_subnet(&network.subnet).await?;
            let subnet_url = subnet.require_str("url")?.to_string();

            match &network.floating_ip {
                Some(FloatingIpChoice::Auto) => floating_ips.push(FloatingIpRef {
                    subnet: subnet_url.clone(),
                    url: None,
                }),
                Some(FloatingIpChoice::Address(address)) => {
                    let floating_ip = self.get_floating_ip(address).await?;
                    floating_ips.push(FloatingIpRef {
                        subnet: subnet_url.clone(),
                        url: Some(floating_ip.require_str("url")?.to_string()),
                    });
                }
                None => {}
            }
            ports.push(PortRef { subnet: subnet_url });
        }

        Ok((ports, floating_ips))
    }

    // ----- tenant properties -----

    /// Resolve a flavor of a tenant by name or UUID.
    pub async fn get_flavor(&self, flavor: &str, tenant_uuid: &str) -> Result<Resource> {
        self.get_tenant_property(Endpoint::OpenStackFlavors, flavor, tenant_uuid)
            .await
    }

    /// Smallest flavor with at least the given cores and RAM (MiB), ordered
    /// by cores, RAM and disk.
    pub async fn get_flavor_by_capacity(
        &self,
        min_cpu: Option<u32>,
        min_ram: Option<u32>,
    ) -> Result<Resource> {
        let mut query = Query::with("o", "cores,ram,disk");
        query
            .push_opt("cores__gte", min_cpu)
            .push_opt("ram__gte", min_ram);
        self.inner
            .query_first(Endpoint::OpenStackFlavors, &query)
            .await
    }

    /// Resolve an image of a tenant by name or UUID.
    pub async fn get_image(&self, image: &str, tenant_uuid: &str) -> Result<Resource> {
        self.get_tenant_property(Endpoint::OpenStackImages, image, tenant_uuid)
            .await
    }

    /// Resolve a volume type of a tenant by name or UUID.
    pub async fn get_volume_type(&self, volume_type: &str, tenant_uuid: &str) -> Result<Resource> {
        self.get_tenant_property(Endpoint::OpenStackVolumeTypes, volume_type, tenant_uuid)
            .await
    }

    async fn get_tenant_property(
        &self,
        endpoint: Endpoint,
        id: &str,
        tenant_uuid: &str,
    ) -> Result<Resource> {
        let extra = Query::with("tenant_uuid", tenant_uuid);
        self.inner.get_resource(endpoint, id, Some(&extra)).await
    }

    // ----- volumes -----

    /// Resolve a volume by UUID, or by name within a project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a name without a project.
    pub async fn get_volume(&self, name: &str, project: Option<&str>) -> Result<Resource> {
        self.get_project_resource(Endpoint::OpenStackVolumes, name, project)
            .await
    }

    /// Replace the description of a volume.
    pub async fn update_volume(&self, volume: &Resource, description: &str) -> Result<Resource> {
        let payload = json!({
            "name": volume.require_str("name")?,
            "description": description,
        });
        self.inner
            .update(Endpoint::OpenStackVolumes, volume.require_str("uuid")?, &payload)
            .await
    }

    /// Attach a volume to an instance as `device` (e.g. `/dev/vdb`).
    pub async fn attach_volume(
        &self,
        volume_uuid: &str,
        instance_uuid: &str,
        device: &str,
        wait: &WaitOptions,
    ) -> Result<()> {
        let instance = self
            .inner
            .resource_url(Endpoint::OpenStackInstances, instance_uuid, None)?;
        let payload = json!({ "instance": instance.as_str(), "device": device });
        self.run_action(Endpoint::OpenStackVolumes, volume_uuid, "attach", Some(&payload), wait)
            .await
    }

    /// Detach a volume from its instance.
    pub async fn detach_volume(&self, volume_uuid: &str, wait: &WaitOptions) -> Result<()> {
        self.run_action(
            Endpoint::OpenStackVolumes,
            volume_uuid,
            "detach",
            Option::<&()>::None,
            wait,
        )
        .await
    }

    // ----- snapshots -----

    /// Resolve a snapshot by name or UUID.
    pub async fn get_snapshot(&self, snapshot: &str) -> Result<Resource> {
        self.inner
            .get_resource(Endpoint::OpenStackSnapshots, snapshot, None)
            .await
    }

    /// Snapshot a volume (name or UUID) and optionally wait for the snapshot
    /// to settle.
    pub async fn create_snapshot(
        &self,
        volume: &str,
        request: &CreateSnapshotRequest,
        wait: &WaitOptions,
    ) -> Result<Resource> {
        let volume = self
            .inner
            .get_resource(Endpoint::OpenStackVolumes, volume, None)
            .await?;
        let url = self.inner.resource_url(
            Endpoint::OpenStackVolumes,
            volume.require_str("uuid")?,
            Some("snapshot"),
        )?;
        let snapshot = Resource::from_value(
            self.inner
                .post(&url, STATUS_CREATED, Some(request))
                .await?,
        )?;
        self.inner
            .wait_if_requested(
                Endpoint::OpenStackSnapshots,
                snapshot.require_str("uuid")?,
                wait,
            )
            .await?;
        Ok(snapshot)
    }

    /// Delete a snapshot.
    pub async fn delete_snapshot(&self, uuid: &str) -> Result<()> {
        self.inner.destroy(Endpoint::OpenStackSnapshots, uuid).await
    }

    async fn get_project_resource(
        &self,
        endpoint: Endpoint,
        name: &str,
        project: Option<&str>,
    ) -> Result<Resource> {
        if is_uuid(name) {
            return self.inner.get_resource_by_uuid(endpoint, name).await;
        }
        let Some(project) = project.filter(|p| !p.is_empty()) else {
            return Err(Error::Validation(
                "You should specify project name if name is not UUID".to_string(),
            ));
        };
        let project_key = if is_uuid(project) {
            "project_uuid"
        } else {
            "project_name"
        };
        let query: Query = [(project_key, project), (NAME_FILTER, name)]
            .into_iter()
            .collect();
        self.inner.query_one(endpoint, &query).await
    }

    async fn run_action<B>(
        &self,
        endpoint: Endpoint,
        uuid: &str,
        action: &str,
        body: Option<&B>,
        wait: &WaitOptions,
    ) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        self.inner
            .action(endpoint, uuid, action, STATUS_ACCEPTED, body)
            .await?;
        debug!(%endpoint, uuid, action, "Accepted resource action");
        self.inner.wait_if_requested(endpoint, uuid, wait).await?;
        Ok(())
    }
}
