//! Asynchronous structure client implementation.

use crate::models::{
    CustomerRequest, InvoiceState, PaymentProfileType, PermissionFilter, PermissionRequest,
    PermissionScope, ProjectFields,
};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use url::Url;
use validator::Validate;
use waldur_core::client::{STATUS_CREATED, STATUS_DELETED, STATUS_OK};
use waldur_core::identifier::is_uuid;
use waldur_core::resolver::DEFAULT_PAGE_SIZE;
use waldur_core::{
    ClientConfig, Endpoint, Error, Query, Resource, ServiceClient, ServiceClientBuilder, Sleeper,
};

const USER_AGENT: &str = concat!("waldur-structure/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct ProjectPayload<'a> {
    #[serde(flatten)]
    fields: &'a ProjectFields,
    #[serde(rename = "type")]
    project_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<String>,
}

/// Builder for [`StructureClient`].
pub struct StructureClientBuilder {
    inner: ServiceClientBuilder,
}

impl StructureClientBuilder {
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

    /// Override how the client pauses between retries.
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
    pub fn build(self) -> Result<StructureClient> {
        Ok(StructureClient::from(self.inner.build()?))
    }
}

/// Asynchronous client for customers, projects, users and invoices.
#[derive(Debug, Clone)]
pub struct StructureClient {
    inner: ServiceClient,
}

impl From<ServiceClient> for StructureClient {
    fn from(inner: ServiceClient) -> Self {
        Self { inner }
    }
}

impl StructureClient {
    /// Construct a client directly from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        StructureClientBuilder::new(config).build()
    }

    /// Start a builder for the configuration.
    #[must_use]
    pub fn builder(config: ClientConfig) -> StructureClientBuilder {
        StructureClientBuilder::new(config)
    }

    /// Return the API root URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    async fn count_endpoint(&self, endpoint: Endpoint, filters: Option<&Query>) -> Result<u64> {
        let url = self.inner.url_for(endpoint)?;
        self.inner
            .count(&url, &filters.cloned().unwrap_or_default())
            .await
    }

    /// Delete by UUID, or by URL when given anything else.
    async fn delete_by_reference(&self, endpoint: Endpoint, reference: &str) -> Result<()> {
        if is_uuid(reference) {
            return self.inner.destroy(endpoint, reference).await;
        }
        let url = self.inner.absolute_url(reference)?;
        self.inner.delete(&url, STATUS_DELETED).await.map(|_| ())
    }

    // ----- customers -----

    /// Resolve a customer by name or UUID.
    pub async fn get_customer(&self, customer: &str, filters: Option<&Query>) -> Result<Resource> {
        self.inner
            .get_resource(Endpoint::Customers, customer, filters)
            .await
    }

    /// List customers.
    pub async fn list_customers(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner.list_resources(Endpoint::Customers, filters).await
    }

    /// Count customers.
    pub async fn count_customers(&self, filters: Option<&Query>) -> Result<u64> {
        self.count_endpoint(Endpoint::Customers, filters).await
    }

    /// Create a customer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before any request if the payload is
    /// invalid.
    pub async fn create_customer(&self, request: &CustomerRequest) -> Result<Resource> {
        request
            .validate()
            .map_err(|err| Error::Validation(err.to_string()))?;
        let customer = self.inner.create(Endpoint::Customers, request).await?;
        info!(customer = ?customer.uuid(), "Created customer");
        Ok(customer)
    }

    /// Delete a customer by UUID or URL.
    pub async fn delete_customer(&self, customer: &str) -> Result<()> {
        self.delete_by_reference(Endpoint::Customers, customer)
            .await
    }

    // ----- projects -----

    /// Resolve a project by name or UUID.
    pub async fn get_project(&self, project: &str, filters: Option<&Query>) -> Result<Resource> {
        self.inner
            .get_resource(Endpoint::Projects, project, filters)
            .await
    }

    /// List projects.
    pub async fn list_projects(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner.list_resources(Endpoint::Projects, filters).await
    }

    /// Count projects.
    pub async fn count_projects(&self, filters: Option<&Query>) -> Result<u64> {
        self.count_endpoint(Endpoint::Projects, filters).await
    }

    /// Create a project owned by a customer.
    pub async fn create_project(
        &self,
        customer_uuid: &str,
        name: &str,
        fields: &ProjectFields,
    ) -> Result<Resource> {
        let fields = ProjectFields {
            name: Some(name.to_string()),
            ..fields.clone()
        };
        let customer = self
            .inner
            .resource_url(Endpoint::Customers, customer_uuid, None)?;
        let payload = ProjectPayload {
            fields: &fields,
            project_type: self.project_type_url(&fields)?,
            customer: Some(customer.to_string()),
        };
        let project = self.inner.create(Endpoint::Projects, &payload).await?;
        info!(project = ?project.uuid(), customer_uuid, "Created project");
        Ok(project)
    }

    /// Partially update a project.
    pub async fn update_project(
        &self,
        project_uuid: &str,
        fields: &ProjectFields,
    ) -> Result<Resource> {
        let payload = ProjectPayload {
            fields,
            project_type: self.project_type_url(fields)?,
            customer: None,
        };
        self.inner
            .partial_update(Endpoint::Projects, project_uuid, &payload)
            .await
    }

    /// Delete a project by UUID or URL.
    pub async fn delete_project(&self, project: &str) -> Result<()> {
        self.delete_by_reference(Endpoint::Projects, project).await
    }

    fn project_type_url(&self, fields: &ProjectFields) -> Result<Option<String>> {
        fields
            .type_uuid
            .as_deref()
            .map(|uuid| {
                self.inner
                    .resource_url(Endpoint::ProjectTypes, uuid, None)
                    .map(|url| url.to_string())
            })
            .transpose()
    }

    // ----- users -----

    /// Resolve a user by username or UUID.
    pub async fn get_user(&self, user: &str) -> Result<Resource> {
        self.inner.get_resource(Endpoint::Users, user, None).await
    }

    /// List users.
    pub async fn list_users(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner.list_resources(Endpoint::Users, filters).await
    }

    /// The user owning the access token.
    pub async fn current_user(&self) -> Result<Resource> {
        let url = self.inner.path_url(&format!("{}/me", Endpoint::Users))?;
        self.inner.get_json(&url, &Query::new()).await
    }

    /// Count users.
    pub async fn count_users(&self, filters: Option<&Query>) -> Result<u64> {
        self.count_endpoint(Endpoint::Users, filters).await
    }

    /// All roles.
    pub async fn get_roles(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        let url = self.inner.url_for(Endpoint::Roles)?;
        self.inner
            .get_all_as(&url, &filters.cloned().unwrap_or_default())
            .await
    }

    /// All SSH keys visible to the caller.
    pub async fn list_ssh_keys(&self) -> Result<Vec<Resource>> {
        let url = self.inner.url_for(Endpoint::SshKeys)?;
        self.inner.get_all_as(&url, &Query::new()).await
    }

    /// Look up a user by community identifier, provisioning it on first use.
    pub async fn get_remote_eduteams_user(&self, cuid: &str) -> Result<Value> {
        let url = self.inner.url_for(Endpoint::RemoteEduteams)?;
        self.inner
            .post(&url, STATUS_OK, Some(&json!({ "cuid": cuid })))
            .await
    }

    /// Public deployment configuration.
    pub async fn get_configuration(&self) -> Result<Value> {
        let url = self.inner.url_for(Endpoint::Configuration)?;
        self.inner.get(&url, &Query::new()).await
    }

    /// List payment profiles, optionally of one payment type.
    pub async fn list_payment_profiles(
        &self,
        payment_type: Option<PaymentProfileType>,
        filters: Option<&Query>,
    ) -> Result<Vec<Resource>> {
        let mut query = filters.cloned().unwrap_or_default();
        query.push_opt("payment_type", payment_type);
        self.inner
            .list_resources(Endpoint::PaymentProfiles, Some(&query))
            .await
    }

    // ----- permissions -----

    fn permission_url(
        &self,
        scope: PermissionScope,
        scope_uuid: &str,
        action: &str,
    ) -> Result<Url> {
        if scope_uuid.trim().is_empty() {
            return Err(Error::Validation("Empty ID is not allowed.".to_string()));
        }
        self.inner
            .path_url(&format!("{scope}/{}/{action}", scope_uuid.trim()))
    }

    /// Grant a role on a project, customer or offering.
    pub async fn add_permission(
        &self,
        scope: PermissionScope,
        scope_uuid: &str,
        grant: &PermissionRequest,
    ) -> Result<Value> {
        let url = self.permission_url(scope, scope_uuid, "add_user")?;
        let reply = self.inner.post(&url, STATUS_CREATED, Some(grant)).await?;
        info!(%scope, scope_uuid, user = %grant.user, role = %grant.role, "Granted role");
        Ok(reply)
    }

    /// List role grants of a scope.
    pub async fn list_permissions(
        &self,
        scope: PermissionScope,
        scope_uuid: &str,
        filter: &PermissionFilter,
    ) -> Result<Vec<Resource>> {
        let url = self.permission_url(scope, scope_uuid, "list_users")?;
        let mut query = filter.to_query();
        query.set_default("page_size", DEFAULT_PAGE_SIZE);
        self.inner.get_all_as(&url, &query).await
    }

    /// Change the expiration of a role grant.
    pub async fn update_permission(
        &self,
        scope: PermissionScope,
        scope_uuid: &str,
        grant: &PermissionRequest,
    ) -> Result<Value> {
        let url = self.permission_url(scope, scope_uuid, "update_user")?;
        self.inner.post(&url, STATUS_OK, Some(grant)).await
    }

    /// Revoke a role grant.
    pub async fn remove_permission(
        &self,
        scope: PermissionScope,
        scope_uuid: &str,
        user_uuid: &str,
        role: &str,
    ) -> Result<Value> {
        let url = self.permission_url(scope, scope_uuid, "delete_user")?;
        let payload = json!({ "user": user_uuid, "role": role });
        self.inner.post(&url, STATUS_OK, Some(&payload)).await
    }

    // ----- invoices -----

    /// The invoice of a customer for a month.
    pub async fn invoice_for_customer(
        &self,
        customer_uuid: &str,
        year: i32,
        month: u32,
        state: Option<InvoiceState>,
    ) -> Result<Resource> {
        if !(1..=12).contains(&month) {
            return Err(Error::Validation(format!("Invalid month: {month}")));
        }
        let mut query = Query::with("customer_uuid", customer_uuid);
        query.push("year", year).push("month", month);
        query.push_opt("state", state);
        self.inner.query_one(Endpoint::Invoices, &query).await
    }

    /// Record the identifier of an invoice in an external system.
    pub async fn set_invoice_backend_id(
        &self,
        invoice_uuid: &str,
        backend_id: &str,
    ) -> Result<Value> {
        self.invoice_action(
            invoice_uuid,
            "set_backend_id",
            Some(json!({ "backend_id": backend_id })),
        )
        .await
    }

    /// Record where an invoice can be paid.
    pub async fn set_invoice_payment_url(
        &self,
        invoice_uuid: &str,
        payment_url: &str,
    ) -> Result<Value> {
        self.invoice_action(
            invoice_uuid,
            "set_payment_url",
            Some(json!({ "payment_url": payment_url })),
        )
        .await
    }

    /// Record the payment reference of an invoice.
    pub async fn set_invoice_reference_number(
        &self,
        invoice_uuid: &str,
        reference_number: &str,
    ) -> Result<Value> {
        self.invoice_action(
            invoice_uuid,
            "set_reference_number",
            Some(json!({ "reference_number": reference_number })),
        )
        .await
    }

    /// Mark an invoice as paid.
    pub async fn mark_invoice_paid(&self, invoice_uuid: &str) -> Result<Value> {
        self.invoice_action(invoice_uuid, "paid", None).await
    }

    /// List invoice items.
    pub async fn list_invoice_items(&self, filters: Option<&Query>) -> Result<Vec<Resource>> {
        self.inner
            .list_resources(Endpoint::InvoiceItems, filters)
            .await
    }

    async fn invoice_action(
        &self,
        invoice_uuid: &str,
        action: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        self.inner
            .action(Endpoint::Invoices, invoice_uuid, action, STATUS_OK, body.as_ref())
            .await
    }
}
