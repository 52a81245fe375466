//! Request payloads and filters for customers, projects and permissions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;
use waldur_core::{Endpoint, Query};

/// Lifecycle state of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    /// Open for the current month.
    Pending,
    /// Issued.
    Created,
    /// Settled.
    Paid,
    /// Withdrawn.
    Canceled,
}

impl InvoiceState {
    /// Wire value of the `state` filter.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentProfileType {
    /// Fixed price contract.
    #[serde(rename = "fixed_price")]
    FixedPrice,
    /// Monthly invoices.
    #[serde(rename = "invoices")]
    MonthlyInvoices,
    /// Monthly payment through a gateway.
    #[serde(rename = "payment_gw_monthly")]
    PaymentGatewayMonthly,
}

impl PaymentProfileType {
    /// Wire value of the `payment_type` filter.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FixedPrice => "fixed_price",
            Self::MonthlyInvoices => "invoices",
            Self::PaymentGatewayMonthly => "payment_gw_monthly",
        }
    }
}

impl fmt::Display for PaymentProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object a role is granted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    /// `projects/<uuid>/`
    Project,
    /// `customers/<uuid>/`
    Customer,
    /// `offerings/<uuid>/`
    Offering,
}

impl PermissionScope {
    /// Path prefix of the scope objects.
    #[must_use]
    pub const fn collection(&self) -> &'static str {
        match self {
            Self::Project => Endpoint::Projects.path(),
            Self::Customer => Endpoint::Customers.path(),
            Self::Offering => "offerings",
        }
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Role grant for one user.
///
/// `expiration_time` is always sent; `null` means the grant never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// User UUID.
    pub user: String,
    /// Role UUID or name.
    pub role: String,
    /// When the grant lapses.
    pub expiration_time: Option<DateTime<Utc>>,
}

impl PermissionRequest {
    /// Grant without expiration.
    #[must_use]
    pub fn new(user: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            expiration_time: None,
        }
    }

    /// Set the expiration time.
    #[must_use]
    pub const fn expires_at(mut self, expiration_time: DateTime<Utc>) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }
}

/// Filters for the `list_users` action of a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionFilter {
    /// Only grants of this user.
    pub user: Option<String>,
    /// Only grants of this role.
    pub role: Option<String>,
}

impl PermissionFilter {
    /// Convert the filter into a query.
    #[must_use]
    pub fn to_query(&self) -> Query {
        let mut params = Query::new();
        params.push_opt("role", self.role.as_deref());
        params.push_opt("user", self.user.as_deref());
        params
    }
}

/// Payload for creating a customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Validate)]
pub struct CustomerRequest {
    /// Organization name.
    #[validate(length(min = 1, message = "Customer name must not be empty"))]
    pub name: String,
    /// Short name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Name in the native language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_name: Option<String>,
    /// Contact email.
    #[validate(email)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Web site.
    #[validate(url)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Street address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Postal code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal: Option<String>,
    /// ISO country code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Free-form contact details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_details: Option<String>,
    /// Registration code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_code: Option<String>,
    /// VAT code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_code: Option<String>,
    /// Bank account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<String>,
    /// Bank name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    /// Domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Identifier in an external system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
    /// Latitude of the office.
    #[validate(range(min = -90.0, max = 90.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude of the office.
    #[validate(range(min = -180.0, max = 180.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl CustomerRequest {
    /// Customer with only a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Project fields shared by create and partial update.
///
/// The project type is given by UUID and sent as a URL; `type` is `null`
/// when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectFields {
    /// Project name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Last day of the project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Identifier in an external system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
    /// OECD field of science code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oecd_fos_2007_code: Option<String>,
    /// Whether the project is industry funded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_industry: Option<bool>,
    /// Project type UUID.
    #[serde(skip)]
    pub type_uuid: Option<String>,
}
