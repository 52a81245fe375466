//! Name-or-UUID resource resolution.
//!
//! A UUID-shaped identifier is fetched directly from `<endpoint>/<uuid>/`;
//! anything else is looked up with the `name_exact` filter. A lookup must
//! match exactly one record unless the caller relaxes that with
//! [`Multiplicity`].

use crate::client::{ApiRequest, ServiceClient};
use crate::error::{Error, Result};
use crate::identifier::{Identifier, UUID_FILTER};
use crate::query::Query;
use crate::types::{Endpoint, Resource};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

/// Page size requested by list operations unless the caller sets one.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// How many matches a lookup accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Multiplicity {
    /// Several matches are an error
    #[default]
    ExactlyOne,
    /// Several matches resolve to the first
    First,
    /// Several matches are all returned
    Few,
}

/// Outcome of an optional lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T = Resource> {
    /// The record exists
    Found(T),
    /// Nothing matched
    NotFound,
}

impl<T> Lookup<T> {
    /// Converts into an `Option`.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    /// Returns true for [`Lookup::Found`].
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Turns "zero matches" into [`Lookup::NotFound`], keeping every other error.
///
/// # Errors
///
/// Propagates every error except [`Error::ObjectDoesNotExist`].
pub fn optional<T>(result: Result<T>) -> Result<Lookup<T>> {
    match result {
        Ok(value) => Ok(Lookup::Found(value)),
        Err(Error::ObjectDoesNotExist(_)) => Ok(Lookup::NotFound),
        Err(err) => Err(err),
    }
}

impl ServiceClient {
    /// Runs a lookup query and applies the multiplicity rule.
    ///
    /// A `uuid` filter is moved into the path (`<endpoint>/<uuid>/`); the
    /// remaining filters are sent as query parameters. The result holds one
    /// record, or every match for [`Multiplicity::Few`].
    ///
    /// # Errors
    ///
    /// * [`Error::ObjectDoesNotExist`] when nothing matched (including a 404
    ///   on the direct UUID path)
    /// * [`Error::MultipleObjectsReturned`] when several records matched and
    ///   the multiplicity is [`Multiplicity::ExactlyOne`]
    pub async fn query_resource(
        &self,
        endpoint: Endpoint,
        query: &Query,
        multiplicity: Multiplicity,
    ) -> Result<Vec<Resource>> {
        let mut params = query.clone();
        let direct = params.take(UUID_FILTER);
        let url = match &direct {
            Some(uuid) => self.resource_url(endpoint, uuid, None)?,
            None => self.url_for(endpoint)?,
        };

        let request = ApiRequest::new(Method::GET, url.clone()).with_query(params.clone());
        let body = match self.execute(request).await {
            Ok(response) => response.into_json(),
            Err(Error::Request { status: 404, .. }) if direct.is_some() => Value::Null,
            Err(err) => return Err(err),
        };

        let context = format!("Endpoint: {url}. Query: {params}");
        match body {
            Value::Object(fields) if !fields.is_empty() => Ok(vec![Resource::new(fields)]),
            Value::Array(items) if !items.is_empty() => {
                let mut records = items
                    .into_iter()
                    .map(Resource::from_value)
                    .collect::<Result<Vec<_>>>()?;
                if records.len() > 1 {
                    debug!(matches = records.len(), "Waldur lookup matched several records");
                    match multiplicity {
                        Multiplicity::ExactlyOne => {
                            return Err(Error::MultipleObjectsReturned(format!(
                                "Ambiguous result. {context}"
                            )))
                        }
                        Multiplicity::First => records.truncate(1),
                        Multiplicity::Few => {}
                    }
                }
                Ok(records)
            }
            Value::Null | Value::Object(_) | Value::Array(_) => Err(Error::ObjectDoesNotExist(
                format!("Result is empty. {context}"),
            )),
            other => Err(Error::Parse(format!(
                "Unexpected lookup response: {other}. {context}"
            ))),
        }
    }

    /// Lookup that must match exactly one record.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::query_resource`].
    pub async fn query_one(&self, endpoint: Endpoint, query: &Query) -> Result<Resource> {
        self.query_single(endpoint, query, Multiplicity::ExactlyOne)
            .await
    }

    /// Lookup returning the first of possibly several matches.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::query_resource`].
    pub async fn query_first(&self, endpoint: Endpoint, query: &Query) -> Result<Resource> {
        self.query_single(endpoint, query, Multiplicity::First).await
    }

    /// Lookup returning every match.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::query_resource`].
    pub async fn query_few(&self, endpoint: Endpoint, query: &Query) -> Result<Vec<Resource>> {
        self.query_resource(endpoint, query, Multiplicity::Few)
            .await
    }

    async fn query_single(
        &self,
        endpoint: Endpoint,
        query: &Query,
        multiplicity: Multiplicity,
    ) -> Result<Resource> {
        self.query_resource(endpoint, query, multiplicity)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ObjectDoesNotExist(format!("Result is empty. Endpoint: {endpoint}")))
    }

    /// Resolves a name or UUID, optionally narrowed by extra filters
    /// (e.g. `project_uuid`).
    ///
    /// # Errors
    ///
    /// * [`Error::Validation`] for an empty identifier
    /// * see [`ServiceClient::query_resource`]
    pub async fn get_resource(
        &self,
        endpoint: Endpoint,
        id: &str,
        extra: Option<&Query>,
    ) -> Result<Resource> {
        let id = Identifier::parse(id)?;
        self.get_resource_by_id(endpoint, &id, extra).await
    }

    /// Same as [`ServiceClient::get_resource`] for an already parsed identifier.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::query_resource`].
    pub async fn get_resource_by_id(
        &self,
        endpoint: Endpoint,
        id: &Identifier,
        extra: Option<&Query>,
    ) -> Result<Resource> {
        let (key, value) = id.filter();
        let mut query = Query::with(key, value);
        if let Some(extra) = extra {
            query.extend(extra);
        }
        self.query_one(endpoint, &query).await
    }

    /// Resolves a name or UUID, reporting "no match" as [`Lookup::NotFound`].
    ///
    /// # Errors
    ///
    /// Every failure except "no match" is returned as an error.
    pub async fn find_resource(
        &self,
        endpoint: Endpoint,
        id: &str,
        extra: Option<&Query>,
    ) -> Result<Lookup> {
        optional(self.get_resource(endpoint, id, extra).await)
    }

    /// Fetches `<endpoint>/<uuid>/`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::query_resource`].
    pub async fn get_resource_by_uuid(&self, endpoint: Endpoint, uuid: &str) -> Result<Resource> {
        self.query_one(endpoint, &Query::with(UUID_FILTER, uuid.trim()))
            .await
    }

    /// Reads a whole collection, requesting `page_size=200` unless the
    /// filters set a page size.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::get_all`].
    pub async fn list_resources(
        &self,
        endpoint: Endpoint,
        filters: Option<&Query>,
    ) -> Result<Vec<Resource>> {
        let mut query = filters.cloned().unwrap_or_default();
        query.set_default("page_size", DEFAULT_PAGE_SIZE);
        let url = self.url_for(endpoint)?;
        self.get_all_as(&url, &query).await
    }
}
