//! Transport executor with retry-on-conflict and redirect handling.
//!
//! [`ServiceClient::execute`] is the single entry point every other module
//! funnels requests through. It performs one HTTP exchange per loop
//! iteration, classifies the outcome and decides whether to follow a
//! redirect, pause and retry a `409 Conflict`, or hand the result back.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::poll::{Sleeper, TokioSleeper};
use crate::query::Query;
use crate::types::{Endpoint, Resource};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{redirect, Client, ClientBuilder, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use validator::Validate;

const USER_AGENT: &str = concat!("waldur-core/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default number of attempts for writes answered with 409
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Number of attempts for reads answered with 409
pub const READ_RETRY_BUDGET: u32 = 1;

/// Fixed pause between conflict retries in seconds
pub const CONFLICT_DELAY_SECS: u64 = 2;

/// Maximum number of redirect hops followed for a single call
pub const MAX_REDIRECTS: usize = 10;

/// Expected status for reads and updates
pub const STATUS_OK: &[u16] = &[200];

/// Expected status for creations
pub const STATUS_CREATED: &[u16] = &[201];

/// Expected status for asynchronous actions
pub const STATUS_ACCEPTED: &[u16] = &[202];

/// Expected statuses for deletions
pub const STATUS_DELETED: &[u16] = &[202, 204];

const REDIRECT_STATUSES: &[u16] = &[301, 302, 303, 307, 308];

/// Conflict retry policy.
///
/// A write gets `budget` attempts. Each `409 Conflict` consumes one; while
/// attempts remain the executor pauses for `conflict_delay` and re-issues the
/// identical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of attempts before giving up
    pub budget: u32,

    /// Pause between attempts
    pub conflict_delay: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            budget: DEFAULT_RETRY_BUDGET,
            conflict_delay: Duration::from_secs(CONFLICT_DELAY_SECS),
        }
    }

    /// Set the number of attempts.
    #[must_use]
    pub const fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    /// Set the pause between attempts.
    #[must_use]
    pub const fn with_conflict_delay(mut self, delay: Duration) -> Self {
        self.conflict_delay = delay;
        self
    }

    /// Attempts granted to a call made with `method`.
    #[must_use]
    pub fn budget_for(&self, method: &Method) -> u32 {
        if *method == Method::GET {
            READ_RETRY_BUDGET
        } else {
            self.budget
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// A single logical API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: Url,
    expected: Vec<u16>,
    body: Option<Value>,
    query: Query,
    retry_budget: Option<u32>,
}

impl ApiRequest {
    /// Create a request expecting `200 OK`.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            expected: STATUS_OK.to_vec(),
            body: None,
            query: Query::new(),
            retry_budget: None,
        }
    }

    /// Replace the set of statuses treated as success.
    #[must_use]
    pub fn expect(mut self, statuses: &[u16]) -> Self {
        self.expected = statuses.to_vec();
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach query parameters.
    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Override the conflict retry budget for this call.
    #[must_use]
    pub const fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = Some(budget);
        self
    }

    /// HTTP method of the call.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL of the call.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

/// Successful outcome of a call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Parsed body; `None` for `HEAD` and for empty bodies
    pub body: Option<Value>,
}

impl ApiResponse {
    /// Returns a header as text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the body, or `Value::Null` when there was none.
    #[must_use]
    pub fn into_json(self) -> Value {
        self.body.unwrap_or(Value::Null)
    }

    /// Decodes the body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_json())?)
    }

    /// Returns the body as a single resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the body is not a JSON object.
    pub fn into_resource(self) -> Result<Resource> {
        Resource::from_value(self.into_json())
    }
}

enum Attempt {
    Done(ApiResponse),
    Conflict(String),
    Redirect { status: u16, location: Url },
}

/// Builder for [`ServiceClient`].
pub struct ServiceClientBuilder {
    config: ClientConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl ServiceClientBuilder {
    /// Create a new builder from the provided configuration.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Override how the client pauses between conflict retries and polls.
    #[must_use]
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Finalise the builder and create the [`ServiceClient`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn build(self) -> Result<ServiceClient> {
        self.config.validate()?;
        let base_url = self.config.parse_api_url()?;

        let mut authorization = HeaderValue::from_str(&self.config.authorization())
            .map_err(|err| Error::Config(format!("Invalid access token: {err}")))?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let user_agent = self.config.user_agent.as_deref().unwrap_or(USER_AGENT);

        let mut builder = ClientBuilder::new()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(self.config.timeout())
            .redirect(redirect::Policy::none());

        if !self.config.verify_ssl {
            warn!("TLS verification disabled for Waldur client");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|err| Error::Config(format!("Failed to build Waldur HTTP client: {err}")))?;

        Ok(ServiceClient {
            http,
            base_url,
            retry_policy: self.config.retry_policy(),
            sleeper: self.sleeper,
        })
    }
}

/// Asynchronous Waldur API client.
///
/// Cloning is cheap: the connection pool and the sleeper are shared.
#[derive(Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: Url,
    retry_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.base_url.as_str())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    /// Construct a client directly from the configuration.
    ///
    /// # Errors
    ///
    /// See [`ServiceClientBuilder::build`].
    pub fn new(config: ClientConfig) -> Result<Self> {
        ServiceClientBuilder::new(config).build()
    }

    /// Start a builder pre-populated with the provided configuration.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ServiceClientBuilder {
        ServiceClientBuilder::new(config)
    }

    /// Access the API root URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Access the conflict retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub(crate) fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Collection URL, e.g. `<api>/openstack-tenants/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the URL cannot be joined.
    pub fn url_for(&self, endpoint: Endpoint) -> Result<Url> {
        self.path_url(endpoint.path())
    }

    /// URL of an arbitrary path below the API root. A trailing slash is added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the URL cannot be joined.
    pub fn path_url(&self, path: &str) -> Result<Url> {
        let trimmed = path.trim_matches('/');
        self.base_url
            .join(&format!("{trimmed}/"))
            .map_err(|err| Error::InvalidEndpoint(format!("Invalid path `{path}`: {err}")))
    }

    /// URL of a single resource, optionally followed by an action segment:
    /// `<api>/<endpoint>/<id>/[<action>/]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `id` is empty.
    pub fn resource_url(&self, endpoint: Endpoint, id: &str, action: Option<&str>) -> Result<Url> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::Validation("Empty ID is not allowed.".to_string()));
        }
        match action {
            Some(action) => self.path_url(&format!("{}/{id}/{action}", endpoint.path())),
            None => self.path_url(&format!("{}/{id}", endpoint.path())),
        }
    }

    /// URL of a resource addressed by an [`Identifier`] holding a UUID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the identifier is a name.
    pub fn identifier_url(&self, endpoint: Endpoint, id: &Identifier, action: Option<&str>) -> Result<Url> {
        match id {
            Identifier::UniqueId(_) => self.resource_url(endpoint, &id.to_string(), action),
            Identifier::Name(name) => Err(Error::Validation(format!(
                "Expected a UUID for {endpoint}, got name: {name}"
            ))),
        }
    }

    /// Parses an absolute URL taken from a resource's `url` field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the URL is malformed.
    pub fn absolute_url(&self, url: &str) -> Result<Url> {
        Ok(Url::parse(url)?)
    }

    /// Runs one logical call: follows `POST` redirects and retries `409
    /// Conflict` until the retry budget is spent.
    ///
    /// # Errors
    ///
    /// * [`Error::Transport`] when no response was obtained
    /// * [`Error::Request`] on an unexpected status or a broken redirect
    /// * [`Error::RetryExhausted`] when every attempt ended with `409`
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut budget = request
            .retry_budget
            .unwrap_or_else(|| self.retry_policy.budget_for(&request.method))
            .max(1);
        let mut url = request.url.clone();
        let mut redirects = 0;
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(method = %request.method, url = %url, attempt, "Waldur request");

            match self.send_once(&request, &url).await? {
                Attempt::Done(response) => return Ok(response),
                Attempt::Redirect { status, location } => {
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Err(Error::Request {
                            method: request.method.to_string(),
                            url: url.to_string(),
                            status,
                            detail: Value::String(format!(
                                "Exceeded the limit of {MAX_REDIRECTS} redirects"
                            )),
                        });
                    }
                    debug!("Following redirect to {}", location);
                    url = location;
                }
                Attempt::Conflict(body) => {
                    budget -= 1;
                    if budget == 0 {
                        return Err(Error::RetryExhausted {
                            method: request.method.to_string(),
                            url: url.to_string(),
                            body,
                        });
                    }
                    let delay = self.retry_policy.conflict_delay;
                    debug!("Retrying Waldur request after {:?}", delay);
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    async fn send_once(&self, request: &ApiRequest, url: &Url) -> Result<Attempt> {
        let mut builder = self.http.request(request.method.clone(), url.clone());
        if !request.query.is_empty() {
            builder = builder.query(request.query.pairs());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let code = status.as_u16();

        if request.method == Method::POST
            && REDIRECT_STATUSES.contains(&code)
            && !request.expected.contains(&code)
        {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| url.join(value).ok());
            return match location {
                Some(location) => Ok(Attempt::Redirect {
                    status: code,
                    location,
                }),
                None => Err(Error::Request {
                    method: request.method.to_string(),
                    url: url.to_string(),
                    status: code,
                    detail: Value::String("Redirect without a usable Location header".to_string()),
                }),
            };
        }

        let headers = response.headers().clone();

        if request.expected.contains(&code) {
            if request.method == Method::HEAD {
                return Ok(Attempt::Done(ApiResponse {
                    status,
                    headers,
                    body: None,
                }));
            }
            let text = response.text().await?;
            let body = if text.trim().is_empty() {
                None
            } else {
                Some(serde_json::from_str(&text)?)
            };
            return Ok(Attempt::Done(ApiResponse {
                status,
                headers,
                body,
            }));
        }

        let text = response.text().await?;
        if status == StatusCode::CONFLICT {
            debug!(url = %url, "Waldur answered 409 Conflict");
            return Ok(Attempt::Conflict(text));
        }

        let detail =
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| Value::String(text.clone()));
        Err(Error::Request {
            method: request.method.to_string(),
            url: url.to_string(),
            status: code,
            detail,
        })
    }

    /// `GET` expecting `200 OK`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn get(&self, url: &Url, query: &Query) -> Result<Value> {
        let request = ApiRequest::new(Method::GET, url.clone()).with_query(query.clone());
        Ok(self.execute(request).await?.into_json())
    }

    /// `GET` decoding the body into `T`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`]; [`Error::Parse`] if decoding fails.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url, query: &Query) -> Result<T> {
        let request = ApiRequest::new(Method::GET, url.clone()).with_query(query.clone());
        self.execute(request).await?.decode()
    }

    /// `HEAD` expecting `200 OK`; returns the headers.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn head(&self, url: &Url, query: &Query) -> Result<HeaderMap> {
        let request = ApiRequest::new(Method::HEAD, url.clone()).with_query(query.clone());
        Ok(self.execute(request).await?.headers)
    }

    /// Number of records matching `query`, read from `X-Result-Count`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the header is missing or not a number.
    pub async fn count(&self, url: &Url, query: &Query) -> Result<u64> {
        let headers = self.head(url, query).await?;
        headers
            .get("X-Result-Count")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| Error::Parse("Response has no valid X-Result-Count header".to_string()))
    }

    /// `POST` with an optional JSON body.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn post<B>(&self, url: &Url, expected: &[u16], body: Option<&B>) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let mut request = ApiRequest::new(Method::POST, url.clone()).expect(expected);
        if let Some(body) = body {
            request = request.with_body(serde_json::to_value(body)?);
        }
        Ok(self.execute(request).await?.into_json())
    }

    /// `PUT` expecting `200 OK`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn put<B>(&self, url: &Url, body: &B) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::new(Method::PUT, url.clone()).with_body(serde_json::to_value(body)?);
        Ok(self.execute(request).await?.into_json())
    }

    /// `PATCH` expecting `200 OK`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn patch<B>(&self, url: &Url, body: &B) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let request =
            ApiRequest::new(Method::PATCH, url.clone()).with_body(serde_json::to_value(body)?);
        Ok(self.execute(request).await?.into_json())
    }

    /// `DELETE` accepting `expected`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn delete(&self, url: &Url, expected: &[u16]) -> Result<Value> {
        let request = ApiRequest::new(Method::DELETE, url.clone()).expect(expected);
        Ok(self.execute(request).await?.into_json())
    }

    /// `POST <endpoint>/<id>/<action>/`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn action<B>(
        &self,
        endpoint: Endpoint,
        id: &str,
        action: &str,
        expected: &[u16],
        body: Option<&B>,
    ) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let url = self.resource_url(endpoint, id, Some(action))?;
        self.post(&url, expected, body).await
    }

    /// Creates a resource in a collection (`201 Created`).
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`]; [`Error::Parse`] if the reply is not an object.
    pub async fn create<B>(&self, endpoint: Endpoint, payload: &B) -> Result<Resource>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url_for(endpoint)?;
        Resource::from_value(self.post(&url, STATUS_CREATED, Some(payload)).await?)
    }

    /// Replaces fields of a resource with `PUT` (`200 OK`).
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`]; [`Error::Parse`] if the reply is not an object.
    pub async fn update<B>(&self, endpoint: Endpoint, id: &str, payload: &B) -> Result<Resource>
    where
        B: Serialize + ?Sized,
    {
        let url = self.resource_url(endpoint, id, None)?;
        Resource::from_value(self.put(&url, payload).await?)
    }

    /// Partially updates a resource with `PATCH` (`200 OK`).
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`]; [`Error::Parse`] if the reply is not an object.
    pub async fn partial_update<B>(&self, endpoint: Endpoint, id: &str, payload: &B) -> Result<Resource>
    where
        B: Serialize + ?Sized,
    {
        let url = self.resource_url(endpoint, id, None)?;
        Resource::from_value(self.patch(&url, payload).await?)
    }

    /// Deletes a resource (`202` or `204`).
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::execute`].
    pub async fn destroy(&self, endpoint: Endpoint, id: &str) -> Result<()> {
        let url = self.resource_url(endpoint, id, None)?;
        self.delete(&url, STATUS_DELETED).await.map(|_| ())
    }
}
