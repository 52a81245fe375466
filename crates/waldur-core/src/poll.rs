//! State polling for long-running operations.
//!
//! Provisioning in Waldur is asynchronous: a create call returns while the
//! backend is still working and the resource's `state` moves through
//! transitional values until it settles on `OK` or `Erred`. The helpers here
//! probe immediately, then sleep and re-probe until the resource settles or
//! the accumulated waiting time reaches the deadline.

use crate::client::ServiceClient;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::types::{Endpoint, Resource, ResourceState};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Default pause between probes in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default polling deadline in seconds
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 600;

/// Suspends the calling task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Pause for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested pause.
///
/// Clones share the same record, so a test can keep one handle while the
/// client owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Requested pauses, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Sum of all requested pauses.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(duration);
        }
    }
}

/// Whether and how long to wait for a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Wait for the resource to settle before returning
    pub wait: bool,
    /// Pause between probes
    pub interval: Duration,
    /// Deadline for the accumulated waiting time
    pub timeout: Duration,
}

impl WaitOptions {
    /// Wait with the default interval and deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            wait: true,
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        }
    }

    /// Return as soon as the request is accepted.
    #[must_use]
    pub const fn no_wait() -> Self {
        Self {
            wait: false,
            ..Self::new()
        }
    }

    /// Set the pause between probes.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    /// The awaited condition holds
    Ready(T),
    /// Keep polling
    Pending,
}

/// Probes until `probe` reports [`PollStatus::Ready`].
///
/// The first probe runs immediately. After that the loop sleeps `interval`,
/// adds it to the elapsed time, probes again and gives up with
/// `on_timeout(elapsed)` once the elapsed time reaches `timeout`. Errors
/// returned by `probe` end the loop at once.
///
/// # Errors
///
/// * [`Error::Validation`] if `interval` is zero
/// * any error produced by `probe`
/// * the error built by `on_timeout`
pub async fn poll_until<T, F, Fut, E>(
    sleeper: &dyn Sleeper,
    interval: Duration,
    timeout: Duration,
    mut probe: F,
    on_timeout: E,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
    E: FnOnce(Duration) -> Error,
{
    if interval.is_zero() {
        return Err(Error::Validation(
            "Polling interval must be greater than zero".to_string(),
        ));
    }

    if let PollStatus::Ready(value) = probe().await? {
        return Ok(value);
    }

    let mut elapsed = Duration::ZERO;
    loop {
        sleeper.sleep(interval).await;
        elapsed += interval;
        debug!(?elapsed, ?timeout, "Polling Waldur resource");

        if let PollStatus::Ready(value) = probe().await? {
            return Ok(value);
        }
        if elapsed >= timeout {
            return Err(on_timeout(elapsed));
        }
    }
}

fn erred() -> Error {
    Error::InvalidState("Resource is in erred state.".to_string())
}

impl ServiceClient {
    /// Polls `<endpoint>/<uuid>/` until its state is `OK` and returns the
    /// settled resource.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidState`] as soon as the state is `Erred`
    /// * [`Error::Timeout`] when the deadline passes
    pub async fn wait_for_state(
        &self,
        endpoint: Endpoint,
        uuid: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Resource> {
        let url = self.resource_url(endpoint, uuid, None)?;
        let url = &url;
        poll_until(
            self.sleeper(),
            interval,
            timeout,
            || async move {
                let resource: Resource = self.get_json(url, &Query::new()).await?;
                match resource.state() {
                    Some(ResourceState::Ok) => Ok(PollStatus::Ready(resource)),
                    Some(ResourceState::Erred) => Err(erred()),
                    _ => Ok(PollStatus::Pending),
                }
            },
            |elapsed| Error::Timeout {
                endpoint: endpoint.to_string(),
                identifier: uuid.to_string(),
                condition: "changed state to stable".to_string(),
                elapsed,
            },
        )
        .await
    }

    /// Same as [`ServiceClient::wait_for_state`] driven by [`crate::poll::WaitOptions`];
    /// returns `None` without any request when waiting is disabled.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::wait_for_state`].
    pub async fn wait_if_requested(
        &self,
        endpoint: Endpoint,
        uuid: &str,
        options: &WaitOptions,
    ) -> Result<Option<Resource>> {
        if !options.wait {
            return Ok(None);
        }
        self.wait_for_state(endpoint, uuid, options.interval, options.timeout)
            .await
            .map(Some)
    }

    /// Polls an instance until `external_ips` is non-empty.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidState`] if the instance is `Erred`
    /// * [`Error::Timeout`] when the deadline passes
    pub async fn wait_for_external_ip(
        &self,
        uuid: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Resource> {
        let endpoint = Endpoint::OpenStackInstances;
        let url = self.resource_url(endpoint, uuid, None)?;
        let url = &url;
        poll_until(
            self.sleeper(),
            interval,
            timeout,
            || async move {
                let instance: Resource = self.get_json(url, &Query::new()).await?;
                if instance.state() == Some(ResourceState::Erred) {
                    return Err(erred());
                }
                let has_ip = instance
                    .get("external_ips")
                    .and_then(Value::as_array)
                    .is_some_and(|ips| !ips.is_empty());
                Ok(if has_ip {
                    PollStatus::Ready(instance)
                } else {
                    PollStatus::Pending
                })
            },
            |elapsed| Error::Timeout {
                endpoint: endpoint.to_string(),
                identifier: uuid.to_string(),
                condition: "got external IP".to_string(),
                elapsed,
            },
        )
        .await
    }

    /// Polls a marketplace order until it exposes `field` (usually
    /// `resource_uuid` or `marketplace_resource_uuid`) and returns its value.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidState`] with the order's `error_message` if the
    ///   order is `erred`
    /// * [`Error::Timeout`] when the deadline passes
    pub async fn wait_for_order_resource(
        &self,
        order_uuid: &str,
        field: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<String> {
        let endpoint = Endpoint::MarketplaceOrders;
        let url = self.resource_url(endpoint, order_uuid, None)?;
        let url = &url;
        poll_until(
            self.sleeper(),
            interval,
            timeout,
            || async move {
                let order: Resource = self.get_json(url, &Query::new()).await?;
                if order.str_field("state") == Some("erred") {
                    let message = order.str_field("error_message").unwrap_or_default();
                    return Err(Error::InvalidState(message.to_string()));
                }
                Ok(match order.str_field(field) {
                    Some(reference) if !reference.is_empty() => {
                        PollStatus::Ready(reference.to_string())
                    }
                    _ => PollStatus::Pending,
                })
            },
            |elapsed| Error::Timeout {
                endpoint: endpoint.to_string(),
                identifier: order_uuid.to_string(),
                condition: format!("exposed `{field}`"),
                elapsed,
            },
        )
        .await
    }
}
