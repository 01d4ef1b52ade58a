use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, debug, info_span, warn};
use url::Url;
use uuid::Uuid;

use super::checker::{HttpClient, HttpRequest, HttpResponse};
use crate::database::models::{Monitor, UptimeInterval};
use crate::error::UptimeCheckError;
use crate::events::{EventBus, RedirectEvent, UptimeEvent, UptimeOutcome};
use crate::handlers::StatusLookup;

pub const DEFAULT_USER_AGENT: &str = concat!("upwatch/", env!("CARGO_PKG_VERSION"));
const ACCEPT_ENCODING: &str = "gzip, deflate, br";

/// How often a failing request is attempted before the monitor is reported down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` waits `n * backoff` before the next one
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_millis(500) }
    }
}

/// Performs uptime checks and publishes their outcome to the event bus.
///
/// Failures never escape a check; they become `Down` events.
pub struct UptimeChecker {
    client: Arc<dyn HttpClient>,
    bus: EventBus,
    status_lookup: Arc<dyn StatusLookup>,
    retry: RetryPolicy,
    user_agent: String,
}

/// Last attempt of a retried request, with the time it took
struct Attempt {
    response: HttpResponse,
    latency_ms: u64,
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

impl UptimeChecker {
    pub fn new(
        client: Arc<dyn HttpClient>,
        bus: EventBus,
        status_lookup: Arc<dyn StatusLookup>,
        retry: RetryPolicy,
        user_agent: impl Into<String>,
    ) -> Self {
        Self { client, bus, status_lookup, retry, user_agent: user_agent.into() }
    }

    pub async fn check(&self, monitor: Arc<Monitor>) {
        self.check_then(monitor, |_| {}).await;
    }

    /// Run one check, following redirects, then call `on_done` exactly once.
    ///
    /// If the check panics `on_done` is dropped without being called, which
    /// still releases anything it owns.
    pub async fn check_then<F>(&self, monitor: Arc<Monitor>, on_done: F)
    where
        F: FnOnce(&Monitor) + Send,
    {
        let span = info_span!("uptime_check", check_id = %Uuid::new_v4(), monitor = monitor.id);
        self.run(&monitor).instrument(span).await;
        on_done(&monitor);
    }

    async fn run(&self, monitor: &Arc<Monitor>) {
        // Every event of one redirect chain refers to the same open interval
        let previous = self.open_interval(monitor).await;

        let mut url = match Url::parse(&monitor.url) {
            Ok(url) => url,
            Err(e) => {
                self.publish_down(monitor, previous, None, format!("Invalid URL '{}': {}", monitor.url, e));
                return;
            }
        };
        let mut visited: Vec<Url> = Vec::new();

        loop {
            visited.push(url.clone());
            let request = self.build_request(monitor, url.clone());
            let attempt = match self.send_with_retry(&request).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    self.publish_down(monitor, previous, None, UptimeCheckError::Transport(e.to_string()).to_string());
                    return;
                }
            };

            let status = attempt.response.status;
            if is_success(status) {
                debug!(url = %url, status, latency_ms = attempt.latency_ms, "Monitor is up");
                self.bus.publish(UptimeEvent::new(
                    monitor.clone(),
                    previous,
                    UptimeOutcome::Up { status, latency_ms: attempt.latency_ms },
                ));
                return;
            }

            if !is_redirect(status) {
                self.publish_down(monitor, previous, Some(status), status_error(status).to_string());
                return;
            }

            let location = match self.next_location(monitor, &url, &attempt.response) {
                Ok(location) => location,
                Err(e) => {
                    self.publish_down(monitor, previous, Some(status), e.to_string());
                    return;
                }
            };

            debug!(from = %url, to = %location, status, "Redirected");
            self.bus.publish(RedirectEvent::new(monitor.clone(), location.clone()));

            if visited.contains(&location) {
                self.publish_down(monitor, previous, Some(status), UptimeCheckError::RedirectLoop.to_string());
                return;
            }
            url = location;
        }
    }

    /// Resolve where a redirect response points
    fn next_location(&self, monitor: &Monitor, current: &Url, response: &HttpResponse) -> Result<Url, UptimeCheckError> {
        if !monitor.follow_redirects {
            return Err(UptimeCheckError::RedirectsDisabled);
        }

        let location = response.location.as_deref().ok_or(UptimeCheckError::InvalidRedirection)?;
        // `join` keeps absolute locations as they are
        current.join(location).map_err(|_| UptimeCheckError::InvalidRedirection)
    }

    fn build_request(&self, monitor: &Monitor, url: Url) -> HttpRequest {
        let mut headers = vec![
            ("Accept", "*/*".to_string()),
            ("Accept-Encoding", ACCEPT_ENCODING.to_string()),
            ("User-Agent", self.user_agent.clone()),
        ];
        if monitor.force_no_cache {
            headers.push(("Cache-Control", "no-cache".to_string()));
        }

        HttpRequest { method: monitor.request_method, url, headers }
    }

    async fn send_with_retry(&self, request: &HttpRequest) -> anyhow::Result<Attempt> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let result = self.client.send(request).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let retryable = match &result {
                Ok(response) => !is_success(response.status) && !is_redirect(response.status),
                Err(_) => true,
            };

            if !retryable || attempt >= max_attempts {
                return result.map(|response| Attempt { response, latency_ms });
            }

            match &result {
                Ok(response) => debug!(url = %request.url, attempt, status = response.status, "Retrying request"),
                Err(e) => debug!(url = %request.url, attempt, error = %e, "Retrying request"),
            }
            tokio::time::sleep(self.retry.backoff * attempt).await;
            attempt += 1;
        }
    }

    async fn open_interval(&self, monitor: &Monitor) -> Option<UptimeInterval> {
        match self.status_lookup.open_uptime_interval(monitor.id).await {
            Ok(interval) => interval,
            Err(e) => {
                warn!(monitor = monitor.id, error = %e, "Could not read the open uptime interval");
                None
            }
        }
    }

    fn publish_down(&self, monitor: &Arc<Monitor>, previous: Option<UptimeInterval>, status: Option<u16>, error: String) {
        debug!(monitor = monitor.id, ?status, error = %error, "Monitor is down");
        self.bus.publish(UptimeEvent::new(monitor.clone(), previous, UptimeOutcome::Down { status, error }));
    }
}

/// Error text for a final status that is neither success nor redirect
fn status_error(status: u16) -> UptimeCheckError {
    match reqwest::StatusCode::from_u16(status).ok().and_then(|code| code.canonical_reason()) {
        Some(reason) => UptimeCheckError::UnexpectedStatus(reason),
        None => UptimeCheckError::InvalidStatus(status),
    }
}
