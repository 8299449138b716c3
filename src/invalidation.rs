use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, Request};
use serde::Serialize;

use crate::error::InvalidationError;
use crate::models::EventId;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Receives "this rendered path is stale" signals.
#[async_trait]
pub trait InvalidationSink: Send + Sync {
    async fn revalidate(&self, path: &str) -> Result<(), InvalidationError>;
}

/// Posts `path` (and `secret` when set) as form fields to an on-demand
/// revalidation endpoint.
pub struct HttpRevalidateSink {
    client: Client,
    endpoint: String,
    secret: Option<String>,
}

impl HttpRevalidateSink {
    pub fn new(endpoint: &str, secret: Option<String>) -> Result<Self, InvalidationError> {
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(InvalidationError::Unavailable(
                "revalidate endpoint is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|err| InvalidationError::Http(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            secret,
        })
    }

    fn request(&self, path: &str) -> Result<Request, InvalidationError> {
        let mut form = vec![("path", path)];
        if let Some(secret) = self.secret.as_deref() {
            form.push(("secret", secret));
        }
        self.client
            .post(&self.endpoint)
            .form(&form)
            .build()
            .map_err(|err| InvalidationError::Http(err.to_string()))
    }
}

#[async_trait]
impl InvalidationSink for HttpRevalidateSink {
    async fn revalidate(&self, path: &str) -> Result<(), InvalidationError> {
        let request = self.request(path)?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| InvalidationError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvalidationError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}

/// Only logs. Used when no revalidation endpoint is configured.
pub struct LogSink;

#[async_trait]
impl InvalidationSink for LogSink {
    async fn revalidate(&self, path: &str) -> Result<(), InvalidationError> {
        tracing::info!(path, "revalidate");
        Ok(())
    }
}

/// Keeps every path it receives, in order.
#[derive(Default)]
pub struct RecordingSink {
    paths: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.clear();
        }
    }
}

#[async_trait]
impl InvalidationSink for RecordingSink {
    async fn revalidate(&self, path: &str) -> Result<(), InvalidationError> {
        self.paths
            .lock()
            .map_err(|_| InvalidationError::Unavailable("recording sink poisoned".to_string()))?
            .push(path.to_string());
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePaths {
    pub detail_prefix: String,
    pub listing: String,
}

impl Default for ResourcePaths {
    fn default() -> Self {
        Self {
            detail_prefix: "/dashboard/e/event".to_string(),
            listing: "/events".to_string(),
        }
    }
}

impl ResourcePaths {
    pub fn detail(&self, id: EventId) -> String {
        format!("{}/{}", self.detail_prefix.trim_end_matches('/'), id)
    }

    /// Detail view first, then the listing.
    pub fn for_event(&self, id: EventId) -> [String; 2] {
        [self.detail(id), self.listing.clone()]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidationFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of the signals sent after a successful mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub signalled: Vec<String>,
    pub failures: Vec<InvalidationFailure>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct Invalidator {
    sink: Arc<dyn InvalidationSink>,
    paths: ResourcePaths,
}

impl Invalidator {
    pub fn new(sink: Arc<dyn InvalidationSink>, paths: ResourcePaths) -> Self {
        Self { sink, paths }
    }

    pub fn with_paths(mut self, paths: ResourcePaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn paths(&self) -> &ResourcePaths {
        &self.paths
    }

    /// Signals the event's detail path and the listing path. Sink failures
    /// are logged and reported, never returned as errors.
    pub async fn event_changed(&self, id: EventId) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for path in self.paths.for_event(id) {
            match self.sink.revalidate(&path).await {
                Ok(()) => report.signalled.push(path),
                Err(err) => {
                    tracing::warn!(%path, error = %err, "cache invalidation failed");
                    report.failures.push(InvalidationFailure {
                        path,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakySink;

    #[async_trait]
    impl InvalidationSink for FlakySink {
        async fn revalidate(&self, path: &str) -> Result<(), InvalidationError> {
            if path == "/events" {
                return Err(InvalidationError::Rejected("503".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn detail_path_trims_trailing_slash() {
        let paths = ResourcePaths {
            detail_prefix: "/admin/events/".into(),
            listing: "/".into(),
        };
        assert_eq!(paths.detail(12), "/admin/events/12");
    }

    #[tokio::test]
    async fn signals_detail_then_listing() {
        let sink = Arc::new(RecordingSink::new());
        let invalidator = Invalidator::new(sink.clone(), ResourcePaths::default());
        let report = invalidator.event_changed(5).await;

        assert!(report.is_clean());
        assert_eq!(sink.paths(), vec!["/dashboard/e/event/5", "/events"]);
        assert_eq!(report.signalled, sink.paths());
    }

    #[tokio::test]
    async fn failures_are_collected_not_raised() {
        let invalidator = Invalidator::new(Arc::new(FlakySink), ResourcePaths::default());
        let report = invalidator.event_changed(5).await;

        assert_eq!(report.signalled, vec!["/dashboard/e/event/5"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "/events");
    }

    #[test]
    fn http_sink_requires_endpoint() {
        assert!(HttpRevalidateSink::new("  ", None).is_err());
        assert!(HttpRevalidateSink::new("http://localhost:3000/api/revalidate", None).is_ok());
    }

    fn form_body(request: &Request) -> &str {
        let bytes = request.body().and_then(|body| body.as_bytes()).unwrap();
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn http_sink_posts_form_fields() {
        let sink = HttpRevalidateSink::new(
            "http://localhost:3000/api/revalidate",
            Some("s3cr&t".into()),
        )
        .unwrap();
        let request = sink.request("/dashboard/e/event/7").unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "http://localhost:3000/api/revalidate");
        assert_eq!(
            request.headers()[reqwest::header::CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(form_body(&request), "path=%2Fdashboard%2Fe%2Fevent%2F7&secret=s3cr%26t");
    }

    #[test]
    fn http_sink_omits_missing_secret() {
        let sink = HttpRevalidateSink::new("http://localhost:3000/api/revalidate", None).unwrap();
        let request = sink.request("/events").unwrap();
        assert_eq!(form_body(&request), "path=%2Fevents");
    }
}
