//! [`session::RemoteCatalog`] and [`session::LocalCatalog`] adapters that reach the
//! `cve-remote`/`cve-local` children through the handler library's outbound `Invoke` (§4.H,
//! "The Session Controller runs inside a designated child and issues outbound RPCs back
//! through the broker to reach peer children").

use serde_json::{json, Value};

use handler::{ChildClient, HandlerError};
use session::{BoxFuture, FetchBatch, LocalCatalog, RemoteCatalog, SessionError};

/// A remote fetch is reported as rate-limited by the upstream catalog reusing the handler
/// library's `Upstream` error with this marker in its message, since the stdio wire carries
/// the error message verbatim but collapses every kind of upstream failure into one variant.
const RATE_LIMIT_MARKER: &str = "rate_limited";

pub struct RemoteCatalogClient {
    client: ChildClient,
    target: String,
}

impl RemoteCatalogClient {
    pub fn new(client: ChildClient, target: String) -> Self {
        Self { client, target }
    }
}

impl RemoteCatalog for RemoteCatalogClient {
    fn fetch_batch(&self, start_index: u64, count: u32) -> BoxFuture<'static, Result<FetchBatch, SessionError>> {
        let client = self.client.clone();
        let target = self.target.clone();
        Box::pin(async move {
            let payload = json!({"start_index": start_index, "count": count});
            let response = client
                .invoke(&target, "RPCFetchCVEBatch", payload, None)
                .await
                .map_err(classify)?;

            let items = response
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let advanced_by = response
                .get("advanced_by")
                .and_then(Value::as_u64)
                .unwrap_or(items.len() as u64);
            Ok(FetchBatch { items, advanced_by })
        })
    }
}

pub struct LocalCatalogClient {
    client: ChildClient,
    target: String,
}

impl LocalCatalogClient {
    pub fn new(client: ChildClient, target: String) -> Self {
        Self { client, target }
    }
}

impl LocalCatalog for LocalCatalogClient {
    fn save(&self, item: Value) -> BoxFuture<'static, Result<(), SessionError>> {
        let client = self.client.clone();
        let target = self.target.clone();
        Box::pin(async move {
            client
                .invoke(&target, "RPCSaveCVE", item, None)
                .await
                .map(|_| ())
                .map_err(|err| SessionError::StoreFailed(err.to_string()))
        })
    }
}

fn classify(err: HandlerError) -> SessionError {
    match &err {
        HandlerError::Upstream { message, .. } if message.contains(RATE_LIMIT_MARKER) => SessionError::RateLimited,
        _ => SessionError::RemoteFailed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_rate_limit_marker_is_classified_as_rate_limited() {
        let err = HandlerError::Upstream {
            method: "RPCFetchCVEBatch".into(),
            message: "rate_limited: retry after backoff".into(),
        };
        assert!(matches!(classify(err), SessionError::RateLimited));
    }

    #[test]
    fn other_upstream_failures_are_classified_as_remote_failed() {
        let err = HandlerError::Upstream {
            method: "RPCFetchCVEBatch".into(),
            message: "boom".into(),
        };
        assert!(matches!(classify(err), SessionError::RemoteFailed(_)));
    }
}
