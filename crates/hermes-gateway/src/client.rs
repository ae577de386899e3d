//! HTTP peer client.
//!
//! [`PeerClient`] is the wire implementation of [`UpstreamTransport`] over
//! a peer server speaking the same protocol: resource type and id in the
//! path, filters in the query string, representation via content
//! negotiation. Timeouts live here at the transport boundary; there are no
//! retries.

use http::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use hermes_core::{
    BoxFuture, HermesError, HermesResult, PatchDocument, QueryFilter, QueryResult, Resource,
};
use hermes_dispatch::ChildOperation;

use crate::config::GatewayConfig;
use crate::transport::{ChildOutcome, Representation, UpstreamTransport};

/// Error payload returned by a peer.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct WirePatch<'a> {
    id: &'a str,
    patch: &'a PatchDocument,
}

/// HTTP client for a peer server.
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: Client,
    base_url: String,
}

impl PeerClient {
    /// Creates a peer client from the gateway configuration.
    pub fn new(config: &GatewayConfig) -> HermesResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| HermesError::internal_with_source("failed to create peer client", e))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Returns the peer base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn transport_error(&self, err: reqwest::Error) -> HermesError {
        if err.is_connect() || err.is_timeout() {
            HermesError::gateway_unavailable(format!("peer {} unreachable: {err}", self.base_url))
        } else {
            HermesError::internal_with_source("upstream request failed", err)
        }
    }

    /// Maps a peer error response onto the local taxonomy so protocol
    /// errors re-raise unchanged.
    async fn map_error(resource_type: &str, target: &str, response: Response) -> HermesError {
        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .map(|e| e.message)
            .unwrap_or(raw);
        match status {
            StatusCode::NOT_FOUND => HermesError::not_found(resource_type, target),
            StatusCode::PRECONDITION_FAILED => HermesError::precondition_failed(message),
            StatusCode::FORBIDDEN => HermesError::access_denied(if message.is_empty() {
                "upstream".to_string()
            } else {
                message
            }),
            StatusCode::CONFLICT => HermesError::patch_assertion(message),
            StatusCode::BAD_REQUEST => HermesError::validation(message),
            other => HermesError::upstream(other.as_u16(), message),
        }
    }

    async fn send_for<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
        resource_type: &str,
        target: &str,
    ) -> HermesResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.status().is_success() {
            return Err(Self::map_error(resource_type, target, response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| HermesError::internal_with_source("invalid peer response body", e))
    }

    fn child_path(
        &self,
        resource_type: &str,
        parent_id: Option<&str>,
        child_name: &str,
    ) -> String {
        // Class-scoped bindings use `-` in the parent segment.
        format!("{resource_type}/{}/{child_name}", parent_id.unwrap_or("-"))
    }
}

impl UpstreamTransport for PeerClient {
    fn probe<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.client.get(self.url("_status")).send().await {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            }
        })
    }

    fn fetch<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        version_id: Option<&'a str>,
        representation: &'a Representation,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let path = match version_id {
                Some(version) => format!("{resource_type}/{id}/_history/{version}"),
                None => format!("{resource_type}/{id}"),
            };
            let request = self
                .client
                .get(self.url(&path))
                .header(ACCEPT, representation.accept_value());
            self.send_for(request, resource_type, id).await
        })
    }

    fn fetch_many<'a>(
        &'a self,
        resource_type: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, HermesResult<Vec<Resource>>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let request = self
                .client
                .get(self.url(resource_type))
                .query(&[("_id", ids.join(","))])
                .header(ACCEPT, Representation::Canonical.accept_value());
            let page: QueryResult = self.send_for(request, resource_type, "batch").await?;
            Ok(page.items)
        })
    }

    fn create<'a>(
        &'a self,
        resource_type: &'a str,
        payload: &'a Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(resource_type))
                .query(&[("update_if_exists", update_if_exists.to_string())])
                .header(ACCEPT, Representation::Canonical.accept_value())
                .json(payload);
            self.send_for(request, resource_type, &payload.id).await
        })
    }

    fn update<'a>(
        &'a self,
        resource_type: &'a str,
        payload: &'a Resource,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let request = self
                .client
                .put(self.url(&format!("{resource_type}/{}", payload.id)))
                .header(ACCEPT, Representation::Canonical.accept_value())
                .json(payload);
            self.send_for(request, resource_type, &payload.id).await
        })
    }

    fn delete<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        permanent: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let request = self
                .client
                .delete(self.url(&format!("{resource_type}/{id}")))
                .query(&[("permanent", permanent.to_string())]);
            self.send_for(request, resource_type, id).await
        })
    }

    fn search<'a>(
        &'a self,
        resource_type: &'a str,
        filter: &'a QueryFilter,
        representation: &'a Representation,
    ) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            let mut request = self
                .client
                .get(self.url(resource_type))
                .header(ACCEPT, representation.accept_value())
                .query(&filter.params);
            request = request.query(&[("_offset", filter.offset.to_string())]);
            if let Some(count) = filter.count {
                request = request.query(&[("_count", count.to_string())]);
            }
            if let Some(token) = &filter.continuation {
                request = request.query(&[("_continuation", token.clone())]);
            }
            self.send_for(request, resource_type, "search").await
        })
    }

    fn history<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            let mut request = self
                .client
                .get(self.url(&format!("{resource_type}/{id}/_history")))
                .header(ACCEPT, Representation::Canonical.accept_value());
            if let Some(since) = since {
                request = request.query(&[("since", since)]);
            }
            self.send_for(request, resource_type, id).await
        })
    }

    fn search_related<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        page_size: usize,
        continuation: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            let mut request = self
                .client
                .get(self.url(&format!("{resource_type}/{id}/_related")))
                .header(ACCEPT, Representation::Canonical.accept_value())
                .query(&[("_count", page_size.to_string())]);
            if let Some(token) = continuation {
                request = request.query(&[("_continuation", token)]);
            }
            self.send_for(request, resource_type, id).await
        })
    }

    fn patch<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        patch: &'a PatchDocument,
        force: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let request = self
                .client
                .patch(self.url(&format!("{resource_type}/{id}")))
                .query(&[("force", force.to_string())])
                .header(ACCEPT, Representation::Canonical.accept_value())
                .json(patch);
            self.send_for(request, resource_type, id).await
        })
    }

    fn patch_batch<'a>(
        &'a self,
        resource_type: &'a str,
        patches: &'a [(String, PatchDocument)],
        force: bool,
    ) -> BoxFuture<'a, HermesResult<Vec<Resource>>> {
        Box::pin(async move {
            let body: Vec<WirePatch<'_>> = patches
                .iter()
                .map(|(id, patch)| WirePatch { id, patch })
                .collect();
            let request = self
                .client
                .post(self.url(&format!("{resource_type}/_patch")))
                .query(&[("force", force.to_string())])
                .header(ACCEPT, Representation::Canonical.accept_value())
                .json(&body);
            let page: QueryResult = self.send_for(request, resource_type, "batch").await?;
            Ok(page.items)
        })
    }

    fn child<'a>(
        &'a self,
        resource_type: &'a str,
        parent_id: Option<&'a str>,
        child_name: &'a str,
        operation: &'a ChildOperation,
    ) -> BoxFuture<'a, HermesResult<ChildOutcome>> {
        Box::pin(async move {
            let base = self.child_path(resource_type, parent_id, child_name);
            match operation {
                ChildOperation::Get { child_id } => {
                    let request = self
                        .client
                        .get(self.url(&format!("{base}/{child_id}")))
                        .header(ACCEPT, Representation::Canonical.accept_value());
                    let resource = self.send_for(request, resource_type, child_id).await?;
                    Ok(ChildOutcome::Resource(resource))
                }
                ChildOperation::Add { payload } => {
                    let request = self
                        .client
                        .post(self.url(&base))
                        .header(ACCEPT, Representation::Canonical.accept_value())
                        .json(payload);
                    let resource = self.send_for(request, resource_type, &payload.id).await?;
                    Ok(ChildOutcome::Resource(resource))
                }
                ChildOperation::Remove { child_id } => {
                    let request = self.client.delete(self.url(&format!("{base}/{child_id}")));
                    let resource = self.send_for(request, resource_type, child_id).await?;
                    Ok(ChildOutcome::Resource(resource))
                }
                ChildOperation::Query { filter } => {
                    let request = self
                        .client
                        .get(self.url(&base))
                        .header(ACCEPT, Representation::Canonical.accept_value())
                        .query(&filter.params);
                    let page = self.send_for(request, resource_type, child_name).await?;
                    Ok(ChildOutcome::Page(page))
                }
            }
        })
    }

    fn invoke<'a>(
        &'a self,
        resource_type: &'a str,
        id: Option<&'a str>,
        operation: &'a str,
        params: &'a serde_json::Value,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let path = match id {
                Some(id) => format!("{resource_type}/{id}/${operation}"),
                None => format!("{resource_type}/${operation}"),
            };
            let request = self
                .client
                .post(self.url(&path))
                .header(ACCEPT, Representation::Canonical.accept_value())
                .json(params);
            self.send_for(request, resource_type, operation).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = PeerClient::new(&GatewayConfig::new("https://peer.example.org/")).unwrap();
        assert_eq!(client.base_url(), "https://peer.example.org");
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(PeerClient::new(&GatewayConfig::new("not-a-url")).is_err());
    }

    #[test]
    fn test_child_path_uses_dash_for_class_scope() {
        let client = PeerClient::new(&GatewayConfig::new("http://peer")).unwrap();
        assert_eq!(
            client.child_path("Patient", Some("p-1"), "identifiers"),
            "Patient/p-1/identifiers"
        );
        assert_eq!(
            client.child_path("Patient", None, "merge-candidates"),
            "Patient/-/merge-candidates"
        );
    }
}
