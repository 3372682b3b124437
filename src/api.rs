//! Event API connection over the two transports.
//!
//! The runner talks to exactly one of two endpoints, selected once at
//! startup: the unauthenticated local sidecar inside the cluster, or the
//! remote control plane with a bearer token. Both expose the same send
//! and poll operations; only paths and authentication differ.

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::RunnerConfig;
use crate::error::TransportError;
use crate::event::{CLOUDEVENTS_CONTENT_TYPE, CloudEvent};

/// Delivery path on the local sidecar.
const LOCAL_EVENT_PATH: &str = "/event";
/// Delivery path on the remote control plane.
const REMOTE_EVENT_PATH: &str = "/v1/event";
/// Remote path listing pending triggered events, parameterized by type.
const TRIGGERED_EVENTS_PATH: &str = "/controlPlane/v1/event/triggered";
/// Remote metadata path probed by the startup health check.
const METADATA_PATH: &str = "/v1/metadata";

/// Which endpoint the connection talks to.
#[derive(Debug)]
enum Transport {
    /// In-cluster sidecar, no credential.
    Local { base: String },
    /// Control plane API, bearer token on every request.
    Remote { base: String, token: SecretString },
}

/// HTTP connection shared by the lifecycle sender and the polling loop.
#[derive(Debug)]
pub struct ApiConnection {
    transport: Transport,
    client: reqwest::Client,
}

/// One page of pending triggered events from the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggeredEvents {
    #[serde(rename = "totalCount", default)]
    pub total_count: u64,
    #[serde(default)]
    pub events: Vec<CloudEvent>,
}

impl ApiConnection {
    /// Connection against a local sidecar base URL.
    pub fn local(base: impl Into<String>) -> Self {
        Self {
            transport: Transport::Local {
                base: normalize_base(base.into()),
            },
            client: reqwest::Client::new(),
        }
    }

    /// Connection against a remote control plane with a bearer token.
    pub fn remote(base: impl Into<String>, token: SecretString) -> Self {
        Self {
            transport: Transport::Remote {
                base: normalize_base(base.into()),
                token,
            },
            client: reqwest::Client::new(),
        }
    }

    /// Select the transport from config: remote when both the endpoint and
    /// the token are present, local otherwise.
    pub fn from_config(config: &RunnerConfig) -> Self {
        match (&config.api_endpoint, &config.api_token) {
            (Some(endpoint), Some(token)) => {
                Self::remote(endpoint.clone(), SecretString::from(token.expose_secret()))
            }
            (None, None) => Self::local(config.local_endpoint.clone()),
            _ => {
                tracing::warn!(
                    "KEPTN_ENDPOINT and KEPTN_API_TOKEN must both be set for the remote \
                     transport; falling back to the local sidecar"
                );
                Self::local(config.local_endpoint.clone())
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.transport, Transport::Remote { .. })
    }

    /// Base URL of the selected endpoint, without a trailing slash.
    pub fn base(&self) -> &str {
        match &self.transport {
            Transport::Local { base } => base,
            Transport::Remote { base, .. } => base,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.base())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.api_url(path));
        match &self.transport {
            Transport::Local { .. } => builder,
            Transport::Remote { token, .. } => builder.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
        }
    }

    /// GET against the connection's base. Non-2xx responses become a
    /// distinct [`TransportError::Status`].
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        ensure_success(path, resp).await
    }

    /// POST a JSON body against the connection's base. Non-2xx responses
    /// become a distinct [`TransportError::Status`].
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, TransportError> {
        let resp = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        ensure_success(path, resp).await
    }

    /// Deliver an outgoing envelope on this transport's event path.
    pub async fn post_event(&self, event: &CloudEvent) -> Result<(), TransportError> {
        let path = match &self.transport {
            Transport::Local { .. } => LOCAL_EVENT_PATH,
            Transport::Remote { .. } => REMOTE_EVENT_PATH,
        };
        let resp = self
            .request(Method::POST, path)
            .header(reqwest::header::CONTENT_TYPE, CLOUDEVENTS_CONTENT_TYPE)
            .json(event)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        ensure_success(path, resp).await?;
        Ok(())
    }

    /// Fetch the pending triggered events for one fully qualified event
    /// type, e.g. `sh.keptn.event.deployment.triggered`.
    pub async fn triggered_events(
        &self,
        event_type: &str,
    ) -> Result<TriggeredEvents, TransportError> {
        let path = format!("{TRIGGERED_EVENTS_PATH}/{event_type}");
        let resp = self.get(&path).await?;
        resp.json::<TriggeredEvents>()
            .await
            .map_err(|e| TransportError::Decode {
                path,
                reason: e.to_string(),
            })
    }

    /// Startup probe. The local sidecar has nothing to probe; the remote
    /// control plane must answer its metadata path.
    pub async fn health_check(&self) -> Result<(), TransportError> {
        match &self.transport {
            Transport::Local { .. } => Ok(()),
            Transport::Remote { base, .. } => match self.get(METADATA_PATH).await {
                Ok(_) => Ok(()),
                Err(e) => Err(TransportError::HealthCheckFailed {
                    base: base.clone(),
                    reason: e.to_string(),
                }),
            },
        }
    }
}

fn normalize_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

async fn ensure_success(
    path: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        path: path.to_string(),
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EVENT_TYPE_PREFIX;
    use serde_json::json;

    fn remote(base: &str) -> ApiConnection {
        ApiConnection::remote(base, SecretString::from("test-token"))
    }

    #[test]
    fn base_urls_lose_their_trailing_slash() {
        let conn = ApiConnection::local("http://127.0.0.1:8081/");
        assert_eq!(conn.base(), "http://127.0.0.1:8081");
        assert_eq!(conn.api_url("/event"), "http://127.0.0.1:8081/event");
    }

    #[test]
    fn transport_selection_requires_both_credentials() {
        let mut config = RunnerConfig {
            api_endpoint: Some("https://api.keptn.example.com".to_string()),
            api_token: Some(SecretString::from("tok")),
            local_endpoint: "http://127.0.0.1:8081".to_string(),
            port: 8080,
            path: "/".to_string(),
            poll_interval: std::time::Duration::from_secs(10),
            configuration_service: None,
        };
        assert!(ApiConnection::from_config(&config).is_remote());

        config.api_token = None;
        let conn = ApiConnection::from_config(&config);
        assert!(!conn.is_remote());
        assert_eq!(conn.base(), "http://127.0.0.1:8081");
    }

    #[tokio::test]
    async fn local_send_hits_the_sidecar_event_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/event")
            .match_header("content-type", CLOUDEVENTS_CONTENT_TYPE)
            .match_body(mockito::Matcher::PartialJson(json!({
                "type": "sh.keptn.event.deployment.started"
            })))
            .with_status(200)
            .create_async()
            .await;

        let conn = ApiConnection::local(server.url());
        let event = CloudEvent::new("sh.keptn.event.deployment.started", json!({}));
        conn.post_event(&event).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn remote_send_is_versioned_and_authenticated() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/event")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .create_async()
            .await;

        let conn = remote(&server.url());
        let event = CloudEvent::new("sh.keptn.event.deployment.finished", json!({}));
        conn.post_event(&event).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_send_is_a_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/event")
            .with_status(503)
            .with_body("sidecar overloaded")
            .create_async()
            .await;

        let conn = ApiConnection::local(server.url());
        let event = CloudEvent::new("sh.keptn.event.deployment.started", json!({}));
        match conn.post_event(&event).await {
            Err(TransportError::Status { status, body, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "sidecar overloaded");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn triggered_events_parse_the_control_plane_page() {
        let event_type = format!("{EVENT_TYPE_PREFIX}deployment.triggered");
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                format!("/controlPlane/v1/event/triggered/{event_type}").as_str(),
            )
            .match_header("authorization", "Bearer test-token")
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "totalCount": 1,
                    "events": [{
                        "id": "e1",
                        "specversion": "1.0",
                        "source": "shipyard-controller",
                        "type": "sh.keptn.event.deployment.triggered",
                        "shkeptncontext": "ctx1",
                        "data": {"project": "p", "service": "s", "stage": "st"}
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let conn = remote(&server.url());
        let page = conn.triggered_events(&event_type).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].id, "e1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn triggered_events_surface_garbage_bodies_as_decode_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_body("<html>gateway error</html>")
            .create_async()
            .await;

        let conn = remote(&server.url());
        let err = conn
            .triggered_events("sh.keptn.event.deployment.triggered")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode { .. }));
    }

    #[tokio::test]
    async fn health_check_probes_remote_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/metadata")
            .with_body(json!({"keptnversion": "0.19.0"}).to_string())
            .create_async()
            .await;

        remote(&server.url()).health_check().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn health_check_failure_names_the_base() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/metadata")
            .with_status(500)
            .create_async()
            .await;

        let err = remote(&server.url()).health_check().await.unwrap_err();
        match err {
            TransportError::HealthCheckFailed { base, .. } => assert_eq!(base, server.url()),
            other => panic!("expected health check error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_health_check_is_a_no_op() {
        // Nothing listens on this port; the local probe must not dial out.
        let conn = ApiConnection::local("http://127.0.0.1:9");
        conn.health_check().await.unwrap();
    }
}
