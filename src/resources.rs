//! Configuration service resource retrieval.
//!
//! Resources live at project, stage and service scope and come back
//! base64-encoded in a JSON wrapper. A missing resource is `Ok(None)`,
//! not an error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::error::ResourceError;

/// Client for the configuration service's resource endpoints.
#[derive(Debug, Clone)]
pub struct ResourceClient {
    base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    #[serde(rename = "resourceContent")]
    resource_content: String,
}

impl ResourceClient {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    /// Fetch a project-scoped resource.
    pub async fn project_resource(
        &self,
        project: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        self.fetch(&format!("/v1/project/{project}/resource/{name}"))
            .await
    }

    /// Fetch a stage-scoped resource.
    pub async fn stage_resource(
        &self,
        project: &str,
        stage: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        self.fetch(&format!(
            "/v1/project/{project}/stage/{stage}/resource/{name}"
        ))
        .await
    }

    /// Fetch a service-scoped resource.
    pub async fn service_resource(
        &self,
        project: &str,
        stage: &str,
        service: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        self.fetch(&format!(
            "/v1/project/{project}/stage/{stage}/service/{service}/resource/{name}"
        ))
        .await
    }

    async fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, ResourceError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .map_err(|e| ResourceError::Request {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ResourceError::Status {
                path: path.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body: ResourceResponse =
            resp.json().await.map_err(|e| ResourceError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        let content =
            BASE64
                .decode(body.resource_content)
                .map_err(|e| ResourceError::Decode {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(Some(content))
    }
}
