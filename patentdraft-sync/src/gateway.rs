//! Remote fetch gateway: the HTTP side of draft synchronization.

use crate::config::{AuthConfig, SyncConfig};
use async_trait::async_trait;
use patentdraft_core::{DraftDocument, GatewayError, ProjectId, SectionUpdate, TenantId};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// Result type for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    pub updates: Vec<SectionUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateResponse {
    pub documents: Vec<DraftDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub version_id: String,
}

/// Authoritative result of restoring a saved draft version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    pub content: String,
    pub version_name: String,
    pub document_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistsResponse {
    pub has_documents: bool,
}

/// Error body the backend sends with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Backend operations on a project's draft documents.
///
/// Every call is scoped to a tenant. Implementations surface non-2xx
/// responses as [`GatewayError::Status`] and undecodable bodies as
/// [`GatewayError::Malformed`].
#[async_trait]
pub trait DraftGateway: Send + Sync {
    /// Fetch the project's documents. `skip_init` asks the backend not to
    /// create empty sections for a fresh project.
    async fn list_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        skip_init: bool,
    ) -> GatewayResult<Vec<DraftDocument>>;

    /// Create or replace one section.
    async fn update_document(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        update: &SectionUpdate,
    ) -> GatewayResult<DraftDocument>;

    /// Create or replace several sections in one request.
    async fn batch_update(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        updates: &[SectionUpdate],
    ) -> GatewayResult<Vec<DraftDocument>>;

    /// Restore the drafts of a saved version.
    async fn restore_version(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        version_id: &str,
    ) -> GatewayResult<RestoreResponse>;

    /// Whether the project has any draft documents at all.
    async fn has_documents(&self, tenant_id: TenantId, project_id: ProjectId)
        -> GatewayResult<bool>;
}

/// `DraftGateway` over the backend's JSON HTTP API.
#[derive(Clone)]
pub struct HttpDraftGateway {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl HttpDraftGateway {
    pub fn new(config: &SyncConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        let auth_header = build_auth_headers(&config.auth)?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    fn documents_path(&self, project_id: ProjectId, suffix: &str) -> String {
        format!(
            "{}/api/projects/{}/draft-documents{}",
            self.base_url, project_id, suffix
        )
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: String,
        tenant_id: TenantId,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .headers(self.auth_header.clone())
            .header("x-tenant-id", tenant_id.to_string())
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> GatewayResult<T> {
        let response = request.send().await.map_err(transport_error)?;
        parse_response(response).await
    }
}

#[async_trait]
impl DraftGateway for HttpDraftGateway {
    async fn list_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        skip_init: bool,
    ) -> GatewayResult<Vec<DraftDocument>> {
        let mut request = self.request(
            reqwest::Method::GET,
            self.documents_path(project_id, ""),
            tenant_id,
        );
        if skip_init {
            request = request.query(&[("skipInit", "true")]);
        }
        self.send(request).await
    }

    async fn update_document(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        update: &SectionUpdate,
    ) -> GatewayResult<DraftDocument> {
        let request = self
            .request(
                reqwest::Method::PUT,
                self.documents_path(project_id, ""),
                tenant_id,
            )
            .json(update);
        self.send(request).await
    }

    async fn batch_update(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        updates: &[SectionUpdate],
    ) -> GatewayResult<Vec<DraftDocument>> {
        let body = BatchUpdateRequest {
            updates: updates.to_vec(),
        };
        let request = self
            .request(
                reqwest::Method::POST,
                self.documents_path(project_id, "/batch"),
                tenant_id,
            )
            .json(&body);
        let response: BatchUpdateResponse = self.send(request).await?;
        Ok(response.documents)
    }

    async fn restore_version(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        version_id: &str,
    ) -> GatewayResult<RestoreResponse> {
        let body = RestoreRequest {
            version_id: version_id.to_string(),
        };
        let request = self
            .request(
                reqwest::Method::POST,
                self.documents_path(project_id, "/restore"),
                tenant_id,
            )
            .json(&body);
        self.send(request).await
    }

    async fn has_documents(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> GatewayResult<bool> {
        let request = self.request(
            reqwest::Method::GET,
            self.documents_path(project_id, "/exists"),
            tenant_id,
        );
        let response: ExistsResponse = self.send(request).await?;
        Ok(response.has_documents)
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport(err.to_string())
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> GatewayResult<T> {
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;
    if status.is_success() {
        serde_json::from_str::<T>(&text).map_err(|e| GatewayError::Malformed(e.to_string()))
    } else {
        Err(GatewayError::Status {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(message),
            ..
        })
        | Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ => body.to_string(),
    }
}

fn build_auth_headers(auth: &AuthConfig) -> GatewayResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &auth.api_key {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?,
        );
    }
    if let Some(jwt) = &auth.jwt {
        let value = format!("Bearer {}", jwt);
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&value)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?,
        );
    }
    Ok(headers)
}
