//! REST client for the license backend.
//!
//! Implements the licensing collaborator traits over the backend's JSON routes
//! (`/licenses`, `/organizations`, `/monitoring/modules`, `/users/me`). Requests carry a static
//! bearer token when one is configured; obtaining that token is somebody else's job.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use console_client::ApiClient;
//! use console_licensing::{LicenseService, ValidationPolicy};
//!
//! let client = Arc::new(ApiClient::new("http://localhost:8000/api/v1", Some(token)));
//! let service = LicenseService::with_backend(client, ValidationPolicy::default());
//! let licenses = service.read_licenses(Default::default()).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use console_core::config::ApiConfig;
use console_licensing::{
    License, LicenseBackend, LicenseError, LicenseUpdate, ListResponse, Message,
    ModuleDescriptor, ModuleRegistry, NewLicense, Organization, OrganizationDirectory, Page,
    Principal, ValidationErrors,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

// ── Error ───────────────────────────────────────────────────────────

/// Transport-level failure, before it is given license meaning.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("decode: {0}")]
    Decode(String),
}

impl ClientError {
    /// Map onto the license error taxonomy. `resource`/`id` name what a 404 refers to.
    pub fn into_license_error(self, resource: &'static str, id: Option<Uuid>) -> LicenseError {
        match self {
            Self::Server {
                status: 404,
                message,
            } => LicenseError::NotFound {
                resource,
                id: id.map(|i| i.to_string()).unwrap_or(message),
            },
            Self::Server {
                status: 409,
                message,
            } => LicenseError::Conflict(message),
            Self::Server {
                status: 401 | 403,
                message,
            } => LicenseError::Unauthorized(message),
            Self::Server {
                status: 422,
                message,
            } => LicenseError::Validation(ValidationErrors::single("request", message)),
            Self::Server { status, message } => LicenseError::Backend {
                status,
                detail: message,
            },
            Self::Network(e) => LicenseError::Transport(e.to_string()),
            Self::Decode(m) => LicenseError::Transport(m),
        }
    }
}

/// Pull a readable message out of an error body. The backend sends `{"detail": "..."}`,
/// or a list of `{"loc": [...], "msg": "..."}` entries for request validation failures.
fn error_detail(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    match value.get("detail") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| {
                let field = item
                    .get("loc")
                    .and_then(|l| l.as_array())
                    .and_then(|l| l.last())
                    .map(|l| l.to_string().trim_matches('"').to_string())
                    .unwrap_or_default();
                let msg = item.get("msg").and_then(|m| m.as_str()).unwrap_or("invalid");
                if field.is_empty() {
                    msg.to_string()
                } else {
                    format!("{field}: {msg}")
                }
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.to_string(),
    }
}

/// The registry answers `{"data": [...]}` with no `count`; a bare list is accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum ModuleListing {
    Bare(Vec<ModuleDescriptor>),
    Enveloped { data: Vec<ModuleDescriptor> },
}

/// Build a `Server` error, falling back to the status text when the body says nothing.
fn server_error(status: reqwest::StatusCode, body: &str) -> ClientError {
    let detail = error_detail(body);
    let message = if detail.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response detail")
            .to_string()
    } else {
        detail
    };
    ClientError::Server {
        status: status.as_u16(),
        message,
    }
}

// ── ApiClient ───────────────────────────────────────────────────────

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build from console configuration, applying the request timeout when one is set.
    pub fn from_config(config: &ApiConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = self.url(path);
        debug!(%method, %url, "backend request");
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Parse an API response, mapping HTTP errors to `ClientError`.
    async fn parse<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, ClientError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(server_error(status, &body));
        }
        resp.json::<R>()
            .await
            .map_err(|e| ClientError::Decode(format!("response body: {e}")))
    }

    async fn get<R: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: Option<&Q>,
    ) -> Result<R, ClientError> {
        let mut req = self.request(reqwest::Method::GET, path);
        if let Some(q) = query {
            req = req.query(q);
        }
        Self::parse(req.send().await?).await
    }

    async fn send_json<R: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let resp = self.request(method, path).json(body).send().await?;
        Self::parse(resp).await
    }

    /// The authenticated user behind the configured token.
    pub async fn current_user(&self) -> Result<Principal, LicenseError> {
        self.get::<Principal, ()>("/users/me", None)
            .await
            .map_err(|e| e.into_license_error("user", None))
    }
}

#[async_trait]
impl LicenseBackend for ApiClient {
    async fn list_licenses(&self, page: Page) -> Result<ListResponse<License>, LicenseError> {
        self.get("/licenses/", Some(&page))
            .await
            .map_err(|e| e.into_license_error("license", None))
    }

    async fn get_license(&self, id: Uuid) -> Result<License, LicenseError> {
        self.get::<_, ()>(&format!("/licenses/{id}"), None)
            .await
            .map_err(|e| e.into_license_error("license", Some(id)))
    }

    async fn create_license(&self, new: &NewLicense) -> Result<License, LicenseError> {
        self.send_json(reqwest::Method::POST, "/licenses/", new)
            .await
            .map_err(|e| match (e, &new.license_key) {
                (ClientError::Server { status: 409, .. }, Some(key)) => {
                    LicenseError::DuplicateKey(key.clone())
                }
                (e, _) => e.into_license_error("organization", Some(new.organization_id)),
            })
    }

    async fn update_license(
        &self,
        id: Uuid,
        update: &LicenseUpdate,
    ) -> Result<License, LicenseError> {
        self.send_json(reqwest::Method::PATCH, &format!("/licenses/{id}"), update)
            .await
            .map_err(|e| e.into_license_error("license", Some(id)))
    }

    async fn delete_license(&self, id: Uuid) -> Result<Message, LicenseError> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/licenses/{id}"))
            .send()
            .await
            .map_err(|e| ClientError::from(e).into_license_error("license", Some(id)))?;
        Self::parse(resp)
            .await
            .map_err(|e| e.into_license_error("license", Some(id)))
    }

    async fn licenses_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<ListResponse<License>, LicenseError> {
        self.get::<_, ()>(&format!("/organizations/{organization_id}/licenses"), None)
            .await
            .map_err(|e| e.into_license_error("organization", Some(organization_id)))
    }
}

#[async_trait]
impl ModuleRegistry for ApiClient {
    async fn list_modules(&self) -> Result<Vec<ModuleDescriptor>, LicenseError> {
        let listing: ModuleListing = self
            .get::<_, ()>("/monitoring/modules", None)
            .await
            .map_err(|e| e.into_license_error("module registry", None))?;
        Ok(match listing {
            ModuleListing::Bare(modules) => modules,
            ModuleListing::Enveloped { data } => data,
        })
    }
}

#[async_trait]
impl OrganizationDirectory for ApiClient {
    async fn list_organizations(
        &self,
        page: Page,
    ) -> Result<ListResponse<Organization>, LicenseError> {
        self.get("/organizations/", Some(&page))
            .await
            .map_err(|e| e.into_license_error("organization", None))
    }

    async fn get_organization(&self, id: Uuid) -> Result<Organization, LicenseError> {
        self.get::<_, ()>(&format!("/organizations/{id}"), None)
            .await
            .map_err(|e| e.into_license_error("organization", Some(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_string() {
        assert_eq!(
            error_detail(r#"{"detail": "License not found"}"#),
            "License not found"
        );
    }

    #[test]
    fn test_error_detail_list() {
        let body = r#"{"detail": [
            {"loc": ["body", "max_users"], "msg": "Input should be greater than 0", "type": "x"},
            {"loc": ["body"], "msg": "bad", "type": "y"}
        ]}"#;
        assert_eq!(
            error_detail(body),
            "max_users: Input should be greater than 0; body: bad"
        );
    }

    #[test]
    fn test_error_detail_non_json() {
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_empty_error_body_falls_back_to_status_text() {
        let err = server_error(reqwest::StatusCode::NOT_FOUND, "")
            .into_license_error("module registry", None);
        assert_eq!(err.to_string(), "module registry not found: Not Found");

        let err = server_error(reqwest::StatusCode::BAD_GATEWAY, "  ");
        assert!(matches!(err, ClientError::Server { status: 502, ref message } if message == "Bad Gateway"));
    }

    #[test]
    fn test_conflict_detail_is_not_rendered_as_key() {
        let err = server_error(
            reqwest::StatusCode::CONFLICT,
            r#"{"detail": "The license with this key already exists in the system."}"#,
        )
        .into_license_error("organization", None);
        assert!(matches!(err, LicenseError::Conflict(_)));
        assert_eq!(
            err.to_string(),
            "conflict: The license with this key already exists in the system."
        );
    }

    #[test]
    fn test_module_listing_shapes() {
        let enveloped: ModuleListing = serde_json::from_str(
            r#"{"data": [{"name": "qr", "version": "1.0.0", "description": "QR access",
                "author": "core", "license_required": true, "is_external": false,
                "dependencies": []}]}"#,
        )
        .unwrap();
        assert!(matches!(enveloped, ModuleListing::Enveloped { ref data } if data[0].name == "qr"));

        let bare: ModuleListing = serde_json::from_str(r#"[{"name": "voice_id"}]"#).unwrap();
        assert!(matches!(bare, ModuleListing::Bare(ref m) if m[0].name == "voice_id"));
    }

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        let server = |status: u16| ClientError::Server {
            status,
            message: "detail".into(),
        };

        assert!(matches!(
            server(404).into_license_error("license", Some(id)),
            LicenseError::NotFound { resource: "license", id: ref got } if *got == id.to_string()
        ));
        assert!(matches!(
            server(409).into_license_error("license", None),
            LicenseError::Conflict(_)
        ));
        assert!(matches!(
            server(403).into_license_error("license", None),
            LicenseError::Unauthorized(_)
        ));
        assert!(matches!(
            server(422).into_license_error("license", None),
            LicenseError::Validation(_)
        ));
        assert!(matches!(
            server(500).into_license_error("license", None),
            LicenseError::Backend { status: 500, .. }
        ));
    }

    #[test]
    fn test_from_config_trims_and_drops_blank_token() {
        let config = ApiConfig {
            base_url: "http://backend:8000/api/v1/".into(),
            token: Some(String::new()),
            timeout_ms: Some(2_000),
        };
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://backend:8000/api/v1");
        assert!(client.token.is_none());
        assert_eq!(client.url("/licenses/"), "http://backend:8000/api/v1/licenses/");
    }
}
