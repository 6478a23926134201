//! HTTP client for the TGS API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::error::{TgsError, TgsResult};
use crate::types::{
    InstanceId, RepositoryResponse, RepositoryState, RepositoryUpdateBody, TokenResponse,
    UpdateRequest, UserId, UserResponse,
};

/// API version the client speaks unless configured otherwise.
pub const DEFAULT_API_VERSION: &str = "9.2.0";

const API_HEADER: &str = "api";
const INSTANCE_HEADER: &str = "Instance";

/// Connection settings for a TGS server.
#[derive(Debug, Clone)]
pub struct TgsSettings {
    /// Base URL, e.g. `http://127.0.0.1:5000`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Value sent in the `Api` header as `Tgstation.Server.Api/<version>`.
    pub api_version: String,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

/// Authenticated TGS API client.
#[derive(Debug, Clone)]
pub struct TgsClient {
    client: reqwest::Client,
    base_url: String,
}

impl TgsClient {
    /// Log in and return a client that carries the session bearer token.
    #[instrument(skip(settings), fields(base_url = %settings.base_url, username = %settings.username))]
    pub async fn login(settings: &TgsSettings) -> TgsResult<Self> {
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let anonymous = build_http_client(settings, None)?;

        let response = anonymous
            .post(format!("{base_url}/"))
            .basic_auth(&settings.username, Some(&settings.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TgsError::LoginRejected {
                status: status.as_u16(),
            });
        }

        let token: TokenResponse = decode(response, "/").await?;
        info!(expires_at = ?token.expires_at, "Logged in to TGS");

        let client = build_http_client(settings, Some(&token.bearer))?;
        Ok(Self { client, base_url })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, instance: Option<InstanceId>) -> RequestBuilder {
        let mut request = self.client.request(method, self.url(path));
        if let Some(instance) = instance {
            request = request.header(INSTANCE_HEADER, instance.0);
        }
        request
    }

    /// Id of the user this session is logged in as.
    pub async fn current_user_id(&self) -> TgsResult<UserId> {
        let response = self.request(Method::GET, "/User", None).send().await?;
        let user: UserResponse = self.handle_response(response, "GET", "/User").await?;
        Ok(UserId(user.id))
    }

    /// Current repository state of an instance.
    pub async fn repository_state(&self, instance: InstanceId) -> TgsResult<RepositoryState> {
        let response = self
            .request(Method::GET, "/Repository", Some(instance))
            .send()
            .await?;
        let repository: RepositoryResponse =
            self.handle_response(response, "GET", "/Repository").await?;
        Ok(repository.into())
    }

    /// Update an instance's repository from its remote, reapplying test merges.
    pub async fn update_repository(
        &self,
        instance: InstanceId,
        update: &UpdateRequest,
    ) -> TgsResult<()> {
        debug!(
            instance_id = %instance,
            branch = %update.branch,
            test_merges = update.test_merges.len(),
            "Requesting repository update"
        );

        let response = self
            .request(Method::POST, "/Repository", Some(instance))
            .json(&RepositoryUpdateBody::from(update))
            .send()
            .await?;
        self.handle_empty(response, "POST", "/Repository").await
    }

    /// Start a deployment of an instance.
    pub async fn deploy(&self, instance: InstanceId) -> TgsResult<()> {
        debug!(instance_id = %instance, "Requesting deployment");

        let response = self
            .request(Method::PUT, "/DreamMaker", Some(instance))
            .send()
            .await?;
        self.handle_empty(response, "PUT", "/DreamMaker").await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        method: &'static str,
        path: &str,
    ) -> TgsResult<T> {
        if response.status().is_success() {
            decode(response, path).await
        } else {
            Err(api_error(response, method, path).await)
        }
    }

    async fn handle_empty(
        &self,
        response: reqwest::Response,
        method: &'static str,
        path: &str,
    ) -> TgsResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response, method, path).await)
        }
    }
}

fn build_http_client(settings: &TgsSettings, bearer: Option<&str>) -> TgsResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(API_HEADER),
        HeaderValue::from_str(&format!("Tgstation.Server.Api/{}", settings.api_version))
            .map_err(|_| TgsError::InvalidSettings("api_version is not a valid header".into()))?,
    );

    if let Some(token) = bearer {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| TgsError::InvalidSettings("bearer token is not a valid header".into()))?,
        );
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(concat!("throttle-tgs/", env!("CARGO_PKG_VERSION")))
        .timeout(settings.request_timeout)
        .build()
        .map_err(TgsError::Network)
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> TgsResult<T> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|source| TgsError::Decode {
        path: path.to_string(),
        source,
    })
}

async fn api_error(response: reqwest::Response, method: &'static str, path: &str) -> TgsError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    TgsError::Api {
        method,
        path: path.to_string(),
        status,
        message,
    }
}
