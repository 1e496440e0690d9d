//! Gateway over a Microsoft-Graph-style drive API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create    | `PUT {base}/me/drive/items/{folder}:/{name}:/content` |
//! | read      | `GET {base}/me/drive/items/{id}/content` |
//! | update    | `PUT {base}/me/drive/items/{id}/content` |
//!
//! Credentials come from `GRAPH_ACCESS_TOKEN` (and optionally
//! `GRAPH_BASE_URL`), with `.env` support.

use futures::future::BoxFuture;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use std::env;

use super::{FileGateway, RemoteFile};
use crate::error::{GatewayError, GatewayResult};

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Fallback wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    #[serde(default)]
    name: String,
}

/// HTTP gateway client
#[derive(Clone)]
pub struct GraphGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GraphGateway {
    /// Create a client with an explicit access token
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        }
    }

    /// Create a client from `GRAPH_ACCESS_TOKEN` / `GRAPH_BASE_URL`
    pub fn from_env() -> GatewayResult<Self> {
        let _ = dotenvy::dotenv();

        let token = env::var("GRAPH_ACCESS_TOKEN")
            .map_err(|_| GatewayError::MissingCredentials("GRAPH_ACCESS_TOKEN"))?;

        let gateway = Self::new(token);
        Ok(match env::var("GRAPH_BASE_URL") {
            Ok(base) => gateway.with_base_url(&base),
            Err(_) => gateway,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn create_url(&self, folder_id: &str, name: &str) -> String {
        format!(
            "{}/me/drive/items/{}:/{}:/content",
            self.base_url,
            urlencoding::encode(folder_id),
            urlencoding::encode(name)
        )
    }

    fn content_url(&self, file_id: &str) -> String {
        format!("{}/me/drive/items/{}/content", self.base_url, urlencoding::encode(file_id))
    }

    async fn put_text(&self, url: &str, content: &str) -> GatewayResult<Response> {
        self.client
            .put(url)
            .bearer_auth(&self.token)
            .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))
    }
}

/// Map 429 to [`GatewayError::RateLimited`] and other failures to
/// [`GatewayError::Http`].
async fn check_status(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(GatewayError::RateLimited(retry_after));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound(response.url().path().to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Http(format!("HTTP {}: {}", status, body)));
    }
    Ok(response)
}

impl FileGateway for GraphGateway {
    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
        folder_id: &'a str,
    ) -> BoxFuture<'a, GatewayResult<RemoteFile>> {
        Box::pin(async move {
            let response = self.put_text(&self.create_url(folder_id, name), content).await?;
            let body = check_status(response)
                .await?
                .text()
                .await
                .map_err(|e| GatewayError::Http(e.to_string()))?;

            let item: DriveItem = serde_json::from_str(&body)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            Ok(RemoteFile { id: item.id, name: item.name })
        })
    }

    fn read_file<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, GatewayResult<String>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.content_url(file_id))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| GatewayError::Http(e.to_string()))?;

            check_status(response)
                .await?
                .text()
                .await
                .map_err(|e| GatewayError::Http(e.to_string()))
        })
    }

    fn update_file<'a>(
        &'a self,
        file_id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, GatewayResult<bool>> {
        Box::pin(async move {
            let response = self.put_text(&self.content_url(file_id), content).await?;
            check_status(response).await?;
            Ok(true)
        })
    }
}
