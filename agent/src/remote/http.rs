//! JSON-over-HTTP remote source for a JSONPlaceholder-style API.

use super::{CredentialProvider, RemoteError, RemoteResult, RemoteSource};
use async_trait::async_trait;
use feedsync_engine::{Comment, Post, PostId, User, UserId};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// HTTP remote source.
///
/// Endpoints: `GET /posts`, `GET /posts/{id}`, `GET /posts/{id}/comments`,
/// `GET /users/{id}`, `POST /posts`. The API has no favorites endpoint, so
/// favorites use the trait's local acknowledgement.
pub struct HttpRemoteSource {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest<'a> {
    title: &'a str,
    body: &'a str,
    user_id: UserId,
}

impl HttpRemoteSource {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url, credentials))
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
        let url = self.url(path);
        debug!(url = %url, "Sending HTTP GET request");

        let request = self.authorize(self.client.get(&url)).await;
        let response = request.send().await.map_err(transport_error)?;
        decode(response).await
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch_posts(&self) -> RemoteResult<Vec<Post>> {
        self.get_json("/posts").await
    }

    async fn fetch_post(&self, id: PostId) -> RemoteResult<Post> {
        self.get_json(&format!("/posts/{}", id)).await
    }

    async fn fetch_comments(&self, post_id: PostId) -> RemoteResult<Vec<Comment>> {
        self.get_json(&format!("/posts/{}/comments", post_id)).await
    }

    async fn fetch_user(&self, id: UserId) -> RemoteResult<User> {
        self.get_json(&format!("/users/{}", id)).await
    }

    async fn create_post(&self, title: &str, body: &str, author_id: UserId) -> RemoteResult<Post> {
        let url = self.url("/posts");
        debug!(url = %url, "Sending HTTP POST request");

        let payload = CreatePostRequest {
            title,
            body,
            user_id: author_id,
        };
        let request = self.authorize(self.client.post(&url).json(&payload)).await;
        let response = request.send().await.map_err(transport_error)?;
        decode(response).await
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::timeout(e.to_string())
    } else if e.is_decode() {
        RemoteError::decode(e.to_string())
    } else {
        RemoteError::connection(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match body.trim() {
            "" => status.to_string(),
            body => format!("{}: {}", status, body),
        };
        return Err(RemoteError::from_status(status.as_u16(), message));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::decode(e.to_string()))
}
