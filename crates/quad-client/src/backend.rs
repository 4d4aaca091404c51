//! The authenticated REST boundary the session talks to.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use quad_shared::protocol::{
    AcceptRequestBody, AcceptResponse, ChatOverview, HistoryResponse, LoginRequest, LoginResponse,
    PublicKeyResponse, PublishKeyRequest, SendRequestBody, StoredMessage,
};
use quad_shared::UserId;

use crate::error::{ClientError, Result};

/// Server operations a [`ConversationSession`](crate::ConversationSession)
/// needs. Every call acts as the logged-in user.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Overwrite the caller's published public key.
    async fn publish_public_key(&self, public_key: &str) -> Result<()>;

    /// A partner's current published key (base64 SPKI DER).
    async fn fetch_public_key(&self, user: UserId) -> Result<String>;

    async fn send_request(&self, body: &SendRequestBody) -> Result<()>;

    async fn accept_request(&self, requester: UserId) -> Result<AcceptResponse>;

    async fn chat_overview(&self) -> Result<ChatOverview>;

    /// The full log between the caller and `partner`, oldest first.
    async fn message_history(&self, partner: UserId) -> Result<Vec<StoredMessage>>;
}

/// [`ChatBackend`] over the Quad REST API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Log in and return a backend bound to the issued token.
    pub async fn login(
        base_url: impl Into<String>,
        email: &str,
        password: &str,
    ) -> Result<(Self, LoginResponse)> {
        let mut backend = Self::new(base_url, String::new());
        let resp = backend
            .client
            .post(backend.url("/auth/login"))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let login: LoginResponse = parse(resp).await?;

        backend.token = login.token.clone();
        Ok((backend, login))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.token)
    }
}

/// Turn a non-success status into [`ClientError::Http`], keeping the
/// server's `{ "error": ... }` message when there is one.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);

    Err(ClientError::Http {
        status: status.as_u16(),
        message,
    })
}

async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T> {
    Ok(check(resp).await?.json().await?)
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn publish_public_key(&self, public_key: &str) -> Result<()> {
        let resp = self
            .post("/user/public-key")
            .json(&PublishKeyRequest {
                public_key: public_key.to_string(),
            })
            .send()
            .await?;
        check(resp).await?;
        debug!("Published public key");
        Ok(())
    }

    async fn fetch_public_key(&self, user: UserId) -> Result<String> {
        let resp = self
            .get(&format!("/users/{user}/public-key"))
            .send()
            .await?;
        let body: PublicKeyResponse = parse(resp).await?;
        Ok(body.public_key)
    }

    async fn send_request(&self, body: &SendRequestBody) -> Result<()> {
        let resp = self.post("/chat/request").json(body).send().await?;
        check(resp).await?;
        Ok(())
    }

    async fn accept_request(&self, requester: UserId) -> Result<AcceptResponse> {
        let resp = self
            .post("/chat/accept")
            .json(&AcceptRequestBody {
                requester_id: requester,
            })
            .send()
            .await?;
        parse(resp).await
    }

    async fn chat_overview(&self) -> Result<ChatOverview> {
        parse(self.get("/chat").send().await?).await
    }

    async fn message_history(&self, partner: UserId) -> Result<Vec<StoredMessage>> {
        let resp = self
            .get("/messages")
            .query(&[("partner", partner.to_string())])
            .send()
            .await?;
        let body: HistoryResponse = parse(resp).await?;
        Ok(body.messages)
    }
}
