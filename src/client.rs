use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    AskRequest, Diet, DietsResponse, PurchaseRequest, PurchaseResponse, SessionResponse, UserData,
};
use crate::session::SessionToken;

/// HTTP access to the DietMate backend.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: HttpClient,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        // The session endpoint is credentialed, so cookies have to round-trip.
        let http = HttpClient::builder().cookie_store(true).build()?;
        Ok(Self::with_http(base_url, http))
    }

    pub fn with_http(base_url: &str, http: HttpClient) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_session(&self) -> ClientResult<SessionToken> {
        let response = self
            .http
            .get(format!("{}/api/session", self.base_url))
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let response = ensure_success(response, "Failed to create session").await?;
        let body: SessionResponse = response.json().await?;
        debug!(message = ?body.message, "session issued");

        Ok(SessionToken::new(body.token))
    }

    /// Builds the chat request. Sending it is left to the stream consumer so
    /// the token is only borrowed while the request is assembled.
    pub fn ask_request(&self, token: &SessionToken, request: &AskRequest) -> RequestBuilder {
        self.http
            .post(format!("{}/api/askGPT", self.base_url))
            .bearer_auth(token.expose())
            .json(request)
    }

    pub async fn list_diets(&self) -> ClientResult<Vec<Diet>> {
        let response = self
            .http
            .get(format!("{}/api/diets", self.base_url))
            .send()
            .await?;

        let response = ensure_success(response, "Error fetching diets").await?;
        let body: DietsResponse = response.json().await?;
        Ok(body.diets)
    }

    pub async fn get_diet(&self, diet_id: u64) -> ClientResult<Option<Diet>> {
        let response = self
            .http
            .get(format!("{}/api/diets/{}", self.base_url, diet_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response, "Error fetching diet").await?;
        Ok(Some(response.json().await?))
    }

    pub async fn purchase(
        &self,
        diet_id: u64,
        user_data: UserData,
    ) -> ClientResult<PurchaseResponse> {
        let request = PurchaseRequest { diet_id, user_data };
        let response = self
            .http
            .post(format!("{}/api/purchase", self.base_url))
            .json(&request)
            .send()
            .await?;

        let response = ensure_success(response, "Error purchasing diet").await?;
        Ok(response.json().await?)
    }
}

async fn ensure_success(response: Response, context: &'static str) -> ClientResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        context,
        status,
        body,
    })
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
