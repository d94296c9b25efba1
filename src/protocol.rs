use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub message: String,
    pub file_name: String,
    pub file_content: String,
}

/// Retry interval reported by the backend on 429. Some deployments send
/// seconds as a number, others a preformatted string. Non-integer numbers are
/// kept as sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RetryAfter {
    Seconds(u64),
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for RetryAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryAfter::Seconds(secs) => write!(f, "{}", secs),
            RetryAfter::Number(number) => write!(f, "{}", number),
            RetryAfter::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub retry_after: Option<RetryAfter>,
}

#[derive(Debug, Deserialize)]
pub struct UnauthorizedBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The exact message the backend uses when a bearer token fails verification.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired token";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diet {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct DietsResponse {
    pub diets: Vec<Diet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub diet_id: u64,
    pub user_data: UserData,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseResponse {
    pub message: String,
}
