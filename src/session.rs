use std::fmt;

use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::ClientResult;

/// Opaque bearer credential issued per session. It is kept in memory only:
/// there is no serialization path, and `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// Owns the current session token and the client used to obtain it.
pub struct SessionManager {
    client: ApiClient,
    token: Option<SessionToken>,
}

impl SessionManager {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            token: None,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// `None` until a token has been issued, and again after `invalidate`.
    pub fn current(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    pub async fn acquire(&mut self) -> ClientResult<&SessionToken> {
        let result = self.client.fetch_session().await;
        self.settle(result)
    }

    /// Applies the outcome of an acquisition. A failure keeps whatever token
    /// was held before.
    pub fn settle(&mut self, result: ClientResult<SessionToken>) -> ClientResult<&SessionToken> {
        match result {
            Ok(token) => {
                let replaced = self.token.is_some();
                info!(replaced, "session token acquired");
                Ok(&*self.token.insert(token))
            }
            Err(err) => {
                warn!(error = %err, has_token = self.token.is_some(), "session acquisition failed");
                Err(err)
            }
        }
    }

    pub fn invalidate(&mut self) {
        if self.token.take().is_some() {
            info!("session token invalidated");
        }
    }
}
