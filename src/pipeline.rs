//! Sending a turn and folding the streamed reply into the conversation log.
//!
//! A turn is split in three steps so front ends can run the network part on
//! another task: [`ChatSession::begin_turn`] records the turn and prepares the
//! request, [`stream_turn`] performs it and emits [`StreamUpdate`]s, and
//! [`ChatSession::apply`] folds each update back into the log. Every turn gets
//! a fresh epoch; updates carrying an older epoch are dropped, which is how
//! chunks still arriving after a reset are discarded.

use std::fmt::Display;
use std::pin::pin;

use futures::{Stream, StreamExt};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attachment::PendingUpload;
use crate::conversation::{ConversationLog, ConversationTurn, LogError, TurnState};
use crate::error::ClientResult;
use crate::messages;
use crate::protocol::{
    AskRequest, INVALID_TOKEN_MESSAGE, RateLimitBody, RetryAfter, UnauthorizedBody,
};
use crate::session::SessionManager;
use crate::stream::{Scan, StreamAccumulator};

/// Ways a turn can end other than a clean stream. Each one replaces the
/// in-progress turn with a single errored turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnFailure {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<RetryAfter> },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("response had no body")]
    NoStreamBody,
    #[error("server reported: {0}")]
    EmbeddedStreamError(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// Everything received so far.
    Content(String),
    Completed,
    Failed(TurnFailure),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendRejected {
    #[error("nothing to send")]
    Empty,
    #[error("a reply is still being generated")]
    Busy,
    #[error("no session token is available")]
    NoSession,
    #[error(transparent)]
    Log(#[from] LogError),
}

/// A recorded turn whose request has not been sent yet.
pub struct TurnTicket {
    epoch: u64,
    request: RequestBuilder,
}

impl TurnTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn into_request(self) -> RequestBuilder {
        self.request
    }
}

/// One conversation: its log, the pending upload and the session it talks
/// through.
pub struct ChatSession {
    id: Uuid,
    session: SessionManager,
    log: ConversationLog,
    upload: Option<PendingUpload>,
    generating: bool,
    epoch: u64,
}

impl ChatSession {
    pub fn new(session: SessionManager) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            log: ConversationLog::new(),
            upload: None,
            generating: false,
            epoch: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending_upload(&self) -> Option<&PendingUpload> {
        self.upload.as_ref()
    }

    /// Replaces any file attached earlier.
    pub fn attach(&mut self, upload: PendingUpload) -> Result<(), SendRejected> {
        if self.generating {
            return Err(SendRejected::Busy);
        }
        debug!(conversation = %self.id, file = upload.name(), "file attached");
        self.upload = Some(upload);
        Ok(())
    }

    pub fn detach(&mut self) -> Option<PendingUpload> {
        self.upload.take()
    }

    /// Records the user turn and an assistant placeholder and prepares the
    /// chat request. Nothing is mutated when the turn is rejected.
    pub fn begin_turn(&mut self, prompt: &str) -> Result<TurnTicket, SendRejected> {
        let prompt = prompt.trim();
        if prompt.is_empty() && self.upload.is_none() {
            return Err(SendRejected::Empty);
        }
        if self.generating || self.log.in_progress().is_some() {
            return Err(SendRejected::Busy);
        }
        let Some(token) = self.session.current() else {
            return Err(SendRejected::NoSession);
        };

        let upload = self.upload.take();
        let (display, request) = match &upload {
            Some(file) => (
                messages::with_attachment_marker(prompt, file.name()),
                AskRequest {
                    message: prompt.to_string(),
                    file_name: file.name().to_string(),
                    file_content: file.content().to_string(),
                },
            ),
            None => (
                prompt.to_string(),
                AskRequest {
                    message: prompt.to_string(),
                    ..AskRequest::default()
                },
            ),
        };
        let request = self.session.client().ask_request(token, &request);

        self.log.push_user(display)?;
        self.log.begin_assistant()?;
        self.generating = true;
        self.epoch += 1;

        info!(
            conversation = %self.id,
            epoch = self.epoch,
            attachment = ?upload.as_ref().map(|file| file.name()),
            "turn started"
        );

        Ok(TurnTicket {
            epoch: self.epoch,
            request,
        })
    }

    /// Folds one update into the in-progress turn. Returns false when the
    /// update was discarded because its turn is no longer current.
    pub fn apply(&mut self, epoch: u64, update: StreamUpdate) -> bool {
        if epoch != self.epoch || !self.generating {
            debug!(
                conversation = %self.id,
                epoch,
                current = self.epoch,
                "discarding stale stream update"
            );
            return false;
        }

        let result = match update {
            StreamUpdate::Content(content) => self.log.stream_content(&content),
            StreamUpdate::Completed => {
                self.generating = false;
                info!(conversation = %self.id, epoch, "turn completed");
                self.log.complete()
            }
            StreamUpdate::Failed(failure) => {
                self.generating = false;
                warn!(conversation = %self.id, epoch, %failure, "turn failed");
                let message = self.failure_message(failure);
                self.log.fail(message)
            }
        };

        if let Err(err) = result {
            warn!(conversation = %self.id, error = %err, "stream update did not match the log");
            return false;
        }
        true
    }

    /// Sends one turn and consumes the reply on the current task.
    ///
    /// `attachment`, when given, replaces any file attached earlier. Without a
    /// token a single acquisition is attempted before giving up.
    pub async fn send_turn(
        &mut self,
        prompt: &str,
        attachment: Option<PendingUpload>,
    ) -> Result<TurnState, SendRejected> {
        self.send_turn_observed(prompt, attachment, |_| {}).await
    }

    /// Like [`ChatSession::send_turn`], calling `observer` with the trailing
    /// turn after every applied update.
    pub async fn send_turn_observed<F>(
        &mut self,
        prompt: &str,
        attachment: Option<PendingUpload>,
        mut observer: F,
    ) -> Result<TurnState, SendRejected>
    where
        F: FnMut(&ConversationTurn),
    {
        if prompt.trim().is_empty() && attachment.is_none() && self.upload.is_none() {
            return Err(SendRejected::Empty);
        }
        if self.generating {
            return Err(SendRejected::Busy);
        }
        if let Some(file) = attachment {
            self.attach(file)?;
        }
        if self.session.current().is_none() {
            // Failure is already logged by the session manager.
            let _ = self.session.acquire().await;
        }

        let ticket = self.begin_turn(prompt)?;
        let epoch = ticket.epoch();
        stream_turn(ticket.into_request(), |update| {
            if self.apply(epoch, update) {
                if let Some(turn) = self.log.last() {
                    observer(turn);
                }
            }
        })
        .await;

        Ok(self
            .log
            .last()
            .map(|turn| turn.state())
            .unwrap_or(TurnState::Errored))
    }

    /// Drops all conversation state without touching the session. Updates
    /// still in flight for the old epoch are discarded by [`Self::apply`].
    pub fn clear(&mut self) {
        self.log.clear();
        self.upload = None;
        self.generating = false;
        self.epoch += 1;
        info!(conversation = %self.id, epoch = self.epoch, "conversation cleared");
    }

    /// Clears the conversation and requests a new session token.
    pub async fn reset(&mut self) -> ClientResult<()> {
        self.clear();
        self.session.acquire().await.map(|_| ())
    }

    fn failure_message(&mut self, failure: TurnFailure) -> String {
        match failure {
            TurnFailure::RateLimited { retry_after } => {
                messages::rate_limited(retry_after.as_ref())
            }
            TurnFailure::Unauthorized { message } if message == INVALID_TOKEN_MESSAGE => {
                self.session.invalidate();
                messages::SESSION_EXPIRED.to_string()
            }
            TurnFailure::Unauthorized { .. } => messages::FETCH_FAILED.to_string(),
            TurnFailure::NoStreamBody => messages::NO_RESPONSE.to_string(),
            TurnFailure::EmbeddedStreamError(message) => message,
            TurnFailure::TransportFailure(_) => messages::FETCH_FAILED.to_string(),
        }
    }
}

/// Sends a prepared chat request and reports its progress through `emit`.
/// Exactly one terminal update (`Completed` or `Failed`) is emitted last.
pub async fn stream_turn<F>(request: RequestBuilder, mut emit: F)
where
    F: FnMut(StreamUpdate),
{
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            emit(StreamUpdate::Failed(TurnFailure::TransportFailure(err.to_string())));
            return;
        }
    };

    let status = response.status();
    debug!(%status, "chat response received");

    if status == StatusCode::TOO_MANY_REQUESTS {
        emit(StreamUpdate::Failed(rate_limited(response).await));
        return;
    }
    if status == StatusCode::UNAUTHORIZED {
        emit(StreamUpdate::Failed(unauthorized(response).await));
        return;
    }
    if is_null_body_status(status) {
        emit(StreamUpdate::Failed(TurnFailure::NoStreamBody));
        return;
    }

    // Other statuses, 500 included, carry their explanation in the body
    // behind the error sentinel, so the body is read like any other stream.
    consume_body(response.bytes_stream(), &mut emit).await;
}

/// Reads body chunks in order until the stream ends or the error sentinel
/// shows up. Nothing is read after the sentinel.
pub async fn consume_body<S, B, E, F>(body: S, emit: &mut F)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(StreamUpdate),
{
    let mut body = pin!(body);
    let mut accumulator = StreamAccumulator::default();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                emit(StreamUpdate::Failed(TurnFailure::TransportFailure(err.to_string())));
                return;
            }
        };

        match accumulator.push(chunk.as_ref()) {
            Scan::Partial(content) => emit(StreamUpdate::Content(content.to_string())),
            Scan::Errored(message) => {
                emit(StreamUpdate::Failed(TurnFailure::EmbeddedStreamError(message)));
                return;
            }
        }
    }

    let flushed = accumulator.content().len();
    match accumulator.finish() {
        Scan::Partial(content) if content.len() != flushed => {
            emit(StreamUpdate::Content(content.to_string()));
        }
        _ => {}
    }
    emit(StreamUpdate::Completed);
}

async fn rate_limited(response: Response) -> TurnFailure {
    let header = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(|value| match value.trim().parse::<u64>() {
            Ok(secs) => RetryAfter::Seconds(secs),
            Err(_) => RetryAfter::Text(value.trim().to_string()),
        });

    let body = response.json::<RateLimitBody>().await.ok();
    let retry_after = body.and_then(|body| body.retry_after).or(header);
    TurnFailure::RateLimited { retry_after }
}

async fn unauthorized(response: Response) -> TurnFailure {
    match response.json::<UnauthorizedBody>().await {
        Ok(body) => {
            debug!(error = ?body.error, "chat request unauthorized");
            TurnFailure::Unauthorized {
                message: body.message.unwrap_or_default(),
            }
        }
        Err(err) => TurnFailure::Unauthorized {
            message: err.to_string(),
        },
    }
}

// Statuses for which a response never has a body to read.
fn is_null_body_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 101 | 103 | 204 | 205 | 304)
}
