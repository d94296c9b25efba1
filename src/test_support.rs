//! In-process stand-in for the DietMate backend.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::protocol::{Diet, INVALID_TOKEN_MESSAGE};

/// Scripted answer for the next authorized `/api/askGPT` call.
pub(crate) enum Reply {
    Chunks(Vec<&'static str>),
    /// Body chunks are sent by the test through the paired sender.
    Live(mpsc::Receiver<Result<Bytes, io::Error>>),
    Json(StatusCode, Value),
    Text(StatusCode, &'static str),
    Empty(StatusCode),
}

#[derive(Default)]
struct BackendState {
    issued: Vec<String>,
    failing_sessions: usize,
    session_requests: usize,
    ask_requests: usize,
    replies: VecDeque<Reply>,
    last_ask: Option<Value>,
    last_authorization: Option<String>,
    last_purchase: Option<Value>,
}

#[derive(Clone, Default)]
pub(crate) struct Backend {
    state: Arc<Mutex<BackendState>>,
}

impl Backend {
    pub(crate) fn push_reply(&self, reply: Reply) {
        self.lock().replies.push_back(reply);
    }

    pub(crate) fn fail_next_sessions(&self, count: usize) {
        self.lock().failing_sessions = count;
    }

    pub(crate) fn session_requests(&self) -> usize {
        self.lock().session_requests
    }

    pub(crate) fn ask_requests(&self) -> usize {
        self.lock().ask_requests
    }

    pub(crate) fn issued(&self, token: &str) -> bool {
        self.lock().issued.iter().any(|issued| issued == token)
    }

    pub(crate) fn last_ask(&self) -> Option<Value> {
        self.lock().last_ask.clone()
    }

    pub(crate) fn last_authorization(&self) -> Option<String> {
        self.lock().last_authorization.clone()
    }

    pub(crate) fn last_purchase(&self) -> Option<Value> {
        self.lock().last_purchase.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }
}

/// Serves `backend` on an ephemeral local port and returns its base URL.
pub(crate) async fn spawn_backend(backend: Backend) -> String {
    let app = Router::new()
        .route("/api/session", get(session))
        .route("/api/askGPT", post(ask))
        .route("/api/diets", get(diets))
        .route("/api/diets/:id", get(diet))
        .route("/api/purchase", post(purchase))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}", addr)
}

fn catalog() -> Vec<Diet> {
    vec![
        Diet {
            id: 1,
            name: "Mediterranean".to_string(),
            description: "Olive oil, fish and vegetables".to_string(),
            price: 19.99,
        },
        Diet {
            id: 2,
            name: "Keto".to_string(),
            description: "Low carbohydrate, high fat".to_string(),
            price: 24.5,
        },
    ]
}

async fn session(State(backend): State<Backend>) -> Response {
    let mut state = backend.lock();
    state.session_requests += 1;
    if state.failing_sessions > 0 {
        state.failing_sessions -= 1;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "session store unavailable"})),
        )
            .into_response();
    }

    let token = Uuid::new_v4().to_string();
    state.issued.push(token.clone());
    Json(json!({"message": "New session created", "token": token})).into_response()
}

async fn ask(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let reply = {
        let mut state = backend.lock();
        state.ask_requests += 1;
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let authorized = authorization
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| state.issued.iter().any(|issued| issued == token))
            .unwrap_or(false);
        state.last_authorization = authorization;
        state.last_ask = Some(body);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Authentication failed", "message": INVALID_TOKEN_MESSAGE})),
            )
                .into_response();
        }
        state
            .replies
            .pop_front()
            .unwrap_or(Reply::Chunks(vec!["OK"]))
    };

    match reply {
        Reply::Chunks(chunks) => {
            let stream = futures::stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok::<_, io::Error>(Bytes::from_static(chunk.as_bytes()))),
            );
            streaming(Body::from_stream(stream))
        }
        Reply::Live(receiver) => streaming(Body::from_stream(ReceiverStream::new(receiver))),
        Reply::Json(status, value) => (status, Json(value)).into_response(),
        Reply::Text(status, text) => (status, text).into_response(),
        Reply::Empty(status) => status.into_response(),
    }
}

fn streaming(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap()
}

async fn diets() -> Json<Value> {
    Json(json!({"diets": catalog()}))
}

async fn diet(Path(id): Path<u64>) -> Response {
    match catalog().into_iter().find(|diet| diet.id == id) {
        Some(diet) => Json(diet).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn purchase(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    backend.lock().last_purchase = Some(body.clone());

    let diet = body["dietId"]
        .as_u64()
        .and_then(|id| catalog().into_iter().find(|diet| diet.id == id));
    match diet {
        Some(diet) => {
            let name = body["userData"]["name"].as_str().unwrap_or("guest");
            let message = format!("Purchased {} for {}", diet.name, name);
            Json(json!({ "message": message })).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "Diet not found"}))).into_response(),
    }
}
