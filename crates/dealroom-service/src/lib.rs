#![deny(unsafe_code)]

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dealroom_adapters::{FsBlobStore, LoggingNotifier};
use dealroom_core::{
    AggregateCheck, BlobStore, BroadcastBus, ChainCheck, Connection, ConnectionId, DealEngine,
    DealEngineConfig, DealError, DealPorts, DealSummary, DealUpdate, ErrorKind, Idea, IdeaId,
    InMemoryBlobStore, InMemoryPayoutRegistry, LedgerEntry, Message, MessageContent, MessageId,
    NegotiationAction, Notification, NotificationId, PaymentDirection, PaymentInstructions,
    PaymentProof, PaymentTransaction, SettlementCommit, StoreConfig, TransactionId, UserId,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Header carrying the acting user. Authentication happens upstream.
pub const ACTOR_HEADER: &str = "x-dealroom-user";

const PROOF_URL_PREFIX: &str = "/v1/proofs";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    pub currency: String,
    /// Directory for payment proofs; proofs stay in memory when unset.
    pub blob_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::Memory,
            currency: "INR".to_string(),
            blob_dir: None,
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<DealEngine>,
    pub proofs: Option<Arc<FsBlobStore>>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            store,
            currency,
            blob_dir,
        } = config;
        let engine_config = DealEngineConfig {
            store,
            currency,
            ..DealEngineConfig::default()
        };

        let proofs = match blob_dir {
            Some(dir) => Some(Arc::new(FsBlobStore::open(dir, PROOF_URL_PREFIX).await?)),
            None => None,
        };
        let blobs: Arc<dyn BlobStore> = match &proofs {
            Some(fs) => fs.clone() as Arc<dyn BlobStore>,
            None => Arc::new(InMemoryBlobStore::new()),
        };
        let ports = DealPorts {
            blobs,
            notifier: Arc::new(LoggingNotifier::new()),
            payouts: Arc::new(InMemoryPayoutRegistry::new()),
            bus: Arc::new(BroadcastBus::new(engine_config.realtime_capacity)),
        };

        let store = engine_config.store.bootstrap().await?;
        let engine = DealEngine::with_ports(store, ports, engine_config);

        Ok(Self {
            engine: Arc::new(engine),
            proofs,
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    let proof_limit = state.engine.config().proof_policy.max_bytes + 1;

    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/ideas", post(register_idea))
        .route("/v1/ideas/:idea_id", get(get_idea))
        .route("/v1/ideas/:idea_id/ledger", get(idea_ledger))
        .route("/v1/ideas/:idea_id/verify", get(verify_idea))
        .route("/v1/ideas/:idea_id/connections", post(request_connection))
        .route("/v1/connections", get(list_connections))
        .route("/v1/connections/:connection_id", get(get_connection))
        .route("/v1/connections/:connection_id/accept", post(accept_connection))
        .route("/v1/connections/:connection_id/reject", post(reject_connection))
        .route(
            "/v1/connections/:connection_id/messages",
            get(list_messages).post(send_message),
        )
        .route(
            "/v1/connections/:connection_id/messages/:message_id/read",
            post(mark_message_read),
        )
        .route("/v1/connections/:connection_id/unread", get(unread_count))
        .route("/v1/connections/:connection_id/events", get(connection_events))
        .route("/v1/connections/:connection_id/negotiation", post(negotiate))
        .route("/v1/connections/:connection_id/summary", get(deal_summary))
        .route(
            "/v1/connections/:connection_id/payments/instructions",
            post(payment_instructions),
        )
        .route(
            "/v1/connections/:connection_id/payments",
            get(list_payments)
                .post(record_payment)
                .layer(DefaultBodyLimit::max(proof_limit)),
        )
        .route("/v1/transactions/:transaction_id", get(get_transaction))
        .route("/v1/transactions/:transaction_id/confirm", post(confirm_receipt))
        .route("/v1/payout-handle", get(get_payout_handle).put(put_payout_handle))
        .route("/v1/notifications", get(list_notifications))
        .route(
            "/v1/notifications/:notification_id/read",
            post(mark_notification_read),
        )
        .route("/v1/proofs/:name", get(get_proof))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] DealError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] DealError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::StateConflict => StatusCode::CONFLICT,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DependencyFailure => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => {
                let kind = err.kind();
                if kind == ErrorKind::DependencyFailure {
                    warn!(error = %err, "Dependency failure");
                }
                (
                    status_for(kind),
                    Json(serde_json::json!({ "error": err.to_string(), "kind": kind })),
                )
                    .into_response()
            }
        }
    }
}

/// Acting user taken from [`ACTOR_HEADER`].
#[derive(Debug, Clone)]
pub struct Actor(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(UserId::new(value)))
            .ok_or_else(|| ApiError::bad_request(format!("{ACTOR_HEADER} header is required")))
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    store_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "dealroom-service",
        store_backend: state.engine.store_backend(),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct RegisterIdeaRequest {
    title: String,
}

async fn register_idea(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<RegisterIdeaRequest>,
) -> Result<(StatusCode, Json<Idea>), ApiError> {
    let idea = state.engine.register_idea(actor, request.title).await?;
    Ok((StatusCode::CREATED, Json(idea)))
}

async fn get_idea(
    State(state): State<ServiceState>,
    Path(idea_id): Path<IdeaId>,
) -> Result<Json<Idea>, ApiError> {
    Ok(Json(state.engine.idea(idea_id).await?))
}

async fn idea_ledger(
    State(state): State<ServiceState>,
    Path(idea_id): Path<IdeaId>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    Ok(Json(state.engine.idea_ledger(idea_id).await?))
}

#[derive(Debug, Clone, Serialize)]
struct VerifyResponse {
    aggregate: AggregateCheck,
    chain: ChainCheck,
}

async fn verify_idea(
    State(state): State<ServiceState>,
    Path(idea_id): Path<IdeaId>,
) -> Result<Json<VerifyResponse>, ApiError> {
    Ok(Json(VerifyResponse {
        aggregate: state.engine.verify_idea_aggregate(idea_id).await?,
        chain: state.engine.verify_ledger_chain(idea_id).await?,
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConnectionRequest {
    note: Option<String>,
}

async fn request_connection(
    State(state): State<ServiceState>,
    Path(idea_id): Path<IdeaId>,
    Actor(actor): Actor,
    Json(request): Json<ConnectionRequest>,
) -> Result<(StatusCode, Json<Connection>), ApiError> {
    let connection = state
        .engine
        .request_connection(idea_id, actor, request.note)
        .await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

async fn list_connections(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
) -> Result<Json<Vec<Connection>>, ApiError> {
    Ok(Json(state.engine.connections_for(&actor).await?))
}

async fn get_connection(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
) -> Result<Json<Connection>, ApiError> {
    Ok(Json(state.engine.connection(connection_id, &actor).await?))
}

async fn accept_connection(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
) -> Result<Json<DealUpdate>, ApiError> {
    Ok(Json(
        state.engine.accept_connection(connection_id, &actor).await?,
    ))
}

async fn reject_connection(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
) -> Result<Json<DealUpdate>, ApiError> {
    Ok(Json(
        state.engine.reject_connection(connection_id, &actor).await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesQuery {
    after_seq: Option<u64>,
}

async fn list_messages(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Query(query): Query<MessagesQuery>,
    Actor(actor): Actor,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(
        state
            .engine
            .messages(connection_id, &actor, query.after_seq)
            .await?,
    ))
}

async fn send_message(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
    Json(content): Json<MessageContent>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = state
        .engine
        .send_message(connection_id, &actor, content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_message_read(
    State(state): State<ServiceState>,
    Path((connection_id, message_id)): Path<(ConnectionId, MessageId)>,
    Actor(actor): Actor,
) -> Result<Json<Message>, ApiError> {
    Ok(Json(
        state
            .engine
            .mark_message_read(connection_id, message_id, &actor)
            .await?,
    ))
}

#[derive(Debug, Clone, Serialize)]
struct UnreadResponse {
    connection_id: ConnectionId,
    unread: usize,
}

async fn unread_count(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
) -> Result<Json<UnreadResponse>, ApiError> {
    Ok(Json(UnreadResponse {
        connection_id,
        unread: state.engine.unread_count(connection_id, &actor).await?,
    }))
}

/// Live event stream for one connection. Only events published after the
/// subscription are delivered.
async fn connection_events(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let receiver = state.engine.subscribe(connection_id, &actor).await?;
    let stream = futures::stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let item = Event::default().event(event.name()).json_data(&event);
                    return Some((item, receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(connection = %connection_id, skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

async fn negotiate(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
    Json(action): Json<NegotiationAction>,
) -> Result<Json<DealUpdate>, ApiError> {
    Ok(Json(
        state
            .engine
            .negotiate(connection_id, &actor, action)
            .await?,
    ))
}

async fn deal_summary(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
) -> Result<Json<DealSummary>, ApiError> {
    Ok(Json(state.engine.deal_summary(connection_id, &actor).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct InstructionsRequest {
    direction: PaymentDirection,
    amount_minor: i64,
}

async fn payment_instructions(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
    Json(request): Json<InstructionsRequest>,
) -> Result<Json<PaymentInstructions>, ApiError> {
    Ok(Json(
        state
            .engine
            .initiate_payment(connection_id, request.direction, request.amount_minor, &actor)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct RecordPaymentQuery {
    direction: PaymentDirection,
    amount_minor: i64,
    file_name: Option<String>,
}

/// Proof bytes are the raw request body; its content type is the proof's.
async fn record_payment(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Query(query): Query<RecordPaymentQuery>,
    Actor(actor): Actor,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<PaymentTransaction>), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");
    let mut proof = PaymentProof::new(body.to_vec(), content_type);
    proof.file_name = query.file_name;

    let transaction = state
        .engine
        .record_payment_sent(
            connection_id,
            query.direction,
            query.amount_minor,
            proof,
            &actor,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn list_payments(
    State(state): State<ServiceState>,
    Path(connection_id): Path<ConnectionId>,
    Actor(actor): Actor,
) -> Result<Json<Vec<PaymentTransaction>>, ApiError> {
    Ok(Json(state.engine.transactions(connection_id, &actor).await?))
}

async fn get_transaction(
    State(state): State<ServiceState>,
    Path(transaction_id): Path<TransactionId>,
    Actor(actor): Actor,
) -> Result<Json<PaymentTransaction>, ApiError> {
    Ok(Json(state.engine.transaction(transaction_id, &actor).await?))
}

async fn confirm_receipt(
    State(state): State<ServiceState>,
    Path(transaction_id): Path<TransactionId>,
    Actor(actor): Actor,
) -> Result<Json<SettlementCommit>, ApiError> {
    Ok(Json(
        state.engine.confirm_receipt(transaction_id, &actor).await?,
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PayoutHandle {
    handle: Option<String>,
}

async fn get_payout_handle(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
) -> Result<Json<PayoutHandle>, ApiError> {
    Ok(Json(PayoutHandle {
        handle: state.engine.payout_handle(&actor).await?,
    }))
}

async fn put_payout_handle(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<PayoutHandle>,
) -> Result<Json<PayoutHandle>, ApiError> {
    let handle = request
        .handle
        .ok_or_else(|| ApiError::bad_request("handle is required"))?;
    state.engine.register_payout_handle(&actor, &handle).await?;
    Ok(Json(PayoutHandle {
        handle: state.engine.payout_handle(&actor).await?,
    }))
}

async fn list_notifications(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(state.engine.notifications(&actor).await?))
}

async fn mark_notification_read(
    State(state): State<ServiceState>,
    Path(notification_id): Path<NotificationId>,
    Actor(actor): Actor,
) -> Result<Json<Notification>, ApiError> {
    Ok(Json(
        state
            .engine
            .mark_notification_read(&actor, notification_id)
            .await?,
    ))
}

async fn get_proof(
    State(state): State<ServiceState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let proofs = state
        .proofs
        .as_ref()
        .ok_or_else(|| ApiError::not_found("proof storage is not file backed"))?;
    let bytes = proofs.read(&name).await?;
    let content_type = match name.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn app() -> Router {
        let state = ServiceState::bootstrap(ServiceConfig::default())
            .await
            .unwrap();
        build_router(state)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        actor: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            request = request.header(ACTOR_HEADER, actor);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn open_connection(app: &Router) -> (String, String) {
        let (status, idea) = call(
            app,
            "POST",
            "/v1/ideas",
            Some("founder-1"),
            Some(serde_json::json!({ "title": "Solar kiosks" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let idea_id = idea["id"].as_str().unwrap().to_string();

        let (status, connection) = call(
            app,
            "POST",
            &format!("/v1/ideas/{idea_id}/connections"),
            Some("investor-1"),
            Some(serde_json::json!({ "note": "keen" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let connection_id = connection["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            app,
            "POST",
            &format!("/v1/connections/{connection_id}/accept"),
            Some("founder-1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (idea_id, connection_id)
    }

    #[tokio::test]
    async fn health_reports_store_backend() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store_backend"], "memory");
    }

    #[tokio::test]
    async fn proposal_flow_over_http() {
        let app = app().await;
        let (idea_id, connection_id) = open_connection(&app).await;
        let negotiation = format!("/v1/connections/{connection_id}/negotiation");

        let (status, body) = call(
            &app,
            "POST",
            &negotiation,
            Some("investor-1"),
            Some(serde_json::json!({ "action": "propose", "amount_minor": 5_000_000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connection"]["deal_status"], "proposed");

        let (status, body) = call(
            &app,
            "POST",
            &negotiation,
            Some("investor-1"),
            Some(serde_json::json!({ "action": "accept_proposal" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "authorization");

        let (status, _) = call(
            &app,
            "POST",
            &negotiation,
            Some("founder-1"),
            Some(serde_json::json!({ "action": "request_reinvestment", "amount_minor": 100 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &app,
            "POST",
            &negotiation,
            Some("founder-1"),
            Some(serde_json::json!({ "action": "accept_proposal" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connection"]["status"], "deal_done");

        let (status, summary) = call(
            &app,
            "GET",
            &format!("/v1/connections/{connection_id}/summary"),
            Some("investor-1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["totals"]["total_invested_minor"], 5_000_000);
        assert_eq!(summary["totals"]["instant_invested_minor"], 5_000_000);

        let (status, verify) = call(
            &app,
            "GET",
            &format!("/v1/ideas/{idea_id}/verify"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verify["aggregate"]["consistent"], true);
        assert_eq!(verify["chain"]["valid"], true);
    }

    #[tokio::test]
    async fn invalid_amount_maps_to_bad_request() {
        let app = app().await;
        let (_, connection_id) = open_connection(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/connections/{connection_id}/negotiation"),
            Some("investor-1"),
            Some(serde_json::json!({ "action": "propose", "amount_minor": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn missing_actor_and_unknown_connection() {
        let app = app().await;
        let (status, _) = call(&app, "GET", "/v1/connections", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "GET",
            &format!("/v1/connections/{}", Uuid::new_v4()),
            Some("investor-1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn verified_payment_over_http() {
        let app = app().await;
        let (_, connection_id) = open_connection(&app).await;

        let (status, _) = call(
            &app,
            "PUT",
            "/v1/payout-handle",
            Some("founder-1"),
            Some(serde_json::json!({ "handle": "founder@okbank" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, instructions) = call(
            &app,
            "POST",
            &format!("/v1/connections/{connection_id}/payments/instructions"),
            Some("investor-1"),
            Some(serde_json::json!({ "direction": "investment", "amount_minor": 2_000_000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(instructions["payment_uri"]
            .as_str()
            .unwrap()
            .starts_with("upi://pay?"));
        assert_eq!(instructions["stage"], "qr_displayed");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/v1/connections/{connection_id}/payments?direction=investment&amount_minor=2000000"
                    ))
                    .header(ACTOR_HEADER, "investor-1")
                    .header("content-type", "Image/PNG")
                    .body(Body::from(vec![137u8, 80, 78, 71]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let transaction: Value = serde_json::from_slice(&bytes).unwrap();
        let transaction_id = transaction["id"].as_str().unwrap().to_string();

        let confirm = format!("/v1/transactions/{transaction_id}/confirm");
        let (status, commit) = call(&app, "POST", &confirm, Some("founder-1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(commit["transaction"]["status"], "completed");
        assert_eq!(commit["entry"]["provenance"], "verified_payment");

        let (status, body) = call(&app, "POST", &confirm, Some("founder-1"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "state_conflict");
    }

    #[tokio::test]
    async fn event_stream_is_served_to_parties_only() {
        let app = app().await;
        let (_, connection_id) = open_connection(&app).await;
        let uri = format!("/v1/connections/{connection_id}/events");

        let (status, _) = call(&app, "GET", &uri, Some("mallory"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(&uri)
                    .header(ACTOR_HEADER, "investor-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream")));
    }
}
