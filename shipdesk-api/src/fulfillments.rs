use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;
use shipdesk_core::{Fulfillment, LineItemSelection, PackageDescriptor, Rate};
use shipdesk_fulfillment::{
    CancelAllOutcome, CreateFulfillmentRequest, FulfillmentHistory, ManualTracking, RateBoard, RequoteSession,
};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateFulfillmentBody {
    pub selections: Vec<LineItemSelection>,
    pub rate: Option<Rate>,
    pub manual_tracking: Option<ManualTracking>,
    pub package: PackageDescriptor,
    #[serde(default)]
    pub no_notification: bool,
}

#[derive(Debug, Deserialize)]
pub struct QuoteBody {
    pub package: PackageDescriptor,
}

/// Sent by the client over the rate stream whenever the package changes
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateStreamCommand {
    Package {
        package: PackageDescriptor,
        #[serde(default = "default_has_selection")]
        has_selection: bool,
    },
    Cancel,
}

fn default_has_selection() -> bool {
    true
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/{order_id}/fulfillments", get(get_history).post(create_fulfillment))
        .route("/v1/orders/{order_id}/fulfillments/cancel", post(cancel_all_fulfillments))
        .route("/v1/orders/{order_id}/rates", post(quote_active))
        .route("/v1/orders/{order_id}/rates/stream", get(rate_stream))
        .route("/v1/fulfillments/{fulfillment_id}/cancel", post(cancel_fulfillment))
}

async fn get_history(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<FulfillmentHistory>, AppError> {
    Ok(Json(state.service.history(order_id).await?))
}

async fn create_fulfillment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CreateFulfillmentBody>,
) -> Result<(StatusCode, Json<Fulfillment>), AppError> {
    let request = CreateFulfillmentRequest {
        order_id,
        selections: body.selections,
        rate: body.rate,
        manual_tracking: body.manual_tracking,
        package: body.package,
        no_notification: body.no_notification,
    };
    let fulfillment = state.service.create_fulfillment(request).await?;
    Ok((StatusCode::CREATED, Json(fulfillment)))
}

async fn cancel_fulfillment(
    State(state): State<AppState>,
    Path(fulfillment_id): Path<Uuid>,
) -> Result<Json<Fulfillment>, AppError> {
    Ok(Json(state.service.cancel_fulfillment(fulfillment_id).await?))
}

async fn cancel_all_fulfillments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<CancelAllOutcome>, AppError> {
    Ok(Json(state.service.cancel_all_active_fulfillments(order_id).await?))
}

async fn quote_active(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<QuoteBody>,
) -> Result<Json<RateBoard>, AppError> {
    Ok(Json(state.service.quote_active(order_id, &body.package).await?))
}

async fn rate_stream(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_rates(state, order_id, socket))
}

/// Live rate panel for one order. Closing the socket drops the requote
/// session, which cancels any quote still in flight.
async fn stream_rates(state: AppState, order_id: Uuid, socket: WebSocket) {
    let session = state.service.requote_session(order_id, state.requote_debounce);
    let (sender, receiver) = socket.split();
    relay_rates(session, sender, receiver).await;
    tracing::debug!("Rate stream for order {} closed", order_id);
}

/// Feeds client package edits into the session and pushes every new rate
/// view back. Returns, dropping the session, once either side goes away.
async fn relay_rates<S, R>(session: RequoteSession, mut sender: S, mut receiver: R)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut views = session.subscribe();

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<RateStreamCommand>(text.as_str()) {
                    Ok(RateStreamCommand::Package { package, has_selection }) => {
                        session.package_changed(package, has_selection);
                    }
                    Ok(RateStreamCommand::Cancel) => session.cancel(),
                    Err(e) => tracing::debug!("Ignoring malformed rate stream message: {}", e),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let payload = match serde_json::to_string(&view) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("Failed to encode rate view: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
