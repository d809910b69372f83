use axum::{
    Json, Router, debug_handler,
    extract::{
        FromRequest, Path, Query, State,
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    errors::EngineError,
    events::EngineEvent,
    orderbook::BookSnapshot,
    orders::{NewOrder, Order, OrderId},
    state::AppState,
    symbol::Symbol,
    trade::Trade,
};

pub const DEFAULT_BOOK_DEPTH: usize = 5;
pub const MAX_BOOK_DEPTH: usize = 100;
pub const DEFAULT_TRADES_LIMIT: usize = 50;
pub const MAX_TRADES_LIMIT: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub order: Order,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BookView {
    pub symbol: String,
    pub bids: Vec<(u64, u64)>,
    pub asks: Vec<(u64, u64)>,
}

/// Frames pushed to `/ws/{symbol}` subscribers.
#[derive(Debug, Serialize, Deserialize)]
pub enum WsFrame {
    BookSnapshot(BookSnapshot),
    Trade(Trade),
    Order(Order),
}

impl From<EngineEvent> for WsFrame {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::Trade(t) => WsFrame::Trade(t),
            EngineEvent::Order(o) => WsFrame::Order(o),
            EngineEvent::Book(b) => WsFrame::BookSnapshot(b),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Body(JsonRejection),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Body(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Engine(e) => {
                let status = match &e {
                    EngineError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::AlreadyTerminal { .. } => StatusCode::CONFLICT,
                    EngineError::StorageUnavailable(_) | EngineError::EngineUnavailable(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                (status, e.to_string())
            }
            ApiError::Body(rejection) => {
                warn!("rejected request body: {}", rejection.body_text());
                (rejection.status(), rejection.body_text())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// `Json` whose rejections come back as `{"error": ...}` like every other failure.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct LoggedJson<T>(pub T);

#[derive(Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

#[derive(Deserialize)]
pub struct TradesQuery {
    pub limit: Option<usize>,
}

pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "message": "pong" }))
}

#[debug_handler]
pub async fn create_order(
    State(state): State<AppState>,
    LoggedJson(payload): LoggedJson<NewOrder>,
) -> Result<Json<OrderAck>, ApiError> {
    let execution = state.exchange.submit(payload).await?;
    Ok(Json(OrderAck {
        order_id: execution.order.id,
        order: execution.order,
        trades: execution.trades,
    }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.exchange.order(id)?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.exchange.cancel(id).await?))
}

pub async fn get_book(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<DepthQuery>,
) -> Result<Json<BookView>, ApiError> {
    let depth = q.depth.unwrap_or(DEFAULT_BOOK_DEPTH).min(MAX_BOOK_DEPTH);
    let snapshot = state.exchange.book_snapshot(&symbol, depth)?;
    Ok(Json(BookView {
        symbol: symbol.to_ascii_uppercase(),
        bids: snapshot.bids,
        asks: snapshot.asks,
    }))
}

pub async fn get_trades(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<TradesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_TRADES_LIMIT).min(MAX_TRADES_LIMIT);
    let trades = state.exchange.recent_trades(&symbol, limit)?;
    Ok((
        [(HeaderName::from_static("x-effective-limit"), limit.to_string())],
        Json(trades),
    ))
}

pub async fn list_symbols(State(state): State<AppState>) -> Json<Vec<Symbol>> {
    Json(state.exchange.symbols())
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Response, ApiError> {
    // subscribe before snapshotting so nothing falls between the two
    let events = state.exchange.subscribe(&symbol)?;
    let initial = state.exchange.book_snapshot(&symbol, DEFAULT_BOOK_DEPTH)?;
    Ok(ws.on_upgrade(move |socket| stream_events(socket, initial, events)))
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &WsFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}

async fn stream_events(
    socket: WebSocket,
    initial: BookSnapshot,
    mut events: broadcast::Receiver<EngineEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    if send_frame(&mut sender, &WsFrame::BookSnapshot(initial))
        .await
        .is_err()
    {
        return;
    }
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_frame(&mut sender, &WsFrame::from(event)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "websocket subscriber lagging"),
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/orders", post(create_order))
        .route("/orders/{id}", get(get_order).delete(cancel_order))
        .route("/book/{symbol}", get(get_book))
        .route("/trades/{symbol}", get(get_trades))
        .route("/symbols", get(list_symbols))
        .route("/ws/{symbol}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
