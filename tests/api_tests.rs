use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;

use order_matching_engine::{
    api::{OrderAck, router},
    orders::{Order, OrderStatus},
    state::AppState,
    trade::Trade,
};
use serde_json::{Value, json};
use tempfile::tempdir;
use tower::ServiceExt;

async fn test_app() -> (Router, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let state = AppState::new(dir.path()).await.unwrap();
    (router(state), dir)
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn json<T: serde::de::DeserializeOwned>(res: Response) -> T {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_order(app: &Router, body: Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/orders")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn delete(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn ping_pongs() {
    let (app, _tmp) = test_app().await;
    let res = get(&app, "/ping").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["message"], "pong");
}

#[tokio::test]
async fn test_effective_limit_on_get_trade_log() {
    let (app, _tmp) = test_app().await;
    let res = get(&app, "/trades/BTC-USD?limit=5000").await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-effective-limit").unwrap(), "1000");
}

#[tokio::test]
async fn unknown_symbol_is_unavailable_on_book_and_trades() {
    let (app, _tmp) = test_app().await;

    let res = get(&app, "/book/BTC-EUR").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let v = body_json(res).await;
    assert!(v["error"].as_str().unwrap().contains("no engine"));

    let res = get(&app, "/trades/FOO-BAR").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn create_order_rejects_zero_qty() {
    let (app, _tmp) = test_app().await;

    let res = post_order(
        &app,
        json!({
            "side": "buy",
            "order_type": "limit",
            "price": 50,
            "quantity": 0,
            "symbol": "BTC-USD"
        }),
    )
    .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert_eq!(v["error"], "invalid order: quantity must be > 0");
}

#[tokio::test]
async fn create_order_rejects_limit_without_price() {
    let (app, _tmp) = test_app().await;

    let res = post_order(
        &app,
        json!({
            "side": "sell",
            "order_type": "limit",
            "quantity": 3,
            "symbol": "BTC-USD"
        }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_order_unknown_side_yields_422_from_loggedjson() {
    let (app, _tmp) = test_app().await;

    let res = post_order(
        &app,
        json!({
            "side": "hold",
            "order_type": "limit",
            "price": 50,
            "quantity": 1,
            "symbol": "BTC-USD"
        }),
    )
    .await;

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let v = body_json(res).await;
    assert!(v["error"].as_str().unwrap().contains("side"));
}

#[tokio::test]
async fn limit_order_rests_then_cancel_removes_it() {
    let (app, _tmp) = test_app().await;

    let res = post_order(
        &app,
        json!({
            "side": "buy",
            "order_type": "limit",
            "price": 48,
            "quantity": 10,
            "symbol": "BTC-USD"
        }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let ack: OrderAck = json(res).await;
    assert_eq!(ack.order.status, OrderStatus::Open);
    let order_id = ack.order_id;

    let res = get(&app, "/book/BTC-USD").await;
    assert_eq!(res.status(), StatusCode::OK);
    let snap = body_json(res).await;
    assert_eq!(snap["bids"][0][0].as_u64(), Some(48));
    assert_eq!(snap["bids"][0][1].as_u64(), Some(10));

    let res = delete(&app, &format!("/orders/{}", order_id)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let canceled: Order = json(res).await;
    assert_eq!(canceled.status, OrderStatus::Canceled);

    let snap = body_json(get(&app, "/book/BTC-USD").await).await;
    assert!(snap["bids"].as_array().unwrap().is_empty());

    let res = delete(&app, &format!("/orders/{}", order_id)).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = delete(&app, "/orders/987654").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_status_reflects_fills() {
    let (app, _tmp) = test_app().await;

    let maker: OrderAck = json(
        post_order(
            &app,
            json!({"side": "buy", "order_type": "limit", "price": 100, "quantity": 10, "symbol": "BTC-USD"}),
        )
        .await,
    )
    .await;
    let taker: OrderAck = json(
        post_order(
            &app,
            json!({"side": "sell", "order_type": "limit", "price": 100, "quantity": 4, "symbol": "BTC-USD"}),
        )
        .await,
    )
    .await;
    assert_eq!(taker.order.status, OrderStatus::Filled);
    assert_eq!(taker.trades.len(), 1);

    let res = get(&app, &format!("/orders/{}", maker.order_id)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let order: Order = json(res).await;
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.remaining_quantity, 6);

    assert_eq!(get(&app, "/orders/424242").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trades_endpoint_is_newest_first() {
    let (app, _tmp) = test_app().await;

    post_order(
        &app,
        json!({"side": "sell", "order_type": "limit", "price": 52, "quantity": 3, "symbol": "BTC-USD"}),
    )
    .await;
    for _ in 0..2 {
        post_order(
            &app,
            json!({"side": "buy", "order_type": "market", "quantity": 1, "symbol": "BTC-USD"}),
        )
        .await;
    }

    let res = get(&app, "/trades/BTC-USD?limit=1").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-effective-limit").unwrap(), "1");
    let page: Vec<Trade> = json(res).await;
    assert_eq!(page.len(), 1);

    let all: Vec<Trade> = json(get(&app, "/trades/BTC-USD").await).await;
    assert_eq!(all.len(), 2);
    assert!(all[0].id > all[1].id);
    assert!(all.iter().all(|t| t.price == 52));
}

#[tokio::test]
async fn market_order_on_empty_book_is_canceled() {
    let (app, _tmp) = test_app().await;

    let ack: OrderAck = json(
        post_order(
            &app,
            json!({"side": "buy", "order_type": "market", "quantity": 5, "symbol": "ETH-USD"}),
        )
        .await,
    )
    .await;
    assert_eq!(ack.order.status, OrderStatus::Canceled);
    assert_eq!(ack.order.remaining_quantity, 5);
    assert!(ack.trades.is_empty());

    let snap = body_json(get(&app, "/book/ETH-USD").await).await;
    assert!(snap["bids"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn symbols_lists_defaults() {
    let (app, _tmp) = test_app().await;
    let symbols: Vec<String> = json(get(&app, "/symbols").await).await;
    assert_eq!(symbols, vec!["BTC-USD".to_string(), "ETH-USD".to_string()]);
}

#[tokio::test]
async fn malformed_symbol_in_body_is_bad_request() {
    let (app, _tmp) = test_app().await;

    let res = post_order(
        &app,
        json!({"side": "buy", "order_type": "limit", "price": 10, "quantity": 1, "symbol": "BTC:USD"}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert!(v["error"].as_str().unwrap().starts_with("invalid order"));
}
