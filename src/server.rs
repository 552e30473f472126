use std::sync::{Arc, OnceLock};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};

use crate::models::{IngestRequest, IngestResponse, Update};
use crate::relay::{Incoming, Relay};

pub const WEBHOOK_PATH: &str = "/webhook";
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
const INGEST_TOKEN_HEADER: &str = "x-relay-token";

pub struct AppState {
    pub relay: Arc<Relay>,
    /// Set in webhook mode; the webhook route is not mounted otherwise
    pub webhook: Option<WebhookState>,
    pub ingest_token: Option<String>,
}

pub struct WebhookState {
    pub secret: Option<String>,
    /// Filled in once `getMe` succeeds; the server is up before that
    pub bot_id: OnceLock<i64>,
}

async fn health_check() -> &'static str {
    "ok"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

fn header_matches(headers: &HeaderMap, name: &str, expected: Option<&str>) -> bool {
    match expected {
        Some(expected) => headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v == expected),
        None => true,
    }
}

/// Receives Bot API updates pushed by Telegram
async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    let Some(webhook) = &state.webhook else {
        return StatusCode::NOT_FOUND;
    };

    if !header_matches(&headers, SECRET_HEADER, webhook.secret.as_deref()) {
        warn!("Rejected webhook call with a bad secret token");
        return StatusCode::UNAUTHORIZED;
    }

    let Some(incoming) = update.into_incoming(webhook.bot_id.get().copied()) else {
        return StatusCode::OK;
    };

    let relay = Arc::clone(&state.relay);
    tokio::spawn(async move {
        let outcome = relay.handle(incoming).await;
        info!("Webhook update: {:?}", outcome);
    });

    StatusCode::OK
}

/// Plain HTTP entry point for SMS text posted by other tools
async fn ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> axum::response::Response {
    if !header_matches(&headers, INGEST_TOKEN_HEADER, state.ingest_token.as_deref()) {
        warn!("Rejected ingest call with a bad token");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let incoming = Incoming {
        chat_id: state.relay.source_chat_id().unwrap_or_default(),
        message_id: req.message_id,
        chat_title: req.chat_title,
        text: req.text,
        from_self: false,
    };

    let outcome = state.relay.handle(incoming).await;
    info!("Ingested message: {:?}", outcome);
    Json(IngestResponse::new(outcome)).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", get(health_check))
        .route("/healthz", get(health_check))
        .route("/ingest", post(ingest));

    if state.webhook.is_some() {
        app = app.route(WEBHOOK_PATH, post(webhook));
    }

    app.fallback(not_found).with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::delivery::SendMode;
    use crate::format::MessageStyle;
    use crate::relay::tests::{deposit, relay_with, MockDelivery, Sent};
    use crate::routing::targets::*;

    fn app(delivery: Arc<MockDelivery>, webhook: Option<WebhookState>, ingest_token: Option<&str>) -> Router {
        let relay = Arc::new(relay_with(delivery, MessageStyle::Summary, SendMode::Copy));
        router(Arc::new(AppState {
            relay,
            webhook,
            ingest_token: ingest_token.map(str::to_string),
        }))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(res: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_and_unknown_paths() {
        let app = app(Arc::default(), None, None);

        let res = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(to_bytes(res.into_body(), usize::MAX).await.unwrap(), "ok");

        let res = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ingest_relays_as_source_message() {
        let delivery = Arc::new(MockDelivery::default());
        let app = app(delivery.clone(), None, Some("s3cret"));

        let body = serde_json::json!({ "text": deposit(0).text, "message_id": 7 });

        let res = app.clone().oneshot(post_json("/ingest", body.clone())).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let mut req = post_json("/ingest", body);
        req.headers_mut().insert(INGEST_TOKEN_HEADER, "s3cret".parse().unwrap());
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let json = body_json(res).await;
        assert_eq!(json["outcome"], "delivered");
        assert_eq!(json["targets"], serde_json::json!([JONGNO1, JONGNO_DEPOSIT]));
        assert_eq!(json["failed"], 0);
        assert_eq!(delivery.sent().len(), 2);
    }

    #[tokio::test]
    async fn webhook_route_only_in_webhook_mode() {
        let app = app(Arc::default(), None, None);
        let res = app
            .oneshot(post_json(WEBHOOK_PATH, serde_json::json!({ "update_id": 1 })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_checks_secret_and_relays() {
        let delivery = Arc::new(MockDelivery::default());
        let app = app(
            delivery.clone(),
            Some(WebhookState { secret: Some("hook".into()), bot_id: OnceLock::from(99) }),
            None,
        );

        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 3,
                "from": { "id": 5, "is_bot": false },
                "chat": { "id": crate::routing::SOURCE_CHAT_ID, "type": "supergroup", "title": "자동메세지 시스템" },
                "text": deposit(0).text,
            }
        });

        let res = app.clone().oneshot(post_json(WEBHOOK_PATH, update.clone())).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let mut req = post_json(WEBHOOK_PATH, update);
        req.headers_mut().insert(SECRET_HEADER, "hook".parse().unwrap());
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        // relaying happens on a spawned task
        for _ in 0..50 {
            if delivery.sent().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let sent = delivery.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Text(chat, _) if *chat == JONGNO_DEPOSIT));
    }

    #[tokio::test]
    async fn webhook_relays_before_bot_id_is_known() {
        let delivery = Arc::new(MockDelivery::default());
        let app = app(
            delivery.clone(),
            Some(WebhookState { secret: None, bot_id: OnceLock::new() }),
            None,
        );

        let res = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let update = serde_json::json!({
            "update_id": 11,
            "message": {
                "message_id": 4,
                "chat": { "id": crate::routing::SOURCE_CHAT_ID, "type": "supergroup" },
                "text": deposit(0).text,
            }
        });
        let res = app.oneshot(post_json(WEBHOOK_PATH, update)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        for _ in 0..50 {
            if delivery.sent().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(delivery.sent().len(), 2);
    }
}
