use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::services::ServeDir;

use crate::bridge::Bridge;
use crate::models::{DeviceMessage, InboundPayload};
use crate::telemetry;

/**
 * \brief 启动本地 HTTP 服务，充当手表与桥之间的设备通道。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, bridge: Bridge) -> Result<()> {
    let app = router(bridge);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    telemetry::log_event("server", &format!("listening on {}", addr));
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 构建路由；配置页静态文件目录由 WATCHBRIDGE_UI_DIR 指定。
 */
pub fn router(bridge: Bridge) -> Router {
    let ui_root = std::env::var("WATCHBRIDGE_UI_DIR").unwrap_or_else(|_| "web".to_string());
    let static_service =
        get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));

    Router::new()
        .route("/api/ready", get(ready))
        .route("/api/message", post(message))
        .route(
            "/api/configuration",
            post(configuration_closed).delete(reset_configuration),
        )
        .route("/api/configuration/url", get(configuration_url))
        .route("/api/health", get(health_check))
        .fallback_service(static_service)
        .with_state(bridge)
}

#[derive(Serialize, Debug)]
struct ConfigUrlResponse {
    /** \brief 附带当前设置的配置页地址 */
    url: String,
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    ok: bool,
    provider: String,
    ready: bool,
}

/**
 * \brief 通道就绪：返回 READY_STATUS。
 */
async fn ready(State(bridge): State<Bridge>) -> Json<DeviceMessage> {
    Json(bridge.on_ready())
}

/**
 * \brief 手表提问：返回 RESPONSE 或 ERROR；空提问返回 204。
 */
async fn message(State(bridge): State<Bridge>, Json(payload): Json<InboundPayload>) -> Response {
    match bridge.on_message(&payload).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/**
 * \brief 配置页关闭：请求体为配置页回传的原始字符串。
 */
async fn configuration_closed(
    State(bridge): State<Bridge>,
    body: String,
) -> Json<Vec<DeviceMessage>> {
    Json(bridge.on_configuration_closed(&body))
}

/**
 * \brief 打开配置页所需的地址。
 */
async fn configuration_url(State(bridge): State<Bridge>) -> Json<ConfigUrlResponse> {
    Json(ConfigUrlResponse {
        url: bridge.configuration_url(),
    })
}

/**
 * \brief 清空设置。
 */
async fn reset_configuration(
    State(bridge): State<Bridge>,
) -> Result<Json<DeviceMessage>, (StatusCode, String)> {
    bridge.reset().map_err(internal_err)?;
    Ok(Json(bridge.on_ready()))
}

/**
 * \brief 健康检查：不访问 Provider，只报告本地设置状态。
 */
async fn health_check(State(bridge): State<Bridge>) -> Json<HealthResponse> {
    let settings = bridge.settings();
    Json(HealthResponse {
        ok: true,
        provider: settings.provider_id().to_string(),
        ready: settings.has_api_key(),
    })
}

fn internal_err<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    telemetry::log_error("server", &e.to_string());
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::llm::test_support::RecordingTransport;
    use crate::settings::{MemorySettingsStore, SettingsStore, KEY_API_KEY};

    fn app(store: Arc<MemorySettingsStore>) -> Router {
        let transport = Arc::new(RecordingTransport::replying(
            200,
            r#"{"content":[{"text":"Hello from Claude"}]}"#,
        ));
        router(Bridge::new(store, transport).with_config_page("https://example.com/cfg"))
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_ready_route() {
        let store = Arc::new(MemorySettingsStore::with_entries([(KEY_API_KEY, "sk")]));
        let resp = app(store)
            .oneshot(Request::get("/api/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"READY_STATUS": 1}));
    }

    #[tokio::test]
    async fn test_message_route_replies_or_returns_no_content() {
        let store = Arc::new(MemorySettingsStore::with_entries([(KEY_API_KEY, "sk")]));
        let resp = app(store.clone())
            .oneshot(
                Request::post("/api/message")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"QUESTION":"hi"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(body_json(resp).await, json!({"RESPONSE": "Hello from Claude"}));

        let resp = app(store)
            .oneshot(
                Request::post("/api/message")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_configuration_routes() {
        let store = Arc::new(MemorySettingsStore::new());
        let resp = app(store.clone())
            .oneshot(
                Request::post("/api/configuration")
                    .body(Body::from(r#"{"provider":"openai","api_key":"sk-1"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(
            body_json(resp).await,
            json!([{"READY_STATUS": 1}, {"RESPONSE": "Saved! Using OpenAI"}])
        );

        let resp = app(store.clone())
            .oneshot(
                Request::get("/api/configuration/url")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(
            body_json(resp).await["url"],
            "https://example.com/cfg?provider=openai&api_key=sk-1"
        );

        let resp = app(store.clone())
            .oneshot(
                Request::delete("/api/configuration")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(body_json(resp).await, json!({"READY_STATUS": 0}));
        assert!(store.entries().expect("entries").is_empty());
    }
}
