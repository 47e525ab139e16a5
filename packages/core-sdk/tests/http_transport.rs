use std::time::Duration;

use serde_json::json;
use watchbridge_core_sdk::llm::{HttpTransport, ProviderKind, Transport, TransportError};
use watchbridge_core_sdk::models::{OutgoingMessage, Prompt};
use watchbridge_core_sdk::router;
use watchbridge_core_sdk::settings::Settings;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(provider: &str, base_url: String) -> Settings {
    Settings {
        provider: Some(provider.to_string()),
        api_key: Some("test_key".to_string()),
        base_url: Some(base_url),
        system_message: Some("Be brief.".to_string()),
        ..Settings::default()
    }
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5)).expect("build transport")
}

#[tokio::test]
async fn test_claude_round_trip_over_http() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test_key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_json(json!({
            "model": "claude-haiku-4-5",
            "max_tokens": 300,
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "What is 6x7?"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "42"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let s = settings("claude", format!("{}/v1/messages", mock_server.uri()));
    let reply = router::handle(&Prompt::from("What is 6x7?"), &s, &transport()).await;
    assert_eq!(reply, OutgoingMessage::Response("42".to_string()));
}

#[tokio::test]
async fn test_openai_unauthorized_is_reported_with_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test_key"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid key"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let s = settings("openai", format!("{}/v1/chat/completions", mock_server.uri()));
    let reply = router::handle(&Prompt::from("hi"), &s, &transport()).await;
    assert_eq!(reply, OutgoingMessage::Error("OpenAI error 401".to_string()));
}

#[tokio::test]
async fn test_gemini_key_travels_in_query_string() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash-lite:generateContent"))
        .and(query_param("key", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "Sunny"}]}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let s = settings("gemini", format!("{}/v1beta/models", mock_server.uri()));
    let reply = router::handle(&Prompt::from("weather?"), &s, &transport()).await;
    assert_eq!(reply, OutgoingMessage::Response("Sunny".to_string()));
}

#[tokio::test]
async fn test_grok_non_json_body_is_parse_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&mock_server)
        .await;

    let s = settings("grok", format!("{}/v1/chat/completions", mock_server.uri()));
    let reply = router::handle(&Prompt::from("hi"), &s, &transport()).await;
    assert_eq!(reply, OutgoingMessage::Error("Parse error".to_string()));
}

#[tokio::test]
async fn test_slow_provider_times_out_as_network_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({"content": [{"text": "late"}]})),
        )
        .mount(&mock_server)
        .await;

    let transport = HttpTransport::new(Duration::from_millis(200)).expect("build transport");
    let s = settings("claude", format!("{}/v1/messages", mock_server.uri()));

    let request = ProviderKind::Claude
        .build_request(&Prompt::from("hi"), &s)
        .expect("build request");
    assert_eq!(transport.send(request).await, Err(TransportError::Timeout));

    let reply = router::handle(&Prompt::from("hi"), &s, &transport).await;
    assert_eq!(reply, OutgoingMessage::Error("Network error".to_string()));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let s = settings("openai", "http://127.0.0.1:9/v1/chat/completions".to_string());
    let reply = router::handle(&Prompt::from("hi"), &s, &transport()).await;
    assert_eq!(reply, OutgoingMessage::Error("Network error".to_string()));
}
