use std::sync::Arc;

use kgx_core::{ExtractionKind, ExtractionOracle, OracleConfig, OracleError};
use kgx_oracle::{ChatCompletionOracle, OllamaOracle, OracleClient, ResultCache};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
}

fn chat_error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(serde_json::json!({
        "error": {"type": "api_error", "message": message}
    }))
}

fn oracle_for(server: &MockServer) -> ChatCompletionOracle {
    ChatCompletionOracle::new("deepseek", "test-key", "deepseek-chat", 2000, 0.1)
        .with_base_url(server.uri())
}

fn fast_config() -> OracleConfig {
    OracleConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        ..OracleConfig::default()
    }
}

#[tokio::test]
async fn chat_completion_sends_bearer_and_returns_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({"model": "deepseek-chat"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("{\"triples\":[]}")))
        .expect(1)
        .mount(&server)
        .await;

    let answer = oracle_for(&server)
        .call("prompt", ExtractionKind::Triples)
        .await
        .unwrap();

    assert_eq!(answer, "{\"triples\":[]}");
}

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_error(401, "invalid api key"))
        .mount(&server)
        .await;

    let result = oracle_for(&server)
        .call("prompt", ExtractionKind::Triples)
        .await;

    assert!(matches!(result, Err(OracleError::Auth(_))));
}

#[tokio::test]
async fn rate_limit_and_server_errors_are_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_error(429, "slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_error(502, "bad gateway"))
        .mount(&server)
        .await;

    let oracle = oracle_for(&server);
    let first = oracle.call("prompt", ExtractionKind::Triples).await;
    let second = oracle.call("prompt", ExtractionKind::Triples).await;

    assert!(matches!(first, Err(OracleError::RateLimited(_))));
    assert!(matches!(second, Err(OracleError::Server { status: 502, .. })));
}

#[tokio::test]
async fn client_retries_server_errors_then_falls_back() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_error(503, "overloaded"))
        .expect(4)
        .mount(&server)
        .await;

    let client = OracleClient::new(Arc::new(oracle_for(&server)), fast_config());
    let set = client.call("周杰伦是歌手", ExtractionKind::Celebrity).await.unwrap();

    assert!(set.fallback);
    assert!(set.triples.is_empty());
}

#[tokio::test]
async fn client_extracts_and_caches_narrated_answer() {
    let server = MockServer::start().await;
    let narrated = "以下是结果：\n```json\n{\"triples\":[{\"subject\":\"周杰伦\",\"predicate\":\"职业\",\"object\":\"歌手\",\"confidence\":0.95}]}\n```";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(narrated)))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        OracleClient::new(Arc::new(oracle_for(&server)), fast_config()).with_cache(ResultCache::new());

    let first = client.call("周杰伦是歌手", ExtractionKind::Triples).await.unwrap();
    let second = client.call("周杰伦是歌手", ExtractionKind::Triples).await.unwrap();

    assert_eq!(first.triples.len(), 1);
    assert_eq!(first.triples[0].subject, "周杰伦");
    assert!(second.from_cache);
    assert_eq!(second.triples, first.triples);
}

#[tokio::test]
async fn ollama_generate_returns_response_field() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({"model": "qwen2", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "{\"triples\":[]}",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = OllamaOracle::new(server.uri(), "qwen2");
    let answer = oracle.call("prompt", ExtractionKind::Work).await.unwrap();

    assert_eq!(answer, "{\"triples\":[]}");
}
