//! Adapter behavior against mocked vendor endpoints.

use runtime::{
    AnthropicProvider, ApiSettings, GenerationRequest, GoogleProvider, MistralProvider,
    OllamaProvider, OllamaSettings, OpenAiProvider, OpenAiSettings, Provider, ProviderError,
    collect_stream,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_settings(server: &MockServer, key: &str) -> ApiSettings {
    ApiSettings {
        base_url: Some(server.uri()),
        ..ApiSettings::with_key(key)
    }
}

fn sse(events: &[serde_json::Value]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn chat_completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "created": 1700000000,
        "model": "gpt-4o-mini",
        "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1000, "completion_tokens": 2000, "total_tokens": 3000}
    })
}

fn chat_chunks(parts: &[&str]) -> String {
    let mut body = sse(&parts
        .iter()
        .map(|p| json!({"choices": [{"delta": {"content": p}}]}))
        .collect::<Vec<_>>());
    body.push_str("data: [DONE]\n\n");
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI / Mistral
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_generate_maps_usage_and_prices_catalog_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("openai-organization", "org-1"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("Hello there")))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&OpenAiSettings {
        api: api_settings(&server, "sk-test"),
        org_id: Some("org-1".into()),
    })
    .unwrap();

    let request = GenerationRequest::new("gpt-4o-mini").with_prompt("hi");
    let result = provider.generate(&request).await.unwrap();

    assert_eq!(result.provider, "openai");
    assert_eq!(result.content, "Hello there");
    assert_eq!(result.usage.input_tokens, 1000);
    assert_eq!(result.usage.output_tokens, 2000);
    assert_eq!(result.usage.total_tokens, 3000);
    // 1k in at 0.00015 plus 2k out at 0.0006
    assert!((result.cost - 0.00135).abs() < 1e-9);
    assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    assert_eq!(result.metadata["id"], "chatcmpl-1");
}

#[tokio::test]
async fn openai_uncatalogued_model_costs_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("ok")))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&OpenAiSettings {
        api: api_settings(&server, "sk-test"),
        org_id: None,
    })
    .unwrap();

    let result = provider
        .generate(&GenerationRequest::new("ft:gpt-4o-mini:custom").with_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(result.cost, 0.0);
    assert_eq!(result.usage.total_tokens, 3000);
}

#[tokio::test]
async fn openai_stream_concatenates_to_full_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(chat_chunks(&["Hel", "", "lo ", "there"])))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&OpenAiSettings {
        api: api_settings(&server, "sk-test"),
        org_id: None,
    })
    .unwrap();

    let stream = provider.generate_stream(&GenerationRequest::new("gpt-4o").with_prompt("hi"));
    assert_eq!(collect_stream(stream).await.unwrap(), "Hello there");
}

#[tokio::test]
async fn openai_error_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&OpenAiSettings {
        api: api_settings(&server, "sk-test"),
        org_id: None,
    })
    .unwrap();

    let err = provider
        .generate(&GenerationRequest::new("gpt-4o").with_prompt("hi"))
        .await
        .unwrap_err();
    match err {
        ProviderError::Api(message) => {
            assert!(message.contains("429"));
            assert!(message.contains("rate limited"));
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn mistral_trusts_total_when_split_is_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer ms-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-9",
            "choices": [{"message": {"content": "Bonjour"}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 12}
        })))
        .mount(&server)
        .await;

    let provider = MistralProvider::new(&api_settings(&server, "ms-test")).unwrap();
    let result = provider
        .generate(&GenerationRequest::new("mistral-small-latest").with_prompt("hi"))
        .await
        .unwrap();

    assert_eq!(result.provider, "mistral");
    assert_eq!(result.content, "Bonjour");
    assert_eq!(result.usage.input_tokens, 0);
    assert_eq!(result.usage.output_tokens, 0);
    assert_eq!(result.usage.total_tokens, 12);
    assert_eq!(result.cost, 0.0);
}

#[tokio::test]
async fn mistral_probe_hits_model_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let provider = MistralProvider::new(&api_settings(&server, "ms-test")).unwrap();
    assert!(provider.is_available().await);

    let health = provider.health_check().await;
    assert!(health.available);
    assert_eq!(health.models_count, 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn anthropic_generate_sends_defaults_and_maps_blocks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"max_tokens": 4096, "system": "be brief"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "model": "claude-3-haiku-20240307",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": " world"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 3}
        })))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(&api_settings(&server, "sk-ant-test")).unwrap();
    let request = GenerationRequest::new("claude-3-haiku-20240307")
        .with_system_prompt("be brief")
        .with_prompt("hi");
    let result = provider.generate(&request).await.unwrap();

    assert_eq!(result.content, "Hello world");
    assert_eq!(result.usage.total_tokens, 8);
    assert!((result.cost - 0.000005).abs() < 1e-12);
    assert_eq!(result.finish_reason.as_deref(), Some("end_turn"));
    assert_eq!(result.metadata["type"], "message");
}

#[tokio::test]
async fn anthropic_stream_yields_text_deltas() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"type": "message_start", "message": {"id": "msg_1"}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
        json!({"type": "ping"}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
        json!({"type": "message_stop"}),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(&api_settings(&server, "sk-ant-test")).unwrap();
    let stream = provider
        .generate_stream(&GenerationRequest::new("claude-3-haiku-20240307").with_prompt("hi"));
    assert_eq!(collect_stream(stream).await.unwrap(), "Hello");
}

#[tokio::test]
async fn anthropic_stream_error_event_fails_the_stream() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(&api_settings(&server, "sk-ant-test")).unwrap();
    let stream = provider
        .generate_stream(&GenerationRequest::new("claude-3-haiku-20240307").with_prompt("hi"));
    let err = collect_stream(stream).await.unwrap_err();
    assert_eq!(err.to_string(), "provider api: overloaded_error: Overloaded");
}

// ─────────────────────────────────────────────────────────────────────────────
// Google
// ─────────────────────────────────────────────────────────────────────────────

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}, "finishReason": "STOP"}],
        "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 20, "totalTokenCount": 30}
    })
}

#[tokio::test]
async fn google_generate_folds_prompt_and_maps_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .and(header("x-goog-api-key", "g-test"))
        .and(body_partial_json(json!({
            "contents": [{"parts": [{"text": "sys\n\nhi"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("Hi!")))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new(&api_settings(&server, "g-test")).unwrap();
    let request = GenerationRequest::new("gemini-pro")
        .with_system_prompt("sys")
        .with_prompt("hi");
    let result = provider.generate(&request).await.unwrap();

    assert_eq!(result.content, "Hi!");
    assert_eq!(result.usage.input_tokens, 10);
    assert_eq!(result.usage.output_tokens, 20);
    assert_eq!(result.usage.total_tokens, 30);
    // 10 in at 0.0005 plus 20 out at 0.0015
    assert!((result.cost - 0.000035).abs() < 1e-12);
    assert_eq!(result.finish_reason.as_deref(), Some("STOP"));
    assert_eq!(result.metadata["model"], "gemini-pro");
}

#[tokio::test]
async fn google_stream_reads_sse_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .respond_with(sse_response(sse(&[gemini_reply("Hel"), gemini_reply("lo")])))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new(&api_settings(&server, "g-test")).unwrap();
    let stream =
        provider.generate_stream(&GenerationRequest::new("gemini-1.5-flash").with_prompt("hi"));
    assert_eq!(collect_stream(stream).await.unwrap(), "Hello");
}

#[tokio::test]
async fn google_empty_model_listing_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new(&api_settings(&server, "g-test")).unwrap();
    assert!(!provider.is_available().await);
    let health = provider.health_check().await;
    assert!(!health.available);
    assert!(health.error.is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Ollama
// ─────────────────────────────────────────────────────────────────────────────

fn ollama(server: &MockServer) -> OllamaProvider {
    OllamaProvider::new(&OllamaSettings {
        enabled: true,
        host: server.uri(),
        timeout_secs: 5,
    })
    .unwrap()
}

async fn mount_tags(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "llama3:8b", "size": 4661224676u64, "modified_at": "2024-05-01T10:00:00Z", "digest": "d1"},
                {"name": "llava:latest", "size": 4733363377u64, "modified_at": "2024-05-02T10:00:00Z", "digest": "d2"}
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn ollama_lists_pulled_models_as_local() {
    let server = MockServer::start().await;
    mount_tags(&server).await;
    let provider = ollama(&server);

    let models = provider.list_models().await;
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].display_name, "Llama3");
    assert!(models.iter().all(|m| m.is_local && m.provider == "ollama"));
    assert!(models[1].supports(runtime::Capability::Vision));

    let info = provider.get_model_info("llama3").await.unwrap();
    assert_eq!(info.name, "llama3:8b");
    assert!(provider.get_model_info("llama").await.is_none());

    let health = provider.health_check().await;
    assert!(health.available);
    assert_eq!(health.details["models"], json!(["llama3:8b", "llava:latest"]));
    assert_eq!(health.details["host"], server.uri());
}

#[tokio::test]
async fn ollama_generate_is_free_and_counts_eval_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3",
            "stream": false,
            "options": {"num_predict": 64}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "Hi from llama"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 26,
            "eval_count": 290,
            "total_duration": 5000000,
            "eval_duration": 4000000
        })))
        .mount(&server)
        .await;

    let provider = ollama(&server);
    let request = GenerationRequest::new("llama3")
        .with_prompt("hi")
        .with_max_tokens(64);
    let result = provider.generate(&request).await.unwrap();

    assert_eq!(result.content, "Hi from llama");
    assert_eq!(result.usage.total_tokens, 316);
    assert_eq!(result.cost, 0.0);
    assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    assert_eq!(result.metadata["eval_duration"], 4000000);
    assert_eq!(result.metadata["load_duration"], 0);
}

#[tokio::test]
async fn ollama_stream_parses_ndjson_lines() {
    let server = MockServer::start().await;
    let body = [
        json!({"message": {"content": "Hel"}, "done": false}),
        json!({"message": {"content": "lo"}, "done": false}),
        json!({"message": {"content": ""}, "done": true, "eval_count": 2}),
    ]
    .iter()
    .map(|line| format!("{line}\n"))
    .collect::<String>();
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let stream = ollama(&server).generate_stream(&GenerationRequest::new("llama3").with_prompt("hi"));
    assert_eq!(collect_stream(stream).await.unwrap(), "Hello");
}

#[tokio::test]
async fn ollama_pull_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .and(body_partial_json(json!({"name": "llama3", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/delete"))
        .and(body_partial_json(json!({"name": "llama3"})))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/delete"))
        .and(body_partial_json(json!({"name": "missing"})))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "model not found"})))
        .mount(&server)
        .await;

    let provider = ollama(&server);
    assert_eq!(provider.pull_model("llama3").await.unwrap().status, "success");
    assert!(provider.delete_model("llama3").await.unwrap());
    assert!(!provider.delete_model("missing").await.unwrap());
}

#[tokio::test]
async fn ollama_error_body_fails_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model 'nope' not found"})),
        )
        .mount(&server)
        .await;

    let err = ollama(&server)
        .generate(&GenerationRequest::new("nope").with_prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Api(_)));
}
