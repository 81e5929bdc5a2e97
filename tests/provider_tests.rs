//! HTTP-level tests of the OpenAI and Tavily clients against wiremock servers

mod common;

use std::sync::Arc;

use copywriter_agent::agent::{Agent, AgentError, StoreError};
use copywriter_agent::llm::{ChatMessage, ChatModel, ChatRequest, LlmError, ModelChunk, OpenAiClient, Tool};
use copywriter_agent::tools::web_search::{TavilyClient, WebSearchTool};
use copywriter_agent::tools::{AgentTool, ToolError, Toolbox};
use copywriter_agent::RunInput;
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(chunks: &[serde_json::Value]) -> String {
    let mut body: String = chunks
        .iter()
        .map(|c| format!("data: {}\n\n", c))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn text_completion(parts: &[&str]) -> ResponseTemplate {
    let chunks: Vec<_> = parts
        .iter()
        .map(|p| json!({ "choices": [{ "index": 0, "delta": { "content": p } }] }))
        .collect();
    ResponseTemplate::new(200).set_body_raw(sse(&chunks), "text/event-stream")
}

fn request(tools: Option<Vec<Tool>>) -> ChatRequest {
    ChatRequest {
        model: "gpt-5.2".to_string(),
        messages: vec![
            ChatMessage::system("You write copy."),
            ChatMessage::user("Write a hook for a skincare reel"),
        ],
        tools,
    }
}

#[tokio::test]
async fn test_openai_streams_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-5.2",
            "stream": true,
            "service_tier": "flex"
        })))
        .respond_with(text_completion(&["Your skin ", "deserves better."]))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(format!("{}/v1/", server.uri()), "sk-test")
        .unwrap()
        .with_service_tier(Some("flex".to_string()));
    let chunks: Vec<ModelChunk> = client
        .stream_chat(request(None))
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;

    assert_eq!(
        chunks,
        vec![
            ModelChunk::Content("Your skin ".to_string()),
            ModelChunk::Content("deserves better.".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_openai_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let client = OpenAiClient::new(server.uri(), "sk-test").unwrap();
    match client.stream_chat(request(None)).await {
        Err(LlmError::Status { status, body }) => {
            assert_eq!(status, 429);
            assert_eq!(body, "rate limited");
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("expected an error status"),
    }
}

#[tokio::test]
async fn test_openai_error_chunk_fails_stream() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                data: {\"error\":{\"message\":\"overloaded\"}}\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = OpenAiClient::new(server.uri(), "sk-test").unwrap();
    let items: Vec<_> = client.stream_chat(request(None)).await.unwrap().collect().await;
    assert!(matches!(items[0], Ok(ModelChunk::Content(ref c)) if c == "Hi"));
    assert!(matches!(items.last(), Some(Err(LlmError::Provider(m))) if m == "overloaded"));
}

/// A body cut off before `[DONE]` is a provider failure and writes no turn
#[tokio::test]
async fn test_cut_completion_is_not_persisted() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Your skin deserves\"}}]}\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let model = OpenAiClient::new(server.uri(), "sk-test").unwrap();
    let store = common::memory_store().await;
    let agent = Agent::new(common::settings(), Arc::new(model), Toolbox::new(), store.clone());

    let result = agent
        .run_to_completion(RunInput {
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
            message: "Write a hook for a skincare reel".to_string(),
        })
        .await;

    assert!(
        matches!(result, Err(AgentError::Model(LlmError::Provider(ref m))) if m.contains("before completion")),
        "{:?}",
        result
    );
    assert!(matches!(store.transcript("s1").await, Err(StoreError::NotFound(_))));
    assert!(store.list_sessions("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tavily_search() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("authorization", "Bearer tvly-test"))
        .and(body_partial_json(json!({ "query": "sunscreen trends", "max_results": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": "sunscreen trends",
            "answer": "Mineral sunscreens are trending.",
            "results": [
                { "title": "Sunscreen 2026", "url": "https://example.com/a", "content": "Mineral filters.", "score": 0.91 }
            ],
            "response_time": 0.8
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tool = WebSearchTool::new(TavilyClient::new(server.uri(), "tvly-test").unwrap(), 5);
    let output = tool
        .call(json!({ "query": "sunscreen trends", "max_results": 3 }))
        .await
        .unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["answer"], "Mineral sunscreens are trending.");
    assert_eq!(parsed["results"][0]["url"], "https://example.com/a");
}

#[tokio::test]
async fn test_tavily_failure_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let tool = WebSearchTool::new(TavilyClient::new(server.uri(), "tvly-test").unwrap(), 5);
    let error = tool.call(json!({ "query": "anything" })).await.unwrap_err();
    assert!(error.is_fatal());
    assert!(matches!(error, ToolError::Upstream { .. }));

    let missing = tool.call(json!({})).await.unwrap_err();
    assert!(matches!(missing, ToolError::InvalidArguments(_)));
}

/// Full run: the model asks for a search, gets the results and answers
#[tokio::test]
async fn test_agent_with_real_clients() {
    let llm = MockServer::start().await;
    let search = MockServer::start().await;

    let tool_call = sse(&[
        json!({ "choices": [{ "delta": { "tool_calls": [{
            "index": 0, "id": "call_s", "type": "function",
            "function": { "name": "web_search", "arguments": "{\"query\":" }
        }] } }] }),
        json!({ "choices": [{ "delta": { "tool_calls": [{
            "index": 0, "function": { "arguments": "\"spf myths\"}" }
        }] } }] }),
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(tool_call, "text/event-stream"))
        .up_to_n_times(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(text_completion(&["Myth: SPF 100 lasts all day."]))
        .mount(&llm)
        .await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(json!({ "query": "spf myths" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": "spf myths",
            "results": [{ "title": "SPF myths", "url": "https://example.com/spf", "content": "Reapply every 2h." }]
        })))
        .expect(1)
        .mount(&search)
        .await;

    let model = OpenAiClient::new(llm.uri(), "sk-test").unwrap();
    let toolbox = Toolbox::new().with(WebSearchTool::new(
        TavilyClient::new(search.uri(), "tvly-test").unwrap(),
        5,
    ));
    let store = common::memory_store().await;
    let agent = Agent::new(common::settings(), Arc::new(model), toolbox, store.clone());

    let output = agent
        .run_to_completion(RunInput {
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
            message: "Bust a sunscreen myth".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(output.content, "Myth: SPF 100 lasts all day.");
    assert_eq!(output.tools.len(), 1);
    assert_eq!(output.tools[0].tool_call_id, "call_s");

    let turns = store.transcript("s1").await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].tool_calls[0].arguments, json!({ "query": "spf myths" }));

    let requests = llm.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let tool_message = &second["messages"][3];
    assert_eq!(tool_message["role"], "tool");
    assert_eq!(tool_message["tool_call_id"], "call_s");
    assert!(tool_message["content"].as_str().unwrap().contains("Reapply"));
}
