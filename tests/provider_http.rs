//! Backend adapters against a local HTTP server serving canned responses.

use std::time::Duration;

use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use calendar_ai_router::config::{LlmConfig, ProviderConfig, ResilienceConfig};
use calendar_ai_router::error::LlmError;
use calendar_ai_router::llm::{
    GenerateRequest, ModelTier, OperationType, ProviderKind, RetryPolicy, RouteRequest, Router,
    SubscriptionTier, create_llm_provider, create_policy,
};

struct Canned {
    status: &'static str,
    headers: &'static [(&'static str, &'static str)],
    body: &'static str,
}

impl Canned {
    fn ok(body: &'static str) -> Self {
        Self {
            status: "200 OK",
            headers: &[],
            body,
        }
    }

    fn status(status: &'static str, body: &'static str) -> Self {
        Self {
            status,
            headers: &[],
            body,
        }
    }
}

/// Serve each canned response on its own connection, in order, and hand
/// back the raw requests that were received.
async fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for canned in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            seen.push(read_request(&mut socket).await);

            let mut head = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                canned.status,
                canned.body.len()
            );
            for (name, value) in canned.headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(canned.body.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
        seen
    });
    (format!("http://{addr}"), handle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn provider(kind: ProviderKind, id: &str, model: &str, base_url: String) -> ProviderConfig {
    ProviderConfig {
        kind,
        id: id.to_string(),
        api_key: SecretString::from("sk-test".to_string()),
        model: model.to_string(),
        base_url: Some(base_url),
        tier: ModelTier::Standard,
        priority: 0,
    }
}

fn llm_config() -> LlmConfig {
    LlmConfig {
        providers: Vec::new(),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
    }
}

const OPENAI_OK: &str = r#"{
    "choices": [{"message": {"role": "assistant", "content": "Buy milk at 6pm"}}],
    "usage": {"prompt_tokens": 12, "completion_tokens": 5}
}"#;

const GEMINI_OK: &str = r#"{
    "candidates": [{"content": {"parts": [{"text": "{\"intent\": "}, {"text": "\"create_task\"}"}]}, "finishReason": "STOP"}],
    "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 4}
}"#;

#[tokio::test]
async fn openai_success_sends_bearer_and_parses_usage() {
    let (base, server) = serve(vec![Canned::ok(OPENAI_OK)]).await;
    let config = provider(ProviderKind::OpenAi, "openai", "gpt-4o-mini", format!("{base}/v1"));
    let openai = create_llm_provider(&config, &llm_config());

    let generation = openai
        .generate(
            GenerateRequest::new("Remind me to buy milk", "gpt-4o-mini").with_max_tokens(64),
        )
        .await
        .unwrap();
    assert_eq!(generation.text, "Buy milk at 6pm");
    assert_eq!((generation.input_tokens, generation.output_tokens), (12, 5));

    let requests = server.await.unwrap();
    let raw = requests[0].to_ascii_lowercase();
    assert!(raw.starts_with("post /v1/chat/completions "));
    assert!(raw.contains("authorization: bearer sk-test"));
    assert!(requests[0].contains("\"max_tokens\":64"));
    assert!(requests[0].contains("Remind me to buy milk"));
}

#[tokio::test]
async fn openai_status_codes_map_to_error_kinds() {
    let (base, server) = serve(vec![
        Canned {
            status: "429 Too Many Requests",
            headers: &[("retry-after", "7")],
            body: r#"{"error": {"message": "slow down"}}"#,
        },
        Canned::status("401 Unauthorized", r#"{"error": {"message": "bad key"}}"#),
        Canned::status("400 Bad Request", r#"{"error": {"message": "prompt too long"}}"#),
        Canned::status("503 Service Unavailable", "upstream overloaded"),
        Canned::ok("not json"),
    ])
    .await;
    let config = provider(ProviderKind::OpenAi, "openai", "gpt-4o-mini", base);
    let openai = create_llm_provider(&config, &llm_config());
    let call = || openai.generate(GenerateRequest::new("hello", "gpt-4o-mini"));

    match call().await.unwrap_err() {
        LlmError::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    let auth = call().await.unwrap_err();
    assert!(matches!(auth, LlmError::AuthFailed { .. }));
    assert!(!auth.is_retryable());

    let invalid = call().await.unwrap_err();
    assert!(matches!(invalid, LlmError::InvalidRequest { .. }));
    assert!(!invalid.is_retryable());

    let server_err = call().await.unwrap_err();
    assert!(matches!(server_err, LlmError::ServerError { status: Some(503), .. }));
    assert!(server_err.is_retryable());

    let garbled = call().await.unwrap_err();
    assert!(matches!(garbled, LlmError::InvalidResponse { .. }));
    assert!(garbled.is_retryable());

    assert_eq!(server.await.unwrap().len(), 5);
}

#[tokio::test]
async fn anthropic_and_gemini_wire_formats() {
    let (base, server) = serve(vec![
        Canned::ok(
            r#"{"content": [{"type": "text", "text": "Good morning!"}], "usage": {"input_tokens": 20, "output_tokens": 3}}"#,
        ),
        Canned::ok(GEMINI_OK),
    ])
    .await;

    let anthropic = create_llm_provider(
        &provider(
            ProviderKind::Anthropic,
            "claude",
            "claude-3-5-haiku-latest",
            base.clone(),
        ),
        &llm_config(),
    );
    let reply = anthropic
        .generate(GenerateRequest::new("Brief me", "claude-3-5-haiku-latest"))
        .await
        .unwrap();
    assert_eq!(reply.text, "Good morning!");
    assert_eq!((reply.input_tokens, reply.output_tokens), (20, 3));

    let gemini = create_llm_provider(
        &provider(ProviderKind::Gemini, "gemini", "gemini-2.0-flash", base.clone()),
        &llm_config(),
    );
    let reply = gemini
        .generate(GenerateRequest::new("add a task", "gemini-2.0-flash"))
        .await
        .unwrap();
    assert_eq!(reply.text, "{\"intent\": \"create_task\"}");
    assert_eq!((reply.input_tokens, reply.output_tokens), (9, 4));

    let requests = server.await.unwrap();
    let anthropic_raw = requests[0].to_ascii_lowercase();
    assert!(anthropic_raw.starts_with("post /v1/messages "));
    assert!(anthropic_raw.contains("x-api-key: sk-test"));
    assert!(anthropic_raw.contains("anthropic-version: 2023-06-01"));

    let gemini_raw = requests[1].to_ascii_lowercase();
    assert!(gemini_raw.starts_with("post /models/gemini-2.0-flash:generatecontent "));
    assert!(gemini_raw.contains("x-goog-api-key: sk-test"));
    assert!(requests[1].contains("\"maxOutputTokens\""));
}

#[tokio::test]
async fn router_falls_back_across_real_adapters() {
    let (openai_base, openai_server) =
        serve(vec![Canned::status("500 Internal Server Error", "boom")]).await;
    let (gemini_base, gemini_server) = serve(vec![Canned::ok(GEMINI_OK)]).await;

    let mut openai = provider(ProviderKind::OpenAi, "openai", "gpt-4o-mini", openai_base);
    openai.priority = 0;
    let mut gemini = provider(ProviderKind::Gemini, "gemini", "gemini-2.0-flash", gemini_base);
    gemini.tier = ModelTier::Economy;
    gemini.priority = 1;

    let mut llm = llm_config();
    llm.providers = vec![openai, gemini];
    let policy = create_policy(&llm).unwrap();
    let router = Router::builder(policy)
        .resilience(ResilienceConfig {
            retry: RetryPolicy {
                max_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        })
        .build();

    // Medium prompt from a free caller: standard first, economy as fallback.
    let decision = router
        .route(RouteRequest::new(
            "What is on my calendar tomorrow?",
            OperationType::IntentDetection,
            SubscriptionTier::Free,
        ))
        .await
        .unwrap();
    assert_eq!(decision.chosen_provider, "gemini");
    assert_eq!(decision.chosen_model, "gemini-2.0-flash");
    assert_eq!(decision.text, "{\"intent\": \"create_task\"}");
    assert!(!decision.cache_hit);

    let stats = router.get_stats();
    assert_eq!(stats.breakers["openai"].total_failures, 1);
    assert_eq!(stats.breakers["gemini"].total_requests, 1);

    assert_eq!(openai_server.await.unwrap().len(), 1);
    assert_eq!(gemini_server.await.unwrap().len(), 1);
}
