//! End-to-end integration tests for IA Hub.
//!
//! These tests exercise the full path from a WhatsApp webhook to the reply:
//! gateway → pipeline → OpenAI-compatible provider over HTTP → store.
//! The model API is a local axum server that records what it receives.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::{Json, Router, routing};
use http_body_util::BodyExt;
use iahub_config::AppConfig;
use iahub_core::message::{Role, SessionId, TenantId};
use iahub_core::store::HistoryStore;
use iahub_gateway::{GatewayState, build_router};
use iahub_pipeline::{DocumentIngestor, MessagePipeline};
use iahub_store::InMemoryStore;
use serde_json::{Value, json};
use tower::ServiceExt;

const TENANT: &str = "15550001111";
const DIMENSIONS: usize = 16;

// ── Fake model API ───────────────────────────────────────────────────────

/// Records chat requests and answers from a script.
#[derive(Default)]
struct FakeOpenAi {
    chat_requests: Mutex<Vec<Value>>,
    replies: Mutex<Vec<String>>,
    fail_chat: Mutex<bool>,
}

impl FakeOpenAi {
    fn chat_requests(&self) -> Vec<Value> {
        self.chat_requests.lock().unwrap().clone()
    }

    /// `(role, content)` pairs of the n-th chat request.
    fn messages(&self, n: usize) -> Vec<(String, String)> {
        self.chat_requests()[n]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| {
                (
                    m["role"].as_str().unwrap().to_string(),
                    m["content"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

/// Letter-frequency vector; texts sharing words land close together.
fn fake_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMENSIONS];
    for c in text.to_lowercase().chars().filter(|c| c.is_alphabetic()) {
        v[(c as usize) % DIMENSIONS] += 1.0;
    }
    v
}

async fn chat_handler(
    State(fake): State<Arc<FakeOpenAi>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.chat_requests.lock().unwrap().push(body);

    if *fake.fail_chat.lock().unwrap() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "invalid api key"}})),
        );
    }

    let mut replies = fake.replies.lock().unwrap();
    let reply = if replies.is_empty() {
        "Posso ajudar com mais alguma coisa?".to_string()
    } else {
        replies.remove(0)
    };
    (
        StatusCode::OK,
        Json(json!({
            "model": "gpt-3.5-turbo-0125",
            "choices": [{"message": {"role": "assistant", "content": reply}}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28}
        })),
    )
}

async fn embeddings_handler(Json(body): Json<Value>) -> Json<Value> {
    let data: Vec<Value> = body["input"]
        .as_array()
        .unwrap()
        .iter()
        .enumerate()
        .map(|(i, text)| json!({"index": i, "embedding": fake_embedding(text.as_str().unwrap())}))
        .collect();
    Json(json!({"model": "text-embedding-3-small", "data": data}))
}

async fn spawn_fake(fake: Arc<FakeOpenAi>) -> String {
    let app = Router::new()
        .route("/chat/completions", routing::post(chat_handler))
        .route("/embeddings", routing::post(embeddings_handler))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Stack {
    app: Router,
    fake: Arc<FakeOpenAi>,
    store: Arc<InMemoryStore>,
}

async fn stack(replies: &[&str]) -> Stack {
    let fake = Arc::new(FakeOpenAi::default());
    fake.replies
        .lock()
        .unwrap()
        .extend(replies.iter().map(|r| r.to_string()));
    let base_url = spawn_fake(fake.clone()).await;

    let mut config = AppConfig {
        api_key: Some("sk-test".into()),
        ..AppConfig::default()
    };
    config.provider.api_url = Some(base_url);
    config.embedding.dimensions = DIMENSIONS;
    config.retry.backoff_ms = 1;

    let provider = iahub_providers::build_from_config(&config).unwrap();
    let store = Arc::new(InMemoryStore::new());
    let pipeline = MessagePipeline::new(
        &config,
        provider.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    let ingestor = DocumentIngestor::new(
        provider,
        store.clone(),
        config.embedding.model.clone(),
        DIMENSIONS,
    );

    let app = build_router(Arc::new(GatewayState {
        pipeline: Arc::new(pipeline),
        ingestor: Arc::new(ingestor),
        app_secret: None,
    }));

    Stack { app, fake, store }
}

fn webhook(from: &str, text: &str) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA-1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {"display_phone_number": TENANT, "phone_number_id": "PNID-1"},
                    "messages": [{
                        "from": from,
                        "id": "wamid.HBgM",
                        "timestamp": "1700000000",
                        "type": "text",
                        "text": {"body": text}
                    }]
                }
            }]
        }]
    })
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ── E2E scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_first_message_uses_default_prompt_and_tenant_documents() {
    let s = stack(&["Sim, o café da manhã está incluso."]).await;

    let (status, _) = post(
        &s.app,
        &format!("/api/embeddings/{TENANT}"),
        json!(["Café da manhã incluso na diária", "A pousada possui 4 acomodações"]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Another tenant's document must never reach this tenant's prompt.
    post(
        &s.app,
        "/api/embeddings/15559998888",
        json!(["Segredo de outro cliente"]),
    )
    .await;

    let (status, reply) = post(&s.app, "/webhook", webhook("5511999999999", "Tem café?")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["to"], "5511999999999");
    assert_eq!(reply["text"], "Sim, o café da manhã está incluso.");
    assert_eq!(reply["tenantId"], TENANT);
    assert_eq!(reply["phoneNumberId"], "PNID-1");
    assert_eq!(reply["usage"]["total_tokens"], 28);

    let messages = s.fake.messages(0);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].0, "system");
    assert_eq!(messages[0].1, iahub_config::DEFAULT_SYSTEM_PROMPT);
    assert!(messages[1].1.contains("Café da manhã incluso"));
    assert!(messages[1].1.contains("4 acomodações"));
    assert!(!messages[1].1.contains("Segredo"));
    assert_eq!(messages[2], ("user".to_string(), "Tem café?".to_string()));
    assert_eq!(s.fake.chat_requests()[0]["temperature"], 0.0);
}

#[tokio::test]
async fn e2e_second_turn_carries_history_and_custom_prompt() {
    let s = stack(&["Olá! Como posso ajudar?", "A diária custa R$ 300."]).await;
    s.store
        .insert_prompt(&TenantId::new(TENANT), "Você é o concierge da Pousada Sol.", 1, true)
        .await;

    post(&s.app, "/webhook", webhook("5511", "Oi")).await;
    let (status, reply) = post(&s.app, "/webhook", webhook("5511", "Quanto custa?")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["text"], "A diária custa R$ 300.");

    let messages = s.fake.messages(1);
    let roles: Vec<&str> = messages.iter().map(|(r, _)| r.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "system", "system", "user"]);
    assert_eq!(messages[0].1, "Oi");
    assert_eq!(messages[1].1, "Olá! Como posso ajudar?");
    assert_eq!(messages[2].1, "Você é o concierge da Pousada Sol.");

    let history = s
        .store
        .load(&SessionId::new("5511", TenantId::new(TENANT)))
        .await
        .unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[3].role, Role::Assistant);
}

#[tokio::test]
async fn e2e_senders_do_not_share_history() {
    let s = stack(&[]).await;

    post(&s.app, "/webhook", webhook("5511", "Sou o Ana")).await;
    post(&s.app, "/webhook", webhook("5522", "Oi")).await;

    let messages = s.fake.messages(1);
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|(_, c)| !c.contains("Ana")));
}

#[tokio::test]
async fn e2e_rejected_api_key_is_bad_gateway_and_nothing_is_saved() {
    let s = stack(&[]).await;
    *s.fake.fail_chat.lock().unwrap() = true;

    let (status, body) = post(&s.app, "/webhook", webhook("5511", "Oi")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "generation");
    assert_eq!(body["stage"], "history_loaded");
    assert_eq!(body["retryable"], false);
    assert!(!body.to_string().contains("invalid api key"));
    // Authentication failures are permanent for this request: one call only.
    assert_eq!(s.fake.chat_requests().len(), 1);
    assert_eq!(s.store.message_count().await, 0);
}

#[tokio::test]
async fn e2e_flat_payload_is_accepted() {
    let s = stack(&["Olá!"]).await;

    let (status, reply) = post(
        &s.app,
        "/webhook",
        json!({
            "senderId": "5533",
            "messageText": "Oi",
            "tenantId": TENANT
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["to"], "5533");
    assert_eq!(reply["text"], "Olá!");
}
