//! Inquiry Relay - forwards customer inquiries (text or image) to a
//! completion API for pricing replies and structured lead capture.

mod decode;
mod error;
mod input;
mod leads;
mod openai;
mod prompt;
mod supabase;

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use decode::PricingResult;
use error::Error;
use input::{AnalyzeRequest, InquiryInput};
use leads::LeadDraft;
use openai::{CompletionGateway, OpenAiClient};
use supabase::{LeadStore, StoredLead, SupabaseClient};

/// Inline base64 images run to several megabytes; the framework default
/// (2 MB) would reject them, so the limit is set explicitly.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Application state shared across handlers. Both clients are stateless
/// connection handles, safe for concurrent reuse.
#[derive(Clone)]
struct AppState {
    gateway: Arc<dyn CompletionGateway>,
    store: Arc<dyn LeadStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inquiry_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // One shared transport for both external services
    let http = reqwest::Client::new();

    let gateway = OpenAiClient::from_env(http.clone())?;
    info!("OpenAI client initialized");

    let store = SupabaseClient::from_env(http)?;
    info!("Supabase client initialized");

    let state = AppState {
        gateway: Arc::new(gateway),
        store: Arc::new(store),
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/generate-lead", post(generate_lead))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Price an inquiry and draft a reply.
async fn analyze(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<PricingResult>, Error> {
    let (input, prompt_type) = read_inquiry(req).await?;
    let variant = prompt::variant(prompt_type)?;

    let instruction = prompt::pricing_prompt(&input, variant);
    let raw = state.gateway.complete(&instruction, &input).await?;

    let result = decode::decode_pricing(&raw)?;
    info!("Analyze complete: price={}", result.price);
    Ok(Json(result))
}

#[derive(Serialize)]
struct GenerateLeadResponse {
    success: bool,
    message: String,
    leads: Vec<LeadOutcome>,
}

/// Per-lead result. One lead failing to store never aborts the batch.
#[derive(Serialize)]
struct LeadOutcome {
    customer_name: String,
    sequence_number: i64,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl LeadOutcome {
    fn stored(draft: &LeadDraft, stored: StoredLead) -> Self {
        Self {
            customer_name: draft.customer_name().to_string(),
            sequence_number: draft.sequence_number,
            status: "stored",
            id: Some(stored.id),
            error: None,
        }
    }

    fn failed(draft: &LeadDraft, err: &Error) -> Self {
        Self {
            customer_name: draft.customer_name().to_string(),
            sequence_number: draft.sequence_number,
            status: "failed",
            id: None,
            error: Some(err.to_string()),
        }
    }
}

/// Extract structured leads from an inquiry and upsert them into the store.
async fn generate_lead(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<GenerateLeadResponse>, Error> {
    let (input, _) = read_inquiry(req).await?;

    let drafts = leads::extract_leads(state.gateway.as_ref(), &input).await?;

    let mut outcomes = Vec::with_capacity(drafts.len());
    for draft in &drafts {
        match state.store.upsert(draft).await {
            Ok(stored) => outcomes.push(LeadOutcome::stored(draft, stored)),
            Err(err) => {
                error!(
                    "Failed to store lead ({}, #{}): {}",
                    draft.customer_name(),
                    draft.sequence_number,
                    err
                );
                outcomes.push(LeadOutcome::failed(draft, &err));
            }
        }
    }

    let stored = outcomes.iter().filter(|o| o.status == "stored").count();
    Ok(Json(GenerateLeadResponse {
        success: true,
        message: format!("Stored {} of {} lead(s)", stored, outcomes.len()),
        leads: outcomes,
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Read an inquiry from either a JSON body or a multipart upload with an
/// `image` file field. Returns the normalized input and the caller's
/// promptType, if any.
async fn read_inquiry(req: Request) -> Result<(InquiryInput, Option<usize>), Error> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| Error::Validation(format!("Malformed multipart body: {}", e)))?;
        return read_multipart(multipart).await;
    }

    let bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::Validation(format!("Failed to read request body: {}", e)))?;

    let body: AnalyzeRequest = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Validation(format!("Invalid JSON body: {}", e)))?;

    let input = input::normalize(&body)?;
    Ok((input, body.prompt_type))
}

async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(InquiryInput, Option<usize>), Error> {
    let mut image: Option<(Vec<u8>, String)> = None;
    let mut prompt_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Multipart error: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let mime_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("Failed to read upload: {}", e)))?
                    .to_vec();
                image = Some((bytes, mime_type));
            }
            Some("promptType") => {
                let text = field.text().await.unwrap_or_default();
                prompt_type = text.trim().parse::<usize>().ok();
            }
            _ => {}
        }
    }

    let (bytes, mime_type) =
        image.ok_or_else(|| Error::Validation("No image uploaded".to_string()))?;

    Ok((InquiryInput::from_upload(bytes, mime_type)?, prompt_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Gateway fake: returns a canned response and counts calls.
    struct CannedGateway {
        response: String,
        calls: AtomicUsize,
    }

    impl CannedGateway {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionGateway for CannedGateway {
        async fn complete(&self, _prompt: &str, _input: &InquiryInput) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    /// Store fake: in-memory map keyed like the real adapter, with an
    /// optional name that always fails.
    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<HashMap<(String, i64), Value>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl LeadStore for FakeStore {
        async fn upsert(&self, draft: &LeadDraft) -> Result<StoredLead, Error> {
            if self.fail_for.as_deref() == Some(draft.customer_name()) {
                return Err(Error::Store("connection reset".to_string()));
            }
            let key = (draft.customer_name().to_string(), draft.sequence_number);
            let mut rows = self.rows.lock().unwrap();
            let existing_id = rows
                .get(&key)
                .and_then(|row| row["id"].as_str())
                .and_then(|s| s.parse::<Uuid>().ok());
            let id = existing_id.unwrap_or_else(Uuid::new_v4);

            let mut row = serde_json::to_value(draft).unwrap();
            row["id"] = json!(id);
            rows.insert(key, row);

            Ok(StoredLead {
                id,
                customer_name: draft.customer_name().to_string(),
                sequence_number: draft.sequence_number,
            })
        }
    }

    fn test_app(gateway: Arc<CannedGateway>, store: Arc<FakeStore>) -> Router {
        app(AppState { gateway, store })
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_analyze_returns_pricing_result() {
        let gateway = CannedGateway::new(r#"{"price":650,"message":"Hi Sarah,\n\nI'd love..."}"#);
        let app = test_app(gateway, Arc::new(FakeStore::default()));

        let (status, body) =
            post_json(app, "/analyze", json!({"textInput": "wedding in Manly"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], 650);
        assert_eq!(body["message"], "Hi Sarah,\n\nI'd love...");
    }

    #[tokio::test]
    async fn test_analyze_accepts_fenced_model_output() {
        let gateway = CannedGateway::new("```json\n{\"price\":300,\"message\":\"Hi,\"}\n```");
        let app = test_app(gateway, Arc::new(FakeStore::default()));

        let (status, body) =
            post_json(app, "/analyze", json!({"textInput": "kids party"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], 300);
    }

    #[tokio::test]
    async fn test_analyze_empty_body_is_400_without_upstream_call() {
        let gateway = CannedGateway::new("unused");
        let app = test_app(gateway.clone(), Arc::new(FakeStore::default()));

        let (status, body) = post_json(app, "/analyze", json!({})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analyze_invalid_base64_is_400_without_upstream_call() {
        let gateway = CannedGateway::new("unused");
        let app = test_app(gateway.clone(), Arc::new(FakeStore::default()));

        let (status, body) = post_json(
            app,
            "/analyze",
            json!({"image": "not-base64!!", "mimeType": "image/png"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analyze_prose_output_is_500_envelope() {
        let gateway = CannedGateway::new("Sure! The price is $300.");
        let app = test_app(gateway, Arc::new(FakeStore::default()));

        let (status, body) =
            post_json(app, "/analyze", json!({"textInput": "how much?"})).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_analyze_unknown_prompt_type_is_400() {
        let gateway = CannedGateway::new("unused");
        let app = test_app(gateway.clone(), Arc::new(FakeStore::default()));

        let (status, _) = post_json(
            app,
            "/analyze",
            json!({"textInput": "hi", "promptType": 42}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generate_lead_stores_each_extracted_lead() {
        let gateway = CannedGateway::new(
            r#"[{"customer_name":"Sarah","summary":"wedding"},{"customer_name":"Tom","summary":"corporate"}]"#,
        );
        let store = Arc::new(FakeStore::default());
        let app = test_app(gateway, store.clone());

        let (status, body) =
            post_json(app, "/generate-lead", json!({"textInput": "email dump"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["leads"].as_array().unwrap().len(), 2);
        assert_eq!(body["leads"][0]["status"], "stored");
        assert_eq!(body["leads"][1]["sequence_number"], 2);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_generate_lead_resubmission_overwrites_not_duplicates() {
        let gateway =
            CannedGateway::new(r#"[{"customer_name":"Sarah","summary":"second version"}]"#);
        let store = Arc::new(FakeStore::default());

        for _ in 0..2 {
            let app = test_app(gateway.clone(), store.clone());
            let (status, _) =
                post_json(app, "/generate-lead", json!({"textInput": "email dump"})).await;
            assert_eq!(status, StatusCode::OK);
        }

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        let row = rows.get(&("Sarah".to_string(), 1)).unwrap();
        assert_eq!(row["summary"], "second version");
    }

    #[tokio::test]
    async fn test_generate_lead_batch_continues_past_store_failure() {
        let gateway = CannedGateway::new(
            r#"[{"customer_name":"Ana"},{"customer_name":"Bad"},{"customer_name":"Cam"}]"#,
        );
        let store = Arc::new(FakeStore {
            fail_for: Some("Bad".to_string()),
            ..Default::default()
        });
        let app = test_app(gateway, store.clone());

        let (status, body) =
            post_json(app, "/generate-lead", json!({"textInput": "email dump"})).await;

        assert_eq!(status, StatusCode::OK);
        let leads = body["leads"].as_array().unwrap();
        assert_eq!(leads[0]["status"], "stored");
        assert_eq!(leads[1]["status"], "failed");
        assert!(leads[1]["error"].is_string());
        assert_eq!(leads[2]["status"], "stored");
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_multipart_image_upload_reaches_gateway() {
        let gateway = CannedGateway::new(r#"{"price":200,"message":"Hi,"}"#);
        let app = test_app(gateway.clone(), Arc::new(FakeStore::default()));

        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\ncontent-disposition: form-data; name=\"image\"; filename=\"inquiry.png\"\r\ncontent-type: image/png\r\n\r\nPNGBYTES\r\n--{b}--\r\n",
            b = boundary
        );

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/analyze")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(
            CannedGateway::new("unused"),
            Arc::new(FakeStore::default()),
        );
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
