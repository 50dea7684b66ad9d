//! Embedding and captcha clients against local stand-ins for the providers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Form, Json, Router};
use chuef_api::captcha::{CaptchaVerifier, RecaptchaVerifier};
use chuef_api::config::{CaptchaConfig, EmbeddingConfig};
use chuef_api::embedding::{Embedder, EmbeddingError, OpenAiEmbedder};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

/// Answers `/v1/embeddings` with `dims`-long vectors, listed in reverse
/// index order.
async fn embeddings_provider(dims: usize) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route(
            "/v1/embeddings",
            post(
                move |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().push((auth, body.clone()));

                    let count = match &body["input"] {
                        Value::Array(items) => items.len(),
                        _ => 1,
                    };
                    let data: Vec<Value> = (0..count)
                        .rev()
                        .map(|i| {
                            #[allow(clippy::cast_precision_loss, reason = "small test indices")]
                            let value = i as f32;
                            json!({"index": i, "embedding": vec![value; dims]})
                        })
                        .collect();
                    Json(json!({
                        "data": data,
                        "model": "text-embedding-3-small",
                        "usage": {"prompt_tokens": 10, "total_tokens": 10},
                    }))
                },
            ),
        )
        .with_state(Arc::clone(&seen));
    (serve(app).await, seen)
}

fn embedding_config(base_url: &str, dims: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        api_key: Some("sk-test".to_string()),
        base_url: base_url.to_string(),
        dimensions: dims,
        ..EmbeddingConfig::default()
    }
}

#[tokio::test]
async fn test_embed_sends_trimmed_text_with_bearer_key() {
    let (url, seen) = embeddings_provider(4).await;
    let embedder = OpenAiEmbedder::new(&embedding_config(&url, 4)).unwrap();

    let embedding = embedder.embed("  hello  ").await.unwrap();
    assert_eq!(embedding.vector.len(), 4);
    assert_eq!(embedding.model, "text-embedding-3-small");
    assert_eq!(embedding.usage.total_tokens, 10);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-test"));
    assert_eq!(seen[0].1["input"], "hello");
    assert_eq!(seen[0].1["model"], "text-embedding-3-small");
}

#[tokio::test]
async fn test_embed_batch_orders_by_index_and_splits_usage() {
    let (url, seen) = embeddings_provider(3).await;
    let embedder = OpenAiEmbedder::new(&embedding_config(&url, 3)).unwrap();

    let texts = vec!["a".to_string(), "   ".to_string(), "b".to_string()];
    let embeddings = embedder.embed_batch(&texts).await.unwrap();
    assert_eq!(embeddings.len(), 2);
    assert_eq!(embeddings[0].vector, vec![0.0; 3]);
    assert_eq!(embeddings[1].vector, vec![1.0; 3]);
    assert_eq!(embeddings[0].usage.total_tokens, 5);

    assert_eq!(seen.lock()[0].1["input"], json!(["a", "b"]));
}

#[tokio::test]
async fn test_embed_rejects_wrong_dimension() {
    let (url, _seen) = embeddings_provider(4).await;
    let embedder = OpenAiEmbedder::new(&embedding_config(&url, 1536)).unwrap();

    let err = embedder.embed("hello").await.unwrap_err();
    assert!(matches!(
        err,
        EmbeddingError::DimensionMismatch {
            expected: 1536,
            actual: 4
        }
    ));
}

#[tokio::test]
async fn test_embed_surfaces_api_errors() {
    let app = Router::new().route(
        "/v1/embeddings",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota exceeded") }),
    );
    let url = serve(app).await;
    let embedder = OpenAiEmbedder::new(&embedding_config(&url, 4)).unwrap();

    match embedder.embed("hello").await.unwrap_err() {
        EmbeddingError::Api { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "quota exceeded");
        }
        other => panic!("unexpected error: {other}"),
    }
}

type Forms = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// A `siteverify` stand-in that answers every call with `reply`.
async fn captcha_provider(status: StatusCode, reply: Value) -> (String, Forms) {
    let forms: Forms = Arc::default();
    let app = Router::new()
        .route(
            "/siteverify",
            post(
                move |State(forms): State<Forms>, Form(form): Form<HashMap<String, String>>| {
                    let reply = reply.clone();
                    async move {
                        forms.lock().push(form);
                        (status, Json(reply))
                    }
                },
            ),
        )
        .with_state(Arc::clone(&forms));
    (format!("{}/siteverify", serve(app).await), forms)
}

fn captcha_config(verify_url: &str) -> CaptchaConfig {
    CaptchaConfig {
        secret_key: Some("captcha-secret".to_string()),
        verify_url: verify_url.to_string(),
        ..CaptchaConfig::default()
    }
}

#[tokio::test]
async fn test_captcha_accepts_good_score() {
    let (url, forms) =
        captcha_provider(StatusCode::OK, json!({"success": true, "score": 0.9})).await;
    let verifier = RecaptchaVerifier::new(&captcha_config(&url)).unwrap();

    let verdict = verifier.verify("token-1", Some("203.0.113.7")).await;
    assert!(verdict.ok);
    assert_eq!(verdict.score, Some(0.9));

    let forms = forms.lock();
    assert_eq!(forms[0]["secret"], "captcha-secret");
    assert_eq!(forms[0]["response"], "token-1");
    assert_eq!(forms[0]["remoteip"], "203.0.113.7");
}

#[tokio::test]
async fn test_captcha_rejections() {
    let cases = [
        (
            StatusCode::OK,
            json!({"success": true, "score": 0.1}),
            "Suspicious activity detected",
        ),
        (
            StatusCode::OK,
            json!({"success": false, "error-codes": ["invalid-input-response"]}),
            "Captcha verification failed",
        ),
        (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({}),
            "Captcha verification service unavailable",
        ),
    ];

    for (status, reply, reason) in cases {
        let (url, _forms) = captcha_provider(status, reply).await;
        let verifier = RecaptchaVerifier::new(&captcha_config(&url)).unwrap();
        let verdict = verifier.verify("token", None).await;
        assert!(!verdict.ok);
        assert_eq!(verdict.reason.as_deref(), Some(reason));
    }
}

#[tokio::test]
async fn test_captcha_without_score_is_accepted() {
    let (url, forms) = captcha_provider(StatusCode::OK, json!({"success": true})).await;
    let verifier = RecaptchaVerifier::new(&captcha_config(&url)).unwrap();

    let verdict = verifier.verify("token", None).await;
    assert!(verdict.ok);
    assert_eq!(verdict.score, None);
    assert!(!forms.lock()[0].contains_key("remoteip"));
}
