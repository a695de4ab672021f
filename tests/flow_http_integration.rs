//! Integration tests for the flow REST API.
//!
//! Each test spins up an Axum server on a random port backed by stub
//! collaborators and drives the real HTTP contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use convo_flow::collab::{KeywordEvaluator, UtteranceGenerator};
use convo_flow::config::SessionConfig;
use convo_flow::error::GenerationError;
use convo_flow::flow::FlowRegistry;
use convo_flow::routes::flow_routes;
use convo_flow::session::{SessionManager, TranscriptEntry};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub generator that answers by echoing the stage's first words.
struct StubGenerator;

#[async_trait]
impl UtteranceGenerator for StubGenerator {
    async fn generate(
        &self,
        system_instruction: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<String, GenerationError> {
        let last = transcript.last().map(|e| e.text.as_str()).unwrap_or("");
        let opening: String = system_instruction
            .split_whitespace()
            .take(3)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(format!("[{opening}] you said: {last}"))
    }
}

fn keyword_rules() -> KeywordEvaluator {
    KeywordEvaluator::new()
        .with_criterion("problem_understanding", &["error"])
        .with_criterion("severity_assessment", &["urgent", "minor"])
        .with_route("urgent", "escalation")
}

/// Start an Axum server on a random port, return the base URL.
async fn start_server() -> String {
    let registry = Arc::new(FlowRegistry::with_defaults().unwrap());
    let manager = Arc::new(SessionManager::new(
        registry,
        Arc::new(StubGenerator),
        Arc::new(keyword_rules()),
        SessionConfig::default(),
    ));
    let app = flow_routes(manager);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

async fn create_session(client: &reqwest::Client, base: &str, flow_id: &str) -> String {
    let resp = client
        .post(format!("{base}/api/flows/{flow_id}/sessions"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    body["session_id"].as_str().unwrap().to_string()
}

async fn send(
    client: &reqwest::Client,
    base: &str,
    id: &str,
    message: &str,
) -> (StatusCode, Value) {
    let resp = client
        .post(format!("{base}/api/sessions/{id}/messages"))
        .json(&json!({ "message": message }))
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

// ── Flows ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_and_flow_listing() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let flows: Value = client
            .get(format!("{base}/api/flows"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let ids: Vec<&str> = flows
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["flow_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["customer_support", "job_interview"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_flow_is_404() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/flows/tax_audit/sessions"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("tax_audit"));
    })
    .await
    .expect("test timed out");
}

// ── Sessions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn support_conversation_escalates_and_completes() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let id = create_session(&client, &base, "customer_support").await;

        let status: Value = client
            .get(format!("{base}/api/sessions/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["stage_id"], "greeting");
        assert_eq!(status["status"], "active");

        // Greeting has no criteria: one exchange moves on
        let (code, reply) = send(&client, &base, &id, "hi there").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(reply["stage_id"], "problem_identification");
        assert_eq!(reply["transition"]["kind"], "criteria");

        // Only one criterion met: stay
        let (_, reply) = send(&client, &base, &id, "I see an error on login").await;
        assert_eq!(reply["stage_id"], "problem_identification");
        assert!(reply.get("transition").is_none());

        // Both met, routed to escalation rather than the first candidate
        let (_, reply) = send(&client, &base, &id, "and it is urgent").await;
        assert_eq!(reply["stage_id"], "escalation");
        assert_eq!(reply["stage_name"], "Escalation");

        let (_, reply) = send(&client, &base, &id, "ok").await;
        assert_eq!(reply["stage_id"], "closing");

        let (_, reply) = send(&client, &base, &id, "thanks").await;
        assert_eq!(reply["status"], "completed");
        assert_eq!(reply["completion"], "criteria_met");
        assert!(reply["utterance"].as_str().unwrap().ends_with("you said: thanks"));

        // Completed sessions reject further turns
        let (code, body) = send(&client, &base, &id, "hello?").await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        let transcript: Value = client
            .get(format!("{base}/api/sessions/{id}/transcript"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let entries = transcript.as_array().unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0]["role"], "user");
        assert_eq!(entries[0]["stage_id"], "greeting");
        assert_eq!(entries[9]["stage_id"], "closing");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn terminate_then_reject() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let id = create_session(&client, &base, "job_interview").await;

        let resp = client
            .post(format!("{base}/api/sessions/{id}/terminate"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "terminated");

        let resp = client
            .post(format!("{base}/api/sessions/{id}/terminate"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let (code, _) = send(&client, &base, &id, "can we continue?").await;
        assert_eq!(code, StatusCode::CONFLICT);

        let sessions: Value = client
            .get(format!("{base}/api/sessions"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sessions.as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bad_session_ids_and_messages() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{base}/api/sessions/not-a-uuid"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let missing = uuid::Uuid::new_v4();
        let resp = client
            .get(format!("{base}/api/sessions/{missing}/transcript"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let id = create_session(&client, &base, "customer_support").await;
        let (code, _) = send(&client, &base, &id, "   ").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    })
    .await
    .expect("test timed out");
}
