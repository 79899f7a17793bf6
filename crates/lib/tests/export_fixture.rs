//! Integration test: run the export through the real HTTP client against a fixture API
//! served by axum on a free local port. Output goes to a temp directory.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use opsync::api::OpenPhoneClient;
use opsync::config::Config;
use opsync::export::{run_export, ExportOptions};
use opsync::fetch::RetryPolicy;
use opsync::ledger::read_ledger;
use opsync::sink::FileSink;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Fixture {
    /// Fail PN2's message listing with 500.
    fail_pn2_messages: bool,
    users_requests: Arc<AtomicUsize>,
    pn2_message_requests: Arc<AtomicUsize>,
}

fn param<'q>(query: &'q [(String, String)], key: &str) -> Option<&'q str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn page(items: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "data": items, "nextPageToken": null })))
}

/// One user page of two (only the first should be requested with --max-count 1), two phone
/// numbers, PN1 with a conversation of three messages and a transcribed call, PN2 with a
/// conversation whose messages can be made to fail.
async fn api(
    State(fx): State<Fixture>,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
) -> (StatusCode, Json<Value>) {
    let pn = param(&query, "phoneNumberId");
    let participant = param(&query, "participants");
    match path.trim_start_matches('/') {
        "users" => {
            fx.users_requests.fetch_add(1, Ordering::SeqCst);
            if param(&query, "pageToken").is_some() {
                return page(json!([{ "id": "US2" }]));
            }
            (
                StatusCode::OK,
                Json(json!({
                    "data": [{ "id": "US1", "firstName": "Ada", "lastName": "Lovelace" }],
                    "nextPageToken": "users-2"
                })),
            )
        }
        "phone-numbers" if param(&query, "userId") == Some("US1") => page(json!([
            { "id": "PN1", "number": "+15550001", "userIds": ["US1"] },
            { "id": "PN2", "number": "+15550002", "userIds": ["US1"] }
        ])),
        "conversations" if pn == Some("PN1") => {
            page(json!([{ "id": "CN1", "participants": ["+15551111"] }]))
        }
        "conversations" if pn == Some("PN2") => {
            page(json!([{ "id": "CN2", "participants": ["+15552222"] }]))
        }
        "messages" if pn == Some("PN1") && participant == Some("+15551111") => page(json!([
            { "id": "MS1", "text": "one" },
            { "id": "MS2", "text": "two" },
            { "id": "MS3", "text": "three" }
        ])),
        "messages" if pn == Some("PN2") => {
            fx.pn2_message_requests.fetch_add(1, Ordering::SeqCst);
            if fx.fail_pn2_messages {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "internal error" })),
                )
            } else {
                page(json!([{ "id": "MS9", "text": "hi" }]))
            }
        }
        "calls" if pn == Some("PN1") && participant == Some("+15551111") => {
            page(json!([{ "id": "AC1", "status": "completed" }]))
        }
        "calls" => page(json!([])),
        "call-transcripts/AC1" => (
            StatusCode::OK,
            Json(json!({ "data": {
                "callId": "AC1",
                "status": "completed",
                "dialogue": [{ "content": "hello", "identifier": "+15551111" }]
            }})),
        ),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "message": "not found" }))),
    }
}

async fn start_fixture(fx: Fixture) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture");
    let port = listener.local_addr().expect("local_addr").port();
    let app = Router::new()
        .route("/v1/*path", get(api))
        .with_state(fx);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://127.0.0.1:{}/v1", port)
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("opsync-export-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn client(base_url: String) -> OpenPhoneClient {
    let mut config = Config::default();
    config.api.base_url = base_url;
    config.api.requests_per_second = 0.0;
    config.api.timeout_secs = 5;
    OpenPhoneClient::new(&config.api, "test-key").expect("client")
}

fn read_json(path: &std::path::Path) -> Value {
    let s = std::fs::read_to_string(path).expect("read output");
    serde_json::from_str(&s).expect("parse output")
}

#[tokio::test]
async fn export_records_exhausted_message_fetch_and_keeps_the_rest() {
    let fx = Fixture {
        fail_pn2_messages: true,
        ..Default::default()
    };
    let base_url = start_fixture(fx.clone()).await;
    let dir = temp_dir();
    let options = ExportOptions {
        max_count: Some(1),
        output: dir.join("consolidated_phone_data.json"),
        failed_output: dir.join("failed_items.json"),
    };

    let summary = run_export(
        &client(base_url),
        &RetryPolicy::immediate(3),
        &options,
        &mut FileSink,
    )
    .await
    .expect("export runs");

    assert_eq!(summary.users, 1);
    assert_eq!(summary.failures, 1);
    assert_eq!(fx.users_requests.load(Ordering::SeqCst), 1);
    assert_eq!(fx.pn2_message_requests.load(Ordering::SeqCst), 4);

    let doc = read_json(&options.output);
    assert_eq!(doc["totalUsers"], 1);
    assert_eq!(doc["totalPhoneNumbers"], 2);
    assert_eq!(doc["totalConversations"], 2);
    assert_eq!(doc["totalMessages"], 3);
    assert_eq!(doc["totalCalls"], 1);
    assert_eq!(doc["totalTranscripts"], 1);

    let user = &doc["users"][0];
    assert_eq!(user["id"], "US1");
    let pn1 = &user["children"][0];
    assert_eq!(pn1["id"], "PN1");
    assert_eq!(pn1["children"][0]["children"].as_array().map(Vec::len), Some(3));
    assert_eq!(pn1["children"][1]["kind"], "call");
    assert_eq!(pn1["children"][1]["children"][0]["kind"], "transcript");
    let pn2 = &user["children"][1];
    assert_eq!(pn2["children"][0]["id"], "CN2");
    assert!(pn2["children"][0].get("children").is_none());

    let ledger = read_ledger(&options.failed_output).expect("ledger written");
    assert_eq!(ledger.total_failed, 1);
    let failure = &ledger.failures[0];
    assert_eq!(failure.task.kind, opsync::fetch::FetchKind::Messages);
    assert_eq!(failure.task.params.phone_number_id.as_deref(), Some("PN2"));
    assert_eq!(failure.task.params.conversation_id.as_deref(), Some("CN2"));
    assert_eq!(failure.attempts, 4);
    assert!(!failure.permanent);
    assert!(failure.error.contains("500"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn clean_export_writes_no_ledger() {
    let fx = Fixture::default();
    let base_url = start_fixture(fx.clone()).await;
    let dir = temp_dir();
    let options = ExportOptions {
        max_count: Some(1),
        output: dir.join("out").join("consolidated_phone_data.json"),
        failed_output: dir.join("failed_items.json"),
    };

    let summary = run_export(
        &client(base_url),
        &RetryPolicy::immediate(3),
        &options,
        &mut FileSink,
    )
    .await
    .expect("export runs");

    assert_eq!(summary.failures, 0);
    assert!(!summary.ledger_written);
    assert!(!options.failed_output.exists());
    let doc = read_json(&options.output);
    assert_eq!(doc["totalUsers"], 1);
    assert_eq!(doc["totalMessages"], 4);
    assert_eq!(fx.pn2_message_requests.load(Ordering::SeqCst), 1);

    let _ = std::fs::remove_dir_all(&dir);
}
