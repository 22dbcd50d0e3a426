//! End-to-end scenarios against in-process test servers
//!
//! Each test spins up a small axum service with deliberately planted
//! behavior (or bugs), loads a matching grammar, runs the full driver, and
//! asserts on monitors, bug buckets, and coverage output.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;

use fuzzforge_engine::{
    generate_sequences, EngineSettings, FuzzingContext, FuzzingSummary,
};
use fuzzforge_grammar::{CandidateValuesPool, GrammarFile, MutationsDictionary};
use fuzzforge_transport::{StaticTokenProvider, TokenCache};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn settings_for(addr: SocketAddr, output_dir: &std::path::Path) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.connection.target_ip = addr.ip().to_string();
    settings.connection.target_port = addr.port();
    settings.connection.use_ssl = false;
    settings.connection.request_timeout_secs = 5;
    settings.trace_database = false;
    settings.output_dir = output_dir.to_path_buf();
    settings
}

fn disable_checker(settings: &mut EngineSettings, name: &str) {
    settings.checkers.entry(name.to_string()).or_default().enabled = Some(false);
}

fn enable_checker(settings: &mut EngineSettings, name: &str) {
    settings.checkers.entry(name.to_string()).or_default().enabled = Some(true);
}

fn grammar(requests: serde_json::Value) -> fuzzforge_grammar::RequestCollection {
    let file: GrammarFile =
        serde_json::from_value(json!({ "requests": requests })).expect("grammar json");
    file.into_collection().expect("collection")
}

fn empty_pool() -> CandidateValuesPool {
    CandidateValuesPool::from_dictionary(&MutationsDictionary::default())
}

async fn run(ctx: &FuzzingContext) -> FuzzingSummary {
    generate_sequences(ctx).await.expect("fuzzing run")
}

fn static_block(value: &str) -> serde_json::Value {
    json!({ "kind": "static_string", "value": value })
}

fn reader_block(variable: &str) -> serde_json::Value {
    json!({ "kind": "dynamic_reader", "variable": variable })
}

/// S1: a producer/consumer pair reaches a fully-valid length-2 sequence.
#[tokio::test]
async fn test_simple_producer_consumer() {
    let app = Router::new()
        .route("/A/A", put(|| async { Json(json!({"name": "X"})) }))
        .route(
            "/A/{name}",
            get(|Path(name): Path<String>| async move {
                if name == "X" {
                    StatusCode::OK
                } else {
                    StatusCode::NOT_FOUND
                }
            }),
        );
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.max_sequence_length = 2;

    let collection = grammar(json!([
        {
            "request_id": "/A/A",
            "method": "PUT",
            "endpoint": "/A/A",
            "blocks": [
                static_block("PUT /A/A HTTP/1.1\r\nHost: localhost\r\nAccept: application/json\r\n\r\n")
            ],
            "response_parser": { "variables": [ { "variable": "_post_a", "path": "name" } ] }
        },
        {
            "request_id": "/A/{A}",
            "method": "GET",
            "endpoint": "/A/{A}",
            "blocks": [
                static_block("GET /A/"),
                reader_block("_post_a"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        }
    ]));

    let get_hex = collection
        .iter()
        .find(|r| r.method() == "GET")
        .expect("get request")
        .hex_definition()
        .to_string();

    let ctx = FuzzingContext::without_sinks(collection, empty_pool(), settings, TokenCache::disabled())
        .expect("context");
    let summary = run(&ctx).await;

    assert_eq!(summary.generations, 2);
    assert!(summary.total_sequences >= 2);

    let state = ctx.state.lock();
    // Both the producer and the dependent consumer reached full validity.
    let query = state.monitor.status_codes.query_response_codes(&get_hex, &["200"], &["999"]);
    assert!(query.valid_code);
    assert!(query.fully_valid);
    assert!(!query.sequence_failure);

    let speccov = state.speccov.entry("GET", "/A/{A}").expect("speccov entry");
    assert!(speccov.valid >= 1);
    let put_cov = state.speccov.entry("PUT", "/A/A").expect("speccov entry");
    assert!(put_cov.valid >= 1);
}

/// S2: a GET that succeeds after DELETE is filed by the use-after-free
/// checker and reproduces.
#[tokio::test]
async fn test_use_after_free_bug() {
    let counter = Arc::new(AtomicU64::new(0));
    let app = Router::new()
        .route(
            "/r",
            put({
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    async move {
                        let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(json!({"id": id.to_string()}))
                    }
                }
            }),
        )
        .route("/r/{id}", delete(|| async { StatusCode::NO_CONTENT }))
        // The planted bug: reads succeed even after the delete.
        .route(
            "/r/{id}",
            get(|Path(id): Path<String>| async move { Json(json!({"id": id})) }),
        );
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.max_sequence_length = 2;
    disable_checker(&mut settings, "invaliddynamicobject");

    let collection = grammar(json!([
        {
            "request_id": "/r",
            "method": "PUT",
            "endpoint": "/r",
            "blocks": [
                static_block("PUT /r HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ],
            "response_parser": { "variables": [ { "variable": "_r_id", "path": "id" } ] }
        },
        {
            "request_id": "/r/{id}",
            "method": "DELETE",
            "endpoint": "/r/{id}",
            "blocks": [
                static_block("DELETE /r/"),
                reader_block("_r_id"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        },
        {
            "request_id": "/r/{id}",
            "method": "GET",
            "endpoint": "/r/{id}",
            "blocks": [
                static_block("GET /r/"),
                reader_block("_r_id"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        }
    ]));

    let ctx = FuzzingContext::without_sinks(collection, empty_pool(), settings, TokenCache::disabled())
        .expect("context");
    let summary = run(&ctx).await;

    assert_eq!(summary.bug_buckets.get("useafterfree_20x"), Some(&1));

    let state = ctx.state.lock();
    let (_, entries) = state
        .bug_buckets
        .iter()
        .find(|(class, _)| *class == "useafterfree_20x")
        .expect("bucket class");
    assert!(entries[0].reproducible);
    assert_eq!(entries[0].status_code, "200");
}

/// S3: a child id swapped under a different parent still resolves; the
/// resource hierarchy checker files it.
#[tokio::test]
async fn test_resource_hierarchy_bug() {
    let parents = Arc::new(AtomicU64::new(0));
    let children = Arc::new(AtomicU64::new(0));
    let known_children: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let app = Router::new()
        .route(
            "/P",
            post({
                let parents = parents.clone();
                move || {
                    let parents = parents.clone();
                    async move {
                        let id = parents.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(json!({"id": format!("p{id}")}))
                    }
                }
            }),
        )
        .route(
            "/P/{pid}/C",
            post({
                let children = children.clone();
                let known = known_children.clone();
                move |Path(_pid): Path<String>| {
                    let children = children.clone();
                    let known = known.clone();
                    async move {
                        let id = children.fetch_add(1, Ordering::SeqCst) + 1;
                        let cid = format!("c{id}");
                        known.lock().expect("lock").insert(cid.clone());
                        Json(json!({"id": cid}))
                    }
                }
            }),
        )
        // The planted bug: the parent path segment is never checked.
        .route(
            "/P/{pid}/C/{cid}",
            get({
                let known = known_children.clone();
                move |Path((_pid, cid)): Path<(String, String)>| {
                    let known = known.clone();
                    async move {
                        if known.lock().expect("lock").contains(&cid) {
                            StatusCode::OK
                        } else {
                            StatusCode::NOT_FOUND
                        }
                    }
                }
            }),
        );
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.max_sequence_length = 3;
    disable_checker(&mut settings, "invaliddynamicobject");

    let collection = grammar(json!([
        {
            "request_id": "/P",
            "method": "POST",
            "endpoint": "/P",
            "blocks": [
                static_block("POST /P HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ],
            "response_parser": { "variables": [ { "variable": "_p_id", "path": "id" } ] }
        },
        {
            "request_id": "/P/{pid}/C",
            "method": "POST",
            "endpoint": "/P/{pid}/C",
            "blocks": [
                static_block("POST /P/"),
                reader_block("_p_id"),
                static_block("/C HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ],
            "response_parser": { "variables": [ { "variable": "_c_id", "path": "id" } ] }
        },
        {
            "request_id": "/P/{pid}/C/{cid}",
            "method": "GET",
            "endpoint": "/P/{pid}/C/{cid}",
            "blocks": [
                static_block("GET /P/"),
                reader_block("_p_id"),
                static_block("/C/"),
                reader_block("_c_id"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        }
    ]));

    let ctx = FuzzingContext::without_sinks(collection, empty_pool(), settings, TokenCache::disabled())
        .expect("context");
    let summary = run(&ctx).await;

    assert!(summary.bug_buckets.contains_key("resourcehierarchy_20x"));
}

/// S4: dropping a required body member provokes a 500; the payload body
/// checker buckets it by the structural divergence.
#[tokio::test]
async fn test_payload_body_missing_field() {
    let app = Router::new().route(
        "/obj",
        post(|body: String| async move {
            match serde_json::from_str::<serde_json::Value>(&body) {
                Err(_) => StatusCode::BAD_REQUEST.into_response(),
                Ok(v) if v.get("id").is_none() => {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
                Ok(_) => Json(json!({"ok": true})).into_response(),
            }
        }),
    );
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.max_sequence_length = 1;
    enable_checker(&mut settings, "payloadbody");

    let collection = grammar(json!([
        {
            "request_id": "/obj",
            "method": "POST",
            "endpoint": "/obj",
            "blocks": [
                static_block("POST /obj HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\r\n"),
                static_block("{\"id\": "),
                { "kind": "fuzzable_int", "default": "1" },
                static_block(", \"name\": "),
                { "kind": "fuzzable_string", "default": "fuzzstring", "quoted": true },
                static_block("}")
            ],
            "body_schema": {
                "type": "object",
                "required": ["id", "name"],
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string" }
                }
            }
        }
    ]));

    let ctx = FuzzingContext::without_sinks(collection, empty_pool(), settings, TokenCache::disabled())
        .expect("context");
    let summary = run(&ctx).await;

    assert_eq!(summary.bug_buckets.get("payloadbody_500"), Some(&1));
}

/// S5: an object created under one identity is readable under the other;
/// the namespace checker files it without attempting reproduction.
#[tokio::test]
async fn test_namespace_violation() {
    let counter = Arc::new(AtomicU64::new(0));
    let app = Router::new()
        .route(
            "/obj",
            post({
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    async move {
                        let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(json!({"id": format!("o{id}")}))
                    }
                }
            }),
        )
        // The planted bug: no tenant check on reads.
        .route(
            "/obj/{id}",
            get(|Path(id): Path<String>| async move { Json(json!({"id": id})) }),
        );
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.max_sequence_length = 2;
    enable_checker(&mut settings, "namespace");
    disable_checker(&mut settings, "invaliddynamicobject");

    let collection = grammar(json!([
        {
            "request_id": "/obj",
            "method": "POST",
            "endpoint": "/obj",
            "blocks": [
                static_block("POST /obj HTTP/1.1\r\nHost: localhost\r\n"),
                { "kind": "refreshable_auth", "tag": "token" },
                static_block("\r\n")
            ],
            "response_parser": { "variables": [ { "variable": "_obj_id", "path": "id" } ] }
        },
        {
            "request_id": "/obj/{id}",
            "method": "GET",
            "endpoint": "/obj/{id}",
            "blocks": [
                static_block("GET /obj/"),
                reader_block("_obj_id"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n"),
                { "kind": "refreshable_auth", "tag": "token" },
                static_block("\r\n")
            ]
        }
    ]));

    let provider = Arc::new(StaticTokenProvider::new(
        "Authorization: token-A\r\n".to_string(),
        Some("Authorization: token-B\r\n".to_string()),
    ));
    let auth = TokenCache::new(Some(provider), std::time::Duration::from_secs(300));

    let ctx =
        FuzzingContext::without_sinks(collection, empty_pool(), settings, auth).expect("context");
    let summary = run(&ctx).await;

    assert!(summary.bug_buckets.contains_key("namespace_20x"));
    let state = ctx.state.lock();
    let (_, entries) = state
        .bug_buckets
        .iter()
        .find(|(class, _)| *class == "namespace_20x")
        .expect("bucket class");
    assert!(!entries[0].reproducible);
}

/// S6: a response slower than the per-request timeout records the 599
/// pseudo-code and files a timeout bucket; the run completes normally.
#[tokio::test]
async fn test_request_timeout_becomes_bug() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            StatusCode::OK
        }),
    );
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.connection.request_timeout_secs = 1;
    settings.max_sequence_length = 1;
    settings.reproduce_bugs = false;

    let collection = grammar(json!([
        {
            "request_id": "/slow",
            "method": "GET",
            "endpoint": "/slow",
            "blocks": [
                static_block("GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        }
    ]));

    let ctx = FuzzingContext::without_sinks(collection, empty_pool(), settings, TokenCache::disabled())
        .expect("context");
    let summary = run(&ctx).await;

    assert_eq!(summary.total_sequences, 1);
    assert_eq!(summary.bug_buckets.get("main_driver_timeout"), Some(&1));
}

/// The garbage collector keeps the live object count of each type at or
/// under the configured cap.
#[tokio::test]
async fn test_gc_caps_live_objects() {
    let counter = Arc::new(AtomicU64::new(0));
    let app = Router::new()
        .route(
            "/A/A",
            put({
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    async move {
                        let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(json!({"name": format!("X{id}")}))
                    }
                }
            }),
        )
        .route("/A/{name}", get(|| async { StatusCode::OK }))
        .route("/A/{name}", delete(|| async { StatusCode::NO_CONTENT }));
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.max_sequence_length = 3;
    settings.garbage_collection.max_objects_per_type = 2;
    for checker in ["leakage", "resourcehierarchy", "useafterfree", "invaliddynamicobject"] {
        disable_checker(&mut settings, checker);
    }

    let collection = grammar(json!([
        {
            "request_id": "/A/A",
            "method": "PUT",
            "endpoint": "/A/A",
            "blocks": [
                static_block("PUT /A/A HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ],
            "response_parser": { "variables": [ { "variable": "_post_a", "path": "name" } ] }
        },
        {
            "request_id": "/A/{A}",
            "method": "GET",
            "endpoint": "/A/{A}",
            "blocks": [
                static_block("GET /A/"),
                reader_block("_post_a"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        },
        {
            "request_id": "/A/{A}",
            "method": "DELETE",
            "endpoint": "/A/{A}",
            "blocks": [
                static_block("DELETE /A/"),
                reader_block("_post_a"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        }
    ]));

    let ctx = FuzzingContext::without_sinks(collection, empty_pool(), settings, TokenCache::disabled())
        .expect("context");
    let summary = run(&ctx).await;

    let state = ctx.state.lock();
    assert!(state.dependencies.live_count("_post_a") <= 2);
    assert!(summary.requests_sent.get("gc").copied().unwrap_or(0) > 0);
}

/// Two workers split a generation and the run still converges.
#[tokio::test]
async fn test_multi_worker_run_completes() {
    let app = Router::new()
        .route("/A/A", put(|| async { Json(json!({"name": "X"})) }))
        .route("/A/{name}", get(|| async { StatusCode::OK }));
    let addr = serve(app).await;
    let dir = tempfile::tempdir().expect("tempdir");

    let mut settings = settings_for(addr, dir.path());
    settings.max_sequence_length = 2;
    settings.fuzzing_jobs = 2;

    let collection = grammar(json!([
        {
            "request_id": "/A/A",
            "method": "PUT",
            "endpoint": "/A/A",
            "blocks": [
                static_block("PUT /A/A HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ],
            "response_parser": { "variables": [ { "variable": "_post_a", "path": "name" } ] }
        },
        {
            "request_id": "/A/{A}",
            "method": "GET",
            "endpoint": "/A/{A}",
            "blocks": [
                static_block("GET /A/"),
                reader_block("_post_a"),
                static_block(" HTTP/1.1\r\nHost: localhost\r\n\r\n")
            ]
        }
    ]));

    let ctx = FuzzingContext::without_sinks(collection, empty_pool(), settings, TokenCache::disabled())
        .expect("context");
    let summary = run(&ctx).await;

    assert_eq!(summary.generations, 2);
    assert!(summary.requests_sent["main_driver"] > 0);
}
