//! Admin HTTP API against a live server on a free port.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use grant_discovery::auth::issue_token;
use grant_discovery::config::{Config, TriggerMode};
use grant_discovery::db;
use grant_discovery::discovery::Pipeline;
use grant_discovery::error::Result;
use grant_discovery::migrate;
use grant_discovery::models::{RawListing, SourceKind};
use grant_discovery::notify::LogNotifier;
use grant_discovery::server::run_server;
use grant_discovery::traits::{GrantSource, SourceRegistry};

const SECRET: &str = "test-admin-secret";

struct FixtureSource;

#[async_trait]
impl GrantSource for FixtureSource {
    fn name(&self) -> &str {
        "fixture"
    }

    fn description(&self) -> &str {
        "two fixed listings"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        Ok(vec![
            RawListing::text(
                "fixture",
                SourceKind::Api,
                "f-1",
                "Accessibility Ramp Grant",
                "Syracuse residents with disabilities may receive up to $8,000 for ramps.",
            ),
            RawListing::text(
                "fixture",
                SourceKind::Api,
                "f-2",
                "Furnace Replacement Program",
                "Onondaga County homeowners. Contact heat@example.org.",
            ),
        ])
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start_server(tmp: &TempDir, mode: TriggerMode) -> String {
    let port = find_free_port();
    let mut cfg = Config::minimal(tmp.path().join("grants.sqlite"));
    cfg.server.bind = format!("127.0.0.1:{}", port);
    cfg.server.admin_secret = Some(SECRET.to_string());
    cfg.discovery.trigger_mode = mode;

    let pool = db::connect(&cfg).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();

    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(FixtureSource));
    let pipeline = Pipeline::new(Arc::new(cfg), pool, registry, Arc::new(LogNotifier));

    tokio::spawn(async move {
        run_server(pipeline).await.ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

fn bearer() -> String {
    format!("Bearer {}", issue_token(SECRET, "alice").unwrap())
}

async fn run_sync(client: &reqwest::Client, base: &str) -> Value {
    let resp = client
        .post(format!("{}/api/discovery/run", base))
        .header("Authorization", bearer())
        .json(&json!({"send_notification": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

async fn first_grant_id(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .get(format!("{}/api/discovery/grants?status=pending&sort_by=name&sort_order=asc", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    body["items"][0]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_open_and_api_requires_token() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, TriggerMode::Sync).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let resp = client
        .get(format!("{}/api/discovery/stats", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let forged = format!("alice.{}", "0".repeat(64));
    let resp = client
        .get(format!("{}/api/discovery/stats", base))
        .header("Authorization", format!("Bearer {}", forged))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/api/discovery/stats", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total_runs"], 0);
}

#[tokio::test]
async fn test_run_then_approve_flow() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, TriggerMode::Sync).await;
    let client = reqwest::Client::new();

    let run = run_sync(&client, &base).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["grants_discovered"], 2);

    let resp = client
        .get(format!("{}/api/discovery/runs/{}", base, run["id"].as_str().unwrap()))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let id = first_grant_id(&client, &base).await;
    let approve_url = format!("{}/api/discovery/grants/{}/approve", base, id);
    let resp = client
        .post(&approve_url)
        .header("Authorization", bearer())
        .json(&json!({"priority_rank": 70}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["program"]["program_key"], "accessibility_ramp_grant");

    let resp = client
        .get(format!("{}/api/discovery/grants/{}", base, id))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    let grant: Value = resp.json().await.unwrap();
    assert_eq!(grant["review_status"], "approved");
    assert_eq!(grant["reviewed_by"], "alice");

    let resp = client
        .post(&approve_url)
        .header("Authorization", bearer())
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_state");
}

#[tokio::test]
async fn test_reject_and_mark_duplicate_errors() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, TriggerMode::Sync).await;
    let client = reqwest::Client::new();
    run_sync(&client, &base).await;
    let id = first_grant_id(&client, &base).await;

    let reject_url = format!("{}/api/discovery/grants/{}/reject", base, id);
    let resp = client
        .post(&reject_url)
        .header("Authorization", bearer())
        .json(&json!({"reason": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation_error");

    let resp = client
        .post(format!("{}/api/discovery/grants/{}/mark-duplicate", base, id))
        .header("Authorization", bearer())
        .json(&json!({"program_key": "nothing_here"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(&reject_url)
        .header("Authorization", bearer())
        .json(&json!({"reason": "Outside Syracuse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["review_status"], "rejected");

    let resp = client
        .get(format!("{}/api/discovery/grants/does-not-exist", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_grant_listing_filters() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, TriggerMode::Sync).await;
    let client = reqwest::Client::new();
    run_sync(&client, &base).await;

    let resp = client
        .get(format!("{}/api/discovery/grants?search=furnace", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["name"], "Furnace Replacement Program");

    let resp = client
        .get(format!("{}/api/discovery/grants?limit=500", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{}/api/discovery/grants?sort_by=agency", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_background_run_and_unknown_source() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, TriggerMode::Background).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/discovery/run", base))
        .header("Authorization", bearer())
        .json(&json!({"sources": ["rss:missing"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/discovery/run", base))
        .header("Authorization", bearer())
        .json(&json!({"sources": ["api"], "send_notification": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let run: Value = resp.json().await.unwrap();
    assert_eq!(run["status"], "running");
    let run_url = format!("{}/api/discovery/runs/{}", base, run["id"].as_str().unwrap());

    let mut status = String::new();
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let body: Value = client
            .get(&run_url)
            .header("Authorization", bearer())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = body["status"].as_str().unwrap().to_string();
        if status != "running" {
            break;
        }
    }
    assert_eq!(status, "completed");

    let resp = client
        .get(format!("{}/api/discovery/runs?status=completed", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 1);
}
