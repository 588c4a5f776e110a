//! End-to-end flows through the IPC surface against a real (in-memory)
//! database and a mock HTTP endpoint.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast::Receiver;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use uptime_watcher::app::App;
use uptime_watcher::config::CoreConfig;
use uptime_watcher::ipc::BroadcastMessage;

async fn test_app() -> App {
    App::init_in_memory(CoreConfig::default()).await.unwrap()
}

fn http_site_payload(identifier: &str, url: &str, timeout: u64) -> Value {
    json!({
        "identifier": identifier,
        "name": "Example",
        "monitoring": true,
        "monitors": [{
            "checkInterval": 60_000,
            "timeout": timeout,
            "retryAttempts": 0,
            "probe": { "type": "http", "url": url }
        }]
    })
}

async fn wait_for_channel(
    rx: &mut Receiver<BroadcastMessage>,
    channel: &str,
    timeout: Duration,
) -> BroadcastMessage {
    tokio::time::timeout(timeout, async {
        loop {
            let message = rx.recv().await.expect("broadcast closed");
            if message.channel == channel {
                return message;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {channel} broadcast within {timeout:?}"))
}

#[tokio::test]
async fn test_add_site_and_first_check_goes_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = test_app().await;
    let mut rx = app.broadcast.subscribe();

    let response = app
        .invoke("add-site", vec![http_site_payload("s1", &server.uri(), 5_000)])
        .await;
    assert!(response.success, "{:?}", response.error);
    let site = response.data.unwrap();
    let monitor_id = site["monitors"][0]["id"].as_str().unwrap().to_string();
    assert!(!monitor_id.is_empty());
    assert_eq!(site["monitors"][0]["status"], "pending");

    // site:added precedes the first check-completed broadcast
    let added = wait_for_channel(&mut rx, "site:added", Duration::from_secs(2)).await;
    assert_eq!(added.payload["site"]["identifier"], "s1");

    let completed =
        wait_for_channel(&mut rx, "monitor:check-completed", Duration::from_secs(5)).await;
    assert_eq!(completed.payload["update"]["status"], "up");
    assert_eq!(completed.payload["update"]["monitorId"], monitor_id);
    assert_eq!(completed.payload["update"]["site"]["identifier"], "s1");

    // The stored monitor reflects the completed check
    let sites = app.invoke("get-sites", vec![]).await.data.unwrap();
    assert_eq!(sites[0]["monitors"][0]["status"], "up");
    assert_eq!(sites[0]["monitors"][0]["activeOperations"], json!([]));

    let history = app
        .invoke("get-monitor-history", vec![json!({"monitorId": monitor_id})])
        .await
        .data
        .unwrap();
    let entries = history.as_array().unwrap();
    assert!(!entries.is_empty());
    assert_eq!(entries.last().unwrap()["status"], "up");

    app.teardown();
}

#[tokio::test]
async fn test_manual_check_single_flight_queues_second_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let app = test_app().await;
    let response = app
        .invoke("add-site", vec![http_site_payload("s1", &server.uri(), 5_000)])
        .await;
    let monitor_id = response.data.unwrap()["monitors"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Stop the automatic timer so only manual checks race
    app.invoke(
        "stop-monitoring-for-monitor",
        vec![json!({"siteId": "s1", "monitorId": monitor_id})],
    )
    .await;

    let args = json!({"siteId": "s1", "monitorId": monitor_id});
    let first = {
        let app_ipc = app.ipc.clone();
        let args = args.clone();
        tokio::spawn(async move { app_ipc.invoke("check-site-now", vec![args]).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // While the first manual check is in flight, the second one queues
    let second = app.invoke("check-site-now", vec![args]).await;
    assert!(second.success);
    assert_eq!(second.data, Some(Value::Null), "second call should queue");

    let first = first.await.unwrap();
    assert!(first.success);
    assert_eq!(first.data.as_ref().unwrap()["status"], "up");

    app.teardown();
}

#[tokio::test]
async fn test_update_history_limit_broadcasts_and_prunes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = test_app().await;
    let response = app
        .invoke("add-site", vec![http_site_payload("s1", &server.uri(), 5_000)])
        .await;
    let monitor_id = response.data.unwrap()["monitors"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    app.invoke(
        "stop-monitoring-for-monitor",
        vec![json!({"siteId": "s1", "monitorId": monitor_id})],
    )
    .await;

    // Seed 100 history rows directly
    for ts in 0..100i64 {
        app.engine
            .run(
                "INSERT INTO history (monitor_id, timestamp, status, response_time, details) \
                 VALUES (?1, ?2, 'up', 5, 'seed')",
                rusqlite::params![monitor_id, ts],
            )
            .unwrap();
    }

    let mut rx = app.broadcast.subscribe();
    let response = app.invoke("update-history-limit", vec![json!(50)]).await;
    assert!(response.success);
    assert_eq!(response.data, Some(json!(50)));

    let updated = wait_for_channel(
        &mut rx,
        "settings:history-limit-updated",
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(updated.payload["newValue"], 50);
    assert_eq!(updated.payload["previousValue"], 500);

    let limit = app.invoke("get-history-limit", vec![]).await.data.unwrap();
    assert_eq!(limit, json!(50));

    // One completed check prunes down to the limit
    let check = app
        .invoke(
            "check-site-now",
            vec![json!({"siteId": "s1", "monitorId": monitor_id})],
        )
        .await;
    assert!(check.success);

    let count: Option<i64> = app
        .engine
        .get(
            "SELECT COUNT(*) FROM history WHERE monitor_id = ?1",
            rusqlite::params![monitor_id],
            |row| row.get(0),
        )
        .unwrap();
    assert!(count.unwrap() <= 50, "history should prune to the limit");

    app.teardown();
}

#[tokio::test]
async fn test_remove_site_cascades_and_broadcasts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = test_app().await;
    app.invoke("add-site", vec![http_site_payload("s1", &server.uri(), 5_000)])
        .await;

    let mut rx = app.broadcast.subscribe();
    let response = app.invoke("remove-site", vec![json!("s1")]).await;
    assert!(response.success);
    assert_eq!(response.data, Some(json!(true)));

    let removed = wait_for_channel(&mut rx, "site:removed", Duration::from_secs(2)).await;
    assert_eq!(removed.payload["identifier"], "s1");
    assert_eq!(removed.payload["cascade"], true);

    let invalidated = wait_for_channel(&mut rx, "cache:invalidated", Duration::from_secs(2)).await;
    assert_eq!(invalidated.payload["scope"]["type"], "site");
    assert_eq!(invalidated.payload["scope"]["identifier"], "s1");

    let sites = app.invoke("get-sites", vec![]).await.data.unwrap();
    assert_eq!(sites.as_array().unwrap().len(), 0);

    for table in ["sites", "monitors", "history"] {
        let count: Option<i64> = app
            .engine
            .get(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, Some(0), "{table} should be empty");
    }

    app.teardown();
}

#[tokio::test]
async fn test_timeout_path_records_down_with_timeout_details() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let app = test_app().await;
    let response = app
        .invoke("add-site", vec![http_site_payload("s1", &server.uri(), 1_000)])
        .await;
    let monitor_id = response.data.unwrap()["monitors"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    app.invoke(
        "stop-monitoring-for-monitor",
        vec![json!({"siteId": "s1", "monitorId": monitor_id})],
    )
    .await;

    let check = app
        .invoke(
            "check-site-now",
            vec![json!({"siteId": "s1", "monitorId": monitor_id})],
        )
        .await;
    assert!(check.success);
    let update = check.data.unwrap();
    assert_eq!(update["status"], "down");
    assert!(
        update["details"].as_str().unwrap().contains("timeout"),
        "details: {}",
        update["details"]
    );

    let history = app
        .invoke("get-monitor-history", vec![json!({"monitorId": monitor_id})])
        .await
        .data
        .unwrap();
    let last = history.as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["status"], "down");
    assert!(last["details"].as_str().unwrap().contains("timeout"));

    app.teardown();
}

#[tokio::test]
async fn test_remove_last_monitor_is_rejected_over_ipc() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = test_app().await;
    let response = app
        .invoke("add-site", vec![http_site_payload("s1", &server.uri(), 5_000)])
        .await;
    let monitor_id = response.data.unwrap()["monitors"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .invoke(
            "remove-monitor",
            vec![json!({"siteId": "s1", "monitorId": monitor_id})],
        )
        .await;
    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, "VALIDATION_ERROR");
    assert!(error.message.contains("last monitor"));

    app.teardown();
}

#[tokio::test]
async fn test_backup_envelope_and_full_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = test_app().await;
    app.invoke("add-site", vec![http_site_payload("s1", &server.uri(), 5_000)])
        .await;

    let backup = app.invoke("save-sqlite-backup", vec![]).await.data.unwrap();
    assert!(backup["fileName"]
        .as_str()
        .unwrap()
        .starts_with("uptime-watcher-backup-"));
    assert!(backup["metadata"]["sizeBytes"].as_u64().unwrap() > 0);
    assert_eq!(backup["metadata"]["schemaVersion"], 2);
    assert_eq!(
        backup["metadata"]["checksum"].as_str().unwrap().len(),
        64,
        "sha256 hex"
    );

    let mut rx = app.broadcast.subscribe();
    let sync = app.invoke("request-full-sync", vec![]).await.data.unwrap();
    assert_eq!(sync.as_array().unwrap().len(), 1);
    let synced = wait_for_channel(&mut rx, "sites:state-synchronized", Duration::from_secs(2)).await;
    assert_eq!(synced.payload["sites"][0]["identifier"], "s1");

    app.teardown();
}

#[tokio::test]
async fn test_diagnostics_handshake_reports_no_missing_handlers() {
    let app = test_app().await;
    let response = app.invoke("diagnostics:verify-handlers", vec![]).await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["missing"], json!([]));
    assert!(data["channels"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "get-sites"));

    // Unknown channels come back as structured errors
    let response = app.invoke("no-such-channel", vec![]).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, "UNKNOWN_CHANNEL");

    app.teardown();
}

#[tokio::test]
async fn test_parameter_validation_envelope_over_ipc() {
    let app = test_app().await;

    let response = app.invoke("remove-site", vec![json!(42)]).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, "VALIDATION_ERROR");

    let response = app.invoke("remove-site", vec![]).await;
    assert!(!response.success);

    app.teardown();
}
