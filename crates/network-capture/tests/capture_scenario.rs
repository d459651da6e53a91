use std::sync::Arc;
use std::time::Duration;

use network_capture::{
    spawn_pump, CaptureConfig, CaptureFilter, CaptureSession, InMemoryObserver,
    ResponseDescriptor, ResponseMatcher,
};
use tokio::time::{sleep, timeout};

const API: &str = "https://envdevapi.oizom.com";

fn get(id: &str, path: &str) -> ResponseDescriptor {
    ResponseDescriptor::new(id, "GET", format!("{API}{path}"), 200)
        .with_content_type("application/json")
}

async fn wait_observed(session: &CaptureSession, count: u64) {
    timeout(Duration::from_secs(2), async {
        while session.stats().observed < count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pump processed responses");
}

#[tokio::test]
async fn login_and_dashboard_phases_bucket_as_expected() {
    let config = CaptureConfig::default();
    let observer = InMemoryObserver::new(64);
    let session = Arc::new(CaptureSession::new(&config));
    let pump = spawn_pump(
        observer.clone(),
        Arc::clone(&session),
        CaptureFilter::from_config(&config),
        config.normalize_options(),
    );

    session.set_phase("login");
    observer.emit_with_body(get("1", "/users/login"), r#"{"token":"t"}"#);
    observer.emit_with_body(get("2", "/overview/summary"), r#"{"aqi":42}"#);
    observer.emit_with_body(get("3", "/users/login"), r#"{"token":"t"}"#);
    observer.emit(ResponseDescriptor::new(
        "4",
        "GET",
        "https://devenvizom.oizom.com/main.js",
        200,
    ));
    wait_observed(&session, 3).await;

    session.set_phase("dashboard");
    session.reset_bucket("dashboard");
    observer.emit_with_body(get("5", "/devices/data?range=today"), r#"[1,2,3]"#);
    session
        .wait_for_response(&ResponseMatcher::path("/devices/data"), Duration::from_secs(2))
        .await
        .expect("dashboard data observed");

    let report = pump.shutdown().await.expect("pump stops");
    assert_eq!(report.ignored, 1);
    assert_eq!(report.duplicates, 1);

    let snapshot = session.snapshot();
    let sections: Vec<(&str, usize)> = snapshot
        .buckets
        .iter()
        .map(|bucket| (bucket.label.as_str(), bucket.calls.len()))
        .collect();
    assert_eq!(sections, [("login", 2), ("dashboard", 1)]);

    let login = snapshot.bucket("login").expect("login bucket");
    assert!(login.calls[0].url.ends_with("/users/login"));
    assert!(login.calls[1].url.ends_with("/overview/summary"));
    assert!(login
        .calls
        .iter()
        .all(|call| call.body_snippet.as_deref().is_some_and(|b| b.contains('{'))));
    assert_eq!(snapshot.calls().filter(|call| call.phase == "dashboard").count(), 1);
}

#[tokio::test]
async fn path_allow_list_narrows_backend_calls() {
    let config = CaptureConfig {
        path_allow_list: vec!["/devices/data".into()],
        capture_bodies: false,
        ..Default::default()
    };
    let observer = InMemoryObserver::new(16);
    let session = Arc::new(CaptureSession::new(&config));
    let pump = spawn_pump(
        observer.clone(),
        Arc::clone(&session),
        CaptureFilter::from_config(&config),
        config.normalize_options(),
    );

    session.set_phase("apply");
    observer.emit(get("1", "/settings"));
    observer.emit(get("2", "/devices/data?x=1"));

    let report = pump.shutdown().await.expect("pump stops");
    assert_eq!(report.processed, 2);
    assert_eq!(report.ignored, 1);
    let bucket = session.bucket("apply").expect("apply bucket");
    assert_eq!(bucket.calls.len(), 1);
    assert!(bucket.calls[0].body_snippet.is_none());
}

#[tokio::test]
async fn reset_lets_a_repeated_call_be_recorded_again() {
    let config = CaptureConfig::default();
    let observer = InMemoryObserver::new(16);
    let session = Arc::new(CaptureSession::new(&config));
    let pump = spawn_pump(
        observer.clone(),
        Arc::clone(&session),
        CaptureFilter::from_config(&config),
        config.normalize_options(),
    );

    session.set_phase("aqi-apply");
    observer.emit(get("1", "/devices/data"));
    wait_observed(&session, 1).await;
    assert_eq!(session.reset_bucket("aqi-apply"), 1);

    observer.emit(get("2", "/devices/data"));
    let report = pump.shutdown().await.expect("pump stops");
    assert_eq!(report.recorded, 2);
    assert_eq!(report.duplicates, 0);
    assert_eq!(session.bucket("aqi-apply").map(|b| b.calls.len()), Some(1));
}
