//! End-to-end tests driving [`fledge::coordinator::Coordinator`] exactly the way `fledge static`
//! does: a config is built, a server is brought up (either a pre-existing `axum` origin or, for
//! the subprocess-lifecycle cases, the real `fledge-fixture-listener` binary), and the resulting
//! output tree / record set is asserted against the scenarios from the specification's testable
//! properties.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;
use fledge::config::rt::{Discover, RtcStatic};
use fledge::coordinator::Coordinator;
use fledge::crawl::Outcome;
use fledge::supervisor::{ServerSpec, SupervisorConfig};
use fledge::url_normalize::IgnoreSet;
use tokio_util::sync::CancellationToken;
use url::Url;

async fn spawn_origin(app: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

fn rtc(origin: Url, routes: &[&str], discover: Discover, out: PathBuf, base_path: &str) -> RtcStatic {
    RtcStatic {
        server: ServerSpec::Origin(origin),
        routes: routes.iter().map(|s| s.to_string()).collect(),
        discover,
        base_path: base_path.to_string(),
        assets_dir: None,
        output_dir: out,
        max_concurrency: 4,
        request_timeout: Duration::from_secs(30),
        supervisor: SupervisorConfig::default(),
    }
}

fn record_map(records: &[fledge::crawl::UrlRecord]) -> HashMap<String, Outcome> {
    records
        .iter()
        .map(|r| (r.url.path().to_string(), r.outcome))
        .collect()
}

#[tokio::test]
async fn minimal_single_page() {
    let app = Router::new().route("/", get(|| async { Html("<html><body>ok</body></html>") }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let config = rtc(origin, &["/"], Discover::Disabled, out.path().to_path_buf(), "/");
    let summary = Coordinator::new(config, CancellationToken::new()).run().await.unwrap();

    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.exit_code(), 0);
    let body = tokio::fs::read_to_string(out.path().join("index.html")).await.unwrap();
    assert_eq!(body, "<html><body>ok</body></html>");
}

#[tokio::test]
async fn discovery_respects_depth_limit() {
    let app = Router::new()
        .route("/", get(|| async { Html(r#"<a href="/a">a</a>"#) }))
        .route("/a", get(|| async { Html(r#"<a href="/b">b</a>"#) }))
        .route("/b", get(|| async { Html("leaf") }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let discover = Discover::Scoped {
        depth: 1,
        ignore: IgnoreSet::compile(&[]).unwrap(),
    };
    let config = rtc(origin, &["/"], discover, out.path().to_path_buf(), "/");
    let summary = Coordinator::new(config, CancellationToken::new()).run().await.unwrap();

    let outcomes = record_map(&summary.records);
    assert_eq!(outcomes.get("/"), Some(&Outcome::Fetched));
    assert_eq!(outcomes.get("/a"), Some(&Outcome::Fetched));
    assert_eq!(outcomes.get("/b"), None, "/b is one hop past the depth limit and must never be discovered");

    assert!(out.path().join("index.html").exists());
    assert!(out.path().join("a/index.html").exists());
    assert!(!out.path().join("b/index.html").exists());
}

#[tokio::test]
async fn base_path_rewrite_prefixes_same_origin_links() {
    let app = Router::new()
        .route("/", get(|| async { Html(r#"<a href="/x">x</a>"#) }))
        .route("/x", get(|| async { Html("leaf") }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let config = rtc(
        origin,
        &["/"],
        Discover::Unlimited,
        out.path().to_path_buf(),
        "/app",
    );
    let summary = Coordinator::new(config, CancellationToken::new()).run().await.unwrap();
    assert_eq!(summary.exit_code(), 0);

    let index = tokio::fs::read_to_string(out.path().join("index.html")).await.unwrap();
    assert!(index.contains(r#"href="/app/x""#));
    assert!(out.path().join("x/index.html").exists());
}

#[tokio::test]
async fn redirect_chain_is_followed_and_recorded() {
    let app = Router::new()
        .route("/", get(|| async { Redirect::permanent("/home").into_response() }))
        .route("/home", get(|| async { Html("home") }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let config = rtc(origin, &["/"], Discover::Disabled, out.path().to_path_buf(), "/");
    let summary = Coordinator::new(config, CancellationToken::new()).run().await.unwrap();

    let outcomes = record_map(&summary.records);
    assert_eq!(outcomes.get("/"), Some(&Outcome::Redirected));
    assert_eq!(outcomes.get("/home"), Some(&Outcome::Fetched));
    assert!(!out.path().join("index.html").exists());
    assert!(out.path().join("home/index.html").exists());
}

#[tokio::test]
async fn ignore_pattern_excludes_matching_links_from_discovery() {
    let app = Router::new()
        .route(
            "/",
            get(|| async { Html(r#"<a href="/admin/a">a</a><a href="/public/b">b</a>"#) }),
        )
        .route("/admin/a", get(|| async { Html("admin") }))
        .route("/public/b", get(|| async { Html("public") }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let discover = Discover::Scoped {
        depth: 5,
        ignore: IgnoreSet::compile(&["/admin/*".to_string()]).unwrap(),
    };
    let config = rtc(origin, &["/"], discover, out.path().to_path_buf(), "/");
    let summary = Coordinator::new(config, CancellationToken::new()).run().await.unwrap();

    let outcomes = record_map(&summary.records);
    assert_eq!(outcomes.get("/public/b"), Some(&Outcome::Fetched));
    assert_eq!(outcomes.get("/admin/a"), None);
}

#[tokio::test]
async fn empty_routes_with_discovery_enabled_crawls_nothing() {
    let app = Router::new().route("/", get(|| async { "unused" }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let config = rtc(origin, &[], Discover::Unlimited, out.path().to_path_buf(), "/");
    let summary = Coordinator::new(config, CancellationToken::new()).run().await.unwrap();

    assert!(summary.records.is_empty());
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn not_found_route_is_recorded_without_retry_and_without_output() {
    let app = Router::new().route("/missing", get(|| async { axum::http::StatusCode::NOT_FOUND }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let config = rtc(origin, &["/missing"], Discover::Disabled, out.path().to_path_buf(), "/");
    let summary = Coordinator::new(config, CancellationToken::new()).run().await.unwrap();

    assert_eq!(summary.records.len(), 1);
    let record = &summary.records[0];
    assert_eq!(record.outcome, Outcome::FailedPermanent);
    assert_eq!(record.attempts, 1);
    assert_eq!(summary.exit_code(), 3);
    assert!(!out.path().join("missing/index.html").exists());
}

/// `/x` and `/x/` are distinct canonical URLs that both map to `x/index.html` via the
/// directory-index convention; the second write must abort the whole build as a
/// `FledgeError::OutputCollision`, never silently overwrite the first.
#[tokio::test]
async fn genuine_output_collision_aborts_the_build() {
    let app = Router::new()
        .route("/x", get(|| async { Html("first") }))
        .route("/x/", get(|| async { Html("second") }));
    let origin = spawn_origin(app).await;
    let out = tempfile::tempdir().unwrap();

    let config = rtc(origin, &["/x", "/x/"], Discover::Disabled, out.path().to_path_buf(), "/");
    let result = Coordinator::new(config, CancellationToken::new()).run().await;

    assert!(matches!(
        result,
        Err(fledge::error::FledgeError::OutputCollision { .. })
    ));
}

/// Full subprocess lifecycle: the supervisor allocates a port, spawns the real fixture binary,
/// probes it to `Ready`, the coordinator crawls it, and teardown leaves no child behind.
#[tokio::test]
async fn coordinator_boots_and_crawls_a_real_child_process() {
    let fixture = PathBuf::from(env!("CARGO_BIN_EXE_fledge-fixture-listener"));
    let out = tempfile::tempdir().unwrap();

    // The fixture binary only speaks raw TCP, not HTTP, so routes would all fail to parse as
    // HTTP responses; this test only exercises boot -> ready -> kill, with an empty route set.
    let rtc = RtcStatic {
        server: ServerSpec::Spawn {
            program: fixture,
            args: vec![],
        },
        routes: vec![],
        discover: Discover::Disabled,
        base_path: "/".to_string(),
        assets_dir: None,
        output_dir: out.path().to_path_buf(),
        max_concurrency: 4,
        request_timeout: Duration::from_secs(30),
        supervisor: SupervisorConfig::default(),
    };
    let summary = Coordinator::new(rtc, CancellationToken::new()).run().await.unwrap();
    assert!(summary.records.is_empty());
    assert_eq!(summary.exit_code(), 0);
}

/// A child that exits immediately with a non-zero status during startup must fail the build as
/// `BootError`, never silently proceed.
#[tokio::test]
async fn coordinator_reports_boot_error_when_child_exits_immediately() {
    let fixture = PathBuf::from(env!("CARGO_BIN_EXE_fledge-fixture-listener"));
    let out = tempfile::tempdir().unwrap();

    let rtc = RtcStatic {
        server: ServerSpec::Spawn {
            program: fixture,
            args: vec!["--exit-immediately=1".to_string()],
        },
        routes: vec!["/".to_string()],
        discover: Discover::Disabled,
        base_path: "/".to_string(),
        assets_dir: None,
        output_dir: out.path().to_path_buf(),
        max_concurrency: 4,
        request_timeout: Duration::from_secs(30),
        supervisor: SupervisorConfig::default(),
    };

    let result = Coordinator::new(rtc, CancellationToken::new()).run().await;
    assert!(matches!(result, Err(fledge::error::FledgeError::Boot(_))));
    assert!(
        tokio::fs::read_dir(out.path()).await.unwrap().next_entry().await.unwrap().is_none(),
        "no output files should be written when boot fails"
    );
}
