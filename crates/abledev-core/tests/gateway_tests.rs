//! End-to-end tests for the gateway over real HTTP.

use abledev_core::codec;
use abledev_core::{
    build_mapping, listen_on_available_port, serve, ScriptModuleLoader, start_dev_server, DevServerOptions, FunctionMapping, Gateway,
    GatewayConfig, HostContext, InvocationError, OperatingMode, PortRetryPolicy, ServerHandle,
    WireValue,
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn start_production(mapping: FunctionMapping, config: GatewayConfig) -> ServerHandle {
    let gateway = Arc::new(Gateway::new(
        OperatingMode::production(mapping),
        HostContext::new(),
        config,
    ));
    let bound = listen_on_available_port(LOCALHOST, 0, PortRetryPolicy::default())
        .await
        .unwrap();
    serve(gateway.router(), bound)
}

fn url(server: &ServerHandle, path_and_query: &str) -> String {
    format!("http://{}{}", server.address(), path_and_query)
}

async fn get(url: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap()
}

fn write(root: &Path, relative: &str, source: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, source).unwrap();
}

#[tokio::test]
async fn test_simple_query() {
    let mapping = FunctionMapping::new()
        .with_fn("queries/simple", |_, _| Ok(WireValue::object([("hello", WireValue::from("world"))])));
    let server = start_production(mapping, GatewayConfig::default()).await;

    let response = get(&url(&server, "/abledev/call-query?key=queries/simple")).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "json": { "hello": "world" } }));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_mutation_date_echo() {
    let mapping = FunctionMapping::new().with_fn("mutations/echo", |args, _| Ok(args));
    let server = start_production(mapping, GatewayConfig::default()).await;

    let sent = WireValue::object([
        ("at", WireValue::Date(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap())),
        ("label", WireValue::from("2023-06-01T00:00:00Z")),
    ]);
    let response = reqwest::Client::new()
        .post(url(&server, "/abledev/call-mutation?key=mutations/echo"))
        .body(codec::encode(&sent).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let received = codec::decode(&response.text().await.unwrap()).unwrap();
    assert_eq!(received, sent);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_key_and_missing_key() {
    let server = start_production(FunctionMapping::new(), GatewayConfig::default()).await;

    let response = get(&url(&server, "/abledev/call-query?key=queries/ghost")).await;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Function not found: queries/ghost");

    let response = get(&url(&server, "/abledev/call-query")).await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = reqwest::Client::new()
        .post(url(&server, "/abledev/call-mutation?key=mutations/ghost"))
        .body(codec::encode(&WireValue::empty_object()).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Function not found: mutations/ghost");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_failing_function_fails_every_time() {
    let mapping = FunctionMapping::new()
        .with_fn("queries/broken", |_, _| Err(InvocationError::failed("no connection")))
        .with_fn("queries/ok", |_, _| Ok(WireValue::from(1)));
    let server = start_production(mapping, GatewayConfig::default()).await;

    for _ in 0..2 {
        let response = get(&url(&server, "/abledev/call-query?key=queries/broken")).await;
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Internal server error");
    }
    let response = get(&url(&server, "/abledev/call-query?key=queries/ok")).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_slow_rejection_does_not_block_other_calls() {
    let mapping = FunctionMapping::new()
        .with_async_fn("queries/slowFail", |_, _| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Err(InvocationError::failed("gave up"))
        })
        .with_fn("queries/fast", |_, _| Ok(WireValue::from("fast")));
    let server = Arc::new(start_production(mapping, GatewayConfig::default()).await);

    let slow_url = url(&server, "/abledev/call-query?key=queries/slowFail");
    let slow = tokio::spawn(async move { get(&slow_url).await.status() });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = std::time::Instant::now();
    let fast = get(&url(&server, "/abledev/call-query?key=queries/fast")).await;
    assert_eq!(fast.status(), reqwest::StatusCode::OK);
    assert!(started.elapsed() < Duration::from_millis(400));

    assert_eq!(slow.await.unwrap(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_invocation_timeout() {
    let mapping = FunctionMapping::new().with_async_fn("queries/hang", |_, _| {
        futures::future::pending::<Result<WireValue, InvocationError>>()
    });
    let config = GatewayConfig::default().with_invocation_timeout(Duration::from_millis(100));
    let server = start_production(mapping, config).await;

    let response = get(&url(&server, "/abledev/call-query?key=queries/hang")).await;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_dev_server_live_edit_and_errors() {
    let src = TempDir::new().unwrap();
    write(src.path(), "queries/count.js", "export default () => 1;\n");
    write(src.path(), "queries/notAFunction.js", "export default 42;\n");
    write(
        src.path(),
        "mutations/fail.js",
        "export default async () => { throw new Error('nope'); };\n",
    );
    write(
        src.path(),
        "queries/session.js",
        "export default (args, context) => { context.response.setHeader('set-cookie', 'session=1'); return true; };\n",
    );
    write(
        src.path(),
        "queries/throws.js",
        "export default () => { throw new Error('always'); };\n",
    );
    write(
        src.path(),
        "queries/initFails.js",
        "throw new Error('bad setup');\nexport default () => 1;\n",
    );

    let server = start_dev_server(DevServerOptions::new(src.path()).with_port(0))
        .await
        .unwrap();

    let count_url = url(&server, "/abledev/call-query?key=queries/count");
    let first = codec::decode(&get(&count_url).await.text().await.unwrap()).unwrap();
    assert_eq!(first, WireValue::from(1));

    write(src.path(), "queries/count.js", "export default () => 2;\n");
    let second = codec::decode(&get(&count_url).await.text().await.unwrap()).unwrap();
    assert_eq!(second, WireValue::from(2));

    let response = get(&url(&server, "/abledev/call-query?key=queries/session")).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["set-cookie"], "session=1");

    let response = get(&url(&server, "/abledev/call-query?key=queries/notAFunction")).await;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "query is not a function: queries/notAFunction");

    let response = reqwest::Client::new()
        .post(url(&server, "/abledev/call-mutation?key=mutations/fail"))
        .body(codec::encode(&WireValue::empty_object()).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    for _ in 0..2 {
        let response = get(&url(&server, "/abledev/call-query?key=queries/throws")).await;
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Internal server error");
    }

    let response = get(&url(&server, "/abledev/call-query?key=queries/initFails")).await;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Error importing function: queries/initFails"));

    let response = get(&url(&server, "/abledev/call-query?key=../outside")).await;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_production_scripts_keep_module_state() {
    let src = TempDir::new().unwrap();
    write(
        src.path(),
        "queries/counter.js",
        "let hits = 0;\nexport default () => ++hits;\n",
    );
    let loader = ScriptModuleLoader::new(src.path());
    let mapping = build_mapping(src.path(), "js", &loader).await.unwrap();
    let server = start_production(mapping, GatewayConfig::default()).await;

    let counter_url = url(&server, "/abledev/call-query?key=queries/counter");
    for expected in 1..=3 {
        let body = get(&counter_url).await.text().await.unwrap();
        assert_eq!(codec::decode(&body).unwrap(), WireValue::from(expected));
    }

    server.close().await.unwrap();
}
