//! End-to-end fleet tests against the `mcp-echo-server` binary.

use std::path::Path;
use std::time::{Duration, Instant};

use mcp_fleet::mcp_client::ConnectionState;
use mcp_fleet::{
    ConfigSource, FleetConfig, FleetEvent, HealthCheckConfig, ServerConfig, ServerManager,
};
use serde_json::json;
use tokio::sync::broadcast;

const ECHO_SERVER: &str = env!("CARGO_BIN_EXE_mcp-echo-server");
const ECHO_TOOL_COUNT: usize = 6;

fn echo_server() -> ServerConfig {
    ServerConfig::new(ECHO_SERVER, vec![])
}

fn fleet(servers: Vec<(&str, ServerConfig)>) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.settings.connection_timeout_ms = 10_000;
    config.settings.retry_delay_ms = 100;
    for (id, server) in servers {
        config.servers.insert(id.to_string(), server);
    }
    config
}

async fn wait_for<F>(events: &mut broadcast::Receiver<FleetEvent>, mut matches: F) -> FleetEvent
where
    F: FnMut(&FleetEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_connected(id: &'static str) -> impl FnMut(&FleetEvent) -> bool {
    move |event| matches!(event, FleetEvent::ServerConnected { server_id, .. } if server_id == id)
}

fn write_config(path: &Path, config: &FleetConfig) {
    std::fs::write(path, serde_json::to_string_pretty(config).unwrap()).unwrap();
}

#[tokio::test]
async fn test_autostart_server_connects_and_discovers() {
    let manager = ServerManager::with_config(fleet(vec![("echo", echo_server())]));
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();

    match wait_for(&mut events, is_connected("echo")).await {
        FleetEvent::ServerConnected {
            tools,
            resources,
            prompts,
            server_info,
            ..
        } => {
            assert_eq!(tools, ECHO_TOOL_COUNT);
            assert_eq!(resources, 1);
            assert_eq!(prompts, 1);
            assert_eq!(
                server_info.and_then(|info| info.name).as_deref(),
                Some("mcp-echo-server")
            );
        }
        other => panic!("unexpected event {other:?}"),
    }

    let status = manager.get_server_status("echo").unwrap();
    assert_eq!(status.status, ConnectionState::Connected);
    assert_eq!(status.tools, ECHO_TOOL_COUNT);
    assert!(status.capabilities.tools);
    assert!(status.pid.is_some());
    assert!(status.connected_at.is_some());
    assert_eq!(manager.get_all_tools().len(), ECHO_TOOL_COUNT);

    manager.shutdown().await;
    assert!(manager.running_servers().is_empty());
}

#[tokio::test]
async fn test_sum_tool_returns_result() {
    let manager = ServerManager::with_config(fleet(vec![("echo", echo_server())]));
    manager.initialize().await.unwrap();

    let result = manager.call_tool("echo", "sum", json!({"a": 2, "b": 3})).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.content, Some(json!(5)));

    let result = manager.call_tool("echo", "fail", json!({})).await;
    assert!(!result.success);
    assert!(result.is_error);
    assert_eq!(result.error.as_deref(), Some("this tool always fails"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_call_tool_by_name_routes_in_id_order() {
    let manager = ServerManager::with_config(fleet(vec![
        ("beta", echo_server()),
        ("alpha", echo_server()),
    ]));
    manager.initialize().await.unwrap();
    let mut events = manager.subscribe();

    let entry = manager.find_tool("echo").unwrap();
    assert_eq!(entry.server_id, "alpha");

    let result = manager
        .call_tool_by_name("echo", json!({"text": "routed"}))
        .await;
    assert!(result.success);
    assert_eq!(result.content.unwrap()[0]["text"], "routed");
    match wait_for(&mut events, |e| e.name() == "tool:called").await {
        FleetEvent::ToolCalled { server_id, success, .. } => {
            assert_eq!(server_id.as_deref(), Some("alpha"));
            assert!(success);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let result = manager.call_tool_by_name("no_such_tool", json!({})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("unknown tool"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_request_timeout_keeps_server_connected() {
    let mut server = echo_server();
    server.request_timeout_ms = Some(50);
    let manager = ServerManager::with_config(fleet(vec![("echo", server)]));
    manager.initialize().await.unwrap();

    let start = Instant::now();
    let result = manager.call_tool("echo", "hang", json!({})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));
    assert!(start.elapsed() < Duration::from_secs(2));

    // Only that call failed.
    let result = manager.call_tool("echo", "sum", json!({"a": 1, "b": 1})).await;
    assert!(result.success);
    assert_eq!(
        manager.get_server_status("echo").unwrap().status,
        ConnectionState::Connected
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_crash_is_restarted_after_backoff() {
    let manager = ServerManager::with_config(fleet(vec![("echo", echo_server())]));
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();
    wait_for(&mut events, is_connected("echo")).await;
    let first_pid = manager.get_server_status("echo").unwrap().pid;

    let result = manager.call_tool("echo", "crash", json!({})).await;
    assert!(!result.success);

    wait_for(&mut events, |e| e.name() == "server:disconnected").await;
    wait_for(&mut events, is_connected("echo")).await;

    let status = manager.get_server_status("echo").unwrap();
    assert_eq!(status.status, ConnectionState::Connected);
    assert_ne!(status.pid, first_pid);
    assert_eq!(status.restarts, 1);

    manager.shutdown().await;
}

async fn crashed_with_pending_restart() -> ServerManager {
    let mut config = fleet(vec![("echo", echo_server())]);
    config.settings.retry_delay_ms = 300;
    let manager = ServerManager::with_config(config);
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();
    wait_for(&mut events, is_connected("echo")).await;

    manager.call_tool("echo", "crash", json!({})).await;
    wait_for(&mut events, |e| e.name() == "server:disconnected").await;
    assert!(manager.running_servers().is_empty());
    manager
}

#[tokio::test]
async fn test_shutdown_cancels_pending_crash_restart() {
    let manager = crashed_with_pending_restart().await;
    manager.shutdown().await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(manager.running_servers().is_empty());
    assert_eq!(
        manager.get_server_status("echo").unwrap().status,
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_stop_server_cancels_pending_crash_restart() {
    let manager = crashed_with_pending_restart().await;
    manager.stop_server("echo").await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(manager.running_servers().is_empty());
    assert_eq!(manager.get_server_status("echo").unwrap().restarts, 0);
}

#[tokio::test]
async fn test_crash_without_auto_start_stays_down() {
    let mut server = echo_server();
    server.auto_start = false;
    let manager = ServerManager::with_config(fleet(vec![("echo", server)]));
    let mut events = manager.subscribe();
    manager.start_server("echo").await.unwrap();

    manager.call_tool("echo", "crash", json!({})).await;
    wait_for(&mut events, |e| e.name() == "server:disconnected").await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(manager.running_servers().is_empty());
    assert_eq!(
        manager.get_server_status("echo").unwrap().status,
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_crash_restarts_are_bounded() {
    let mut config = fleet(vec![("echo", echo_server())]);
    config.settings.retry_attempts = 0;
    let manager = ServerManager::with_config(config);
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();

    manager.call_tool("echo", "crash", json!({})).await;
    let event = wait_for(&mut events, |e| {
        matches!(e, FleetEvent::ServerError { error, .. } if error.contains("restart attempts"))
    })
    .await;
    assert_eq!(event.server_id(), Some("echo"));
    assert!(manager.running_servers().is_empty());
}

#[tokio::test]
async fn test_concurrent_start_spawns_one_process() {
    let dir = tempfile::tempdir().unwrap();
    let pid_log = dir.path().join("pids.log");
    let mut server = echo_server();
    server.auto_start = false;
    server
        .env
        .insert("MCP_ECHO_PID_LOG".into(), pid_log.display().to_string());
    let manager = ServerManager::with_config(fleet(vec![("echo", server)]));

    let (a, b) = tokio::join!(manager.start_server("echo"), manager.start_server("echo"));
    a.unwrap();
    b.unwrap();

    let pids = std::fs::read_to_string(&pid_log).unwrap();
    assert_eq!(pids.lines().count(), 1);
    assert_eq!(manager.running_servers(), vec!["echo".to_string()]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_list_changed_makes_new_tool_routable() {
    let manager = ServerManager::with_config(fleet(vec![("echo", echo_server())]));
    manager.initialize().await.unwrap();
    assert!(manager.find_tool("extra").is_none());

    let result = manager.call_tool("echo", "add_tool", json!({})).await;
    assert!(result.success);

    let deadline = Instant::now() + Duration::from_secs(5);
    while manager.find_tool("extra").is_none() {
        assert!(Instant::now() < deadline, "tool list was not refreshed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let result = manager.call_tool_by_name("extra", json!({})).await;
    assert!(result.success);
    assert_eq!(manager.get_all_tools().len(), ECHO_TOOL_COUNT + 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_banner_on_stdout_is_ignored() {
    let mut server = echo_server();
    server.env.insert("MCP_ECHO_BANNER".into(), "1".into());
    let manager = ServerManager::with_config(fleet(vec![("noisy", server)]));
    manager.initialize().await.unwrap();

    assert_eq!(
        manager.get_server_status("noisy").unwrap().status,
        ConnectionState::Connected
    );
    manager.shutdown().await;
}

#[tokio::test]
async fn test_stop_server_disconnects() {
    let manager = ServerManager::with_config(fleet(vec![("echo", echo_server())]));
    manager.initialize().await.unwrap();
    let mut events = manager.subscribe();

    manager.stop_server("echo").await.unwrap();
    match wait_for(&mut events, |e| e.name() == "server:disconnected").await {
        FleetEvent::ServerDisconnected { server_id, reason } => {
            assert_eq!(server_id, "echo");
            assert_eq!(reason, "stopped");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let status = manager.get_server_status("echo").unwrap();
    assert_eq!(status.status, ConnectionState::Disconnected);
    let result = manager.call_tool("echo", "echo", json!({"text": "x"})).await;
    assert!(result.error.unwrap().contains("not connected"));

    // Stopping again is a no-op.
    manager.stop_server("echo").await.unwrap();
}

#[tokio::test]
async fn test_stop_rejects_in_flight_calls() {
    let manager = ServerManager::with_config(fleet(vec![("echo", echo_server())]));
    manager.initialize().await.unwrap();

    let mut calls = Vec::new();
    for _ in 0..3 {
        let manager = manager.clone();
        calls.push(tokio::spawn(async move {
            manager.call_tool("echo", "hang", json!({})).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    manager.stop_server("echo").await.unwrap();
    for call in calls {
        let result = call.await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disconnecting"));
    }
    // The echo server exits on stdin EOF, well inside the grace period.
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_resource_and_prompt() {
    let manager = ServerManager::with_config(fleet(vec![("echo", echo_server())]));
    manager.initialize().await.unwrap();

    let result = manager.read_resource("echo", "mem://greeting").await;
    assert!(result.success);
    assert_eq!(
        result.content.unwrap()[0]["text"],
        "hello from mcp-echo-server"
    );

    let result = manager.read_resource("echo", "mem://missing").await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("[-32602]"));

    let result = manager
        .execute_prompt("echo", "greet", json!({"name": "Ada"}))
        .await;
    assert!(result.success);
    let content = result.content.unwrap();
    assert_eq!(content["messages"][0]["content"]["text"], "Say hello to Ada.");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_health_check_reports_healthy() {
    let mut server = echo_server();
    server.health_check = Some(HealthCheckConfig {
        enabled: true,
        interval_ms: 50,
    });
    let manager = ServerManager::with_config(fleet(vec![("echo", server)]));
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();

    match wait_for(&mut events, |e| e.name() == "health:check").await {
        FleetEvent::HealthCheck { server_id, healthy } => {
            assert_eq!(server_id, "echo");
            assert!(healthy);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(manager.get_server_status("echo").unwrap().health_check);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_health_check_and_crash_restart_once() {
    let dir = tempfile::tempdir().unwrap();
    let pid_log = dir.path().join("pids.log");
    let mut server = echo_server();
    server.health_check = Some(HealthCheckConfig {
        enabled: true,
        interval_ms: 50,
    });
    server
        .env
        .insert("MCP_ECHO_PID_LOG".into(), pid_log.display().to_string());
    let manager = ServerManager::with_config(fleet(vec![("echo", server)]));
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();
    wait_for(&mut events, is_connected("echo")).await;

    manager.call_tool("echo", "crash", json!({})).await;
    wait_for(&mut events, is_connected("echo")).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // The exit watcher and the health timer may both notice; one restart follows.
    let pids = std::fs::read_to_string(&pid_log).unwrap();
    assert_eq!(pids.lines().count(), 2);
    assert_eq!(manager.running_servers(), vec!["echo".to_string()]);
    assert_eq!(
        manager.get_server_status("echo").unwrap().status,
        ConnectionState::Connected
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_reload_restarts_and_adds_servers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("servers.json");
    write_config(&path, &fleet(vec![("a", echo_server())]));

    let manager = ServerManager::new(ConfigSource::Files(vec![path.clone()]));
    manager.initialize().await.unwrap();
    let first_pid = manager.get_server_status("a").unwrap().pid;

    write_config(&path, &fleet(vec![("a", echo_server()), ("b", echo_server())]));
    manager.reload_configuration().await.unwrap();

    assert_eq!(manager.running_servers(), vec!["a".to_string(), "b".to_string()]);
    let a = manager.get_server_status("a").unwrap();
    assert_eq!(a.status, ConnectionState::Connected);
    assert_ne!(a.pid, first_pid);

    // Removed servers keep running by default.
    write_config(&path, &fleet(vec![("a", echo_server())]));
    manager.reload_configuration().await.unwrap();
    assert!(manager.running_servers().contains(&"b".to_string()));

    // ...and are stopped when pruning is enabled.
    let mut pruning = fleet(vec![("a", echo_server())]);
    pruning.settings.prune_on_reload = true;
    write_config(&path, &pruning);
    manager.reload_configuration().await.unwrap();
    assert_eq!(manager.running_servers(), vec!["a".to_string()]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_initialize_reads_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("servers.yaml");
    let yaml = format!(
        "servers:\n  echo:\n    command: \"{ECHO_SERVER}\"\n    autoStart: true\nsettings:\n  requestTimeoutMs: 5000\n"
    );
    std::fs::write(&path, yaml).unwrap();

    let manager = ServerManager::new(ConfigSource::Files(vec![path]));
    manager.initialize().await.unwrap();

    assert_eq!(manager.settings().request_timeout_ms, 5000);
    assert_eq!(
        manager.get_server_status("echo").unwrap().status,
        ConnectionState::Connected
    );
    manager.shutdown().await;
}
