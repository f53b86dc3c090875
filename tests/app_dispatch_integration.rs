use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use netinv_core::database::Database;
use netinv_core::database::queries::get_all_devices;
use netinv_core::{
    AppCommand, AppCommandResult, AppContext, AppEvent, OutputHook, ScanMethod,
    execute_command_typed, execute_command_with_context,
};

fn make_test_context(db_path: Option<PathBuf>) -> (AppContext, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let output_hook: OutputHook = Arc::new(move |line| {
        sink.lock()
            .expect("output lock should not be poisoned")
            .push(line.to_string());
    });

    let mut context = AppContext::from_env().with_output_hook(output_hook);
    if let Some(path) = db_path {
        context = context.with_db_path(path);
    }

    (context, lines)
}

fn unique_temp_db_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}_{}.db", prefix, uuid::Uuid::new_v4()))
}

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    listener.local_addr().expect("local addr").port()
}

#[tokio::test]
async fn help_command_writes_usage_to_output_hook() {
    let (context, lines) = make_test_context(None);

    execute_command_with_context(AppCommand::Help, &context)
        .await
        .expect("help command should succeed");

    let output = lines
        .lock()
        .expect("output lock should not be poisoned")
        .join("\n");
    assert!(output.contains("Usage:"));
    assert!(output.contains("netinv-core discover"));
    assert!(output.contains("netinv-core snmp-set"));
}

#[tokio::test]
async fn discover_outputs_json_and_persists_to_context_db() {
    let db_path = unique_temp_db_path("netinv_discover_dispatch");
    let (context, lines) = make_test_context(Some(db_path.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let port = listener.local_addr().expect("local addr").port();

    let command = AppCommand::Discover {
        target: "127.0.0.1".to_string(),
        method: ScanMethod::Tcp,
        ssh: None,
        winrm: None,
        deadline_secs: None,
        ports: Some(vec![port]),
        persist: true,
    };
    execute_command_with_context(command, &context)
        .await
        .expect("discover should succeed");
    drop(listener);

    let output = lines
        .lock()
        .expect("output lock should not be poisoned")
        .join("\n");
    let parsed: serde_json::Value =
        serde_json::from_str(&output).expect("discover output should be valid JSON");
    assert_eq!(parsed["method"], "tcp");
    assert_eq!(parsed["discoveredDevices"][0]["ip"], "127.0.0.1");
    assert_eq!(parsed["discoveredDevices"][0]["status"], "Online");
    assert_eq!(parsed["discoveredDevices"][0]["open_ports"][0], port);

    let db = Database::new(db_path.clone()).expect("db should open");
    let devices = db.with_conn(get_all_devices).expect("devices query");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].ip.as_deref(), Some("127.0.0.1"));

    drop(db);
    let _ = std::fs::remove_file(db_path);
}

#[tokio::test]
async fn discover_reports_progress_events() {
    let events: Arc<Mutex<Vec<AppEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let context = AppContext::from_env()
        .with_db_path(unique_temp_db_path("netinv_progress"))
        .with_event_hook(Arc::new(move |event| {
            sink.lock()
                .expect("event lock should not be poisoned")
                .push(event.clone());
        }));

    let command = AppCommand::Discover {
        target: "127.0.0.1-127.0.0.2".to_string(),
        method: ScanMethod::Tcp,
        ssh: None,
        winrm: None,
        deadline_secs: Some(60),
        ports: Some(vec![closed_port().await]),
        persist: false,
    };
    let result = execute_command_typed(command, &context)
        .await
        .expect("discover should succeed");
    let AppCommandResult::Discovery(result) = result else {
        panic!("expected a discovery payload");
    };
    assert_eq!(result.discovered_devices.len(), 2);

    let events = events.lock().expect("event lock should not be poisoned");
    assert!(events.contains(&AppEvent::DiscoveryProgress {
        done: 2,
        total: 2,
        progress_pct: 100,
    }));
}

#[tokio::test]
async fn cancelled_context_discovers_nothing() {
    let (context, _lines) = make_test_context(Some(unique_temp_db_path("netinv_cancel")));
    context.cancel();

    let command = AppCommand::Discover {
        target: "127.0.0.1".to_string(),
        method: ScanMethod::Tcp,
        ssh: None,
        winrm: None,
        deadline_secs: None,
        ports: None,
        persist: false,
    };
    let result = execute_command_typed(command, &context)
        .await
        .expect("discover should succeed");
    assert!(matches!(
        result,
        AppCommandResult::Discovery(ref r) if r.discovered_devices.is_empty()
    ));
}

#[tokio::test]
async fn snmp_set_with_invalid_v3_is_rejected_before_the_network() {
    let (context, lines) = make_test_context(Some(unique_temp_db_path("netinv_snmp_reject")));

    let args = [
        "netinv-core",
        "snmp-set",
        "--ip",
        "192.0.2.1",
        "--snmp-version",
        "v3",
        "--v3-user",
        "ops",
        "--priv-protocol",
        "aes128",
        "--priv-password",
        "longenough",
        "--oid",
        "1.3.6.1.2.1.1.6.0",
        "--value-type",
        "octetstring",
        "--value",
        "lab",
    ];
    let err = netinv_core::run_with_context(args, &context)
        .await
        .expect_err("privacy without auth must be rejected");
    assert!(err.to_string().contains("Authentication must be enabled to use privacy"));
    assert!(lines.lock().expect("output lock should not be poisoned").is_empty());
    assert_eq!(context.rate_limiter().tracked_windows(), 0);
}
