use std::net::IpAddr;
use std::sync::Arc;

use netinv_core::database::queries::get_device_by_ip;
use netinv_core::{
    Database, DiscoveryOptions, HostSink, HostStatus, ScanMethod, ServiceEntry, discover,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const REDIS_PORT: u16 = 6379;

/// Answers every PING with +PONG. Scanner connects that send nothing are
/// dropped.
async fn spawn_fake_redis() -> Option<tokio::task::JoinHandle<()>> {
    let listener = match TcpListener::bind(("127.0.0.1", REDIS_PORT)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("skipping: cannot bind 127.0.0.1:{REDIS_PORT}: {e}");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                if let Ok(n) = socket.read(&mut buf).await
                    && n > 0
                    && buf[..n].windows(4).any(|w| w == b"PING")
                {
                    let _ = socket.write_all(b"+PONG\r\n").await;
                }
            });
        }
    }))
}

#[tokio::test]
async fn redis_host_is_discovered_classified_and_persisted() {
    let Some(server) = spawn_fake_redis().await else {
        return;
    };

    let db = Arc::new(Database::in_memory().expect("in-memory db"));
    let sink: Arc<dyn HostSink> = db.clone();
    let options = DiscoveryOptions::default()
        .with_ports(vec![REDIS_PORT])
        .with_sink(sink);

    let result = discover("127.0.0.1-127.0.0.1", ScanMethod::Tcp, None, None, &options).await;
    server.abort();

    assert_eq!(result.method, "tcp");
    assert_eq!(result.discovered_devices.len(), 1);
    let host = &result.discovered_devices[0];
    assert_eq!(host.ip, "127.0.0.1");
    assert_eq!(host.status, HostStatus::Online);
    assert!(host.services.contains(&ServiceEntry {
        service: "redis".to_string(),
        port: REDIS_PORT,
    }));

    let redis = host
        .databases
        .iter()
        .find(|db| db.port == REDIS_PORT)
        .expect("redis handshake result");
    assert!(redis.reachable);
    assert_eq!(redis.pong, Some(true));

    let detail = host
        .services_detailed
        .iter()
        .find(|d| d.port == REDIS_PORT)
        .expect("redis service detail");
    assert!(detail.verified);

    let stored = db
        .with_conn(|conn| get_device_by_ip(conn, "127.0.0.1"))
        .expect("query")
        .expect("device row");
    assert_eq!(stored.status, "Online");
    assert!(stored.services.iter().any(|s| s.service == "redis"));
}

#[tokio::test]
async fn malformed_cidr_returns_empty_device_list() {
    let result = discover(
        "not-a-cidr/33",
        ScanMethod::Tcp,
        None,
        None,
        &DiscoveryOptions::default(),
    )
    .await;
    assert!(result.discovered_devices.is_empty());

    let json = serde_json::to_value(&result).expect("serializable");
    assert_eq!(json["discoveredDevices"], serde_json::json!([]));
}

#[tokio::test]
async fn hosts_come_back_sorted_by_address() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let options = DiscoveryOptions::default().with_ports(vec![port]);
    let result = discover("127.0.0.3, 127.0.0.1, 127.0.0.2", ScanMethod::Tcp, None, None, &options).await;

    let ips: Vec<IpAddr> = result
        .discovered_devices
        .iter()
        .map(|h| h.ip.parse().expect("ip"))
        .collect();
    let mut sorted = ips.clone();
    sorted.sort();
    assert_eq!(ips, sorted);
    assert_eq!(ips.len(), 3);
    assert!(result.discovered_devices.iter().all(|h| h.status == HostStatus::Offline));
}
