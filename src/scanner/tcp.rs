//! Bounded-concurrency TCP connect scanner

use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};

use crate::error::ProbeError;

/// Opens a TCP connection under `limit`.
pub async fn connect(ip: IpAddr, port: u16, limit: Duration) -> Result<TcpStream, ProbeError> {
    let addr = SocketAddr::new(ip, port);
    match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProbeError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(ProbeError::timeout(format!("connect {addr}"), limit)),
    }
}

/// True when a TCP connect to `ip:port` completes within `limit`.
pub async fn tcp_check(ip: IpAddr, port: u16, limit: Duration) -> bool {
    connect(ip, port, limit).await.is_ok()
}

/// Connect round trip in milliseconds, rounded to 2 decimals.
pub async fn tcp_latency_ms(ip: IpAddr, port: u16, limit: Duration) -> Result<f64, ProbeError> {
    let started = Instant::now();
    let _stream = connect(ip, port, limit).await?;
    Ok(elapsed_ms(started))
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    round2(started.elapsed().as_secs_f64() * 1000.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Probes every port in `ports` on one host.
///
/// At most `worker_cap` connects are in flight no matter how many ports are
/// requested. Refused or timed-out connects record `false`; nothing is
/// propagated as an error.
pub async fn scan_ports(
    ip: IpAddr,
    ports: &[u16],
    connect_timeout: Duration,
    worker_cap: usize,
) -> BTreeMap<u16, bool> {
    scan_ports_with(ip, ports, worker_cap, move |port| tcp_check(ip, port, connect_timeout)).await
}

/// Runs `check` for every port under the `worker_cap` semaphore.
pub(crate) async fn scan_ports_with<F, Fut>(
    ip: IpAddr,
    ports: &[u16],
    worker_cap: usize,
    check: F,
) -> BTreeMap<u16, bool>
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(worker_cap.max(1)));
    let results: Arc<Mutex<BTreeMap<u16, bool>>> = Arc::new(Mutex::new(BTreeMap::new()));

    let mut handles = Vec::with_capacity(ports.len());

    for &port in ports {
        let semaphore = Arc::clone(&semaphore);
        let results = Arc::clone(&results);
        let probe = check(port);

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    crate::log_warn!("Port semaphore acquire failed for {}:{}: {}", ip, port, e);
                    return;
                }
            };

            let open = probe.await;
            results.lock().await.insert(port, open);
        });

        handles.push(handle);
    }

    for handle in handles {
        if let Err(e) = handle.await {
            crate::log_warn!("Port probe task failed for {}: {}", ip, e);
        }
    }

    let mut map = results.lock().await.clone();
    // A panicked worker leaves a hole; report those ports closed.
    for &port in ports {
        map.entry(port).or_insert(false);
    }
    map
}

/// Open ports from a scan map, ascending
pub fn open_ports(scan: &BTreeMap<u16, bool>) -> Vec<u16> {
    scan.iter()
        .filter_map(|(port, open)| open.then_some(*port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn reports_listening_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let scan = scan_ports(LOCALHOST, &[open, closed], Duration::from_millis(300), 4).await;

        assert_eq!(scan.get(&open), Some(&true));
        assert_eq!(scan.get(&closed), Some(&false));
        assert_eq!(open_ports(&scan), vec![open]);
    }

    #[tokio::test]
    async fn unroutable_connect_returns_within_timeout() {
        // TEST-NET-1 is reserved and never answers.
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let started = Instant::now();
        let scan = scan_ports(ip, &[80, 443], Duration::from_millis(200), 64).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(scan.values().all(|open| !open));
    }

    #[tokio::test]
    async fn many_ports_with_small_cap_still_complete() {
        let mut listeners = Vec::new();
        for _ in 0..10 {
            listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        let ports: Vec<u16> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().port())
            .collect();

        let scan = scan_ports(LOCALHOST, &ports, Duration::from_millis(300), 2).await;

        assert_eq!(scan.len(), ports.len());
        assert!(scan.values().all(|open| *open));
    }

    #[tokio::test]
    async fn in_flight_checks_never_exceed_worker_cap() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ports: Vec<u16> = (1000..1040).collect();

        let scan = scan_ports_with(LOCALHOST, &ports, 4, |port| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                port % 2 == 0
            }
        })
        .await;

        assert_eq!(scan.len(), ports.len());
        assert_eq!(scan.values().filter(|open| **open).count(), 20);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak {peak} exceeded the cap");
        assert!(peak >= 2);
    }

    #[test]
    fn round2_truncates_to_hundredths() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(0.001), 0.0);
    }
}
