//! Load runs against real listeners on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use knock::{AcceptLoop, LoopSummary, ServerAddress, ShutdownFlag, UnblockProbe};
use knock_loadtest::{Report, burst_test, sustained_test};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningServer {
    addr: SocketAddr,
    flag: ShutdownFlag,
    task: JoinHandle<LoopSummary>,
}

impl RunningServer {
    fn start() -> Self {
        let flag = ShutdownFlag::new();
        let address = ServerAddress::from("127.0.0.1:0".parse::<SocketAddr>().unwrap());
        let mut accept_loop = AcceptLoop::bind(&address, 64, flag.clone()).unwrap();
        let addr = accept_loop.local_addr().unwrap();
        let task = tokio::spawn(async move { accept_loop.run().await });
        Self { addr, flag, task }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn stop(self) -> LoopSummary {
        self.flag.request_shutdown();
        let _ = UnblockProbe::new(&ServerAddress::from(self.addr))
            .unblock()
            .await;
        tokio::time::timeout(JOIN_TIMEOUT, self.task)
            .await
            .expect("accept loop did not exit")
            .unwrap()
    }
}

/// Serves every connection on its own task and records the peak number open.
async fn spawn_counting_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let open = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let reported = Arc::clone(&peak);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let open = Arc::clone(&open);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let now = open.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                // Released before replying: the client may start its next request
                // as soon as the body arrives.
                open.fetch_sub(1, Ordering::SeqCst);

                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, reported)
}

fn closed_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

#[tokio::test]
async fn test_burst_against_listener_reads_every_response() {
    let server = RunningServer::start();

    let (results, _elapsed) = burst_test(&server.url("/load"), 20, 4).await.unwrap();
    assert_eq!(results.len(), 20);
    assert!(results.iter().all(|r| r.is_success() && r.status == Some(200)));

    let mut nums: Vec<usize> = results.iter().map(|r| r.request_num).collect();
    nums.sort_unstable();
    assert_eq!(nums, (1..=20).collect::<Vec<_>>());

    let summary = server.stop().await;
    assert_eq!(summary.responded, 20);
}

#[tokio::test]
async fn test_burst_keeps_at_most_concurrency_in_flight() {
    let (addr, peak) = spawn_counting_server().await;

    let (results, _elapsed) = burst_test(&format!("http://{addr}/"), 24, 3).await.unwrap();
    assert!(results.iter().all(|r| r.status == Some(200)));
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 3, "peak in flight was {peak}");
}

#[tokio::test]
async fn test_sustained_against_listener() {
    let server = RunningServer::start();

    let (results, elapsed) = sustained_test(&server.url("/steady"), 5, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.status == Some(200)));
    assert!(elapsed >= Duration::from_millis(160));

    server.stop().await;
}

#[tokio::test]
async fn test_refused_requests_are_reported_as_errors() {
    let (results, _elapsed) = burst_test(&closed_url(), 3, 2).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status.is_none() && r.error.is_some()));

    let report = Report::new("BURST", &results, Duration::from_secs(1));
    assert_eq!(report.successful, 0);
    assert_eq!(report.failed(), 3);
    assert_eq!(report.errors.iter().map(|(_, n)| n).sum::<usize>(), 3);
}
