use anyhow::Result;
use clap::Parser;
use skier_load::{
    cli::Args, latency_log::CSV_HEADER, results::write_csv, transport::HttpSender, LoadTestConfig,
    LoadTestRunner,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the local endpoint saw.
#[derive(Default)]
struct Observed {
    requests: AtomicUsize,
    request_lines: Mutex<Vec<String>>,
    bodies: Mutex<Vec<String>>,
}

/// Keep-alive HTTP/1.1 endpoint. Answers `500` to every `fail_every`-th
/// request (never, when zero) and `201 Created` otherwise.
async fn spawn_endpoint(fail_every: usize) -> (SocketAddr, Arc<Observed>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let observed = Arc::new(Observed::default());
    let state = Arc::clone(&observed);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    // Serve every complete request already buffered.
                    while let Some(end) = find_header_end(&buf) {
                        let head = String::from_utf8_lossy(&buf[..end]).to_string();
                        let length = head
                            .lines()
                            .find_map(|l| {
                                l.to_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().to_string())
                            })
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() < end + 4 + length {
                            break;
                        }
                        let body =
                            String::from_utf8_lossy(&buf[end + 4..end + 4 + length]).to_string();
                        buf.drain(..end + 4 + length);

                        let n = state.requests.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(line) = head.lines().next() {
                            state.request_lines.lock().unwrap().push(line.to_string());
                        }
                        state.bodies.lock().unwrap().push(body);

                        let status = if fail_every > 0 && n % fail_every == 0 {
                            "500 Internal Server Error"
                        } else {
                            "201 Created"
                        };
                        let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status);
                        if stream.write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                }
            });
        }
    });
    (addr, observed)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn config_for(addr: SocketAddr, extra: &[&str]) -> Result<LoadTestConfig> {
    let base_url = format!("http://{}/Server_war/skiers", addr);
    let mut argv = vec![
        "skier-load",
        "--base-url",
        base_url.as_str(),
        "-c",
        "8",
        "--timeout",
        "5s",
    ];
    argv.extend_from_slice(extra);
    LoadTestConfig::from_args(&Args::parse_from(argv))
}

/// Two phases against a healthy local endpoint: every request arrives, is
/// counted once, and lands in the CSV.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn phased_run_against_local_endpoint() -> Result<()> {
    let (addr, observed) = spawn_endpoint(0).await;
    let config = config_for(addr, &["--phase", "4x10", "--phase", "8x5", "--seed", "42"])?;
    let sender = Arc::new(HttpSender::new(&config.transport)?);

    let results = LoadTestRunner::new(config, sender).run().await?;
    let report = &results.report;

    assert_eq!(report.transport, "http");
    assert_eq!(report.expected_total, 80);
    assert_eq!(report.counters.success, 80);
    assert_eq!(report.counters.failure, 0);
    assert_eq!(observed.requests.load(Ordering::SeqCst), 80);
    assert_eq!(report.latency.as_ref().map(|l| l.count), Some(80));

    for line in observed.request_lines.lock().unwrap().iter() {
        assert!(line.starts_with("POST /Server_war/skiers/"), "{}", line);
        assert!(line.contains("/seasons/2024/days/"), "{}", line);
        assert!(line.contains("/skiers/"), "{}", line);
    }
    for body in observed.bodies.lock().unwrap().iter() {
        let json: serde_json::Value = serde_json::from_str(body)?;
        let time = json["time"].as_u64().unwrap();
        let lift = json["liftID"].as_u64().unwrap();
        assert!((1..=360).contains(&time));
        assert!((1..=40).contains(&lift));
    }

    let dir = tempfile::TempDir::new()?;
    let csv = dir.path().join("output.csv");
    write_csv(&csv, &results.records)?;
    let contents = std::fs::read_to_string(&csv)?;
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some(CSV_HEADER));
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 80);
    assert!(rows.iter().all(|row| row.ends_with(",201") && row.contains(",POST,")));
    Ok(())
}

/// Every fourth response is a 500; the retry policy absorbs them so every
/// logical request still succeeds, and the endpoint sees the extra attempts.
/// One worker keeps the failing responses from landing on the same request.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_are_retried() -> Result<()> {
    let (addr, observed) = spawn_endpoint(4).await;
    let config = config_for(addr, &["--phase", "1x100"])?;
    let sender = Arc::new(HttpSender::new(&config.transport)?);

    let results = LoadTestRunner::new(config, sender).run().await?;

    assert_eq!(results.report.counters.success, 100);
    assert_eq!(results.report.counters.failure, 0);
    assert_eq!(observed.requests.load(Ordering::SeqCst), 133);
    Ok(())
}

/// Nothing listens on the port: every request fails, the report is still
/// produced, and no latency statistics are reported.
#[tokio::test]
async fn unreachable_endpoint_reports_failures() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let config = config_for(addr, &["--phase", "2x3", "--retry-limit", "2"])?;
    let sender = Arc::new(HttpSender::new(&config.transport)?);

    let results = LoadTestRunner::new(config, sender).run().await?;

    assert_eq!(results.report.counters.failure, 6);
    assert_eq!(results.report.counters.success, 0);
    assert!(results.report.latency.is_none());
    assert!(results.records.is_empty());
    Ok(())
}
