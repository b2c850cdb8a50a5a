//! End-to-end dispatcher scenarios over real framed TCP connections.
//!
//! Each test runs a dispatcher against a temp-file store and drives it
//! with hand-rolled worker connections, asserting observable state
//! through a second store handle on the same database.

use std::time::Duration;

use chrono::Utc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use tunecrawl::abc::ParsedTune;
use tunecrawl::dispatcher::{Dispatcher, DispatcherConfig};
use tunecrawl::intervals::intervals_from_pitches;
use tunecrawl::protocol::{
    encode_document, read_message, write_message, AssignmentPayload, DispatcherMessage,
    FailureKind, FetchOutcome, IndexOutcome, ParseOutcome, TuneIntervals, WorkOutcome,
    WorkerFailure, WorkerMessage, WorkerRole,
};
use tunecrawl::store::{Store, UrlStatus};

const ABC_BODY: &[u8] = b"X:1\nT:Reel\nK:Gmaj\nABC";

struct TestPipeline {
    _dir: tempfile::TempDir,
    store: Store,
    addr: String,
    shutdown: CancellationToken,
}

impl TestPipeline {
    /// Starts a dispatcher over a fresh store with test-friendly timings.
    async fn start(tweak: impl FnOnce(&mut DispatcherConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("crawler.db");

        let mut config = DispatcherConfig {
            port: 0,
            cooldown_seconds: 0,
            sweep_interval_seconds: 1,
            log_scan_interval_seconds: 3600,
            idle_backoff_ms: 50,
            log_directory: dir.path().join("logs"),
            ..Default::default()
        };
        tweak(&mut config);

        let dispatcher = Dispatcher::bind(Store::open(&db_path).unwrap(), config)
            .await
            .unwrap();
        let addr = dispatcher.local_addr().unwrap().to_string();

        let shutdown = CancellationToken::new();
        tokio::spawn(dispatcher.run(shutdown.clone()));

        Self {
            _dir: dir,
            store: Store::open(&db_path).unwrap(),
            addr,
            shutdown,
        }
    }

    /// Polls the store until `pred` holds or the timeout expires.
    async fn wait_until(&self, what: &str, mut pred: impl FnMut(&Store) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if pred(&self.store) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestPipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct WorkerConn {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl WorkerConn {
    async fn connect(addr: &str, role: WorkerRole, id: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        write_message(
            &mut writer,
            &WorkerMessage::Hello {
                role,
                id: id.to_string(),
            },
        )
        .await
        .unwrap();
        Self { reader, writer }
    }

    async fn request(&mut self) -> DispatcherMessage {
        write_message(&mut self.writer, &WorkerMessage::Request)
            .await
            .unwrap();
        read_message(&mut self.reader).await.unwrap().unwrap()
    }

    /// Requests until an assignment arrives, sleeping through idle hints.
    async fn request_until_assigned(&mut self) -> (u64, AssignmentPayload) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            match self.request().await {
                DispatcherMessage::Assign {
                    assignment_id,
                    payload,
                } => return (assignment_id, payload),
                DispatcherMessage::Idle { backoff_ms } => {
                    assert!(
                        tokio::time::Instant::now() < deadline,
                        "no assignment arrived"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms.min(50))).await;
                }
                DispatcherMessage::Shutdown => panic!("unexpected shutdown"),
            }
        }
    }

    async fn send_result(&mut self, assignment_id: u64, outcome: WorkOutcome) {
        write_message(
            &mut self.writer,
            &WorkerMessage::Result {
                assignment_id,
                outcome,
            },
        )
        .await
        .unwrap();
    }
}

fn fetch_success(body: &[u8], mime: &str, links: &[&str]) -> WorkOutcome {
    WorkOutcome::Fetch(FetchOutcome {
        http_status: Some(200),
        mime_type: Some(mime.to_string()),
        size_bytes: body.len() as u64,
        document: encode_document(body),
        links: links.iter().map(|l| l.to_string()).collect(),
        error: None,
    })
}

fn fetch_timeout() -> WorkOutcome {
    WorkOutcome::Fetch(FetchOutcome {
        error: Some(WorkerFailure::new(FailureKind::Timeout, "deadline elapsed")),
        ..Default::default()
    })
}

#[tokio::test]
async fn seed_and_crawl_a_single_abc_file() {
    let pipeline = TestPipeline::start(|_| {}).await;
    pipeline
        .store
        .insert_url("http://h1/x.abc", 0, Utc::now())
        .unwrap();

    // Fetch.
    let mut fetcher = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f1").await;
    let (assignment, payload) = fetcher.request_until_assigned().await;
    let AssignmentPayload::Fetch { url_id, url } = payload else {
        panic!("fetcher got a non-fetch payload");
    };
    assert_eq!(url, "http://h1/x.abc");
    fetcher
        .send_result(
            assignment,
            fetch_success(ABC_BODY, "text/vnd.abc", &["http://h2/more.html"]),
        )
        .await;
    pipeline
        .wait_until("url fetched", |store| {
            store.url_by_id(url_id).unwrap().unwrap().status == UrlStatus::Fetched
        })
        .await;

    // The extracted link is queued one hop further out.
    let counts = pipeline.store.url_status_counts().unwrap();
    let new_count = counts
        .iter()
        .find(|(status, _)| *status == UrlStatus::New)
        .map(|(_, count)| *count)
        .unwrap_or(0);
    assert_eq!(new_count, 1);

    // Parse.
    let mut parser = WorkerConn::connect(&pipeline.addr, WorkerRole::Parser, "p1").await;
    let (assignment, payload) = parser.request_until_assigned().await;
    let AssignmentPayload::Parse { url_id: parse_id, document, .. } = payload else {
        panic!("parser got a non-parse payload");
    };
    assert_eq!(parse_id, url_id);
    assert_eq!(
        tunecrawl::protocol::decode_document(&document).unwrap(),
        ABC_BODY
    );
    parser
        .send_result(
            assignment,
            WorkOutcome::Parse(ParseOutcome {
                tunes: vec![ParsedTune {
                    title: "Reel".to_string(),
                    key: Some("Gmaj".to_string()),
                    tune_body: "ABC".to_string(),
                    pitches: "67,69,71".to_string(),
                    ..Default::default()
                }],
                error: None,
            }),
        )
        .await;
    pipeline
        .wait_until("url parsed", |store| {
            let row = store.url_by_id(url_id).unwrap().unwrap();
            row.status == UrlStatus::Parsed && row.has_abc
        })
        .await;

    // Index.
    let mut indexer = WorkerConn::connect(&pipeline.addr, WorkerRole::Indexer, "i1").await;
    let (assignment, payload) = indexer.request_until_assigned().await;
    let AssignmentPayload::Index { tunebook_id, tunes } = payload else {
        panic!("indexer got a non-index payload");
    };
    assert_eq!(tunes.len(), 1);
    assert_eq!(tunes[0].pitches, "67,69,71");
    let vector = intervals_from_pitches(&tunes[0].pitches);
    assert!(vector.starts_with("2.0, 2.0"));
    indexer
        .send_result(
            assignment,
            WorkOutcome::Index(IndexOutcome {
                intervals: vec![TuneIntervals {
                    tune_id: tunes[0].tune_id,
                    intervals: vector.clone(),
                }],
                error: None,
            }),
        )
        .await;

    pipeline
        .wait_until("url indexed", |store| {
            store.url_by_id(url_id).unwrap().unwrap().status == UrlStatus::Indexed
        })
        .await;
    assert_eq!(
        pipeline.store.tune_intervals(tunes[0].tune_id).unwrap(),
        Some(vector)
    );
    assert_eq!(
        pipeline.store.tunebook_state(tunebook_id).unwrap().unwrap().0,
        tunecrawl::store::TunebookStatus::Indexed
    );
}

#[tokio::test]
async fn retry_ladder_marks_url_error_and_disables_host() {
    let pipeline = TestPipeline::start(|_| {}).await;
    pipeline
        .store
        .insert_url("http://slow.example/x", 0, Utc::now())
        .unwrap();

    let mut fetcher = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f1").await;
    for attempt in 1..=3u32 {
        let (assignment, _) = fetcher.request_until_assigned().await;
        fetcher.send_result(assignment, fetch_timeout()).await;

        pipeline
            .wait_until("retry recorded", |store| {
                store
                    .url_by_name("http://slow.example/x")
                    .unwrap()
                    .unwrap()
                    .retries
                    == attempt
            })
            .await;
    }

    pipeline
        .wait_until("url error after three timeouts", |store| {
            store
                .url_status_counts()
                .unwrap()
                .iter()
                .any(|(status, count)| *status == UrlStatus::Error && *count == 1)
        })
        .await;
    pipeline
        .wait_until("host disabled for timeouts", |store| {
            store
                .host_by_name("slow.example")
                .unwrap()
                .map(|host| host.disabled && host.disabled_reason.as_deref() == Some("timeout"))
                .unwrap_or(false)
        })
        .await;
}

#[tokio::test]
async fn abc_tier_preempts_older_urls() {
    let pipeline = TestPipeline::start(|_| {}).await;
    let t0 = Utc::now();
    for i in 0..20 {
        pipeline
            .store
            .insert_url(&format!("http://h{i}/page.html"), 0, t0)
            .unwrap();
    }
    pipeline
        .store
        .insert_url(
            "http://habc/reel.abc",
            0,
            t0 + chrono::Duration::seconds(100),
        )
        .unwrap();

    let mut fetcher = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f1").await;
    let (_, payload) = fetcher.request_until_assigned().await;
    let AssignmentPayload::Fetch { url, .. } = payload else {
        panic!("expected a fetch payload");
    };
    assert_eq!(url, "http://habc/reel.abc");
}

#[tokio::test]
async fn startup_recovery_requeues_dispatched_urls() {
    // A URL stuck in `dispatched` from a crashed run...
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawler.db");
    {
        let store = Store::open(&db_path).unwrap();
        store.insert_url("http://h1/y", 0, Utc::now()).unwrap();
        store
            .claim_next_fetch(Utc::now(), chrono::Duration::zero(), ".abc")
            .unwrap()
            .unwrap();
    }

    // ...is handed out again after the dispatcher restarts.
    let config = DispatcherConfig {
        port: 0,
        cooldown_seconds: 0,
        idle_backoff_ms: 50,
        log_directory: dir.path().join("logs"),
        ..Default::default()
    };
    let dispatcher = Dispatcher::bind(Store::open(&db_path).unwrap(), config)
        .await
        .unwrap();
    let addr = dispatcher.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(dispatcher.run(shutdown.clone()));

    let mut fetcher = WorkerConn::connect(&addr, WorkerRole::Fetcher, "f1").await;
    let (_, payload) = fetcher.request_until_assigned().await;
    let AssignmentPayload::Fetch { url, .. } = payload else {
        panic!("expected a fetch payload");
    };
    assert_eq!(url, "http://h1/y");
    shutdown.cancel();
}

#[tokio::test]
async fn liveness_sweep_reclaims_lost_assignment() {
    let pipeline = TestPipeline::start(|config| {
        config.inflight_ttl_seconds = 1;
        config.sweep_interval_seconds = 1;
    })
    .await;
    pipeline
        .store
        .insert_url("http://h1/z", 0, Utc::now())
        .unwrap();

    // A worker claims the URL and dies without reporting.
    {
        let mut doomed = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f1").await;
        let (_, payload) = doomed.request_until_assigned().await;
        assert!(matches!(payload, AssignmentPayload::Fetch { .. }));
    }

    // The sweep reverts the row after the TTL and a fresh worker gets it.
    let mut fetcher = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f2").await;
    let (_, payload) = fetcher.request_until_assigned().await;
    let AssignmentPayload::Fetch { url, .. } = payload else {
        panic!("expected a fetch payload");
    };
    assert_eq!(url, "http://h1/z");
}

#[tokio::test]
async fn dns_failure_disables_host_without_burning_retries() {
    let pipeline = TestPipeline::start(|_| {}).await;
    pipeline
        .store
        .insert_url("http://dead.example/x", 0, Utc::now())
        .unwrap();

    let mut fetcher = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f1").await;
    let (assignment, _) = fetcher.request_until_assigned().await;
    fetcher
        .send_result(
            assignment,
            WorkOutcome::Fetch(FetchOutcome {
                error: Some(WorkerFailure::new(FailureKind::Dns, "no such host")),
                ..Default::default()
            }),
        )
        .await;

    pipeline
        .wait_until("host disabled for dns", |store| {
            store
                .host_by_name("dead.example")
                .unwrap()
                .map(|host| host.disabled && host.disabled_reason.as_deref() == Some("dns"))
                .unwrap_or(false)
        })
        .await;

    // The URL went back to `new` with its retries intact, and stays
    // unscheduled because the host gate now rejects it.
    let row = pipeline
        .store
        .url_by_name("http://dead.example/x")
        .unwrap()
        .unwrap();
    assert_eq!(row.status, UrlStatus::New);
    assert_eq!(row.retries, 0);

    match fetcher.request().await {
        DispatcherMessage::Idle { .. } => {}
        other => panic!("expected idle for a disabled host, got {other:?}"),
    }
}

#[tokio::test]
async fn http_4xx_is_terminal_without_retry() {
    let pipeline = TestPipeline::start(|_| {}).await;
    pipeline
        .store
        .insert_url("http://h1/gone", 0, Utc::now())
        .unwrap();

    let mut fetcher = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f1").await;
    let (assignment, _) = fetcher.request_until_assigned().await;
    fetcher
        .send_result(
            assignment,
            WorkOutcome::Fetch(FetchOutcome {
                http_status: Some(404),
                error: Some(WorkerFailure::new(FailureKind::Http, "HTTP 404")),
                ..Default::default()
            }),
        )
        .await;

    pipeline
        .wait_until("url error after 404", |store| {
            store
                .url_by_name("http://h1/gone")
                .unwrap()
                .map(|row| {
                    row.status == UrlStatus::Error
                        && row.retries == 0
                        && row.http_status == Some(404)
                })
                .unwrap_or(false)
        })
        .await;
}

#[tokio::test]
async fn shutdown_is_broadcast_to_connected_workers() {
    let pipeline = TestPipeline::start(|_| {}).await;
    let mut fetcher = WorkerConn::connect(&pipeline.addr, WorkerRole::Fetcher, "f1").await;

    // Give the hello a moment to land, then cancel the dispatcher.
    tokio::time::sleep(Duration::from_millis(100)).await;
    pipeline.shutdown.cancel();

    let deadline = Duration::from_secs(5);
    let msg = tokio::time::timeout(deadline, read_message::<_, DispatcherMessage>(&mut fetcher.reader))
        .await
        .expect("dispatcher should say goodbye")
        .unwrap();
    assert_eq!(msg, Some(DispatcherMessage::Shutdown));
}
