//! End-to-end generation flow: a real listener, stub worker scripts, and
//! the real client consumer reading the SSE stream over the wire.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relive_client::{ClientError, ConsumerConfig, GenerationClient, StreamConsumer, StreamOutcome};
use relive_db::{Database, JobRecord, JobStatus};
use relive_server::{create_app, AppState, Config};

struct TestServer {
    base_url: String,
    state: Arc<AppState>,
    dir: tempfile::TempDir,
}

async fn spawn_server(worker_script: &str) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("worker.sh");
    std::fs::write(&script_path, worker_script).unwrap();

    let config = Config {
        port: 0,
        data_dir: dir.path().to_path_buf(),
        db_path: PathBuf::new(),
        python_bin: "/bin/sh".to_string(),
        worker_script: script_path,
    };
    let db = Database::new_in_memory().await.unwrap();
    let state = AppState::new(db, config);
    let app = create_app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        state,
        dir,
    }
}

async fn seed_job(server: &TestServer, id: &str) {
    let input = server.dir.path().join(format!("{id}.csv"));
    std::fs::write(&input, "lat,lon\n48.1,11.5\n48.2,11.6\n").unwrap();
    server
        .state
        .db
        .insert_job(&JobRecord::pending(id, "user-1", "track.csv", input.display().to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn full_success_roundtrip() {
    let server = spawn_server(concat!(
        "#!/bin/sh\n",
        "echo '= RENDERING (fallback banner) ='\n",
        "printf 'PROGRESS:{\"stage\":\"rendering\",\"progress\":85}\\n'\n",
        "mkdir -p \"$2/videos\"\n",
        "printf 'video-bytes' > \"$2/videos/relive_full_quality.mp4\"\n",
        "printf 'PROGRESS:{\"stage\":\"success\",\"progress\":100,\"message\":\"Video generated successfully!\"}\\n'\n",
    ))
    .await;
    seed_job(&server, "job-1").await;

    let client = GenerationClient::new(&server.base_url, "user-1");
    let consumer = StreamConsumer::new(ConsumerConfig::default());
    let response = client.start("job-1").await.expect("stream should open");

    let mut events = Vec::new();
    let outcome = consumer.consume(response, |ev| events.push(ev.clone())).await;

    let StreamOutcome::Success { artifact, message } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    let artifact = artifact.expect("artifact reference in terminal event");
    assert!(artifact.ends_with("job-1.mp4"), "artifact: {artifact}");
    assert_eq!(message.as_deref(), Some("Video generated successfully!"));
    assert!(std::path::Path::new(&artifact).is_file());

    // The banner line produced a marker-fallback event before the
    // structured ones.
    assert!(events
        .iter()
        .any(|ev| ev.step.as_deref() == Some("Rendering video") && ev.progress == Some(75)));

    let job = server.state.db.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.progress, 100);
    assert_eq!(job.artifact_path.as_deref(), Some(artifact.as_str()));

    // Terminal jobs refuse a rerun; only a fresh upload restarts.
    match client.start("job-1").await {
        Err(ClientError::Rejected { status, .. }) => assert_eq!(status, 409),
        other => panic!("expected 409 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn worker_failure_surfaces_stderr_tail() {
    let server = spawn_server(concat!(
        "#!/bin/sh\n",
        "printf 'PROGRESS:{\"stage\":\"processing\",\"progress\":25,\"step\":\"Stop Detection\"}\\n'\n",
        "echo 'KeyError: Speed column missing' >&2\n",
        "exit 2\n",
    ))
    .await;
    seed_job(&server, "job-1").await;

    let client = GenerationClient::new(&server.base_url, "user-1");
    let consumer = StreamConsumer::new(ConsumerConfig::default());
    let response = client.start("job-1").await.unwrap();
    let outcome = consumer.consume(response, |_| {}).await;

    let StreamOutcome::WorkerFailed { message } = outcome else {
        panic!("expected worker failure, got {outcome:?}");
    };
    assert!(message.contains("Speed column missing"), "message: {message}");

    // The consumer bails on the forwarded stderr frame, which can race the
    // exit handler's terminal write; poll for the final record.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let job = loop {
        let job = server.state.db.get_job("job-1").await.unwrap().unwrap();
        if job.status == JobStatus::Error {
            break job;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "job never reached error status (last: {:?})",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert!(job.artifact_path.is_none());
}

#[tokio::test]
async fn exit_zero_without_artifact_ends_in_error() {
    let server = spawn_server("#!/bin/sh\necho done\nexit 0\n").await;
    seed_job(&server, "job-1").await;

    let client = GenerationClient::new(&server.base_url, "user-1");
    let consumer = StreamConsumer::new(ConsumerConfig::default());
    let response = client.start("job-1").await.unwrap();
    let outcome = consumer.consume(response, |_| {}).await;

    let StreamOutcome::WorkerFailed { message } = outcome else {
        panic!("expected worker failure, got {outcome:?}");
    };
    assert!(message.contains("no artifact"), "message: {message}");

    let job = server.state.db.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
}

#[tokio::test]
async fn unknown_job_is_rejected_before_streaming() {
    let server = spawn_server("#!/bin/sh\n").await;
    let client = GenerationClient::new(&server.base_url, "user-1");
    match client.start("no-such-job").await {
        Err(ClientError::Rejected { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected 404 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn client_cancel_terminates_the_worker() {
    let server = spawn_server(concat!(
        "#!/bin/sh\n",
        "trap 'echo terminated > \"$2/term.txt\"; exit 143' TERM\n",
        "printf 'PROGRESS:{\"stage\":\"processing\",\"progress\":15,\"step\":\"Map Matching\"}\\n'\n",
        "i=0\n",
        "while [ $i -lt 300 ]; do sleep 0.1 & wait $!; i=$((i+1)); done\n",
    ))
    .await;
    seed_job(&server, "job-1").await;

    let client = GenerationClient::new(&server.base_url, "user-1");
    let consumer = StreamConsumer::new(ConsumerConfig::default());
    let response = client.start("job-1").await.unwrap();

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let reader = {
        let consumer = consumer.clone();
        tokio::spawn(async move {
            consumer
                .consume(response, move |ev| {
                    let _ = event_tx.send(ev.clone());
                })
                .await
        })
    };

    // Wait until the worker is demonstrably running, then cancel.
    tokio::time::timeout(Duration::from_secs(10), event_rx.recv())
        .await
        .expect("no progress event before timeout")
        .expect("stream closed early");
    consumer.cancel();
    // A second cancel is a safe no-op.
    consumer.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("consumer did not stop after cancel")
        .unwrap();
    assert_eq!(outcome, StreamOutcome::Cancelled);

    // The server observes the disconnect and SIGTERMs the worker within
    // the grace window.
    let marker = server.state.config.work_dir("job-1").join("term.txt");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !marker.is_file() {
        assert!(
            std::time::Instant::now() < deadline,
            "worker was not terminated after client cancel"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // The record reflects genuine partial completion, not a false error,
    // and the session slot frees up.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while server.state.active.read().unwrap().contains_key("job-1") {
        assert!(std::time::Instant::now() < deadline, "session never released");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let job = server.state.db.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.progress, 15);
}
