use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use broker::Broker;
use common::{JsonLines, Submission, ToWorker, WireError};
use server::Server;
use server::config::{BrokerSettings, ListenConfig, ProblemsConfig, ServerAppConfig};
use tokio::net::TcpStream;

struct TestServer {
    broker: Arc<Broker>,
    worker_addr: String,
    submit_addr: String,
    _problems: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let problems = tempfile::tempdir().unwrap();
        let sum = problems.path().join("sum");
        std::fs::create_dir_all(&sum).unwrap();
        std::fs::write(sum.join("judge.c"), "int main(){return 0;}").unwrap();
        std::fs::write(sum.join("input.txt"), "1 2\n").unwrap();

        let config = ServerAppConfig {
            server: ListenConfig {
                worker_addr: "127.0.0.1:0".into(),
                submit_addr: "127.0.0.1:0".into(),
            },
            broker: BrokerSettings {
                handoff_timeout_secs: 2,
                heartbeat_interval_secs: 60,
                reply_timeout_secs: 5,
            },
            problems: ProblemsConfig {
                path: Some(problems.path().to_string_lossy().into_owned()),
            },
            ..Default::default()
        };

        let server = Server::bind(&config).await.unwrap();
        let broker = server.broker();
        let worker_addr = server.worker_addr().unwrap().to_string();
        let submit_addr = server.submit_addr().unwrap().to_string();
        tokio::spawn(server.serve());

        Self {
            broker,
            worker_addr,
            submit_addr,
            _problems: problems,
        }
    }

    async fn connect_worker(&self) -> JsonLines<TcpStream> {
        let before = self.broker.live_workers();
        let stream = TcpStream::connect(&self.worker_addr).await.unwrap();
        for _ in 0..100 {
            if self.broker.live_workers() > before {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(self.broker.live_workers() > before, "worker never registered");
        JsonLines::new(stream)
    }

    async fn submit(&self, problem_id: &str) -> Vec<String> {
        let stream = TcpStream::connect(&self.submit_addr).await.unwrap();
        let mut conn = JsonLines::new(stream);
        conn.send(&Submission::new(problem_id, b"print(3)".to_vec()))
            .await
            .unwrap();

        let mut received = Vec::new();
        loop {
            match conn.recv::<String>().await {
                Ok(msg) => received.push(msg),
                Err(WireError::Closed) => break,
                Err(e) => panic!("unexpected link error: {e}"),
            }
        }
        received
    }
}

fn assert_unpacked_problem(targz: &[u8]) {
    let dest = tempfile::tempdir().unwrap();
    common::archive::unpack(targz, dest.path()).unwrap();
    let judge = Path::new("judge.c");
    assert!(dest.path().join(judge).exists());
    assert_eq!(
        std::fs::read_to_string(dest.path().join("input.txt")).unwrap(),
        "1 2\n"
    );
}

#[tokio::test]
async fn test_submission_is_judged_by_remote_worker() {
    let app = TestServer::spawn().await;
    let mut worker = app.connect_worker().await;

    let worker_task = tokio::spawn(async move {
        let ToWorker::Submission(sub) = worker.recv::<ToWorker>().await.unwrap() else {
            panic!("expected a submission first");
        };
        assert_eq!(sub.problem_id, "sum");
        assert_eq!(sub.data, b"print(3)");

        worker.send("send problem").await.unwrap();
        let ToWorker::Problem(problem) = worker.recv::<ToWorker>().await.unwrap() else {
            panic!("expected problem contents");
        };
        assert_eq!(problem.id, "sum");
        assert_unpacked_problem(&problem.targz);

        worker.send("Compiling...").await.unwrap();
        worker.send("Test 1... passed").await.unwrap();
        worker.send("VEREDICT\nAccepted").await.unwrap();
        worker
    });

    let received = app.submit("sum").await;
    assert_eq!(received, vec!["Compiling...", "Test 1... passed", "Accepted"]);
    worker_task.await.unwrap();
}

#[tokio::test]
async fn test_worker_error_reaches_client_verbatim() {
    let app = TestServer::spawn().await;
    let mut worker = app.connect_worker().await;

    let worker_task = tokio::spawn(async move {
        let _ = worker.recv::<ToWorker>().await.unwrap();
        worker.send("ok").await.unwrap();
        worker
            .send("ERROR: Eval error: judge is not valid")
            .await
            .unwrap();
        worker
    });

    let received = app.submit("sum").await;
    assert_eq!(received, vec!["ERROR: Eval error: judge is not valid"]);
    worker_task.await.unwrap();
}

#[tokio::test]
async fn test_no_workers_fails_fast() {
    let app = TestServer::spawn().await;
    let received = app.submit("sum").await;
    assert_eq!(received, vec!["ERROR: no workers available"]);
}

#[tokio::test]
async fn test_unknown_problem_fails_once_worker_asks_for_it() {
    let app = TestServer::spawn().await;
    let mut worker = app.connect_worker().await;

    let worker_task = tokio::spawn(async move {
        let ToWorker::Submission(sub) = worker.recv::<ToWorker>().await.unwrap() else {
            panic!("expected a submission first");
        };
        assert_eq!(sub.problem_id, "missing");
        worker.send("send problem").await.unwrap();
        // The broker has nothing to send and hangs up.
        let res = tokio::time::timeout(Duration::from_secs(2), worker.recv::<ToWorker>()).await;
        assert!(matches!(res, Ok(Err(WireError::Closed))));
    });

    let received = app.submit("missing").await;
    assert_eq!(received.len(), 1);
    assert!(received[0].starts_with("ERROR: Cannot send problem"), "{received:?}");
    assert!(received[0].contains("missing"), "{received:?}");
    worker_task.await.unwrap();
}

#[tokio::test]
async fn test_worker_with_local_problem_judges_unknown_id() {
    let app = TestServer::spawn().await;
    let mut worker = app.connect_worker().await;

    let worker_task = tokio::spawn(async move {
        let _ = worker.recv::<ToWorker>().await.unwrap();
        worker.send("ok").await.unwrap();
        worker.send("VEREDICT\nAccepted").await.unwrap();
        worker
    });

    let received = app.submit("local-only").await;
    assert_eq!(received, vec!["Accepted"]);
    worker_task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disconnects_workers() {
    let app = TestServer::spawn().await;
    let mut worker = app.connect_worker().await;

    app.broker.shutdown();
    let res = tokio::time::timeout(Duration::from_secs(2), worker.recv::<String>()).await;
    assert!(matches!(res, Ok(Err(WireError::Closed))));
    for _ in 0..100 {
        if app.broker.live_workers() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(app.broker.live_workers(), 0);
}
