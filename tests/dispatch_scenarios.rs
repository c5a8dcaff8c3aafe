//! End-to-end command flows: in-memory tree → command channel → dispatcher →
//! built-in handlers → recording platform.

use pcctl::channels::{CommandChannel, InMemoryTree, RemoteTree, TreeOp};
use pcctl::handlers::builtin_registry;
use pcctl::platform::{PlatformCall, RecordingPlatform};
use pcctl::storage::InMemoryStore;
use pcctl::{AgentContext, Backend, Config, Dispatcher, Session};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const NOW: i64 = 1_750_000_000_000;
const CMD: &str = "users/u1/command";

struct Agent {
    tree: Arc<InMemoryTree>,
    storage: Arc<InMemoryStore>,
    platform: Arc<RecordingPlatform>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    fn new() -> Self {
        Self {
            tree: Arc::new(InMemoryTree::new()),
            storage: Arc::new(InMemoryStore::new()),
            platform: Arc::new(RecordingPlatform::new()),
            tasks: Vec::new(),
        }
    }

    fn start(&mut self) {
        let backend = Backend {
            tree: self.tree.clone(),
            storage: self.storage.clone(),
            platform: self.platform.clone(),
        };
        let ctx = Arc::new(AgentContext::new(
            Session::new("u1").unwrap(),
            &backend,
            Config::default(),
        ));
        let (tx, rx) = mpsc::channel(64);
        let channel = CommandChannel::new(self.tree.clone(), &ctx.session, 3)
            .with_resubscribe_delay(Duration::from_millis(50));
        let dispatcher =
            Dispatcher::new(ctx, Arc::new(builtin_registry())).with_clock(|| NOW);
        self.tasks.push(tokio::spawn(async move {
            let _ = channel.run(tx).await;
        }));
        self.tasks.push(tokio::spawn(dispatcher.run(rx)));
    }

    async fn settle(&self) {
        while self.tree.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    async fn command(&self, name: &str, data: Value) {
        self.tree
            .set(&format!("{CMD}/{name}"), &data)
            .await
            .unwrap();
        self.settle().await;
    }

    fn deletes_of(&self, name: &str) -> usize {
        let path = format!("{CMD}/{name}");
        self.tree
            .ops()
            .iter()
            .filter(|op| matches!(op, TreeOp::Delete(p) if *p == path))
            .count()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn lock_runs_once_and_leaves_status_alone() {
    let mut agent = Agent::new();
    agent.start();
    agent.settle().await;

    agent.command("lock", json!({"val": true, "ts": NOW})).await;

    assert_eq!(agent.platform.count(|c| *c == PlatformCall::Lock), 1);
    assert_eq!(agent.deletes_of("lock"), 1);
    assert_eq!(agent.tree.value_at(&format!("{CMD}/lock")), Value::Null);
    assert!(agent.tree.ops_under("users/u1/status").is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_shutdown_is_cleared_without_running() {
    let mut agent = Agent::new();
    agent.start();
    agent.settle().await;

    agent
        .command("shutdown", json!({"val": true, "ts": NOW - 400_000}))
        .await;

    assert_eq!(
        agent
            .platform
            .count(|c| matches!(c, PlatformCall::Shutdown(_))),
        0
    );
    assert_eq!(agent.deletes_of("shutdown"), 1);
    assert_eq!(agent.tree.value_at(&format!("{CMD}/shutdown")), Value::Null);
}

#[tokio::test(start_paused = true)]
async fn fresh_shutdown_resets_flag_first() {
    let mut agent = Agent::new();
    agent.start();
    agent.settle().await;

    agent
        .command("shutdown", json!({"val": true, "ts": NOW - 1_000}))
        .await;

    assert_eq!(
        agent.platform.calls(),
        vec![PlatformCall::Shutdown(Duration::from_secs(10))]
    );
    let ops: Vec<TreeOp> = agent.tree.ops_under(&format!("{CMD}/shutdown"));
    assert_eq!(ops.len(), 3, "{ops:?}");
    assert_eq!(
        ops[1],
        TreeOp::Set(format!("{CMD}/shutdown"), json!({"val": false}))
    );
    assert_eq!(ops[2], TreeOp::Delete(format!("{CMD}/shutdown")));
}

#[tokio::test(start_paused = true)]
async fn screenshot_produces_one_artifact_and_one_status_update() {
    let mut agent = Agent::new();
    agent.start();
    agent.settle().await;

    agent.command("screenshot", json!(true)).await;

    let objects = agent.storage.objects();
    assert_eq!(objects.len(), 1);
    let updates = agent.tree.ops_under("users/u1/status/last_screenshot");
    assert_eq!(updates.len(), 1);
    let record = agent.tree.value_at("users/u1/status/last_screenshot");
    assert_eq!(record["url"], json!(format!("memory://{}", objects[0].0)));
    assert!(record.get("error").is_none());
    assert_eq!(agent.deletes_of("screenshot"), 1);
}

#[tokio::test(start_paused = true)]
async fn backlog_is_processed_on_subscribe() {
    let mut agent = Agent::new();
    agent
        .tree
        .seed(&format!("{CMD}/kill"), json!({"val": "notepad", "ts": NOW - 5_000}));
    agent
        .tree
        .seed(&format!("{CMD}/lock"), json!({"val": true, "ts": NOW - 900_000}));
    agent.start();
    agent.settle().await;

    let expected = format!("notepad{}", std::env::consts::EXE_SUFFIX);
    assert_eq!(agent.platform.calls(), vec![PlatformCall::Kill(expected)]);
    assert_eq!(agent.tree.value_at(CMD), Value::Null);
}

#[tokio::test(start_paused = true)]
async fn failing_handler_does_not_block_later_commands() {
    let mut agent = Agent::new();
    agent.platform.fail("lock");
    agent.start();
    agent.settle().await;

    agent.command("lock", json!({"val": true, "ts": NOW})).await;
    agent.command("format_disk", json!(true)).await;
    agent
        .command("open_url", json!({"val": "https://example.com", "ts": NOW}))
        .await;

    assert_eq!(agent.deletes_of("lock"), 1);
    assert_eq!(agent.deletes_of("format_disk"), 1);
    assert_eq!(
        agent.platform.calls(),
        vec![
            PlatformCall::Lock,
            PlatformCall::OpenUrl("https://example.com/".into())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn redelivery_after_resubscribe_is_not_rerun() {
    let mut agent = Agent::new();
    agent.start();
    agent.settle().await;

    // The delete after execution is lost.
    agent.tree.set_write_failure(Some("offline".into()));
    agent
        .tree
        .seed(&format!("{CMD}/popup"), json!({"val": "hello", "ts": NOW}));
    agent.tree.sever_subscriptions(None);
    agent.settle().await;
    agent.tree.set_write_failure(None);

    // The next subscription replays the same entry.
    agent.tree.sever_subscriptions(None);
    agent.settle().await;

    let shown = agent
        .platform
        .count(|c| matches!(c, PlatformCall::Message { .. }));
    assert_eq!(shown, 1);
    assert_eq!(agent.tree.value_at(&format!("{CMD}/popup")), Value::Null);
    assert_eq!(agent.deletes_of("popup"), 1);
}
