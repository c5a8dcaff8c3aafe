//! Session lifecycle: login, run the command channel and status reporter,
//! and bring them back after a channel failure.

use crate::auth::{AuthClient, AuthMode};
use crate::channels::CommandChannel;
use crate::config::Config;
use crate::context::{AgentContext, Backend};
use crate::dispatch::{ConsumedLog, Dispatcher, HandlerRegistry};
use crate::error::{AuthError, ChannelError};
use crate::session::{Session, SessionStore};
use crate::status::{self, StatusReporter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Unauthenticated,
    Authenticating,
    /// `attempt` counts Active entries for this session, starting at 1.
    Active { attempt: u64 },
    Reconnecting { attempt: u64 },
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub mode: AuthMode,
    pub email: String,
    pub password: String,
}

/// Where credentials come from when no session is saved.
#[async_trait]
pub trait LoginPrompt: Send + Sync {
    /// Next set of credentials; `None` when the operator gives up.
    async fn next_attempt(&self) -> Result<Option<LoginRequest>>;

    async fn report_failure(&self, err: &AuthError);
}

pub struct Supervisor {
    config: Config,
    store: SessionStore,
    auth: AuthClient,
    backend: Backend,
    registry: Arc<HandlerRegistry>,
    state: watch::Sender<SupervisorState>,
    active: Mutex<Option<Arc<AgentContext>>>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        store: SessionStore,
        auth: AuthClient,
        backend: Backend,
        registry: HandlerRegistry,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Unauthenticated);
        Self {
            config,
            store,
            auth,
            backend,
            registry: Arc::new(registry),
            state,
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Resume the saved session or log in, then run forever.
    pub async fn run(&self, prompt: Option<&dyn LoginPrompt>) -> Result<Infallible> {
        let session = match self.store.load() {
            Some(session) => {
                tracing::info!("Resuming saved session {}", session.id());
                session
            }
            None => {
                let prompt = prompt.context(
                    "no saved session and no terminal to log in from; run `pcctl login` first",
                )?;
                self.login(prompt).await?
            }
        };
        Ok(self.run_session(session).await)
    }

    /// Prompt until the identity service accepts, then save the session.
    pub async fn login(&self, prompt: &dyn LoginPrompt) -> Result<Session> {
        loop {
            self.transition(SupervisorState::Unauthenticated);
            let Some(request) = prompt.next_attempt().await? else {
                anyhow::bail!("login cancelled");
            };
            self.transition(SupervisorState::Authenticating);
            match self
                .auth
                .authenticate(request.mode, &request.email, &request.password)
                .await
            {
                Ok(session) => {
                    tracing::info!("Authenticated as {}", session.id());
                    self.persist(&session);
                    return Ok(session);
                }
                Err(err) => {
                    tracing::warn!("Login failed: {err}");
                    prompt.report_failure(&err).await;
                }
            }
        }
    }

    fn persist(&self, session: &Session) {
        if let Err(err) = self.store.save(session) {
            tracing::warn!("Could not save session, continuing without it: {err}");
        }
    }

    /// Keep the session active, waiting a fixed backoff after every failure.
    pub async fn run_session(&self, session: Session) -> Infallible {
        let ctx = Arc::new(AgentContext::new(
            session,
            &self.backend,
            self.config.clone(),
        ));
        *self.active.lock() = Some(ctx.clone());

        let backoff = self.config.reconnect_backoff();
        let consumed = ConsumedLog::default();
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            self.transition(SupervisorState::Active { attempt });
            let err = self.run_active(ctx.clone(), consumed.clone()).await;
            tracing::warn!(
                "Command channel failed: {err}; reconnecting in {}s",
                backoff.as_secs()
            );
            self.transition(SupervisorState::Reconnecting { attempt });
            tokio::time::sleep(backoff).await;
        }
    }

    async fn run_active(&self, ctx: Arc<AgentContext>, consumed: ConsumedLog) -> ChannelError {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let channel = CommandChannel::new(
            ctx.tree.clone(),
            &ctx.session,
            self.config.resubscribe_attempts,
        );
        let dispatcher =
            Dispatcher::new(ctx.clone(), self.registry.clone()).with_consumed_log(consumed);
        let dispatch = tokio::spawn(dispatcher.run(rx));
        let reporter = StatusReporter::new(ctx.clone()).spawn();
        tracing::info!("Listening for commands on {}", channel.path());

        let result = channel.run(tx).await;
        reporter.abort();
        // The sender is gone; let the dispatcher finish what was queued.
        if let Err(err) = dispatch.await {
            tracing::error!("Dispatcher task ended abnormally: {err}");
        }
        match result {
            Err(err) => err,
            Ok(()) => ChannelError::Closed,
        }
    }

    /// Mark the active session offline; no-op before a session is running.
    pub async fn go_offline(&self) {
        let Some(ctx) = self.active.lock().clone() else {
            return;
        };
        if let Err(err) = status::publish_offline(&ctx).await {
            tracing::warn!("Failed to publish offline status: {err}");
        }
    }

    fn transition(&self, next: SupervisorState) {
        tracing::debug!("Supervisor -> {next:?}");
        self.state.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{InMemoryTree, RemoteTree, TreeOp};
    use crate::handlers::builtin_registry;
    use crate::platform::{PlatformCall, RecordingPlatform};
    use crate::storage::InMemoryStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Rig {
        tree: Arc<InMemoryTree>,
        platform: Arc<RecordingPlatform>,
        supervisor: Arc<Supervisor>,
        _dir: tempfile::TempDir,
    }

    fn rig(identity_url: &str, saved: Option<&str>) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        if let Some(id) = saved {
            store.save(&Session::new(id).unwrap()).unwrap();
        }
        let tree = Arc::new(InMemoryTree::new());
        let platform = Arc::new(RecordingPlatform::new());
        let backend = Backend {
            tree: tree.clone(),
            storage: Arc::new(InMemoryStore::new()),
            platform: platform.clone(),
        };
        let supervisor = Supervisor::new(
            Config::default(),
            store,
            AuthClient::new(identity_url, "api-key"),
            backend,
            builtin_registry(),
        );
        Rig {
            tree,
            platform,
            supervisor: Arc::new(supervisor),
            _dir: dir,
        }
    }

    struct ScriptedPrompt {
        attempts: Mutex<VecDeque<LoginRequest>>,
        failures: Mutex<Vec<String>>,
    }

    impl ScriptedPrompt {
        fn new(passwords: &[&str]) -> Self {
            let attempts = passwords
                .iter()
                .map(|p| LoginRequest {
                    mode: AuthMode::SignIn,
                    email: "ops@example.com".into(),
                    password: (*p).to_string(),
                })
                .collect();
            Self {
                attempts: Mutex::new(attempts),
                failures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LoginPrompt for ScriptedPrompt {
        async fn next_attempt(&self) -> Result<Option<LoginRequest>> {
            Ok(self.attempts.lock().pop_front())
        }

        async fn report_failure(&self, err: &AuthError) {
            self.failures.lock().push(err.to_string());
        }
    }

    async fn wait_for_subscribers(tree: &InMemoryTree, count: usize) {
        while tree.subscriber_count() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn saved_session_goes_straight_to_active() {
        let rig = rig("http://127.0.0.1:9", Some("u1"));
        let mut state = rig.supervisor.state();
        let task = {
            let supervisor = rig.supervisor.clone();
            tokio::spawn(async move { supervisor.run(None).await })
        };
        state
            .wait_for(|s| *s == SupervisorState::Active { attempt: 1 })
            .await
            .unwrap();
        wait_for_subscribers(&rig.tree, 1).await;

        rig.tree
            .set("users/u1/command/lock", &json!(true))
            .await
            .unwrap();
        while rig.platform.count(|c| *c == PlatformCall::Lock) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn channel_failure_reconnects_after_backoff_with_same_session() {
        let rig = rig("http://127.0.0.1:9", Some("u1"));
        let mut state = rig.supervisor.state();
        let task = {
            let supervisor = rig.supervisor.clone();
            tokio::spawn(async move { supervisor.run(None).await })
        };
        state
            .wait_for(|s| *s == SupervisorState::Active { attempt: 1 })
            .await
            .unwrap();
        wait_for_subscribers(&rig.tree, 1).await;

        rig.tree.sever_subscriptions(Some("permission denied".into()));
        state
            .wait_for(|s| *s == SupervisorState::Reconnecting { attempt: 1 })
            .await
            .unwrap();
        let failed_at = tokio::time::Instant::now();
        state
            .wait_for(|s| *s == SupervisorState::Active { attempt: 2 })
            .await
            .unwrap();
        assert!(failed_at.elapsed() >= Duration::from_secs(10));

        wait_for_subscribers(&rig.tree, 1).await;
        assert_eq!(rig.tree.subscribe_count(), 2);
        rig.tree
            .set("users/u1/command/lock", &json!(true))
            .await
            .unwrap();
        while rig.platform.count(|c| *c == PlatformCall::Lock) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_does_not_rerun_a_command_left_behind() {
        let rig = rig("http://127.0.0.1:9", Some("u1"));
        let issued = chrono::Utc::now().timestamp_millis();
        rig.tree
            .seed("users/u1/command/lock", json!({"val": true, "ts": issued}));
        rig.tree.set_write_failure(Some("read-only".into()));

        let mut state = rig.supervisor.state();
        let task = {
            let supervisor = rig.supervisor.clone();
            tokio::spawn(async move { supervisor.run(None).await })
        };
        while rig.platform.count(|c| *c == PlatformCall::Lock) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rig.tree.value_at("users/u1/command/lock").is_object());

        rig.tree.sever_subscriptions(Some("permission denied".into()));
        state
            .wait_for(|s| *s == SupervisorState::Active { attempt: 2 })
            .await
            .unwrap();
        wait_for_subscribers(&rig.tree, 1).await;
        // Let the replayed snapshot drain through the dispatcher.
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(rig.tree.subscribe_count(), 2);
        assert_eq!(rig.platform.count(|c| *c == PlatformCall::Lock), 1);
        task.abort();
    }

    #[tokio::test]
    async fn login_retries_until_accepted_and_saves_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts:signInWithPassword"))
            .and(body_partial_json(json!({"password": "wrong"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "INVALID_PASSWORD"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts:signInWithPassword"))
            .and(body_partial_json(json!({"password": "right"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"localId": "u7"})))
            .mount(&server)
            .await;

        let rig = rig(&server.uri(), None);
        let prompt = ScriptedPrompt::new(&["wrong", "right"]);
        let session = rig.supervisor.login(&prompt).await.unwrap();

        assert_eq!(session.id(), "u7");
        assert_eq!(prompt.failures.lock().len(), 1);
        assert!(prompt.failures.lock()[0].contains("INVALID_PASSWORD"));
        assert_eq!(rig.supervisor.store.load(), Some(session));
    }

    #[tokio::test]
    async fn giving_up_at_the_prompt_is_an_error() {
        let rig = rig("http://127.0.0.1:9", None);
        let prompt = ScriptedPrompt::new(&[]);
        assert!(rig.supervisor.login(&prompt).await.is_err());
        assert_eq!(
            *rig.supervisor.state().borrow(),
            SupervisorState::Unauthenticated
        );
    }

    #[tokio::test]
    async fn no_session_and_no_prompt_fails_fast() {
        let rig = rig("http://127.0.0.1:9", None);
        assert!(rig.supervisor.run(None).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn go_offline_marks_status() {
        let rig = rig("http://127.0.0.1:9", Some("u1"));
        rig.supervisor.go_offline().await;
        assert!(rig.tree.ops().is_empty());

        let mut state = rig.supervisor.state();
        let task = {
            let supervisor = rig.supervisor.clone();
            tokio::spawn(async move { supervisor.run(None).await })
        };
        state
            .wait_for(|s| matches!(s, SupervisorState::Active { .. }))
            .await
            .unwrap();
        rig.supervisor.go_offline().await;
        let offline = rig.tree.ops().into_iter().any(|op| {
            matches!(op, TreeOp::Update(ref path, ref fields)
                if path == "users/u1/status" && fields.get("online") == Some(&json!(false)))
        });
        assert!(offline);
        task.abort();
    }
}
