use crate::channels::RemoteTree;
use crate::config::Config;
use crate::platform::Platform;
use crate::session::Session;
use crate::storage::ObjectStore;
use std::sync::Arc;

/// Remote services and OS capabilities, independent of any session.
#[derive(Clone)]
pub struct Backend {
    pub tree: Arc<dyn RemoteTree>,
    pub storage: Arc<dyn ObjectStore>,
    pub platform: Arc<dyn Platform>,
}

/// Everything a running session needs, handed explicitly to the channel,
/// dispatcher, handlers and status reporter.
#[derive(Clone)]
pub struct AgentContext {
    pub session: Session,
    pub tree: Arc<dyn RemoteTree>,
    pub storage: Arc<dyn ObjectStore>,
    pub platform: Arc<dyn Platform>,
    pub config: Config,
}

impl AgentContext {
    pub fn new(session: Session, backend: &Backend, config: Config) -> Self {
        Self {
            session,
            tree: backend.tree.clone(),
            storage: backend.storage.clone(),
            platform: backend.platform.clone(),
            config,
        }
    }
}
