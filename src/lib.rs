#![warn(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod auth;
pub mod channels;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod platform;
pub mod prompt;
pub mod session;
pub mod status;
pub mod storage;
pub mod supervisor;

pub use config::{Config, CredentialBundle};
pub use context::{AgentContext, Backend};
pub use dispatch::{Dispatcher, Handler, HandlerRegistry};
pub use session::{Session, SessionStore};
pub use supervisor::{LoginPrompt, LoginRequest, Supervisor, SupervisorState};
