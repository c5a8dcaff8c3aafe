//! Remote tree access and the command subscription built on it.
//!
//! `FirebaseTree` talks to the realtime database over REST and Server-Sent
//! Events. `InMemoryTree` mirrors its event semantics in process and backs the
//! dispatcher and supervisor tests.

pub mod command;
pub mod firebase;
pub mod memory;
pub mod traits;

pub use command::CommandChannel;
pub use firebase::FirebaseTree;
pub use memory::{InMemoryTree, TreeOp};
pub use traits::{EventKind, RemoteTree, TreeEvent};
