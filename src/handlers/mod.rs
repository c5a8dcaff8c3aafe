//! The built-in command vocabulary.

mod desktop;
mod power;
mod screenshot;

use crate::dispatch::HandlerRegistry;
use std::sync::Arc;

pub use desktop::{GetAppsHandler, KillHandler, OpenUrlHandler, PopupHandler, POPUP_TITLE};
pub use power::{LockHandler, ShutdownHandler};
pub use screenshot::{take_screenshot, ScreenshotHandler, SCREENSHOT_PREFIX};

/// Registry with every built-in handler.
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(Arc::new(ShutdownHandler))
        .register(Arc::new(LockHandler))
        .register(Arc::new(ScreenshotHandler))
        .register(Arc::new(PopupHandler))
        .register(Arc::new(OpenUrlHandler))
        .register(Arc::new(KillHandler))
        .register(Arc::new(GetAppsHandler));
    registry
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ClearPolicy;

    #[test]
    fn builtin_vocabulary() {
        let registry = builtin_registry();
        assert_eq!(
            registry.names(),
            vec!["get_apps", "kill", "lock", "open_url", "popup", "screenshot", "shutdown"]
        );
        let shutdown = registry.get("shutdown").unwrap();
        assert_eq!(shutdown.clear_policy(), ClearPolicy::ResetThenDelete);
        assert_eq!(
            registry.get("lock").unwrap().clear_policy(),
            ClearPolicy::Delete
        );
    }
}
