// Application state module
// Shared, read-only state handed to every connection

use crate::handler::HookRegistry;

use super::types::Config;

/// Application state
///
/// Built once at startup. The hook registry is frozen here: nothing registers
/// handlers after the server starts accepting connections.
pub struct AppState {
    pub config: Config,
    pub hooks: HookRegistry,
}

impl AppState {
    pub const fn new(config: Config, hooks: HookRegistry) -> Self {
        Self { config, hooks }
    }
}
