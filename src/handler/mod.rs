//! Request handler module
//!
//! Responsible for routing requests to a handler name and running the hook
//! chain that the license relay registers into at startup.

pub mod hooks;
pub mod relay;
pub mod router;

// Re-export main entry points
pub use hooks::HookRegistry;
pub use relay::register_hooks;
pub use router::handle_request;
