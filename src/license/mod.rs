//! License backend module
//!
//! Narrow boundary around the external key server library:
//! - `backend`: the `process` / `dispose` trait and status codes
//! - `guard`: scoped ownership of payloads returned by `process`
//! - `exchange`: one full round trip, producing owned response bytes
//! - `library`: the dynamically loaded implementation

pub mod backend;
pub mod exchange;
pub mod guard;
pub mod library;

#[cfg(test)]
pub mod testing;

pub use exchange::{Exchange, Relay};
pub use library::LicenseLibrary;
