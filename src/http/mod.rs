//! HTTP protocol layer module
//!
//! Provides body buffering and response builders, decoupled from the relay logic.

pub mod body;
pub mod response;

// Re-export commonly used types
pub use body::{BodyError, BoxError, RequestBody};
pub use response::{
    build_404_response, build_405_response, build_413_response, build_500_response,
    build_health_response, build_text_response,
};
