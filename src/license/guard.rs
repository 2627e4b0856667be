//! Payload ownership guard
//!
//! Holds a payload returned by `process` and hands it back to the backend
//! exactly once, either through `release` or when the guard is dropped.

use super::backend::{LibraryStatus, LicenseBackend};

pub struct PayloadGuard<'a, B: LicenseBackend> {
    backend: &'a B,
    payload: Option<B::Payload>,
}

impl<'a, B: LicenseBackend> PayloadGuard<'a, B> {
    pub const fn new(backend: &'a B, payload: B::Payload) -> Self {
        Self {
            backend,
            payload: Some(payload),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.payload.as_ref().map_or(&[], AsRef::as_ref)
    }

    /// Dispose of the payload now and report the backend's status
    pub fn release(mut self) -> LibraryStatus {
        self.payload
            .take()
            .map_or(LibraryStatus::OK, |payload| self.backend.dispose(payload))
    }
}

impl<B: LicenseBackend> Drop for PayloadGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            let status = self.backend.dispose(payload);
            if !status.is_ok() {
                tracing::warn!(%status, "payload disposal failed during unwind");
            }
        }
    }
}
