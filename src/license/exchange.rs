//! One process/dispose round trip against a backend

use hyper::body::Bytes;

use super::backend::{LibraryStatus, LicenseBackend};
use super::guard::PayloadGuard;

/// Outcome of relaying one request body through the library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub process_status: LibraryStatus,
    /// Owned copy of the payload, taken before it was disposed
    pub payload: Option<Bytes>,
    /// `None` when `process` returned no payload and nothing was disposed
    pub dispose_status: Option<LibraryStatus>,
}

impl Exchange {
    pub const fn is_success(&self) -> bool {
        self.process_status.is_ok()
    }
}

/// Object-safe view of a backend, used by the HTTP layer
pub trait Relay: Send + Sync {
    /// Blocking: runs the external calls on the current thread
    fn exchange(&self, input: &[u8]) -> Exchange;
}

impl<B: LicenseBackend> Relay for B {
    fn exchange(&self, input: &[u8]) -> Exchange {
        let processed = self.process(input);
        let Some(payload) = processed.payload else {
            return Exchange {
                process_status: processed.status,
                payload: None,
                dispose_status: None,
            };
        };

        let guard = PayloadGuard::new(self, payload);
        let bytes = Bytes::copy_from_slice(guard.bytes());
        let dispose_status = guard.release();

        Exchange {
            process_status: processed.status,
            payload: Some(bytes),
            dispose_status: Some(dispose_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::testing::FakeBackend;

    #[test]
    fn test_success_copies_and_disposes() {
        let backend = FakeBackend::fixed(br#"{"fairplay-streaming-response":{}}"#);
        let exchange = backend.exchange(b"{\"fairplay-streaming-request\":{}}");

        assert!(exchange.is_success());
        assert_eq!(
            exchange.payload.as_deref(),
            Some(&br#"{"fairplay-streaming-response":{}}"#[..])
        );
        assert_eq!(exchange.dispose_status, Some(LibraryStatus::OK));
        assert_eq!(
            backend.disposed(),
            vec![br#"{"fairplay-streaming-response":{}}"#.to_vec()]
        );
    }

    #[test]
    fn test_input_passed_unmodified() {
        let backend = FakeBackend::echo();
        let input = b"a\0b\xffc";
        backend.exchange(input);
        assert_eq!(backend.processed(), vec![input.to_vec()]);
    }

    #[test]
    fn test_failure_with_payload_still_disposes() {
        let backend = FakeBackend::failing(LibraryStatus::PARAM_ERR, Some(b"partial"));
        let exchange = backend.exchange(b"req");

        assert!(!exchange.is_success());
        assert_eq!(exchange.payload.as_deref(), Some(&b"partial"[..]));
        assert_eq!(backend.disposed(), vec![b"partial".to_vec()]);
    }

    #[test]
    fn test_failure_without_payload_skips_dispose() {
        let backend = FakeBackend::failing(LibraryStatus::INTERNAL_ERR, None);
        let exchange = backend.exchange(b"req");

        assert_eq!(exchange.process_status, LibraryStatus::INTERNAL_ERR);
        assert!(exchange.payload.is_none());
        assert!(exchange.dispose_status.is_none());
        assert!(backend.disposed().is_empty());
    }

    #[test]
    fn test_dispose_status_reported() {
        let backend = FakeBackend::echo().with_dispose_status(LibraryStatus(-1));
        let exchange = backend.exchange(b"req");
        assert!(exchange.is_success());
        assert_eq!(exchange.dispose_status, Some(LibraryStatus(-1)));
    }
}
