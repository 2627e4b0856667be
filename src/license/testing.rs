//! In-memory backend that records every call

use std::sync::Mutex;

use super::backend::{LibraryStatus, LicenseBackend, Processed};

enum Reply {
    Echo,
    Fixed(Vec<u8>),
    Nothing,
}

#[derive(Default)]
struct Calls {
    processed: Vec<Vec<u8>>,
    disposed: Vec<Vec<u8>>,
}

pub struct FakeBackend {
    reply: Reply,
    status: LibraryStatus,
    dispose_status: LibraryStatus,
    calls: Mutex<Calls>,
}

impl FakeBackend {
    fn new(reply: Reply, status: LibraryStatus) -> Self {
        Self {
            reply,
            status,
            dispose_status: LibraryStatus::OK,
            calls: Mutex::new(Calls::default()),
        }
    }

    /// Succeeds and returns the input as the payload
    pub fn echo() -> Self {
        Self::new(Reply::Echo, LibraryStatus::OK)
    }

    /// Succeeds with a fixed payload
    pub fn fixed(payload: &[u8]) -> Self {
        Self::new(Reply::Fixed(payload.to_vec()), LibraryStatus::OK)
    }

    /// Fails with `status`, optionally still handing back a payload
    pub fn failing(status: LibraryStatus, payload: Option<&[u8]>) -> Self {
        let reply = payload.map_or(Reply::Nothing, |p| Reply::Fixed(p.to_vec()));
        Self::new(reply, status)
    }

    pub const fn with_dispose_status(mut self, status: LibraryStatus) -> Self {
        self.dispose_status = status;
        self
    }

    pub fn processed(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().processed.clone()
    }

    pub fn disposed(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().disposed.clone()
    }

    pub fn call_count(&self) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.processed.len() + calls.disposed.len()
    }
}

impl LicenseBackend for FakeBackend {
    type Payload = Vec<u8>;

    fn process(&self, input: &[u8]) -> Processed<Vec<u8>> {
        self.calls.lock().unwrap().processed.push(input.to_vec());
        let payload = match &self.reply {
            Reply::Echo => Some(input.to_vec()),
            Reply::Fixed(bytes) => Some(bytes.clone()),
            Reply::Nothing => None,
        };
        Processed {
            status: self.status,
            payload,
        }
    }

    fn dispose(&self, payload: Vec<u8>) -> LibraryStatus {
        self.calls.lock().unwrap().disposed.push(payload);
        self.dispose_status
    }
}
