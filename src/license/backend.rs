//! Backend trait and status codes

use std::fmt;

/// Status code returned by the key server library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryStatus(pub i32);

impl LibraryStatus {
    pub const OK: Self = Self(0);
    pub const PARAM_ERR: Self = Self(-42585);
    #[cfg(test)]
    pub const INTERNAL_ERR: Self = Self(-42601);

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    /// Name of a known FairPlay Streaming status
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("noErr"),
            -42580 => Some("spcVersionErr"),
            -42581 => Some("parserErr"),
            -42583 => Some("missingRequiredTagErr"),
            -42585 => Some("paramErr"),
            -42586 => Some("memoryErr"),
            -42590 => Some("versionErr"),
            -42591 => Some("dupTagErr"),
            -42601 => Some("internalErr"),
            -42604 => Some("clientSecurityLevelErr"),
            -42605 => Some("invalidCertificateErr"),
            -42612 => Some("notImplementedErr"),
            _ => None,
        }
    }
}

impl fmt::Display for LibraryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Result of a `process` call.
///
/// The payload is present whenever the library handed back a non-null buffer,
/// regardless of status, and must be passed to `dispose`.
#[derive(Debug)]
pub struct Processed<P> {
    pub status: LibraryStatus,
    pub payload: Option<P>,
}

/// The two operations exported by the key server library.
///
/// Implementations must be callable from any thread. Payloads are owned by the
/// backend until handed back through `dispose`.
pub trait LicenseBackend: Send + Sync + 'static {
    type Payload: AsRef<[u8]> + Send;

    fn process(&self, input: &[u8]) -> Processed<Self::Payload>;

    fn dispose(&self, payload: Self::Payload) -> LibraryStatus;
}
