//! License relay handler
//!
//! Buffers a POST body, hands it to the key server library and writes the
//! library's payload back as `text/plain`.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Response, StatusCode};
use std::sync::{Arc, Mutex, PoisonError};

use super::hooks::{
    HandlerFuture, HandlerOutcome, HookPriority, HookRegistry, HookRequest, RequestHandler,
};
use crate::config::{Config, HttpConfig, RelayConfig};
use crate::http::{self, body, BodyError};
use crate::license::{Exchange, Relay};

/// How library failures map onto HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusPolicy {
    /// Always 200, failures reported as body text
    Legacy,
    /// Failures answered with the given status
    Strict(StatusCode),
}

pub struct RelayHandler {
    name: String,
    relay: Arc<dyn Relay>,
    policy: StatusPolicy,
    process_symbol: String,
    dispose_symbol: String,
    max_body_size: u64,
    default_body_capacity: usize,
    call_gate: Option<Arc<Mutex<()>>>,
}

impl RelayHandler {
    pub fn new(relay: Arc<dyn Relay>, config: &RelayConfig, http: &HttpConfig) -> Self {
        let policy = if config.legacy_status {
            StatusPolicy::Legacy
        } else {
            let status = StatusCode::from_u16(config.failure_status).unwrap_or_else(|_| {
                tracing::warn!(
                    failure_status = config.failure_status,
                    "invalid relay.failure_status, using 502"
                );
                StatusCode::BAD_GATEWAY
            });
            StatusPolicy::Strict(status)
        };

        Self {
            name: config.handler_name.clone(),
            relay,
            policy,
            process_symbol: config.process_symbol.clone(),
            dispose_symbol: config.dispose_symbol.clone(),
            max_body_size: http.max_body_size,
            default_body_capacity: http.default_body_capacity,
            call_gate: config.serialize_calls.then(|| Arc::new(Mutex::new(()))),
        }
    }

    async fn relay_request(&self, req: HookRequest) -> Response<Full<Bytes>> {
        let (parts, request_body) = req.request.into_parts();

        let declared = match body::declared_length(&parts.headers) {
            Ok(len) => len,
            Err(e) => {
                tracing::error!(path = parts.uri.path(), "cannot set up request body: {e}");
                return http::build_500_response();
            }
        };

        let input = match body::read_to_bytes(
            request_body,
            declared,
            self.default_body_capacity,
            self.max_body_size,
        )
        .await
        {
            Ok(input) => input,
            Err(BodyError::TooLarge { limit }) => {
                tracing::warn!(limit, "request body too large");
                return http::build_413_response();
            }
            Err(e) => {
                tracing::error!(path = parts.uri.path(), "{e}");
                return http::build_500_response();
            }
        };

        let relay = Arc::clone(&self.relay);
        let gate = self.call_gate.clone();
        let input_len = input.len();
        let joined = tokio::task::spawn_blocking(move || {
            let _serialized = gate
                .as_ref()
                .map(|g| g.lock().unwrap_or_else(PoisonError::into_inner));
            relay.exchange(&input)
        })
        .await;

        match joined {
            Ok(exchange) => {
                tracing::debug!(
                    input_len,
                    status = %exchange.process_status,
                    payload_len = exchange.payload.as_ref().map_or(0, Bytes::len),
                    "license exchange complete"
                );
                self.render(&exchange)
            }
            Err(e) => {
                tracing::error!("license exchange aborted: {e}");
                http::build_500_response()
            }
        }
    }

    fn render(&self, exchange: &Exchange) -> Response<Full<Bytes>> {
        let mut text: Vec<u8> = Vec::new();

        if !exchange.is_success() {
            tracing::warn!(
                symbol = %self.process_symbol,
                status = %exchange.process_status,
                "license processing failed"
            );
            text.extend_from_slice(self.failure_line(&self.process_symbol, exchange).as_bytes());
        }

        match self.policy {
            StatusPolicy::Legacy => {
                if let Some(payload) = &exchange.payload {
                    text.extend_from_slice(payload);
                }
                text.push(b'\n');
                if let Some(status) = exchange.dispose_status.filter(|s| !s.is_ok()) {
                    text.extend_from_slice(
                        format!("{} failed with status {}\n", self.dispose_symbol, status.code())
                            .as_bytes(),
                    );
                }
                http::build_text_response(StatusCode::OK, text)
            }
            StatusPolicy::Strict(failure_status) => {
                if let Some(status) = exchange.dispose_status.filter(|s| !s.is_ok()) {
                    tracing::warn!(
                        symbol = %self.dispose_symbol,
                        %status,
                        "payload disposal failed"
                    );
                }
                let status = match &exchange.payload {
                    Some(payload) => {
                        text.extend_from_slice(payload);
                        text.push(b'\n');
                        if exchange.is_success() {
                            StatusCode::OK
                        } else {
                            failure_status
                        }
                    }
                    None if exchange.is_success() => {
                        tracing::warn!(
                            symbol = %self.process_symbol,
                            "library returned no payload"
                        );
                        text.extend_from_slice(
                            format!("{} returned no payload\n", self.process_symbol).as_bytes(),
                        );
                        failure_status
                    }
                    None => failure_status,
                };
                http::build_text_response(status, text)
            }
        }
    }

    fn failure_line(&self, symbol: &str, exchange: &Exchange) -> String {
        match self.policy {
            StatusPolicy::Legacy => {
                format!("{symbol} failed with status {}\n", exchange.process_status.code())
            }
            StatusPolicy::Strict(_) => {
                format!("{symbol} failed with status {}\n", exchange.process_status)
            }
        }
    }
}

impl RequestHandler for RelayHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, req: HookRequest) -> HandlerFuture<'_> {
        Box::pin(async move {
            if !req.is_for(&self.name) {
                return HandlerOutcome::Declined(req);
            }

            if req.request.method() != Method::POST {
                tracing::warn!("Method not allowed: {}", req.request.method());
                return HandlerOutcome::Handled(http::build_405_response("POST"));
            }

            HandlerOutcome::Handled(self.relay_request(req).await)
        })
    }
}

/// Attach the relay to the hook chain. Called once during startup.
pub fn register_hooks(registry: &mut HookRegistry, relay: Arc<dyn Relay>, config: &Config) {
    let handler = RelayHandler::new(relay, &config.relay, &config.http);
    registry.register(Arc::new(handler), HookPriority::Middle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::backend::{LibraryStatus, LicenseBackend, Processed};
    use crate::license::testing::FakeBackend;
    use futures_util::future::join_all;
    use http_body_util::BodyExt;
    use hyper::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const HANDLER: &str = "fps_handler";

    fn relay_config(legacy_status: bool) -> RelayConfig {
        RelayConfig {
            handler_name: HANDLER.to_string(),
            library_path: None,
            process_symbol: "fpsProcessOperations".to_string(),
            dispose_symbol: "fpsDisposeResponse".to_string(),
            legacy_status,
            failure_status: 502,
            serialize_calls: false,
        }
    }

    fn http_config() -> HttpConfig {
        HttpConfig {
            server_name: "fps-relay".to_string(),
            max_body_size: 1024,
            default_body_capacity: 64,
        }
    }

    fn handler(backend: &Arc<FakeBackend>, legacy_status: bool) -> RelayHandler {
        let relay: Arc<dyn Relay> = backend.clone();
        RelayHandler::new(relay, &relay_config(legacy_status), &http_config())
    }

    fn post(body: body::RequestBody) -> HookRequest {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/fps")
            .body(body)
            .unwrap();
        HookRequest::new(Some(HANDLER.to_string()), request)
    }

    async fn handled(handler: &RelayHandler, req: HookRequest) -> (StatusCode, String) {
        match handler.handle(req).await {
            HandlerOutcome::Handled(resp) => {
                let status = resp.status();
                let bytes = resp.into_body().collect().await.unwrap().to_bytes();
                (status, String::from_utf8(bytes.to_vec()).unwrap())
            }
            HandlerOutcome::Declined(_) => panic!("request was declined"),
        }
    }

    #[tokio::test]
    async fn test_non_post_is_405_without_calls() {
        let backend = Arc::new(FakeBackend::echo());
        let relay = handler(&backend, false);

        for method in [Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS] {
            let request = Request::builder()
                .method(method)
                .uri("/fps")
                .body(body::full("spc"))
                .unwrap();
            let req = HookRequest::new(Some(HANDLER.to_string()), request);
            let (status, _) = handled(&relay, req).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        }
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_other_handler_name_is_declined_unread() {
        let backend = Arc::new(FakeBackend::echo());
        let relay = handler(&backend, false);

        let mut req = post(body::full("still here"));
        req.handler = Some("static".to_string());

        match relay.handle(req).await {
            HandlerOutcome::Declined(back) => {
                let bytes = back.request.into_body().collect().await.unwrap().to_bytes();
                assert_eq!(&bytes[..], b"still here");
            }
            HandlerOutcome::Handled(_) => panic!("should decline"),
        }

        let unrouted = HookRequest::new(None, post(body::full("x")).request);
        assert!(matches!(
            relay.handle(unrouted).await,
            HandlerOutcome::Declined(_)
        ));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_body_passed_unmodified() {
        let backend = Arc::new(FakeBackend::fixed(b"ckc"));
        let relay = handler(&backend, false);
        let spc: &'static [u8] =
            b"{\"fairplay-streaming-request\":{\"spc\":\"AAEC\\u0000\"}}\0tail";

        handled(&relay, post(body::full(spc))).await;
        assert_eq!(backend.processed(), vec![spc.to_vec()]);
    }

    #[tokio::test]
    async fn test_success_writes_payload_and_disposes_once() {
        let payload = br#"{"fairplay-streaming-response":{"create-ckc":[{"id":1,"status":0}]}}"#;
        let backend = Arc::new(FakeBackend::fixed(payload));
        let relay = handler(&backend, false);

        let (status, text) = handled(&relay, post(body::full("spc"))).await;
        assert_eq!(status, StatusCode::OK);
        let expected = [payload.as_slice(), b"\n".as_slice()].concat();
        assert_eq!(text.into_bytes(), expected);
        assert_eq!(backend.disposed(), vec![payload.to_vec()]);
    }

    #[tokio::test]
    async fn test_success_sets_text_plain() {
        let backend = Arc::new(FakeBackend::echo());
        let relay = handler(&backend, false);
        match relay.handle(post(body::full("x"))).await {
            HandlerOutcome::Handled(resp) => {
                assert_eq!(resp.headers()["content-type"], "text/plain");
            }
            HandlerOutcome::Declined(_) => panic!("request was declined"),
        }
    }

    #[tokio::test]
    async fn test_failure_in_legacy_mode_is_200_with_diagnostic() {
        let backend = Arc::new(FakeBackend::failing(
            LibraryStatus::PARAM_ERR,
            Some(b"{\"error\":-42585}"),
        ));
        let relay = handler(&backend, true);

        let (status, text) = handled(&relay, post(body::full("bad spc"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            text,
            "fpsProcessOperations failed with status -42585\n{\"error\":-42585}\n"
        );
        assert_eq!(backend.disposed().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_without_payload_in_legacy_mode_writes_empty_line() {
        let backend = Arc::new(FakeBackend::failing(LibraryStatus::INTERNAL_ERR, None));
        let relay = handler(&backend, true);

        let (status, text) = handled(&relay, post(body::full("spc"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "fpsProcessOperations failed with status -42601\n\n");
        assert!(backend.disposed().is_empty());
    }

    #[tokio::test]
    async fn test_failure_in_strict_mode_uses_failure_status() {
        let backend = Arc::new(FakeBackend::failing(LibraryStatus::INTERNAL_ERR, None));
        let relay = handler(&backend, false);

        let (status, text) = handled(&relay, post(body::full("spc"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(text.contains("-42601"));
        assert!(text.contains("internalErr"));
    }

    #[tokio::test]
    async fn test_dispose_failure_in_legacy_mode_is_appended() {
        let backend =
            Arc::new(FakeBackend::fixed(b"ckc").with_dispose_status(LibraryStatus::PARAM_ERR));
        let relay = handler(&backend, true);

        let (status, text) = handled(&relay, post(body::full("spc"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "ckc\nfpsDisposeResponse failed with status -42585\n");
    }

    #[tokio::test]
    async fn test_dispose_failure_in_strict_mode_keeps_response() {
        let backend =
            Arc::new(FakeBackend::fixed(b"ckc").with_dispose_status(LibraryStatus::PARAM_ERR));
        let relay = handler(&backend, false);

        let (status, text) = handled(&relay, post(body::full("spc"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "ckc\n");
    }

    #[tokio::test]
    async fn test_broken_body_is_500_without_calls() {
        let backend = Arc::new(FakeBackend::echo());
        let relay = handler(&backend, false);

        let (status, _) = handled(&relay, post(body::broken(b"{\"fairplay"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_content_length_is_500_without_calls() {
        let backend = Arc::new(FakeBackend::echo());
        let relay = handler(&backend, false);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/fps")
            .header("content-length", "lots")
            .body(body::full("spc"))
            .unwrap();
        let (status, _) =
            handled(&relay, HookRequest::new(Some(HANDLER.to_string()), request)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_413_without_calls() {
        let backend = Arc::new(FakeBackend::echo());
        let relay = handler(&backend, false);

        let (status, _) = handled(&relay, post(body::full(vec![b'a'; 4096]))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(backend.call_count(), 0);
    }

    /// Echo backend that holds each call open and tracks how many overlap
    #[derive(Default)]
    struct SlowEcho {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl LicenseBackend for SlowEcho {
        type Payload = Vec<u8>;

        fn process(&self, input: &[u8]) -> Processed<Vec<u8>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(25));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Processed {
                status: LibraryStatus::OK,
                payload: Some(input.to_vec()),
            }
        }

        fn dispose(&self, _payload: Vec<u8>) -> LibraryStatus {
            LibraryStatus::OK
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serialized_calls_never_overlap() {
        let backend = Arc::new(SlowEcho::default());
        let mut config = relay_config(false);
        config.serialize_calls = true;
        let relay: Arc<dyn Relay> = backend.clone();
        let relay = RelayHandler::new(relay, &config, &http_config());

        let requests = (0..6).map(|_| handled(&relay, post(body::full("spc"))));
        let results = join_all(requests).await;

        for (status, text) in results {
            assert_eq!(status, StatusCode::OK);
            assert_eq!(text, "spc\n");
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_with_payload_in_strict_mode() {
        let backend =
            Arc::new(FakeBackend::failing(LibraryStatus::PARAM_ERR, Some(b"partial")));
        let relay = handler(&backend, false);

        let (status, text) = handled(&relay, post(body::full("spc"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            text,
            "fpsProcessOperations failed with status -42585 (paramErr)\npartial\n"
        );
        assert_eq!(backend.disposed(), vec![b"partial".to_vec()]);
    }

    #[tokio::test]
    async fn test_success_without_payload_in_strict_mode() {
        let backend = Arc::new(FakeBackend::failing(LibraryStatus::OK, None));
        let relay = handler(&backend, false);

        let (status, text) = handled(&relay, post(body::full("spc"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(text, "fpsProcessOperations returned no payload\n");
        assert!(backend.disposed().is_empty());
    }

    #[test]
    fn test_register_hooks_adds_relay() {
        let mut registry = HookRegistry::new();
        let backend: Arc<dyn Relay> = Arc::new(FakeBackend::echo());
        let config = crate::config::Config::load_from("/nonexistent/fps-relay").unwrap();
        register_hooks(&mut registry, backend, &config);
        assert_eq!(registry.names(), vec![HANDLER]);
    }
}
