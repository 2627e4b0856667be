//! Request hook chain
//!
//! Handlers are registered once at startup with a priority. For every request
//! the chain is walked in order: a handler either answers the request or
//! declines and hands it back untouched for the next one.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::http::{self, RequestBody};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerOutcome> + Send + 'a>>;

/// A request on its way through the hook chain
pub struct HookRequest {
    /// Handler name the router assigned to this request, if any route matched
    pub handler: Option<String>,
    pub request: Request<RequestBody>,
}

impl HookRequest {
    pub fn new(handler: Option<String>, request: Request<RequestBody>) -> Self {
        Self { handler, request }
    }

    /// Whether the router assigned this request to `name`
    pub fn is_for(&self, name: &str) -> bool {
        self.handler.as_deref() == Some(name)
    }
}

pub enum HandlerOutcome {
    Handled(Response<Full<Bytes>>),
    /// Not ours; the request is returned unread
    Declined(HookRequest),
}

pub trait RequestHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, req: HookRequest) -> HandlerFuture<'_>;
}

/// Position of a hook within the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookPriority {
    #[cfg(test)]
    First,
    Middle,
    #[cfg(test)]
    Last,
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<(HookPriority, Arc<dyn RequestHandler>)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; equal priorities keep registration order
    pub fn register(&mut self, handler: Arc<dyn RequestHandler>, priority: HookPriority) {
        let at = self
            .hooks
            .iter()
            .position(|(p, _)| *p > priority)
            .unwrap_or(self.hooks.len());
        tracing::debug!(handler = handler.name(), ?priority, "registering hook");
        self.hooks.insert(at, (priority, handler));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|(_, h)| h.name()).collect()
    }

    /// Offer the request to each hook in turn; 404 when all decline
    pub async fn run(&self, mut req: HookRequest) -> Response<Full<Bytes>> {
        for (_, hook) in &self.hooks {
            match hook.handle(req).await {
                HandlerOutcome::Handled(response) => return response,
                HandlerOutcome::Declined(back) => req = back,
            }
        }
        tracing::debug!(
            handler = req.handler.as_deref().unwrap_or("-"),
            path = req.request.uri().path(),
            "no hook accepted request"
        );
        http::build_404_response()
    }
}
