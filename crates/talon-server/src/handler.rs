//! The application-facing seam: routing, middleware, and dispatch logic
//! are explicitly out of scope (external collaborators), so the server
//! only defines the single trait application code must implement.

use std::future::Future;
use std::sync::Arc;

use talon_core::{Response, ShadowSlot};

use crate::error::Result;

/// A raw, already-negotiated byte stream handed to a hijack callback once
/// the connection loop has exited without closing it.
pub trait HijackedIo: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T> HijackedIo for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

/// What the connection loop does once [`RequestHandler::call`] returns.
pub enum Outcome {
    /// Serialize the response and continue (or end, per `Connection:`)
    /// the keep-alive loop as usual.
    Respond,
    /// The handler has taken ownership of the connection. The server must
    /// not close it; once the loop would otherwise exit, it calls this
    /// callback with the raw stream instead.
    Hijack(Box<dyn FnOnce(Box<dyn HijackedIo>) + Send>),
}

/// Per-request context a handler gets alongside the request/response pair.
/// Its only job is the shadow-response timeout mechanism: a handler that
/// starts background work it cannot promptly await may install a timeout
/// response here instead of returning late, so the connection loop has
/// something to serialize right away.
pub struct ServerContext {
    shadow: ShadowSlot,
}

impl ServerContext {
    pub(crate) fn new() -> Self {
        Self { shadow: ShadowSlot::new() }
    }

    /// Installs `response` as the shadow. Returns `true` if this call won
    /// the race; `false` if another caller (or the connection loop itself,
    /// on its own timeout) already installed one. Only the winner's
    /// response is ever serialized.
    pub fn install_timeout(&self, response: Response) -> bool {
        self.shadow.install(response)
    }

    pub(crate) fn take_shadow(&self) -> Option<Arc<Response>> {
        self.shadow.take()
    }
}

/// Application code implements this to answer requests. A handler that
/// needs routing or middleware composes it on top; the engine does not
/// provide either.
pub trait RequestHandler: Send + Sync + 'static {
    /// Fills in `resp` (or installs a shadow via `ctx`) for `req`. Errors
    /// are mapped to a best-effort status response and the connection is
    /// then closed.
    fn call(
        &self,
        ctx: &ServerContext,
        req: &mut talon_core::Request,
        resp: &mut Response,
    ) -> impl Future<Output = Result<Outcome>> + Send;
}

/// A trivial handler that echoes the request body back with a 200, useful
/// for smoke-testing the engine end to end (the shipped binary wires this
/// one up by default).
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    async fn call(
        &self,
        _ctx: &ServerContext,
        req: &mut talon_core::Request,
        resp: &mut Response,
    ) -> Result<Outcome> {
        let body = req.swap_body(Vec::new());
        resp.header_mut().set_status_code(200);
        resp.header_mut().set_content_type(req.header().content_type());
        resp.swap_body(body);
        Ok(Outcome::Respond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_handler_mirrors_body_and_content_type() {
        let ctx = ServerContext::new();
        let mut req = talon_core::Request::new();
        req.header_mut().set_content_type(b"text/plain");
        req.swap_body(b"hello".to_vec());
        let mut resp = Response::new();

        let outcome = EchoHandler.call(&ctx, &mut req, &mut resp).await.unwrap();
        assert!(matches!(outcome, Outcome::Respond));
        assert_eq!(resp.header().status_code(), 200);
        assert_eq!(resp.header().content_type(), b"text/plain");
        assert_eq!(resp.body().as_inline(), Some(&b"hello"[..]));
    }

    #[test]
    fn shadow_install_only_first_caller_wins() {
        let ctx = ServerContext::new();
        let mut first = Response::new();
        first.header_mut().set_status_code(504);
        assert!(ctx.install_timeout(first));

        let mut second = Response::new();
        second.header_mut().set_status_code(200);
        assert!(!ctx.install_timeout(second));

        assert_eq!(ctx.take_shadow().unwrap().header().status_code(), 504);
    }
}
