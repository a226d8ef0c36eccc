//! Privileged side of the bridge: serve calls from the page.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::message::{MessagePort, PostedMessage, WireMessage};
use super::router::MethodRouter;
use crate::config::RuntimeConfig;

/// Accepts `AGENT_API_CALL` messages from the page origin, routes them, and
/// posts `AGENT_API_RESPONSE` back.
#[derive(Clone)]
pub struct PrivilegedEndpoint {
    router: Arc<MethodRouter>,
    origin: String,
    accepted_origin: String,
}

impl PrivilegedEndpoint {
    pub fn new(router: Arc<MethodRouter>, config: &RuntimeConfig) -> Self {
        Self {
            router,
            origin: config.host_origin.clone(),
            accepted_origin: config.page_origin.clone(),
        }
    }

    /// Serve `port` until the page side hangs up.
    ///
    /// Each call is routed on its own task, so a slow handler never blocks
    /// the calls behind it.
    pub fn spawn(self, port: MessagePort) -> JoinHandle<()> {
        tokio::spawn(async move {
            let MessagePort { tx, mut rx } = port;
            while let Some(posted) = rx.recv().await {
                self.accept(posted, &tx);
            }
            log::debug!("Endpoint: page side closed");
        })
    }

    fn accept(&self, posted: PostedMessage, tx: &mpsc::UnboundedSender<PostedMessage>) {
        if posted.origin != self.accepted_origin {
            log::warn!(
                "Endpoint: rejecting message from unexpected origin '{}'",
                posted.origin
            );
            return;
        }

        let request = match posted.as_wire() {
            Some(WireMessage::Call(request)) => request,
            _ => return,
        };

        let router = Arc::clone(&self.router);
        let origin = self.origin.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = router.route(&request).await;
            match PostedMessage::wire(&origin, &WireMessage::Response(response)) {
                Ok(posted) => {
                    if tx.send(posted).is_err() {
                        log::debug!("Endpoint: page gone before {} was answered", request.id);
                    }
                }
                Err(e) => log::error!("Endpoint: cannot encode response {}: {}", request.id, e),
            }
        });
    }
}

impl std::fmt::Debug for PrivilegedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedEndpoint")
            .field("origin", &self.origin)
            .field("accepted_origin", &self.accepted_origin)
            .field("router", &self.router)
            .finish()
    }
}
