//! Exchange queue between proxy connections and the capture session
//!
//! Connections run concurrently, but every completed exchange is delivered to
//! one collector task that owns the [`CaptureSession`]. The ledger therefore
//! sees flows one at a time, in completion order, without locks.

use crate::error::{IdtraceError, Result};
use crate::models::Exchange;
use crate::session::CaptureSession;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum CollectorMessage {
    Exchange(Box<Exchange>),
    Finish(oneshot::Sender<CaptureSession>),
}

/// Sending side of the collector, cheap to clone per connection
#[derive(Debug, Clone)]
pub struct ExchangeQueue {
    tx: mpsc::UnboundedSender<CollectorMessage>,
}

impl ExchangeQueue {
    /// Hands a completed exchange to the collector
    pub fn send(&self, exchange: Exchange) -> Result<()> {
        self.tx
            .send(CollectorMessage::Exchange(Box::new(exchange)))
            .map_err(|_| IdtraceError::ProxyError("capture session already closed".to_string()))
    }

    /// Stops the collector and returns the closed session.
    ///
    /// Exchanges queued before this call are ingested first.
    pub async fn finish(&self) -> Result<CaptureSession> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CollectorMessage::Finish(reply))
            .map_err(|_| IdtraceError::ProxyError("capture session already closed".to_string()))?;
        rx.await
            .map_err(|_| IdtraceError::ProxyError("collector stopped before replying".to_string()))
    }
}

/// Spawns the collector task owning `session`
pub fn spawn_collector(mut session: CaptureSession) -> (ExchangeQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                CollectorMessage::Exchange(exchange) => {
                    if let Some(flow) = session.ingest(&exchange) {
                        debug!(
                            "Captured {} {} ({} request ids, {} response ids)",
                            flow.method,
                            flow.url,
                            flow.request_occurrences.len(),
                            flow.response_occurrences.len()
                        );
                    }
                }
                CollectorMessage::Finish(reply) => {
                    info!("Capture finished with {} flows", session.flows().len());
                    if reply.send(session).is_err() {
                        warn!("Session finished but nobody was waiting for it");
                    }
                    return;
                }
            }
        }
        warn!(
            "All queue handles dropped; discarding {} flows",
            session.flows().len()
        );
    });

    (ExchangeQueue { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::models::{HttpRequest, HttpResponse};

    #[tokio::test]
    async fn test_finish_returns_session_with_queued_flows() {
        let session = CaptureSession::new(TrackerConfig::default()).expect("session");
        let (queue, handle) = spawn_collector(session);

        for id in ["1001", "1002", "1003"] {
            let exchange = Exchange::new(HttpRequest::new(
                "GET",
                format!("https://api.example.com/items/{id}"),
            ))
            .with_response(HttpResponse::new(200));
            queue.send(exchange).expect("send");
        }

        let session = queue.finish().await.expect("finish");
        assert_eq!(session.flows().len(), 3);
        assert_eq!(session.flows()[0].url, "https://api.example.com/items/1001");
        handle.await.expect("collector exits");

        assert!(queue
            .send(Exchange::new(HttpRequest::new("GET", "https://a.com/")))
            .is_err());
    }
}
