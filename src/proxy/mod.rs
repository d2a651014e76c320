//! HTTP intercept proxy
//!
//! Captures plain HTTP traffic passing through the proxy and feeds every
//! completed exchange to the capture session. HTTPS CONNECT tunnels are relayed
//! without inspection.

pub mod handler;
pub mod har;
pub mod traffic;

use crate::config::TrackerConfig;
use crate::error::{IdtraceError, Result};
use crate::report::{self, Report};
use crate::session::CaptureSession;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use self::traffic::{spawn_collector, ExchangeQueue};

/// Intercept proxy server
pub struct InterceptProxy {
    port: u16,
    config: TrackerConfig,
}

impl InterceptProxy {
    pub fn new(port: u16, config: TrackerConfig) -> Self {
        Self { port, config }
    }

    /// Binds the listener on 127.0.0.1
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        TcpListener::bind(addr)
            .await
            .map_err(|e| IdtraceError::ProxyError(format!("Failed to bind to {}: {}", addr, e)))
    }

    /// Runs the proxy until Ctrl+C, then writes and returns the report
    pub async fn start(&self) -> Result<Report> {
        let session = CaptureSession::new(self.config.clone())?;
        let listener = self.bind().await?;
        let addr = listener
            .local_addr()
            .map_err(|e| IdtraceError::ProxyError(e.to_string()))?;
        let output_path = PathBuf::from(&self.config.output);

        info!("Proxy listening on http://{}", addr);
        info!("Report will be saved to: {}", output_path.display());
        if !self.config.target_domains.is_empty() {
            info!("Tracking domains: {}", self.config.target_domains.join(", "));
        }

        let (queue, collector) = spawn_collector(session);

        let served = tokio::select! {
            result = serve(listener, queue.clone()) => result,
            signal = tokio::signal::ctrl_c() => {
                info!("Shutting down proxy...");
                signal.map_err(|e| {
                    IdtraceError::ProxyError(format!("Failed to listen for ctrl+c: {}", e))
                })
            }
        };

        finish_capture(queue, collector, served, &output_path).await
    }
}

/// Closes the session and writes its report, then surfaces any serve error
async fn finish_capture(
    queue: ExchangeQueue,
    collector: JoinHandle<()>,
    served: Result<()>,
    output_path: &Path,
) -> Result<Report> {
    if let Err(e) = &served {
        error!("Proxy stopped: {}", e);
    }

    let session = queue.finish().await?;
    if let Err(e) = collector.await {
        error!("Collector task failed: {}", e);
    }

    let report = session.report();
    report::json::export(&report, output_path)?;
    served?;
    Ok(report)
}

/// Accept loop: one hyper connection task per client, all sharing `queue`
pub async fn serve(listener: TcpListener, queue: ExchangeQueue) -> Result<()> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()?;

    loop {
        let (stream, client_addr) = listener
            .accept()
            .await
            .map_err(|e| IdtraceError::ProxyError(format!("Accept failed: {}", e)))?;

        let io = TokioIo::new(stream);
        let queue = queue.clone();
        let client = client.clone();

        debug!("New connection from {}", client_addr);

        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                handler::handle_request(req, queue.clone(), client.clone())
            });

            if let Err(e) = http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                // closed connections are routine for a proxy
                let err_str = e.to_string();
                if !err_str.contains("connection closed") && !err_str.contains("early eof") {
                    debug!("Connection error from {}: {}", client_addr, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Exchange, HttpRequest};

    #[tokio::test]
    async fn test_report_written_when_serving_fails() {
        let session = CaptureSession::new(TrackerConfig::default()).expect("session");
        let (queue, collector) = spawn_collector(session);
        queue
            .send(Exchange::new(HttpRequest::new(
                "GET",
                "https://api.example.com/orders/9999",
            )))
            .expect("queue open");

        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("report.json");
        let result = finish_capture(
            queue,
            collector,
            Err(IdtraceError::ProxyError("Accept failed".to_string())),
            &output,
        )
        .await;

        assert!(matches!(result, Err(IdtraceError::ProxyError(_))));
        let saved = report::json::load(&output).expect("report written");
        assert_eq!(saved.summary.total_flows, 1);
        assert_eq!(saved.potential_idor[0].id_value, "9999");
    }
}
