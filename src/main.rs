//! pagelens — MCP bridge between a coding agent and a live browser page.
//!
//! Startup is lazy: the transport comes up immediately, the browser is not
//! contacted until the first tool call that needs it. stdout belongs to the
//! MCP framing; all diagnostics go to stderr.

mod annotations;
mod browser;
mod config;
mod error;
mod overlay;
mod processing;
mod procs;
mod ring;
mod server;
mod tools;

use std::sync::{Arc, Weak};

use futures::FutureExt;
use rmcp::service::serve_server;
use rmcp::transport::stdio;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::annotations::AnnotationService;
use crate::browser::{launch, session::PageHook, SessionManager};
use crate::config::Config;
use crate::error::BridgeError;
use crate::processing::ProcessingCoordinator;
use crate::procs::ProcessManager;
use crate::server::BridgeServer;
use crate::tools::{ToolContext, ToolRegistry};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagelens=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();

    // Background task panics must never take the transport down with them.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("Panic in task: {info}");
    }));

    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Fatal configuration error");
            return 1;
        }
    };
    let debug_port = config.debug_port;

    let session = SessionManager::new(config.clone());
    let annotations = AnnotationService::new(config.annotation_port);
    let processes = ProcessManager::new(config.server_log_buffer);

    wire_hooks(&session, &annotations);

    let ctx = ToolContext {
        session: session.clone(),
        annotations: annotations.clone(),
        processes: processes.clone(),
    };
    let coordinator = ProcessingCoordinator::new(session.clone());
    let bridge = BridgeServer::new(Arc::new(ToolRegistry::standard()), ctx, coordinator);

    tracing::info!("pagelens MCP server starting on stdio");
    let service = match serve_server(bridge, stdio()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start MCP transport");
            return 1;
        }
    };

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            return 1;
        }
    };

    let waiting = service.waiting();
    tokio::pin!(waiting);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupt received, shutting down"),
        _ = sigterm.recv() => tracing::info!("Terminate received, shutting down"),
        reason = &mut waiting => tracing::info!(?reason, "Agent transport closed"),
    }

    // Managed processes first, then the browser session, then the
    // annotation service, then the PID file.
    processes.stop_all().await;
    session.shutdown().await;
    annotations.shutdown().await;
    launch::remove_pid_file(debug_port);

    tracing::info!("Shutdown complete");
    0
}

/// Cross-component wiring. The annotation service captures screenshots
/// through the session manager (weakly, to avoid a reference cycle with the
/// injection hooks below); the session manager injects the overlay on
/// connect and on every page load.
fn wire_hooks(session: &Arc<SessionManager>, annotations: &Arc<AnnotationService>) {
    let weak_session: Weak<SessionManager> = Arc::downgrade(session);
    annotations.set_screenshot_hook(Arc::new(move |rect| {
        let weak_session = weak_session.clone();
        async move {
            let session = weak_session
                .upgrade()
                .ok_or_else(|| BridgeError::SessionLost("session manager gone".to_string()))?;
            let png = session
                .screenshot_clip(rect.x, rect.y, rect.width, rect.height)
                .await?;
            let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, png);
            Ok(format!("data:image/png;base64,{encoded}"))
        }
        .boxed()
    }));

    annotations.set_send_notify_hook(Arc::new(|open| {
        tracing::info!(open, "User sent annotations for processing");
    }));

    session.set_on_connect(inject_overlay_hook(annotations.clone()));
    session.set_on_navigate(inject_overlay_hook(annotations.clone()));
}

/// Build the injection hook: start the annotation service on first use
/// (idempotent afterwards) and evaluate the overlay blob in the page.
/// Best-effort on both counts.
fn inject_overlay_hook(annotations: Arc<AnnotationService>) -> PageHook {
    Arc::new(move |page| {
        let annotations = annotations.clone();
        async move {
            let port = match annotations.start().await {
                Ok(port) => port,
                Err(e) => {
                    tracing::warn!(error = %e, "Annotation service failed to start; overlay not injected");
                    return;
                }
            };
            let script = overlay::build_script(port);
            match tokio::time::timeout(
                crate::browser::session::EVAL_TIMEOUT,
                page.evaluate(script),
            )
            .await
            {
                Ok(Ok(_)) => tracing::debug!("Overlay injected"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Overlay injection failed"),
                Err(_) => tracing::warn!("Overlay injection timed out"),
            }
        }
        .boxed()
    })
}
