// src/sock/server.rs

//! Per-run unix stream-socket server.
//!
//! Binds before the scheduler starts and is torn down after the final
//! lifecycle handler. Each accepted connection is handled on its own task;
//! the response is written synchronously before the connection closes.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

use crate::errors::{DagrunError, Result};
use crate::sock::http::{read_request, write_response, HttpRequest, HttpResponse};

/// Request handler plugged into the server.
pub type HandlerFunc = Arc<dyn Fn(HttpRequest) -> HttpResponse + Send + Sync>;

pub struct SockServer {
    socket_path: PathBuf,
    handler: HandlerFunc,
    quit_tx: watch::Sender<bool>,
}

impl SockServer {
    pub fn new(socket_path: PathBuf, handler: HandlerFunc) -> Self {
        let (quit_tx, _) = watch::channel(false);
        Self {
            socket_path,
            handler,
            quit_tx,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Accept-and-dispatch loop.
    ///
    /// Removes any stale socket file left by a crashed predecessor, then
    /// binds; a bind failure is fatal to the run. `ready` fires once the
    /// listener is accepting. Always returns
    /// [`DagrunError::ServerRequestedShutdown`] after a shutdown request.
    pub async fn serve(&self, ready: Option<oneshot::Sender<()>>) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "control socket listening");
        if let Some(ready) = ready {
            let _ = ready.send(());
        }

        let mut quit_rx = self.quit_tx.subscribe();
        loop {
            if *quit_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = quit_rx.changed() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(async move {
                            handle_connection(stream, handler).await;
                        });
                    }
                    Err(e) => {
                        if *quit_rx.borrow() {
                            break;
                        }
                        // Transient accept errors are logged and retried.
                        error!(error = %e, "accept failed");
                    }
                }
            }
        }

        drop(listener);
        let _ = std::fs::remove_file(&self.socket_path);
        Err(DagrunError::ServerRequestedShutdown)
    }

    /// Idempotent shutdown: flags the accept loop to exit and removes the
    /// socket file so no new client can connect.
    pub fn shutdown(&self) {
        if !*self.quit_tx.borrow() {
            info!(path = %self.socket_path.display(), "control socket shutting down");
        }
        self.quit_tx.send_replace(true);
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn handle_connection(mut stream: UnixStream, handler: HandlerFunc) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "failed to read request");
            let _ = write_response(&mut stream, &HttpResponse::bad_request(e.to_string())).await;
            return;
        }
    };

    debug!(method = %request.method, path = %request.path, "control request");
    let response = handler(request);
    if let Err(e) = write_response(&mut stream, &response).await {
        debug!(error = %e, "failed to write response");
    }
}
