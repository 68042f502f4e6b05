// src/sock/client.rs

//! Client side of the control socket, used by the CLI `--status`/`--stop`
//! paths and by tests.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::errors::{DagrunError, Result};
use crate::sock::http::read_response;

pub struct SockClient {
    socket_path: PathBuf,
}

impl SockClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send one request and return the response body. Non-2xx responses
    /// are reported as errors.
    pub async fn request(&self, method: &str, path: &str, body: &str) -> Result<String> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let head = format!(
            "{method} {path} HTTP/1.0\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(body.as_bytes()).await?;
        stream.flush().await?;

        let (status, body) = read_response(&mut stream).await?;
        if !(200..300).contains(&status) {
            return Err(DagrunError::Other(anyhow::anyhow!(
                "control request {method} {path} failed with status {status}: {body}"
            )));
        }
        Ok(body)
    }

    pub async fn get_status(&self) -> Result<String> {
        self.request("GET", "/status", "").await
    }

    pub async fn stop(&self) -> Result<String> {
        self.request("POST", "/stop", "").await
    }

    pub async fn signal(&self, signal_name: &str) -> Result<String> {
        self.request("POST", "/signal", signal_name).await
    }
}
