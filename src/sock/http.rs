// src/sock/http.rs

//! Minimal HTTP/1.0 framing for the control socket.
//!
//! The wire format is plain HTTP so external tooling can poke the socket
//! with ordinary clients; only what the three control routes need is
//! implemented here.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::errors::{DagrunError, Result};

/// A parsed request head plus its (optional) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Response written back before the connection closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain",
            body: body.into(),
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            content_type: "text/plain",
            body: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            body: "not found".to_string(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            content_type: "text/plain",
            body: message.into(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }
}

/// Read one request from the stream: request line, headers (only
/// `Content-Length` is honored), then the body.
pub async fn read_request<S>(stream: S) -> Result<HttpRequest>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    let n = reader.read_line(&mut request_line).await?;
    if n == 0 {
        return Err(DagrunError::Other(anyhow::anyhow!(
            "connection closed before request line"
        )));
    }

    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method.to_string(), path.to_string()),
        _ => {
            return Err(DagrunError::Other(anyhow::anyhow!(
                "malformed request line: {request_line:?}"
            )))
        }
    };

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }

    Ok(HttpRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Write a complete HTTP/1.0 response and flush it.
pub async fn write_response<S>(mut stream: S, response: &HttpResponse) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.0 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        response.status,
        response.reason(),
        response.content_type,
        response.body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Parse a response for the client side: status line, headers, body.
pub async fn read_response<S>(stream: S) -> Result<(u16, String)>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);

    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            DagrunError::Other(anyhow::anyhow!("malformed status line: {status_line:?}"))
        })?;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line.trim_end().is_empty() {
            break;
        }
    }

    let mut body = String::new();
    reader.read_to_string(&mut body).await?;
    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_a_request_with_body() {
        let raw = b"POST /signal HTTP/1.0\r\nContent-Length: 7\r\n\r\nSIGTERM";
        let req = read_request(&raw[..]).await.unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/signal");
        assert_eq!(req.body, "SIGTERM");
    }

    #[tokio::test]
    async fn parses_a_bodyless_request() {
        let raw = b"GET /status HTTP/1.0\r\n\r\n";
        let req = read_request(&raw[..]).await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/status");
        assert_eq!(req.body, "");
    }

    #[tokio::test]
    async fn response_round_trip() {
        let mut wire = Vec::new();
        write_response(&mut wire, &HttpResponse::json("{\"ok\":true}"))
            .await
            .unwrap();

        let (status, body) = read_response(&wire[..]).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let raw = b"\r\n";
        assert!(read_request(&raw[..]).await.is_err());
    }
}
