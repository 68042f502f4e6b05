// src/sock/mod.rs

//! Per-run IPC endpoint: a local stream socket speaking HTTP/1.0.

pub mod client;
pub mod http;
pub mod server;

use std::path::PathBuf;

pub use client::SockClient;
pub use http::{HttpRequest, HttpResponse};
pub use server::{HandlerFunc, SockServer};

/// Derive the control socket path for a DAG name.
///
/// `sun_path` is capped by the platform (~108 bytes on Linux), so the file
/// stem is `@dagrun-<name>-<hash>` truncated to 50 characters: the name is
/// clipped but the blake3 prefix always survives, keeping paths unique
/// per DAG.
pub fn socket_path(dag_name: &str) -> PathBuf {
    const STEM_BUDGET: usize = 50;
    const PREFIX: &str = "@dagrun-";
    const HASH_LEN: usize = 6;

    let hash = blake3::hash(dag_name.as_bytes()).to_hex();
    let hash = &hash.as_str()[..HASH_LEN];

    let safe_name: String = dag_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let name_budget = STEM_BUDGET - PREFIX.len() - HASH_LEN - 1;
    let clipped: String = safe_name.chars().take(name_budget).collect();

    std::env::temp_dir().join(format!("{PREFIX}{clipped}-{hash}.sock"))
}
