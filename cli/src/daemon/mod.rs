// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Running the engine and HTTP API in the foreground
//! - Liveness checks against a running daemon
//! - Graceful shutdown

use anyhow::Result;
use std::time::Duration;

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::start_daemon;

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running {
        uptime: Option<u64>,
        active_workflows: Option<u64>,
    },
    Stopped,
    Unhealthy {
        error: String,
    },
}

/// Base URL for a daemon at `host:port`; `host` may carry its own scheme
pub fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Check whether a daemon answers its health endpoint
pub async fn check_daemon_running(host: &str, port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let health_url = format!("{}/health", base_url(host, port));

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.json::<serde_json::Value>().await.ok();
            Ok(DaemonStatus::Running {
                uptime: body.as_ref().and_then(|v| v["uptime_seconds"].as_u64()),
                active_workflows: body.as_ref().and_then(|v| v["active_workflows"].as_u64()),
            })
        }
        Ok(resp) => Ok(DaemonStatus::Unhealthy {
            error: format!("HTTP {}", resp.status()),
        }),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(DaemonStatus::Stopped),
        Err(e) => Ok(DaemonStatus::Unhealthy {
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("127.0.0.1", 8000), "http://127.0.0.1:8000");
        assert_eq!(base_url("https://shim.internal/", 443), "https://shim.internal:443");
    }

    #[tokio::test]
    async fn test_running_daemon_reports_uptime() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","uptime_seconds":42,"active_workflows":3}"#)
            .create_async()
            .await;

        let url = server.url();
        let (host, port) = url.rsplit_once(':').unwrap();
        let status = check_daemon_running(host, port.parse().unwrap()).await.unwrap();
        match status {
            DaemonStatus::Running {
                uptime,
                active_workflows,
            } => {
                assert_eq!(uptime, Some(42));
                assert_eq!(active_workflows, Some(3));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unhealthy_daemon() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(500)
            .create_async()
            .await;

        let url = server.url();
        let (host, port) = url.rsplit_once(':').unwrap();
        let status = check_daemon_running(host, port.parse().unwrap()).await.unwrap();
        assert!(matches!(status, DaemonStatus::Unhealthy { .. }));
    }
}
