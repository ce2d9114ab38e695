//! Readiness probes for the service process.

use std::time::Duration;

use reqwest::Client;
use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Whether something accepts TCP connections on `host:port`.
pub(super) async fn is_listening(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Probe `url`; any success or redirect status counts as healthy.
pub(super) async fn check_health(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status();
            status.is_success() || status.is_redirection()
        }
        Err(e) => {
            log::debug!("Health probe {} failed: {}", url, e);
            false
        }
    }
}

/// `http://host:port` plus an optional path.
pub(super) fn service_url(host: &str, port: u16, path: Option<&str>) -> String {
    let host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    match path {
        Some(path) if !path.is_empty() => {
            format!("http://{}:{}/{}", host, port, path.trim_start_matches('/'))
        }
        _ => format!("http://{}:{}", host, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_listening("127.0.0.1", port).await);
        drop(listener);
        assert!(!is_listening("127.0.0.1", port).await);
    }

    #[test]
    fn builds_urls() {
        assert_eq!(service_url("127.0.0.1", 5000, None), "http://127.0.0.1:5000");
        assert_eq!(
            service_url("0.0.0.0", 5000, Some("/api/health")),
            "http://127.0.0.1:5000/api/health"
        );
    }

    #[tokio::test]
    async fn health_accepts_success() {
        let base = crate::download::test_server::serve(b"ok".to_vec(), "text/plain").await;
        assert!(check_health(&Client::new(), &format!("{base}/health")).await);
    }
}
