use std::path::{Path, PathBuf};

use futures_util::StreamExt as _;
use reqwest::Client;
use serde::Serialize;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

use crate::error::{AppError, Result};

const COPY_CHUNK_SIZE: usize = 256 * 1024;

/// Byte-level progress of a download or copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
    /// 0-100 when the total size is known.
    pub percent: Option<f64>,
}

impl DownloadProgress {
    fn new(downloaded: u64, total: Option<u64>) -> Self {
        let percent = total
            .filter(|t| *t > 0)
            .map(|t| (downloaded as f64 / t as f64 * 100.0).min(100.0));
        Self {
            downloaded,
            total,
            percent,
        }
    }
}

pub type DownloadCallback<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `url` into `dest`. Data lands in a `.part` file that is renamed on completion.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    bearer_token: Option<&str>,
    on_progress: DownloadCallback<'_>,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::io(e.to_string()))?;
    }

    let mut request = client.get(url);
    if let Some(token) = bearer_token.filter(|t| !t.is_empty()) {
        request = request.bearer_auth(token);
    }
    let resp = request
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let total = resp.content_length();
    let part = partial_path(dest);
    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| AppError::io(e.to_string()))?;

    let mut downloaded = 0u64;
    on_progress(DownloadProgress::new(0, total));

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&part).await;
                return Err(AppError::network_with_url(url, e.to_string()));
            }
        };
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::io(e.to_string()))?;
        downloaded += chunk.len() as u64;
        on_progress(DownloadProgress::new(downloaded, total));
    }

    file.flush().await.map_err(|e| AppError::io(e.to_string()))?;
    drop(file);

    if let Some(expected) = total {
        if downloaded != expected {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(AppError::network_with_url(
                url,
                format!("Incomplete download: {downloaded} of {expected} bytes"),
            ));
        }
    }

    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| AppError::io(e.to_string()))?;
    Ok(())
}

/// Chunked copy of a local file with the same progress reporting as [`download_file`].
pub async fn copy_file(src: &Path, dest: &Path, on_progress: DownloadCallback<'_>) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::io(e.to_string()))?;
    }

    let mut reader = tokio::fs::File::open(src)
        .await
        .map_err(|e| AppError::io(format!("Failed to open {}: {}", src.display(), e)))?;
    let total = reader.metadata().await.ok().map(|m| m.len());

    let part = partial_path(dest);
    let mut writer = tokio::fs::File::create(&part)
        .await
        .map_err(|e| AppError::io(e.to_string()))?;

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    on_progress(DownloadProgress::new(0, total));
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| AppError::io(e.to_string()))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| AppError::io(e.to_string()))?;
        copied += n as u64;
        on_progress(DownloadProgress::new(copied, total));
    }

    writer.flush().await.map_err(|e| AppError::io(e.to_string()))?;
    drop(writer);
    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| AppError::io(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// Request heads received by a test server, lowercased.
    pub type Requests = Arc<Mutex<Vec<String>>>;

    /// Serve `body` with status 200 to every connection; returns the base URL.
    pub async fn serve(body: Vec<u8>, content_type: &'static str) -> String {
        serve_recording(body, content_type).await.0
    }

    /// Answer every request with `status`, e.g. `"503 Service Unavailable"`.
    pub async fn serve_status(status: &'static str) -> String {
        serve_with(status, Vec::new(), "text/plain").await.0
    }

    /// Like [`serve`], also recording every request head.
    pub async fn serve_recording(body: Vec<u8>, content_type: &'static str) -> (String, Requests) {
        serve_with("200 OK", body, content_type).await
    }

    async fn serve_with(
        status: &'static str,
        body: Vec<u8>,
        content_type: &'static str,
    ) -> (String, Requests) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Requests::default();
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = body.clone();
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut request = [0u8; 4096];
                    let n = socket.read(&mut request).await.unwrap_or(0);
                    seen.lock()
                        .unwrap()
                        .push(String::from_utf8_lossy(&request[..n]).to_lowercase());
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        content_type,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (format!("http://{addr}"), requests)
    }
}
