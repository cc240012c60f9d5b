// src/services/fetcher.rs

//! Build log retrieval.
//!
//! Only the tail of a log is kept: failure diagnostics cluster near the end,
//! and the window bounds both memory and stored record size.

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{FetchConfig, TrimConfig};
use crate::utils::http;

/// Source of build log text.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Retrieve the (truncated) log behind `url`.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP log fetcher keeping the last `max_bytes` of each body.
pub struct LogFetcher {
    client: Client,
    max_bytes: usize,
    trim: TrimConfig,
}

impl LogFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self::with_client(http::create_client(config)?, config))
    }

    pub fn with_client(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            max_bytes: config.max_log_bytes,
            trim: config.trim.clone(),
        }
    }

    /// Download the body, never buffering much more than twice the window.
    async fn download_tail(&self, url: &str) -> Result<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::fetch(url, e))?;

        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| AppError::fetch(url, e))? {
            buffer.extend_from_slice(&chunk);
            if buffer.len() > self.max_bytes.saturating_mul(2) {
                let excess = buffer.len() - self.max_bytes;
                buffer.drain(..excess);
            }
        }
        Ok(buffer)
    }
}

#[async_trait]
impl LogSource for LogFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let body = self.download_tail(url).await?;
        let text = tail_bytes(&body, self.max_bytes);
        if self.trim.enabled {
            Ok(trim_log(&text, &self.trim.end_marker, self.trim.tail_lines))
        } else {
            Ok(text)
        }
    }
}

/// Keep at most `max_bytes` trailing bytes of `body` as text.
///
/// Bodies within the window are returned whole. A multi-byte character
/// split by the cut is dropped rather than replaced.
pub fn tail_bytes(body: &[u8], max_bytes: usize) -> String {
    let start = body.len().saturating_sub(max_bytes);
    let mut tail = &body[start..];
    if start > 0 {
        let split = tail
            .iter()
            .take(3)
            .take_while(|b| (**b & 0xC0) == 0x80)
            .count();
        tail = &tail[split..];
    }

    let text = String::from_utf8_lossy(tail);
    if text.len() <= max_bytes {
        return text.into_owned();
    }

    // Replacement characters widened the text past the window.
    let mut cut = text.len() - max_bytes;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text[cut..].to_string()
}

/// Cut at the first `end_marker`, then keep the last `tail_lines` lines.
pub fn trim_log(text: &str, end_marker: &str, tail_lines: usize) -> String {
    let body = match text.find(end_marker) {
        Some(idx) if !end_marker.is_empty() => &text[..idx],
        _ => text,
    };

    let lines: Vec<&str> = body.lines().collect();
    let skip = lines.len().saturating_sub(tail_lines);
    lines[skip..].join("\n")
}
