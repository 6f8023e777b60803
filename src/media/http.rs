use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Client;
use std::env;
use std::time::Duration;

use super::Transport;
use crate::error::DownloadError;

/// 传输配置
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// HTTP 超时（秒）
    pub http_timeout_secs: u64,
    /// HTTP 连接超时（秒）
    pub http_connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: env::var("FEED_PLAYBACK_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            http_connect_timeout_secs: env::var("FEED_PLAYBACK_HTTP_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        }
    }
}

/// 基于 reqwest 的传输实现；只做单次请求，重试交给 RetryScheduler
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(err = %e, "初始化 HTTP 客户端失败");
                Client::new()
            });
        tracing::info!(
            timeout_secs = config.http_timeout_secs,
            connect_timeout_secs = config.http_connect_timeout_secs,
            "HttpTransport 已创建"
        );
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(
        &self,
        url: &str,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<Bytes, DownloadError> {
        let resp = self.http.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::StatusCode {
                status,
                url: url.to_owned(),
            });
        }

        let total = resp.content_length().filter(|n| *n > 0);
        let mut buf = BytesMut::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Body {
                url: url.to_owned(),
                source,
            })?;
            buf.extend_from_slice(&chunk);
            if let Some(total) = total {
                progress((buf.len() as f64 / total as f64).min(1.0) as f32);
            }
        }
        progress(1.0);

        tracing::debug!(url, bytes = buf.len(), "下载完成");
        Ok(buf.freeze())
    }
}
