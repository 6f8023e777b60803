//! 预加载错误分类
//!
//! 流水线内部的所有失败都在这里收敛成带类型的变体。变体可以克隆，
//! 因为它们会被写进对外发布的 slot 状态里。

use serde::Serialize;
use std::fmt;

use super::{CacheError, DownloadError, ResolveError};

/// 超时发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeoutStage {
    /// 整个单次加载尝试（fetch + verify）
    Pipeline,
    /// 可播放性校验
    Verification,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::Pipeline => f.write_str("加载"),
            TimeoutStage::Verification => f.write_str("校验"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum PreloadError {
    /// 传输层/连接失败，可重试
    #[error("网络错误: {0}")]
    Network(String),

    /// 加载或校验超时，可重试
    #[error("{stage}超时 ({after_ms}ms)")]
    Timeout { stage: TimeoutStage, after_ms: u64 },

    /// 资源已构造但不可播放，可重试（可能是瞬时解码问题）
    #[error("媒体校验失败: {0}")]
    VerificationFailed(String),

    /// 本轮重试耗尽；`last` 保留最后一次的真实原因
    #[error("超过最大重试次数 ({attempts}): {last}")]
    MaxRetriesReached {
        attempts: u32,
        last: Box<PreloadError>,
    },

    /// 地址解析失败，除非 resolver 自己恢复否则不重试
    #[error("解析资源地址失败: {0}")]
    AssetResolutionFailed(String),

    /// 调用方引用了没有资源的索引
    #[error("索引 {index} 没有可用的播放资源")]
    PlayerNotFound { index: i64 },

    /// 请求被更新的请求取代或被清理；不会写入 slot 状态
    #[error("请求已取消")]
    Cancelled,

    /// 管理器 actor 已退出
    #[error("播放资源管理器已关闭")]
    ManagerClosed,
}

impl PreloadError {
    /// 可归因于连接/传输的失败：参与退避重试，也会进入网络恢复重放队列
    pub fn is_network_class(&self) -> bool {
        match self {
            PreloadError::Network(_) | PreloadError::Timeout { .. } => true,
            PreloadError::MaxRetriesReached { last, .. } => last.is_network_class(),
            _ => false,
        }
    }

    /// 是否值得在本轮内退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PreloadError::Network(_)
                | PreloadError::Timeout { .. }
                | PreloadError::VerificationFailed(_)
        )
    }

    /// 最终原因是否为超时（决定 `PreloadState::TimedOut`）
    pub fn is_timeout(&self) -> bool {
        match self {
            PreloadError::Timeout { .. } => true,
            PreloadError::MaxRetriesReached { last, .. } => last.is_timeout(),
            _ => false,
        }
    }
}

impl From<DownloadError> for PreloadError {
    fn from(err: DownloadError) -> Self {
        if err.is_retryable() {
            PreloadError::Network(err.to_string())
        } else {
            PreloadError::AssetResolutionFailed(err.to_string())
        }
    }
}

impl From<ResolveError> for PreloadError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => PreloadError::AssetResolutionFailed(err.to_string()),
            ResolveError::Network(_) => PreloadError::Network(err.to_string()),
        }
    }
}

impl From<CacheError> for PreloadError {
    fn from(err: CacheError) -> Self {
        PreloadError::VerificationFailed(format!("缓存不可用: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_class() {
        assert!(PreloadError::Network("x".to_owned()).is_network_class());
        assert!(
            PreloadError::Timeout {
                stage: TimeoutStage::Pipeline,
                after_ms: 30_000
            }
            .is_network_class()
        );
        assert!(!PreloadError::VerificationFailed("x".to_owned()).is_network_class());
        assert!(PreloadError::VerificationFailed("x".to_owned()).is_retryable());
        assert!(!PreloadError::AssetResolutionFailed("x".to_owned()).is_retryable());
    }

    #[test]
    fn test_max_retries_keeps_cause() {
        let err = PreloadError::MaxRetriesReached {
            attempts: 3,
            last: Box::new(PreloadError::Timeout {
                stage: TimeoutStage::Verification,
                after_ms: 10_000,
            }),
        };
        assert!(err.is_network_class());
        assert!(err.is_timeout());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("校验超时"));
    }

    #[test]
    fn test_resolve_error_conversion() {
        let e: PreloadError = ResolveError::NotFound("v1".to_owned()).into();
        assert!(matches!(e, PreloadError::AssetResolutionFailed(_)));
        let e: PreloadError = ResolveError::Network("dns".to_owned()).into();
        assert!(e.is_network_class());
    }

    #[test]
    fn test_download_error_conversion() {
        let e: PreloadError = DownloadError::StatusCode {
            status: reqwest::StatusCode::NOT_FOUND,
            url: "http://x".to_owned(),
        }
        .into();
        assert!(matches!(e, PreloadError::AssetResolutionFailed(_)));

        let e: PreloadError = DownloadError::Unreachable("offline".to_owned()).into();
        assert!(matches!(e, PreloadError::Network(_)));
    }
}
