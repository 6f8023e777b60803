//! 应用通用错误

use super::{CacheError, PreloadError};

/// 应用通用错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("JSON 序列化失败: {0}")]
    Serde(#[from] serde_json::Error),

    /// 设置错误
    #[error("设置错误: {0}")]
    Settings(#[from] SettingsError),

    /// 预加载错误
    #[error("预加载错误: {0}")]
    Preload(#[from] PreloadError),

    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(#[from] CacheError),

    /// 其他错误
    #[error("{0}")]
    Other(String),
}

/// 设置相关错误
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// 保存设置失败
    #[error("保存设置失败: {source}")]
    Save {
        #[source]
        source: std::io::Error,
    },
}
