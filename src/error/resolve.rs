//! 资源地址解析错误

/// AssetResolver 错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// 逻辑 ID 不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 解析时网络失败
    #[error("解析资源地址时网络错误: {0}")]
    Network(String),
}
