//! 媒体缓存相关错误

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// 磁盘层被禁用（目录创建失败或上限为 0）
    #[error("磁盘缓存不可用")]
    DiskDisabled,

    /// 写入临时文件失败
    #[error("写入缓存临时文件失败: {0}")]
    Write(#[from] std::io::Error),

    /// 临时文件改名到最终位置失败
    #[error("提交缓存文件 {} 失败: {source}", path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
