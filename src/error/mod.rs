//! 统一错误处理模块
//!
//! 每个关注点一个错误类型；流水线边界上全部收敛为 [`PreloadError`]，
//! 管理器只会看到带类型的失败。

mod app;
mod cache;
mod download;
mod preload;
mod resolve;

pub use app::{AppError, SettingsError};
pub use cache::CacheError;
pub use download::DownloadError;
pub use preload::{PreloadError, TimeoutStage};
pub use resolve::ResolveError;
