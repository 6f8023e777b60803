//! 竖屏视频信息流的播放资源管理
//!
//! 预加载、校验、缓存、退避重试、缓冲监控和按区间清理，全部由
//! [`manager::PlaybackResourceManager`] 串行协调。

pub mod cache;
pub mod cleanup;
pub mod cli;
pub mod domain;
pub mod error;
pub mod logging;
pub mod manager;
pub mod media;
pub mod monitor;
pub mod pipeline;
pub mod retry;
pub mod settings;
