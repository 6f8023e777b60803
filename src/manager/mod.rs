//! 播放资源管理器：actor 循环 + 对外句柄

mod actor;
mod handle;
mod messages;
mod request_tracker;

use std::time::Duration;

use crate::monitor::MonitorConfig;

pub use actor::PlaybackResourceManager;
pub use handle::ManagerHandle;
pub use messages::ManagerEvent;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub monitor: MonitorConfig,
    /// 活跃索引两侧保留的 slot 数
    pub keep_radius: i64,
    /// 切换登记后，等待多久再清理区间外的 slot
    pub transition_settle: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            keep_radius: 1,
            transition_settle: Duration::ZERO,
        }
    }
}
