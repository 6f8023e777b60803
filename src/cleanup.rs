//! 按保留区间回收远离视口的 slot
//!
//! 这里只负责算出区间和待回收列表；真正的释放（暂停资源、中止加载任务、
//! 删除 monitor 与 slot）由管理器在自己的循环里执行。

use crate::domain::{CleanupContext, KeepRange, SlotIndex};

#[derive(Debug, Clone, Copy)]
pub struct CleanupCoordinator {
    keep_radius: i64,
}

impl Default for CleanupCoordinator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CleanupCoordinator {
    pub fn new(keep_radius: i64) -> Self {
        Self {
            keep_radius: keep_radius.max(0),
        }
    }

    pub fn keep_radius(&self) -> i64 {
        self.keep_radius
    }

    pub fn keep_range(&self, context: CleanupContext) -> KeepRange {
        match context {
            CleanupContext::Navigation { from, to } => {
                KeepRange::spanning(from, to, self.keep_radius)
            }
            CleanupContext::Dismissal | CleanupContext::Error => KeepRange::empty(),
        }
    }

    pub fn keep_range_around(&self, active: SlotIndex) -> KeepRange {
        KeepRange::around(active, self.keep_radius)
    }

    /// 区间外的索引，按升序返回
    pub fn evict_outside(
        &self,
        keep: KeepRange,
        tracked: impl IntoIterator<Item = SlotIndex>,
    ) -> Vec<SlotIndex> {
        let mut out: Vec<SlotIndex> = tracked.into_iter().filter(|i| !keep.contains(*i)).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// 离 `current` 超过保留半径的已追踪索引
    pub fn distant_indices(
        &self,
        current: SlotIndex,
        tracked: impl IntoIterator<Item = SlotIndex>,
    ) -> Vec<SlotIndex> {
        self.evict_outside(self.keep_range_around(current), tracked)
    }
}
