use serde::Serialize;

use super::SlotIndex;

/// 闭区间 `[start, end]`，区间内的资源在一次操作中不得被回收
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeepRange {
    pub start: SlotIndex,
    pub end: SlotIndex,
}

impl KeepRange {
    /// 单个活跃索引 ±radius
    pub fn around(index: SlotIndex, radius: i64) -> Self {
        Self {
            start: index.saturating_sub(radius),
            end: index.saturating_add(radius),
        }
    }

    /// 切换中的一对索引：`min(from,to)-radius ..= max(from,to)+radius`
    pub fn spanning(from: SlotIndex, to: SlotIndex, radius: i64) -> Self {
        Self {
            start: from.min(to).saturating_sub(radius),
            end: from.max(to).saturating_add(radius),
        }
    }

    /// 不包含任何索引（dismissal / error 全部回收）
    pub fn empty() -> Self {
        Self { start: 0, end: -1 }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, index: SlotIndex) -> bool {
        index >= self.start && index <= self.end
    }
}
