//! 请求代次追踪：同一 key 只认最新发出的请求，旧请求的结果直接丢弃

use std::collections::HashMap;
use std::hash::Hash;

use crate::domain::SlotIndex;

/// 需要做过期丢弃的异步任务种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// 某个索引上的预加载
    Preload(SlotIndex),
    /// 切换后的延迟清理
    Transition,
}

#[derive(Debug)]
pub struct RequestTracker<K> {
    pending: HashMap<K, u64>,
    next_id: u64,
}

impl<K: Eq + Hash> Default for RequestTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> RequestTracker<K> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// 发起新请求并返回代次；同一 key 的旧代次随之失效
    pub fn issue(&mut self, key: K) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.pending.insert(key, id);
        id
    }

    /// 只读检查，用于进度这类中间事件
    pub fn is_current(&self, key: &K, id: u64) -> bool {
        self.pending.get(key) == Some(&id)
    }

    /// 代次匹配时接受结果并清除 pending
    pub fn accept(&mut self, key: &K, id: u64) -> bool {
        if self.is_current(key, id) {
            self.pending.remove(key);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self, key: &K) {
        self.pending.remove(key);
    }

    pub fn reset_all(&mut self) {
        self.pending.clear();
    }
}
