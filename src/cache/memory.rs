use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct Entry<V> {
    value: V,
    cost: u64,
    last_access: AtomicU64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    total_cost: u64,
}

/// 内存层：条目数 + 总成本双上限的 LRU
///
/// 读只拿读锁（访问时间戳是原子量），插入/淘汰拿写锁。
pub struct MemoryTier<V> {
    inner: RwLock<Inner<V>>,
    clock: AtomicU64,
    max_entries: usize,
    max_cost: u64,
}

impl<V: Clone> MemoryTier<V> {
    pub fn new(max_entries: usize, max_cost: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                total_cost: 0,
            }),
            clock: AtomicU64::new(1),
            max_entries: max_entries.max(1),
            max_cost,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let inner = self.inner.read();
        let entry = inner.entries.get(key)?;
        entry.last_access.store(self.tick(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// 插入并按需淘汰；单个条目超过总成本上限时不缓存，返回 false
    pub fn put(&self, key: &str, value: V, cost: u64) -> bool {
        if cost > self.max_cost {
            tracing::debug!(key, cost, max_cost = self.max_cost, "条目超过内存缓存上限，跳过");
            return false;
        }

        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.remove(key) {
            inner.total_cost = inner.total_cost.saturating_sub(old.cost);
        }

        while !inner.entries.is_empty()
            && (inner.entries.len() + 1 > self.max_entries
                || inner.total_cost.saturating_add(cost) > self.max_cost)
        {
            let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(e) = inner.entries.remove(&victim) {
                inner.total_cost = inner.total_cost.saturating_sub(e.cost);
                tracing::debug!(key = %victim, cost = e.cost, "LRU 淘汰内存缓存条目");
            }
        }

        inner.total_cost = inner.total_cost.saturating_add(cost);
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value,
                cost,
                last_access: AtomicU64::new(self.tick()),
            },
        );
        true
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.write();
        let e = inner.entries.remove(key)?;
        inner.total_cost = inner.total_cost.saturating_sub(e.cost);
        Some(e.value)
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        let n = inner.entries.len();
        inner.entries.clear();
        inner.total_cost = 0;
        n
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> u64 {
        self.inner.read().total_cost
    }
}
