//! 媒体缓存：内存层 + 磁盘层
//!
//! 整个进程注入同一个实例；内部互斥保证并发预加载任务安全共享。

mod disk;
mod memory;

use std::env;
use std::path::Path;

use crate::error::CacheError;
use crate::media::MediaAsset;

pub use disk::DiskCache;
pub use memory::MemoryTier;

/// 缓存上限配置
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// 内存层最大条目数
    pub max_entries: usize,
    /// 内存层总成本上限（MB）
    pub max_cost_mb: usize,
    /// 磁盘层大小上限（MB）
    pub disk_max_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            max_cost_mb: env::var("FEED_PLAYBACK_CACHE_MAX_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            disk_max_mb: env::var("FEED_PLAYBACK_DISK_CACHE_MAX_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2048),
        }
    }
}

pub struct MediaCache {
    memory: MemoryTier<MediaAsset>,
    disk: DiskCache,
}

impl MediaCache {
    pub fn new(data_dir: &Path, config: &CacheConfig) -> Self {
        let disk = DiskCache::new_with_config(data_dir, config.disk_max_mb);
        tracing::info!(
            max_entries = config.max_entries,
            max_cost_mb = config.max_cost_mb,
            disk_max_mb = config.disk_max_mb,
            dir = ?disk.cache_dir().map(|p| p.display().to_string()),
            "MediaCache 已创建"
        );
        Self {
            memory: MemoryTier::new(config.max_entries, mb_to_bytes(config.max_cost_mb)),
            disk,
        }
    }

    /// 只有内存层（磁盘不可用时使用）
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self {
            memory: MemoryTier::new(config.max_entries, mb_to_bytes(config.max_cost_mb)),
            disk: DiskCache::disabled(),
        }
    }

    /// 内存层查询
    pub fn get(&self, key: &str) -> Option<MediaAsset> {
        self.memory.get(key)
    }

    /// 磁盘层查询；命中时提升到内存层
    pub async fn disk_lookup(&self, key: &str) -> Option<MediaAsset> {
        let (path, byte_len) = self.disk.lookup(key).await?;
        let asset = MediaAsset::from_file(path, byte_len);
        self.put(key, asset.clone());
        Some(asset)
    }

    pub fn put(&self, key: &str, asset: MediaAsset) -> bool {
        let cost = asset.byte_len;
        self.memory.put(key, asset, cost)
    }

    /// 写入磁盘层，返回指向缓存文件的资产
    ///
    /// 被磁盘上限挤掉的文件同时从内存层移除，内存里不会留下指向已删文件的资产。
    pub async fn persist(&self, key: &str, bytes: &[u8]) -> Result<MediaAsset, CacheError> {
        let committed = self.disk.commit(key, bytes).await?;
        for url in &committed.evicted {
            self.memory.remove(url);
        }
        Ok(MediaAsset::from_file(committed.path, bytes.len() as u64))
    }

    /// 两层都删掉（例如缓存的媒体校验失败）
    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        self.disk.invalidate(key).await;
    }

    pub async fn clear(&self) -> (usize, u64) {
        let mem = self.memory.clear();
        let (files, bytes) = self.disk.clear_all().await;
        tracing::info!(memory_entries = mem, files, bytes, "媒体缓存已清空");
        (files, bytes)
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }
}

fn mb_to_bytes(mb: usize) -> u64 {
    (mb as u64).saturating_mul(1024).saturating_mul(1024)
}
