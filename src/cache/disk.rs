use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

use crate::error::CacheError;

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize, Default)]
struct CacheIndex {
    #[serde(default)]
    version: u32,
    entries: HashMap<String, DiskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    url: String,
    file_name: String,
    size_bytes: u64,
    last_access_ms: u64,
}

/// 一次成功提交：最终文件位置，以及因超出上限被淘汰的源 URL
#[derive(Debug)]
pub struct Committed {
    pub path: PathBuf,
    pub evicted: Vec<String>,
}

/// 磁盘层：原始字节按源 URL 派生的稳定文件名保存，总字节数超限时按 LRU 清理
///
/// 文件读写全部走 `tokio::fs`；`index` 锁只保护内存里的索引，从不跨 await 持有。
pub struct DiskCache {
    dir: Option<PathBuf>,
    index: Mutex<CacheIndex>,
    /// 串行化索引落盘，后写入的一定是更新的快照
    index_write: tokio::sync::Mutex<()>,
    tmp_seq: AtomicU64,
    max_bytes: u64,
}

impl DiskCache {
    /// 启动时调用一次；这里的同步文件操作只发生在构造期
    pub fn new_with_config(data_dir: &Path, max_mb: usize) -> Self {
        if max_mb == 0 {
            return Self::disabled();
        }
        let max_bytes = (max_mb as u64).saturating_mul(1024).saturating_mul(1024);

        let dir = data_dir.join("video_cache");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), err = %e, "创建视频缓存目录失败，将禁用磁盘缓存");
            return Self::disabled();
        }

        let index = std::fs::read(dir.join(INDEX_FILE))
            .ok()
            .and_then(|b| serde_json::from_slice::<CacheIndex>(&b).ok())
            .filter(|idx| idx.version == INDEX_VERSION)
            .unwrap_or_else(|| {
                // 没有索引或索引版本不对：目录里的文件无从对应，全部作废
                let removed = remove_media_files_blocking(&dir);
                if removed > 0 {
                    tracing::info!(removed, "视频缓存索引不可用，已清理旧文件");
                }
                CacheIndex {
                    version: INDEX_VERSION,
                    entries: HashMap::new(),
                }
            });

        Self {
            dir: Some(dir),
            index: Mutex::new(index),
            index_write: tokio::sync::Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
            max_bytes,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: None,
            index: Mutex::new(CacheIndex::default()),
            index_write: tokio::sync::Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
            max_bytes: 0,
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// 命中返回文件路径和大小；访问时间只更新内存索引，下次提交时一起落盘
    pub async fn lookup(&self, url: &str) -> Option<(PathBuf, u64)> {
        let dir = self.dir.as_ref()?;
        let key = cache_key(url);
        let file_name = self
            .index
            .lock()
            .entries
            .get(&key)
            .map(|e| e.file_name.clone())
            .unwrap_or_else(|| file_name_for(url));
        let path = dir.join(&file_name);

        match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_file() => {
                let size_bytes = md.len();
                self.index.lock().entries.insert(
                    key,
                    DiskEntry {
                        url: url.to_owned(),
                        file_name,
                        size_bytes,
                        last_access_ms: now_ms(),
                    },
                );
                Some((path, size_bytes))
            }
            _ => {
                self.index.lock().entries.remove(&key);
                None
            }
        }
    }

    /// 先写临时文件再改名，读者永远看不到写了一半的视频
    pub async fn commit(&self, url: &str, bytes: &[u8]) -> Result<Committed, CacheError> {
        let dir = self.dir.as_ref().ok_or(CacheError::DiskDisabled)?;

        let key = cache_key(url);
        let file_name = file_name_for(url);
        let final_path = dir.join(&file_name);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = dir.join(format!("{file_name}.{seq}.part"));

        if let Err(e) = write_file(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CacheError::Write(e));
        }
        if let Err(source) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CacheError::Commit {
                path: final_path,
                source,
            });
        }

        let victims = {
            let mut index = self.index.lock();
            index.entries.insert(
                key.clone(),
                DiskEntry {
                    url: url.to_owned(),
                    file_name,
                    size_bytes: bytes.len() as u64,
                    last_access_ms: now_ms(),
                },
            );
            take_lru_victims(&mut index, &key, self.max_bytes)
        };

        let mut evicted = Vec::with_capacity(victims.len());
        for ent in victims {
            let _ = tokio::fs::remove_file(dir.join(&ent.file_name)).await;
            tracing::debug!(file = %ent.file_name, size = ent.size_bytes, "LRU 淘汰磁盘缓存文件");
            evicted.push(ent.url);
        }
        self.persist_index().await;

        Ok(Committed {
            path: final_path,
            evicted,
        })
    }

    pub async fn invalidate(&self, url: &str) {
        let Some(dir) = self.dir.as_ref() else {
            return;
        };
        let removed = self.index.lock().entries.remove(&cache_key(url));
        let file_name = removed
            .as_ref()
            .map(|e| e.file_name.clone())
            .unwrap_or_else(|| file_name_for(url));
        let _ = tokio::fs::remove_file(dir.join(file_name)).await;
        if removed.is_some() {
            self.persist_index().await;
        }
    }

    /// 返回 (删除的文件数, 字节数)；索引文件保留
    pub async fn clear_all(&self) -> (usize, u64) {
        let Some(dir) = self.dir.as_ref() else {
            return (0, 0);
        };
        self.index.lock().entries.clear();
        let removed = remove_media_files(dir).await;
        self.persist_index().await;
        removed
    }

    pub fn total_bytes(&self) -> u64 {
        self.index.lock().entries.values().map(|e| e.size_bytes).sum()
    }

    async fn persist_index(&self) {
        let Some(dir) = self.dir.as_ref() else {
            return;
        };
        let _writing = self.index_write.lock().await;
        let bytes = {
            let index = self.index.lock();
            serde_json::to_vec(&*index)
        };
        let bytes = match bytes {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(err = %e, "序列化视频缓存索引失败");
                return;
            }
        };

        let index_path = dir.join(INDEX_FILE);
        let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        let written = match write_file(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &index_path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(path = %index_path.display(), err = %e, "写入视频缓存索引失败");
        }
    }
}

/// 超过上限时从最久未访问的条目开始摘除；`protect` 是刚写入的条目
fn take_lru_victims(index: &mut CacheIndex, protect: &str, max_bytes: u64) -> Vec<DiskEntry> {
    let total: u64 = index.entries.values().map(|e| e.size_bytes).sum();
    let mut over = total.saturating_sub(max_bytes);
    if over == 0 {
        return Vec::new();
    }

    let mut by_age: Vec<(String, u64)> = index
        .entries
        .iter()
        .filter(|(k, _)| k.as_str() != protect)
        .map(|(k, e)| (k.clone(), e.last_access_ms))
        .collect();
    by_age.sort_by_key(|&(_, ts)| ts);

    let mut victims = Vec::new();
    for (key, _) in by_age {
        if over == 0 {
            break;
        }
        if let Some(ent) = index.entries.remove(&key) {
            over = over.saturating_sub(ent.size_bytes);
            victims.push(ent);
        }
    }
    victims
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

fn cache_key(url: &str) -> String {
    hex::encode(Md5::digest(url.as_bytes()))
}

/// 稳定文件名：URL 摘要 + 原扩展名（查询串不参与）
fn file_name_for(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin");
    format!("{}.{}", cache_key(url), ext.to_ascii_lowercase())
}

/// 删除目录下除索引外的所有媒体文件，返回 (文件数, 字节数)
async fn remove_media_files(dir: &Path) -> (usize, u64) {
    let Ok(mut rd) = tokio::fs::read_dir(dir).await else {
        return (0, 0);
    };
    let (mut files, mut bytes) = (0usize, 0u64);
    while let Ok(Some(ent)) = rd.next_entry().await {
        if ent.file_name() == INDEX_FILE {
            continue;
        }
        let Ok(md) = ent.metadata().await else {
            continue;
        };
        if !md.is_file() {
            continue;
        }
        if tokio::fs::remove_file(ent.path()).await.is_ok() {
            files += 1;
            bytes = bytes.saturating_add(md.len());
        }
    }
    (files, bytes)
}

fn remove_media_files_blocking(dir: &Path) -> usize {
    let Ok(rd) = std::fs::read_dir(dir) else {
        return 0;
    };
    rd.flatten()
        .filter(|ent| ent.file_type().is_ok_and(|t| t.is_file()))
        .filter(|ent| std::fs::remove_file(ent.path()).is_ok())
        .count()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_stable_and_keeps_extension() {
        let a = file_name_for("https://cdn.example.com/videos/clip.MP4?token=abc");
        let b = file_name_for("https://cdn.example.com/videos/clip.MP4?token=abc");
        assert_eq!(a, b);
        assert!(a.ends_with(".mp4"));
        assert!(file_name_for("https://cdn.example.com/videos/clip").ends_with(".bin"));
    }

    #[tokio::test]
    async fn commit_then_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DiskCache::new_with_config(dir.path(), 16);
        let url = "https://cdn.example.com/a.mp4";

        assert!(cache.lookup(url).await.is_none());
        let committed = cache.commit(url, b"hello").await.expect("commit");
        assert!(committed.evicted.is_empty());
        assert_eq!(cache.lookup(url).await, Some((committed.path.clone(), 5)));
        assert_eq!(tokio::fs::read(&committed.path).await.expect("read"), b"hello");

        cache.invalidate(url).await;
        assert!(cache.lookup(url).await.is_none());
        assert!(!committed.path.exists());
    }

    #[tokio::test]
    async fn commit_leaves_no_partial_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DiskCache::new_with_config(dir.path(), 16);
        cache.commit("https://x/1.mp4", b"1").await.expect("commit");

        let names: Vec<String> = std::fs::read_dir(dir.path().join("video_cache"))
            .expect("read_dir")
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(names.iter().all(|n| !n.ends_with(".part") && !n.ends_with(".tmp")));
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = "https://cdn.example.com/b.mp4";
        {
            let cache = DiskCache::new_with_config(dir.path(), 16);
            cache.commit(url, b"abc").await.expect("commit");
        }
        let cache = DiskCache::new_with_config(dir.path(), 16);
        assert_eq!(cache.total_bytes(), 3);
        assert!(cache.lookup(url).await.is_some());
    }

    #[tokio::test]
    async fn stale_index_version_drops_old_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_dir = dir.path().join("video_cache");
        std::fs::create_dir_all(&cache_dir).expect("mkdir");
        std::fs::write(cache_dir.join("orphan.mp4"), b"old").expect("write");
        std::fs::write(cache_dir.join(INDEX_FILE), br#"{"version":1,"entries":{}}"#).expect("write");

        let cache = DiskCache::new_with_config(dir.path(), 16);
        assert_eq!(cache.total_bytes(), 0);
        assert!(!cache_dir.join("orphan.mp4").exists());
    }

    #[tokio::test]
    async fn byte_ceiling_evicts_oldest_and_reports_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DiskCache::new_with_config(dir.path(), 1);
        let chunk = vec![0u8; 600 * 1024];

        let first = cache.commit("https://x/1.mp4", &chunk).await.expect("commit 1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = cache.commit("https://x/2.mp4", &chunk).await.expect("commit 2");

        assert_eq!(second.evicted, vec!["https://x/1.mp4".to_owned()]);
        assert!(!first.path.exists());
        assert!(cache.lookup("https://x/1.mp4").await.is_none());
        assert!(cache.lookup("https://x/2.mp4").await.is_some());
    }

    #[tokio::test]
    async fn clear_all_keeps_index_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DiskCache::new_with_config(dir.path(), 16);
        cache.commit("https://x/1.mp4", b"1").await.expect("commit");
        cache.commit("https://x/2.mp4", b"22").await.expect("commit");

        let (files, bytes) = cache.clear_all().await;
        assert_eq!(files, 2);
        assert_eq!(bytes, 3);
        assert_eq!(cache.total_bytes(), 0);
        assert!(dir.path().join("video_cache").join(INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn disabled_cache_refuses_commit() {
        let cache = DiskCache::disabled();
        assert!(matches!(
            cache.commit("https://x/1.mp4", b"1").await,
            Err(CacheError::DiskDisabled)
        ));
        assert!(cache.lookup("https://x/1.mp4").await.is_none());
        assert!(cache.cache_dir().is_none());
    }
}
