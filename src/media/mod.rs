//! 资源管理器依赖的外部协作者
//!
//! 解码、传输、签名 URL 都不属于本 crate；这里只定义接口，外加二进制和
//! 测试使用的几个默认实现。

mod http;
pub mod null;
mod resolver;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DownloadError, PreloadError, ResolveError};

pub use http::{HttpTransport, TransportConfig};
pub use null::{NullPlayerFactory, NullResource};
pub use resolver::{BaseUrlResolver, PassthroughResolver};

/// 播放资源的加载状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    Unknown,
    ReadyToPlay,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeControl {
    Paused,
    Playing,
    /// 想播放但在等数据
    WaitingToPlay,
}

/// 可播放资源（播放器 + 媒体项）
///
/// 方法都是 `&self`，实现方自行做内部可变性。
pub trait PlayableResource: Send + Sync + fmt::Debug {
    fn status(&self) -> ResourceStatus;
    fn is_playable(&self) -> bool;
    fn time_control(&self) -> TimeControl;
    fn position(&self) -> Duration;
    fn duration(&self) -> Option<Duration>;
    fn buffered_ranges(&self) -> Vec<Range<Duration>>;
    fn play(&self);
    fn pause(&self);
    fn seek(&self, to: Duration);

    fn is_playing(&self) -> bool {
        self.time_control() == TimeControl::Playing
    }
}

/// 媒体字节所在的位置
#[derive(Debug, Clone)]
pub enum MediaSource {
    File(PathBuf),
    Memory(Bytes),
}

/// 缓存里保存的已获取媒体，可以反复构造新的播放资源
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub source: MediaSource,
    pub byte_len: u64,
}

impl MediaAsset {
    pub fn from_file(path: PathBuf, byte_len: u64) -> Self {
        Self {
            source: MediaSource::File(path),
            byte_len,
        }
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        let byte_len = bytes.len() as u64;
        Self {
            source: MediaSource::Memory(bytes),
            byte_len,
        }
    }
}

/// 逻辑视频 ID -> 可直接下载的 URL（可能带签名）
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Result<String, ResolveError>;

    /// 签名过期时调用；默认重新解析
    async fn refresh(&self, id: &str) -> Result<String, ResolveError> {
        self.resolve(id).await
    }
}

/// 原始字节传输；非 2xx 必须作为错误返回
#[async_trait]
pub trait Transport: Send + Sync {
    async fn download(
        &self,
        url: &str,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<Bytes, DownloadError>;
}

pub trait PlayerFactory: Send + Sync {
    fn construct(&self, asset: &MediaAsset) -> Result<Arc<dyn PlayableResource>, PreloadError>;
}

/// 网络可达性事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Available,
    Unavailable,
}
