#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use feed_playback::cache::{CacheConfig, MediaCache};
use feed_playback::domain::ManagerSnapshot;
use feed_playback::error::DownloadError;
use feed_playback::manager::{ManagerConfig, ManagerEvent, ManagerHandle, PlaybackResourceManager};
use feed_playback::media::{NullPlayerFactory, PassthroughResolver, Reachability, Transport};
use feed_playback::pipeline::{PipelineConfig, PreloadPipeline};

/// 记录每次下载；可模拟延迟和断网
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    delay: Duration,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn download(
        &self,
        url: &str,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<Bytes, DownloadError> {
        self.calls.lock().push(url.to_owned());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(DownloadError::Unreachable("offline".to_owned()));
        }
        progress(1.0);
        Ok(Bytes::from_static(b"fake-mp4"))
    }
}

pub struct Harness {
    pub handle: ManagerHandle,
    pub events: mpsc::Receiver<ManagerEvent>,
    pub transport: Arc<FakeTransport>,
    pub factory: Arc<NullPlayerFactory>,
    pub reachability: mpsc::Sender<Reachability>,
}

pub fn spawn_manager(transport: Arc<FakeTransport>, config: ManagerConfig) -> Harness {
    spawn_with_factory(
        transport,
        Arc::new(NullPlayerFactory::new(Duration::from_secs(10))),
        config,
    )
}

pub fn spawn_with_factory(
    transport: Arc<FakeTransport>,
    factory: Arc<NullPlayerFactory>,
    config: ManagerConfig,
) -> Harness {
    let cache = Arc::new(MediaCache::in_memory(&CacheConfig {
        max_entries: 10,
        max_cost_mb: 64,
        disk_max_mb: 0,
    }));
    spawn_with_cache(transport, factory, cache, config)
}

pub fn spawn_with_cache(
    transport: Arc<FakeTransport>,
    factory: Arc<NullPlayerFactory>,
    cache: Arc<MediaCache>,
    config: ManagerConfig,
) -> Harness {
    let pipeline = Arc::new(PreloadPipeline::new(
        cache,
        Arc::new(PassthroughResolver),
        transport.clone(),
        factory.clone(),
        PipelineConfig::default(),
    ));
    let (reach_tx, reach_rx) = mpsc::channel(8);
    let (handle, events) = PlaybackResourceManager::spawn(pipeline, config, Some(reach_rx));
    Harness {
        handle,
        events,
        transport,
        factory,
        reachability: reach_tx,
    }
}

pub async fn wait_until(
    handle: &ManagerHandle,
    pred: impl FnMut(&ManagerSnapshot) -> bool,
) -> ManagerSnapshot {
    let mut rx = handle.subscribe();
    let snap = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(pred))
        .await
        .expect("等待状态超时")
        .expect("管理器已退出");
    snap.clone()
}

pub async fn next_event(
    events: &mut mpsc::Receiver<ManagerEvent>,
    mut pred: impl FnMut(&ManagerEvent) -> bool,
) -> ManagerEvent {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            let evt = events.recv().await.expect("事件通道已关闭");
            if pred(&evt) {
                return evt;
            }
        }
    })
    .await
    .expect("等待事件超时")
}

pub fn url(n: i64) -> String {
    format!("https://cdn.example.com/v/{n}.mp4")
}
