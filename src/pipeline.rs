//! 预加载流水线：缓存 -> 解析 -> 下载 -> 落盘 -> 构造 -> 校验
//!
//! 单次尝试受 `pipeline_timeout` 约束，校验另有 `verify_timeout`；
//! 外层由 [`RetryPolicy`] 负责退避重试。超时的一方会被直接丢弃（future
//! 被 drop），它的结果不会写回任何状态。

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::cache::MediaCache;
use crate::domain::SlotIndex;
use crate::error::{PreloadError, TimeoutStage};
use crate::media::{
    AssetResolver, MediaAsset, PlayableResource, PlayerFactory, ResourceStatus, Transport,
};
use crate::retry::{RetryError, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub pipeline_timeout: Duration,
    pub verify_timeout: Duration,
    pub verify_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pipeline_timeout: Duration::from_secs(30),
            verify_timeout: Duration::from_secs(10),
            verify_poll: Duration::from_millis(50),
        }
    }
}

/// 加载过程中上报的阶段
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadProgress {
    Fetching(f32),
    Verifying,
}

pub struct PreloadPipeline {
    cache: Arc<MediaCache>,
    resolver: Arc<dyn AssetResolver>,
    transport: Arc<dyn Transport>,
    factory: Arc<dyn PlayerFactory>,
    config: PipelineConfig,
}

impl PreloadPipeline {
    pub fn new(
        cache: Arc<MediaCache>,
        resolver: Arc<dyn AssetResolver>,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn PlayerFactory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cache,
            resolver,
            transport,
            factory,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 为 `url` 产出一个已校验可播放的资源
    pub async fn load(
        &self,
        url: &str,
        index: SlotIndex,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<Arc<dyn PlayableResource>, PreloadError> {
        let result = self
            .config
            .retry
            .run(
                |attempt| self.attempt_with_timeout(url, index, attempt, progress),
                PreloadError::is_retryable,
            )
            .await;

        match result {
            Ok(resource) => {
                tracing::info!(index, url, "预加载完成");
                Ok(resource)
            }
            Err(RetryError::Aborted { error, .. }) => Err(error),
            Err(RetryError::Exhausted { attempts, last }) => Err(PreloadError::MaxRetriesReached {
                attempts,
                last: Box::new(last),
            }),
        }
    }

    async fn attempt_with_timeout(
        &self,
        url: &str,
        index: SlotIndex,
        attempt: u32,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<Arc<dyn PlayableResource>, PreloadError> {
        let limit = self.config.pipeline_timeout;
        match timeout(limit, self.attempt(url, index, attempt, progress)).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(index, url, attempt, "单次加载超时");
                Err(PreloadError::Timeout {
                    stage: TimeoutStage::Pipeline,
                    after_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        index: SlotIndex,
        attempt: u32,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<Arc<dyn PlayableResource>, PreloadError> {
        tracing::debug!(index, url, attempt, "开始加载");
        progress(LoadProgress::Fetching(0.0));
        let asset = self.fetch(url, index, progress).await?;

        progress(LoadProgress::Verifying);
        match self.verify(&asset).await {
            Ok(resource) => {
                self.cache.put(url, asset);
                Ok(resource)
            }
            Err(e) => {
                if matches!(e, PreloadError::VerificationFailed(_)) {
                    // 坏文件不能留在缓存里，否则下一次尝试还会命中
                    self.cache.invalidate(url).await;
                }
                Err(e)
            }
        }
    }

    async fn fetch(
        &self,
        url: &str,
        index: SlotIndex,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> Result<MediaAsset, PreloadError> {
        if let Some(asset) = self.cache.get(url) {
            tracing::debug!(index, url, "内存缓存命中");
            progress(LoadProgress::Fetching(1.0));
            return Ok(asset);
        }
        if let Some(asset) = self.cache.disk_lookup(url).await {
            tracing::debug!(index, url, "磁盘缓存命中");
            progress(LoadProgress::Fetching(1.0));
            return Ok(asset);
        }

        let fetch_url = self.resolver.resolve(url).await?;
        let on_bytes = |p: f32| progress(LoadProgress::Fetching(p));
        let bytes = match self.transport.download(&fetch_url, &on_bytes).await {
            Ok(b) => b,
            Err(e) if e.is_auth_expired() => {
                tracing::info!(index, url, err = %e, "签名地址过期，刷新后重试一次");
                let fresh = self.resolver.refresh(url).await?;
                self.transport.download(&fresh, &on_bytes).await?
            }
            Err(e) => {
                tracing::warn!(index, url, err = %e, "下载失败");
                return Err(e.into());
            }
        };

        match self.cache.persist(url, &bytes).await {
            Ok(asset) => Ok(asset),
            Err(e) => {
                tracing::warn!(index, url, err = %e, "写入磁盘缓存失败，改用内存副本");
                Ok(MediaAsset::from_bytes(bytes))
            }
        }
    }

    async fn verify(&self, asset: &MediaAsset) -> Result<Arc<dyn PlayableResource>, PreloadError> {
        let resource = self.factory.construct(asset)?;
        let poll = self.config.verify_poll;

        let wait_ready = async {
            loop {
                match resource.status() {
                    ResourceStatus::ReadyToPlay if resource.is_playable() => return Ok(()),
                    ResourceStatus::ReadyToPlay => {
                        return Err(PreloadError::VerificationFailed(
                            "没有可解码的轨道".to_owned(),
                        ));
                    }
                    ResourceStatus::Failed(reason) => {
                        return Err(PreloadError::VerificationFailed(reason));
                    }
                    ResourceStatus::Unknown => tokio::time::sleep(poll).await,
                }
            }
        };

        let limit = self.config.verify_timeout;
        match timeout(limit, wait_ready).await {
            Ok(Ok(())) => Ok(resource),
            Ok(Err(e)) => {
                resource.pause();
                Err(e)
            }
            Err(_) => {
                resource.pause();
                Err(PreloadError::Timeout {
                    stage: TimeoutStage::Verification,
                    after_ms: limit.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::{DownloadError, ResolveError};
    use crate::media::{NullPlayerFactory, PassthroughResolver};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    type Respond = Box<dyn Fn(&str) -> Result<Bytes, DownloadError> + Send + Sync>;

    struct ScriptedTransport {
        calls: Mutex<Vec<String>>,
        respond: Respond,
    }

    impl ScriptedTransport {
        fn new(respond: impl Fn(&str) -> Result<Bytes, DownloadError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn ok() -> Arc<Self> {
            Self::new(|_| Ok(Bytes::from_static(b"fake-mp4")))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn download(
            &self,
            url: &str,
            progress: &(dyn Fn(f32) + Send + Sync),
        ) -> Result<Bytes, DownloadError> {
            self.calls.lock().push(url.to_owned());
            let res = (self.respond)(url);
            if res.is_ok() {
                progress(1.0);
            }
            res
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn download(
            &self,
            _url: &str,
            _progress: &(dyn Fn(f32) + Send + Sync),
        ) -> Result<Bytes, DownloadError> {
            std::future::pending().await
        }
    }

    /// 第一次解析给出过期签名，refresh 给出新签名
    #[derive(Default)]
    struct SigningResolver {
        refreshes: Mutex<u32>,
    }

    #[async_trait]
    impl AssetResolver for SigningResolver {
        async fn resolve(&self, id: &str) -> Result<String, ResolveError> {
            Ok(format!("{id}?sig=old"))
        }

        async fn refresh(&self, id: &str) -> Result<String, ResolveError> {
            *self.refreshes.lock() += 1;
            Ok(format!("{id}?sig=new"))
        }
    }

    fn pipeline_with(
        transport: Arc<dyn Transport>,
        factory: Arc<NullPlayerFactory>,
        resolver: Arc<dyn AssetResolver>,
    ) -> PreloadPipeline {
        let cache = Arc::new(MediaCache::in_memory(&CacheConfig {
            max_entries: 4,
            max_cost_mb: 8,
            disk_max_mb: 0,
        }));
        PreloadPipeline::new(cache, resolver, transport, factory, PipelineConfig::default())
    }

    const URL: &str = "https://cdn.example.com/v/1.mp4";

    #[tokio::test(start_paused = true)]
    async fn cold_load_fetches_once_then_hits_cache() {
        let transport = ScriptedTransport::ok();
        let factory = Arc::new(NullPlayerFactory::default());
        let pipeline = pipeline_with(
            transport.clone(),
            factory.clone(),
            Arc::new(PassthroughResolver),
        );

        let stages = Mutex::new(Vec::new());
        let sink = |p: LoadProgress| stages.lock().push(p);
        let first = pipeline.load(URL, 0, &sink).await.expect("first load");
        assert_eq!(first.status(), ResourceStatus::ReadyToPlay);
        assert!(stages.lock().contains(&LoadProgress::Verifying));

        pipeline.load(URL, 0, &|_| {}).await.expect("cached load");
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(factory.constructed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_fetch_exhausts_attempts() {
        let transport = ScriptedTransport::new(|_| Err(DownloadError::Unreachable("offline".into())));
        let pipeline = pipeline_with(
            transport.clone(),
            Arc::new(NullPlayerFactory::default()),
            Arc::new(PassthroughResolver),
        );

        let started = Instant::now();
        let err = pipeline.load(URL, 2, &|_| {}).await.expect_err("offline");
        assert!(matches!(
            &err,
            PreloadError::MaxRetriesReached { attempts: 3, last } if matches!(**last, PreloadError::Network(_))
        ));
        assert!(err.is_network_class());
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_not_retried() {
        let transport = ScriptedTransport::new(|url| {
            Err(DownloadError::StatusCode {
                status: reqwest::StatusCode::NOT_FOUND,
                url: url.to_owned(),
            })
        });
        let pipeline = pipeline_with(
            transport.clone(),
            Arc::new(NullPlayerFactory::default()),
            Arc::new(PassthroughResolver),
        );

        let err = pipeline.load(URL, 0, &|_| {}).await.expect_err("404");
        assert!(matches!(err, PreloadError::AssetResolutionFailed(_)));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_signature_is_refreshed_once() {
        let transport = ScriptedTransport::new(|url| {
            if url.ends_with("sig=new") {
                Ok(Bytes::from_static(b"fresh"))
            } else {
                Err(DownloadError::StatusCode {
                    status: reqwest::StatusCode::FORBIDDEN,
                    url: url.to_owned(),
                })
            }
        });
        let resolver = Arc::new(SigningResolver::default());
        let pipeline = pipeline_with(
            transport.clone(),
            Arc::new(NullPlayerFactory::default()),
            resolver.clone(),
        );

        pipeline.load(URL, 0, &|_| {}).await.expect("refreshed load");
        assert_eq!(*resolver.refreshes.lock(), 1);
        assert_eq!(
            transport.calls(),
            vec![format!("{URL}?sig=old"), format!("{URL}?sig=new")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unready_resource_times_out_in_verification() {
        let factory = Arc::new(NullPlayerFactory::default());
        factory.set_initial_status(ResourceStatus::Unknown);
        let pipeline = pipeline_with(
            ScriptedTransport::ok(),
            factory.clone(),
            Arc::new(PassthroughResolver),
        );

        let err = pipeline.load(URL, 0, &|_| {}).await.expect_err("never ready");
        assert!(err.is_timeout());
        assert!(matches!(
            &err,
            PreloadError::MaxRetriesReached { last, .. }
                if matches!(**last, PreloadError::Timeout { stage: TimeoutStage::Verification, .. })
        ));
        assert_eq!(factory.constructed().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_verification_invalidates_cached_media() {
        let factory = Arc::new(NullPlayerFactory::default());
        factory.set_initial_status(ResourceStatus::Failed("decoder error".into()));
        let transport = ScriptedTransport::ok();
        let pipeline = pipeline_with(transport.clone(), factory, Arc::new(PassthroughResolver));

        let err = pipeline.load(URL, 0, &|_| {}).await.expect_err("bad media");
        assert!(matches!(
            &err,
            PreloadError::MaxRetriesReached { last, .. } if matches!(**last, PreloadError::VerificationFailed(_))
        ));
        assert!(pipeline.cache().get(URL).is_none());
        // 每次尝试都重新下载，而不是命中坏缓存
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_fetch_hits_pipeline_timeout() {
        let cache = Arc::new(MediaCache::in_memory(&CacheConfig {
            max_entries: 4,
            max_cost_mb: 8,
            disk_max_mb: 0,
        }));
        let pipeline = PreloadPipeline::new(
            cache,
            Arc::new(PassthroughResolver),
            Arc::new(HangingTransport),
            Arc::new(NullPlayerFactory::default()),
            PipelineConfig {
                retry: RetryPolicy {
                    max_attempts: 1,
                    initial_delay: Duration::from_secs(1),
                },
                ..PipelineConfig::default()
            },
        );

        let started = Instant::now();
        let err = pipeline.load(URL, 0, &|_| {}).await.expect_err("hang");
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert!(matches!(
            &err,
            PreloadError::MaxRetriesReached { attempts: 1, last }
                if matches!(**last, PreloadError::Timeout { stage: TimeoutStage::Pipeline, .. })
        ));
    }
}
