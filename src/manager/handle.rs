use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use super::messages::ManagerCommand;
use crate::cleanup::CleanupCoordinator;
use crate::domain::{CleanupContext, ManagerSnapshot, SlotIndex};
use crate::error::PreloadError;
use crate::media::PlayableResource;

/// 管理器的对外句柄，可随意克隆
///
/// 所有写操作都发给管理器循环串行执行；读操作直接读最新发布的快照，
/// 没有副作用。
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerCommand>,
    state: watch::Receiver<ManagerSnapshot>,
    cleanup: CleanupCoordinator,
}

impl ManagerHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<ManagerCommand>,
        state: watch::Receiver<ManagerSnapshot>,
        cleanup: CleanupCoordinator,
    ) -> Self {
        Self {
            tx,
            state,
            cleanup,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, PreloadError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| PreloadError::ManagerClosed)?;
        rx.await.map_err(|_| PreloadError::ManagerClosed)
    }

    /// 同一 `(index, url)` 并发调用只会触发一次加载；换了 url 会取消旧的加载，
    /// 旧调用方收到 [`PreloadError::Cancelled`]
    pub async fn preload(&self, index: SlotIndex, url: impl Into<String>) -> Result<(), PreloadError> {
        let url = url.into();
        self.request(|reply| ManagerCommand::Preload { index, url, reply })
            .await?
    }

    pub fn resource_for(&self, index: SlotIndex) -> Option<Arc<dyn PlayableResource>> {
        self.state
            .borrow()
            .slot(index)
            .and_then(|s| s.resource.clone())
    }

    pub async fn pause_all_except(&self, index: SlotIndex) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::PauseAllExcept { index, reply })
            .await
    }

    /// 没有就绪资源时返回 [`PreloadError::PlayerNotFound`]，状态不变
    pub async fn toggle(&self, index: SlotIndex) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::Toggle { index, reply })
            .await?
    }

    pub async fn play(&self, index: SlotIndex) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::Play { index, reply })
            .await?
    }

    pub async fn pause(&self, index: SlotIndex) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::Pause { index, reply })
            .await?
    }

    pub async fn seek_to_beginning(&self, index: SlotIndex) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::SeekToBeginning { index, reply })
            .await?
    }

    /// 返回时切换已登记；区间外的清理在后台完成，可用
    /// [`wait_transition_settled`](Self::wait_transition_settled) 等待
    pub async fn prepare_for_transition(
        &self,
        from: SlotIndex,
        to: SlotIndex,
    ) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::PrepareForTransition { from, to, reply })
            .await
    }

    /// 播放结束后的自动前进
    pub async fn begin_auto_advance(&self, from: SlotIndex, to: SlotIndex) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::BeginAutoAdvance { from, to, reply })
            .await
    }

    pub async fn finish_transition(&self, index: SlotIndex) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::FinishTransition { index, reply })
            .await
    }

    pub async fn wait_transition_settled(&self) -> Result<(), PreloadError> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| !s.is_transitioning)
            .await
            .map(|_| ())
            .map_err(|_| PreloadError::ManagerClosed)
    }

    pub async fn cleanup(&self, context: CleanupContext) -> Result<(), PreloadError> {
        self.request(|reply| ManagerCommand::Cleanup { context, reply })
            .await
    }

    /// 清空内存层和磁盘层，返回删除的文件数和字节数
    pub async fn clear_cache(&self) -> Result<(usize, u64), PreloadError> {
        self.request(|reply| ManagerCommand::ClearCache { reply })
            .await
    }

    pub fn distant_indices(&self, current: SlotIndex) -> Vec<SlotIndex> {
        let tracked: Vec<SlotIndex> = self.state.borrow().slots.keys().copied().collect();
        self.cleanup.distant_indices(current, tracked)
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ManagerSnapshot> {
        self.state.clone()
    }
}
