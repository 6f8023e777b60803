use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PreloadError;
use crate::media::PlayableResource;

/// 信息流中的位置
pub type SlotIndex = i64;

/// 单个 slot 的实时播放状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Buffering(f32),
    Error(PreloadError),
}

/// 单个 slot 的预加载状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PreloadState {
    NotStarted,
    Loading(f32),
    Verifying,
    Ready,
    Failed(PreloadError),
    TimedOut,
}

/// 管理器的全局当前状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ManagerState {
    Idle,
    Loading { index: SlotIndex },
    Playing { index: SlotIndex },
    Paused { index: SlotIndex },
    Error { index: SlotIndex, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionState {
    None,
    Gesture { from: SlotIndex, to: SlotIndex },
    AutoAdvance { from: SlotIndex, to: SlotIndex },
}

impl TransitionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, TransitionState::None)
    }

    pub fn indices(&self) -> Option<(SlotIndex, SlotIndex)> {
        match *self {
            TransitionState::None => None,
            TransitionState::Gesture { from, to } | TransitionState::AutoAdvance { from, to } => {
                Some((from, to))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupContext {
    Navigation { from: SlotIndex, to: SlotIndex },
    Dismissal,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkState {
    Unknown,
    Connected,
    Disconnected,
}

/// 一个被追踪的信息流位置
///
/// 资源句柄存在当且仅当 `preload_state == Ready`；`Playing`/`Buffering`
/// 只允许出现在已就绪的 slot 上。这两条由本类型的方法维护。
#[derive(Debug)]
pub struct Slot {
    index: SlotIndex,
    state: PlaybackState,
    preload_state: PreloadState,
    resource: Option<Arc<dyn PlayableResource>>,
    source_url: Option<String>,
    completed: bool,
    buffering_progress: f32,
}

impl Slot {
    pub fn new(index: SlotIndex) -> Self {
        Self {
            index,
            state: PlaybackState::Idle,
            preload_state: PreloadState::NotStarted,
            resource: None,
            source_url: None,
            completed: false,
            buffering_progress: 0.0,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn preload_state(&self) -> &PreloadState {
        &self.preload_state
    }

    pub fn resource(&self) -> Option<&Arc<dyn PlayableResource>> {
        self.resource.as_ref()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
    }

    pub fn buffering_progress(&self) -> f32 {
        self.buffering_progress
    }

    pub fn set_buffering_progress(&mut self, progress: f32) {
        self.buffering_progress = progress.clamp(0.0, 1.0);
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.preload_state, PreloadState::Ready) && self.resource.is_some()
    }

    /// 开始为 `url` 加载；旧资源（如有）被释放
    pub fn begin_loading(&mut self, url: &str) {
        self.release();
        self.source_url = Some(url.to_owned());
        self.preload_state = PreloadState::Loading(0.0);
        self.state = PlaybackState::Loading;
    }

    /// 重试时会从 `Verifying` 回到 `Loading`
    pub fn set_loading_progress(&mut self, progress: f32) {
        if matches!(
            self.preload_state,
            PreloadState::Loading(_) | PreloadState::Verifying
        ) {
            self.preload_state = PreloadState::Loading(progress.clamp(0.0, 1.0));
        }
    }

    pub fn set_verifying(&mut self) {
        if matches!(self.preload_state, PreloadState::Loading(_)) {
            self.preload_state = PreloadState::Verifying;
        }
    }

    pub fn attach(&mut self, url: &str, resource: Arc<dyn PlayableResource>) {
        if let Some(old) = self.resource.replace(resource) {
            old.pause();
        }
        self.source_url = Some(url.to_owned());
        self.preload_state = PreloadState::Ready;
        self.state = PlaybackState::Idle;
        self.completed = false;
        self.buffering_progress = 0.0;
    }

    pub fn fail(&mut self, err: PreloadError) {
        self.release();
        self.preload_state = if err.is_timeout() {
            PreloadState::TimedOut
        } else {
            PreloadState::Failed(err.clone())
        };
        self.state = PlaybackState::Error(err);
    }

    /// 暂停并丢弃资源句柄，slot 回到未加载
    pub fn release(&mut self) -> Option<Arc<dyn PlayableResource>> {
        let old = self.resource.take();
        if let Some(r) = old.as_ref() {
            r.pause();
        }
        self.preload_state = PreloadState::NotStarted;
        self.state = PlaybackState::Idle;
        self.completed = false;
        self.buffering_progress = 0.0;
        old
    }

    /// 写入实时状态；未就绪时拒绝 `Playing`/`Buffering`
    pub fn set_state(&mut self, state: PlaybackState) -> bool {
        let needs_ready = matches!(state, PlaybackState::Playing | PlaybackState::Buffering(_));
        if needs_ready && !self.is_ready() {
            return false;
        }
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }

    pub fn view(&self) -> SlotView {
        SlotView {
            index: self.index,
            state: self.state.clone(),
            preload_state: self.preload_state.clone(),
            buffering_progress: self.buffering_progress,
            source_url: self.source_url.clone(),
            completed: self.completed,
            resource: self.resource.clone(),
        }
    }
}

/// 对外发布的只读 slot 视图
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub index: SlotIndex,
    pub state: PlaybackState,
    pub preload_state: PreloadState,
    pub buffering_progress: f32,
    pub source_url: Option<String>,
    pub completed: bool,
    #[serde(skip)]
    pub resource: Option<Arc<dyn PlayableResource>>,
}

/// 管理器状态快照，每次变更后通过 watch 通道发布
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub slots: BTreeMap<SlotIndex, SlotView>,
    pub current: ManagerState,
    pub active_index: Option<SlotIndex>,
    pub is_transitioning: bool,
    pub transition: TransitionState,
    pub network: NetworkState,
    pub pending_retries: usize,
}

impl Default for ManagerSnapshot {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            current: ManagerState::Idle,
            active_index: None,
            is_transitioning: false,
            transition: TransitionState::None,
            network: NetworkState::Unknown,
            pending_retries: 0,
        }
    }
}

impl ManagerSnapshot {
    pub fn slot(&self, index: SlotIndex) -> Option<&SlotView> {
        self.slots.get(&index)
    }

    pub fn preload_state(&self, index: SlotIndex) -> Option<&PreloadState> {
        self.slots.get(&index).map(|s| &s.preload_state)
    }

    pub fn state(&self, index: SlotIndex) -> Option<&PlaybackState> {
        self.slots.get(&index).map(|s| &s.state)
    }

    pub fn buffering_progress(&self, index: SlotIndex) -> Option<f32> {
        self.slots.get(&index).map(|s| s.buffering_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::null::NullResource;
    use std::time::Duration;

    fn resource() -> Arc<dyn PlayableResource> {
        Arc::new(NullResource::new(Duration::from_secs(10)))
    }

    #[test]
    fn playing_requires_ready() {
        let mut slot = Slot::new(0);
        assert!(!slot.set_state(PlaybackState::Playing));
        assert_eq!(slot.state(), &PlaybackState::Idle);

        slot.attach("u", resource());
        assert!(slot.set_state(PlaybackState::Playing));
        assert_eq!(slot.state(), &PlaybackState::Playing);
    }

    #[test]
    fn resource_present_iff_ready() {
        let mut slot = Slot::new(1);
        slot.begin_loading("u");
        assert!(slot.resource().is_none());
        slot.attach("u", resource());
        assert!(slot.resource().is_some());
        assert_eq!(slot.preload_state(), &PreloadState::Ready);

        slot.fail(PreloadError::VerificationFailed("bad".to_owned()));
        assert!(slot.resource().is_none());
        assert!(matches!(slot.preload_state(), PreloadState::Failed(_)));
        assert!(matches!(slot.state(), PlaybackState::Error(_)));
    }

    #[test]
    fn timeout_failure_maps_to_timed_out() {
        let mut slot = Slot::new(2);
        slot.fail(PreloadError::Timeout {
            stage: crate::error::TimeoutStage::Pipeline,
            after_ms: 30_000,
        });
        assert_eq!(slot.preload_state(), &PreloadState::TimedOut);
    }

    #[test]
    fn release_pauses_resource() {
        let mut slot = Slot::new(3);
        let r = resource();
        r.play();
        slot.attach("u", Arc::clone(&r));
        let released = slot.release();
        assert!(released.is_some());
        assert!(!r.is_playing());
        assert_eq!(slot.preload_state(), &PreloadState::NotStarted);
    }
}
