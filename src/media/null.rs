//! 无解码的模拟播放资源
//!
//! 位置随 tokio 时钟推进，所以在 `start_paused` 的测试里完全可预测。
//! 二进制在没有真实播放器时也用它跑完整条流水线。

use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{MediaAsset, MediaSource, PlayableResource, PlayerFactory, ResourceStatus, TimeControl};
use crate::error::PreloadError;

#[derive(Debug)]
struct NullState {
    duration: Duration,
    base_position: Duration,
    playing_since: Option<Instant>,
    wants_play: bool,
    status: ResourceStatus,
    playable: bool,
    stalled: bool,
    buffered_ahead: Option<Duration>,
}

impl NullState {
    fn position(&self) -> Duration {
        let pos = match self.playing_since {
            Some(since) => self.base_position.saturating_add(since.elapsed()),
            None => self.base_position,
        };
        pos.min(self.duration)
    }

    /// 到达结尾时像真实播放器一样自动停下
    fn settle_end(&mut self) {
        if self.playing_since.is_some() && self.position() >= self.duration {
            self.base_position = self.duration;
            self.playing_since = None;
            self.wants_play = false;
        }
    }
}

#[derive(Debug)]
pub struct NullResource {
    state: Mutex<NullState>,
}

impl NullResource {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: Mutex::new(NullState {
                duration,
                base_position: Duration::ZERO,
                playing_since: None,
                wants_play: false,
                status: ResourceStatus::ReadyToPlay,
                playable: true,
                stalled: false,
                buffered_ahead: None,
            }),
        }
    }

    pub fn set_status(&self, status: ResourceStatus) {
        let mut st = self.state.lock();
        if matches!(status, ResourceStatus::Failed(_)) {
            st.base_position = st.position();
            st.playing_since = None;
        }
        st.status = status;
    }

    pub fn set_playable(&self, playable: bool) {
        self.state.lock().playable = playable;
    }

    /// 模拟网络卡顿：想播放但位置不前进
    pub fn set_stalled(&self, stalled: bool) {
        let mut st = self.state.lock();
        if stalled == st.stalled {
            return;
        }
        st.base_position = st.position();
        st.stalled = stalled;
        st.playing_since = if !stalled && st.wants_play {
            Some(Instant::now())
        } else {
            None
        };
    }

    /// `None` 表示整段已缓冲
    pub fn set_buffered_ahead(&self, ahead: Option<Duration>) {
        self.state.lock().buffered_ahead = ahead;
    }
}

impl PlayableResource for NullResource {
    fn status(&self) -> ResourceStatus {
        self.state.lock().status.clone()
    }

    fn is_playable(&self) -> bool {
        self.state.lock().playable
    }

    fn time_control(&self) -> TimeControl {
        let mut st = self.state.lock();
        st.settle_end();
        if !st.wants_play {
            TimeControl::Paused
        } else if st.stalled {
            TimeControl::WaitingToPlay
        } else {
            TimeControl::Playing
        }
    }

    fn position(&self) -> Duration {
        self.state.lock().position()
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.state.lock().duration)
    }

    fn buffered_ranges(&self) -> Vec<Range<Duration>> {
        let st = self.state.lock();
        let end = match st.buffered_ahead {
            Some(ahead) => st.position().saturating_add(ahead).min(st.duration),
            None => st.duration,
        };
        vec![Duration::ZERO..end]
    }

    fn play(&self) {
        let mut st = self.state.lock();
        if !matches!(st.status, ResourceStatus::ReadyToPlay) {
            return;
        }
        if st.position() >= st.duration {
            return;
        }
        st.wants_play = true;
        if st.playing_since.is_none() && !st.stalled {
            st.playing_since = Some(Instant::now());
        }
    }

    fn pause(&self) {
        let mut st = self.state.lock();
        st.base_position = st.position();
        st.playing_since = None;
        st.wants_play = false;
    }

    fn seek(&self, to: Duration) {
        let mut st = self.state.lock();
        st.base_position = to.min(st.duration);
        if st.playing_since.is_some() {
            st.playing_since = Some(Instant::now());
        }
    }
}

/// 为每个媒体构造一个 [`NullResource`]，并记住构造过的实例
#[derive(Debug)]
pub struct NullPlayerFactory {
    duration: Duration,
    initial_status: Mutex<ResourceStatus>,
    constructed: Mutex<Vec<Arc<NullResource>>>,
}

impl NullPlayerFactory {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            initial_status: Mutex::new(ResourceStatus::ReadyToPlay),
            constructed: Mutex::new(Vec::new()),
        }
    }

    /// 之后构造的资源以该状态开始（`Unknown` 用来模拟迟迟不就绪）
    pub fn set_initial_status(&self, status: ResourceStatus) {
        *self.initial_status.lock() = status;
    }

    pub fn constructed(&self) -> Vec<Arc<NullResource>> {
        self.constructed.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<NullResource>> {
        self.constructed.lock().last().cloned()
    }
}

impl Default for NullPlayerFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl PlayerFactory for NullPlayerFactory {
    fn construct(&self, asset: &MediaAsset) -> Result<Arc<dyn PlayableResource>, PreloadError> {
        if asset.byte_len == 0 {
            return Err(PreloadError::VerificationFailed("媒体为空".to_owned()));
        }
        if let MediaSource::File(path) = &asset.source
            && !path.exists()
        {
            return Err(PreloadError::VerificationFailed(format!(
                "缓存文件不存在: {}",
                path.display()
            )));
        }
        let resource = Arc::new(NullResource::new(self.duration));
        let status = self.initial_status.lock().clone();
        if status != ResourceStatus::ReadyToPlay {
            resource.set_status(status);
        }
        self.constructed.lock().push(Arc::clone(&resource));
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn position_follows_clock_while_playing() {
        let r = NullResource::new(Duration::from_secs(10));
        r.play();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(r.position(), Duration::from_secs(3));
        r.pause();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(r.position(), Duration::from_secs(3));
        assert_eq!(r.time_control(), TimeControl::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_natural_end() {
        let r = NullResource::new(Duration::from_secs(2));
        r.play();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(r.position(), Duration::from_secs(2));
        assert_eq!(r.time_control(), TimeControl::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_resource_waits() {
        let r = NullResource::new(Duration::from_secs(10));
        r.play();
        r.set_stalled(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(r.time_control(), TimeControl::WaitingToPlay);
        assert_eq!(r.position(), Duration::ZERO);
        r.set_stalled(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(r.position(), Duration::from_secs(1));
    }

    #[test]
    fn factory_rejects_empty_media() {
        let f = NullPlayerFactory::default();
        let asset = MediaAsset::from_bytes(bytes::Bytes::new());
        assert!(f.construct(&asset).is_err());
        assert!(f.constructed().is_empty());
    }
}
