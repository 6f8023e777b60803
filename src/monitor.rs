//! 缓冲进度与自然播放结束检测
//!
//! 每个已就绪的 slot 在管理器里有一个 [`BufferMonitor`]；管理器按固定节拍
//! 调用采样方法，再根据结果改写 slot 状态。monitor 不持有管理器的任何引用，
//! slot 被清理时直接从表里删除即可。

use std::time::Duration;

use crate::media::{PlayableResource, ResourceStatus, TimeControl};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    /// 期望的前向缓冲时长
    pub buffer_target: Duration,
    pub buffer_sample: Duration,
    pub completion_sample: Duration,
    /// 剩余时间小于等于该值视为到达结尾
    pub completion_epsilon: Duration,
    /// 本轮连续播放时长至少占总时长的比例
    pub min_played_ratio: f64,
    /// 位置落在这个窗口内开始播放视为新一轮播放
    pub restart_window: Duration,
    pub reload_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_target: Duration::from_secs(10),
            buffer_sample: Duration::from_secs(1),
            completion_sample: Duration::from_millis(100),
            completion_epsilon: Duration::from_millis(150),
            min_played_ratio: 0.5,
            restart_window: Duration::from_secs(1),
            reload_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferSample {
    pub progress: f32,
    /// 想播放但在等数据
    pub stalled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackSample {
    /// 自然结束；资源已被暂停
    pub reached_end: bool,
    /// 从开头附近重新开始播放
    pub restarted: bool,
}

/// 资源失败后的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// 延迟后从同一来源重新加载一次
    Reload,
    GiveUp,
}

#[derive(Debug)]
pub struct BufferMonitor {
    config: MonitorConfig,
    last_position: Option<Duration>,
    was_playing: bool,
    played: Duration,
    reloaded: bool,
}

impl BufferMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            last_position: None,
            was_playing: false,
            played: Duration::ZERO,
            reloaded: false,
        }
    }

    pub fn played(&self) -> Duration {
        self.played
    }

    /// 开始新一轮播放（显式重播、跳回开头）
    pub fn reset_play_through(&mut self) {
        self.last_position = None;
        self.was_playing = false;
        self.played = Duration::ZERO;
    }

    /// 重新加载后换了资源：位置追踪清零，但保留已重载过的记录
    pub fn rearm(&mut self) {
        self.reset_play_through();
    }

    pub fn on_failure(&mut self) -> FailureAction {
        if self.reloaded {
            FailureAction::GiveUp
        } else {
            self.reloaded = true;
            FailureAction::Reload
        }
    }

    pub fn sample_buffer(&self, resource: &dyn PlayableResource) -> BufferSample {
        BufferSample {
            progress: buffer_progress(resource, self.config.buffer_target),
            stalled: resource.time_control() == TimeControl::WaitingToPlay,
        }
    }

    /// 采样一次位置；`completed` 为 slot 当前的完成标记
    pub fn sample_playback(
        &mut self,
        resource: &dyn PlayableResource,
        completed: bool,
    ) -> PlaybackSample {
        let playing = resource.time_control() == TimeControl::Playing;
        let pos = resource.position();
        let mut sample = PlaybackSample::default();

        let went_back = self.last_position.is_some_and(|prev| pos < prev);
        if let Some(prev) = self.last_position
            && pos > prev
        {
            let step = pos - prev;
            // 大跨度视为 seek，不计入连续播放时长
            if step <= self.max_step() {
                self.played = self.played.saturating_add(step);
            }
        }
        if went_back {
            self.played = Duration::ZERO;
        }

        if playing
            && pos <= self.config.restart_window
            && (self.last_position.is_none() || went_back || !self.was_playing)
        {
            sample.restarted = true;
        }

        self.last_position = Some(pos);
        self.was_playing = playing;

        let completed = completed && !sample.restarted;
        if playing && !completed && self.end_reached(resource, pos) {
            resource.pause();
            self.was_playing = false;
            sample.reached_end = true;
        }
        sample
    }

    fn end_reached(&self, resource: &dyn PlayableResource, pos: Duration) -> bool {
        let Some(duration) = resource.duration().filter(|d| !d.is_zero()) else {
            return false;
        };
        if resource.status() != ResourceStatus::ReadyToPlay {
            return false;
        }
        let remaining = duration.saturating_sub(pos);
        let needed = duration.mul_f64(self.config.min_played_ratio.clamp(0.0, 1.0));
        remaining <= self.config.completion_epsilon && self.played >= needed
    }

    fn max_step(&self) -> Duration {
        self.config
            .completion_sample
            .saturating_mul(3)
            .max(Duration::from_millis(500))
    }
}

/// 当前位置之后已缓冲的时长 / 目标，封顶 1.0；缓冲到媒体结尾也算满
pub fn buffer_progress(resource: &dyn PlayableResource, target: Duration) -> f32 {
    if target.is_zero() {
        return 1.0;
    }
    let pos = resource.position();
    let Some(range) = resource
        .buffered_ranges()
        .into_iter()
        .find(|r| r.start <= pos && pos <= r.end)
    else {
        return 0.0;
    };
    if resource.duration().is_some_and(|d| range.end >= d) {
        return 1.0;
    }
    let ahead = range.end.saturating_sub(pos);
    (ahead.as_secs_f64() / target.as_secs_f64()).min(1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::NullResource;

    const TICK: Duration = Duration::from_millis(100);

    /// 按采样节拍推进时钟并收集结束事件次数
    async fn run_ticks(
        monitor: &mut BufferMonitor,
        r: &NullResource,
        ticks: u32,
        completed: &mut bool,
    ) -> u32 {
        let mut fired = 0;
        for _ in 0..ticks {
            tokio::time::sleep(TICK).await;
            let s = monitor.sample_playback(r, *completed);
            if s.restarted {
                *completed = false;
            }
            if s.reached_end {
                *completed = true;
                fired += 1;
            }
        }
        fired
    }

    #[tokio::test(start_paused = true)]
    async fn full_play_through_fires_once_and_pauses() {
        let r = NullResource::new(Duration::from_secs(10));
        let mut m = BufferMonitor::new(MonitorConfig::default());
        let mut completed = false;
        m.sample_playback(&r, completed);
        r.play();

        let fired = run_ticks(&mut m, &r, 130, &mut completed).await;
        assert_eq!(fired, 1);
        assert!(completed);
        assert!(!r.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_before_end_never_fires() {
        let r = NullResource::new(Duration::from_secs(10));
        let mut m = BufferMonitor::new(MonitorConfig::default());
        let mut completed = false;
        r.play();
        run_ticks(&mut m, &r, 95, &mut completed).await;
        r.pause();
        let fired = run_ticks(&mut m, &r, 50, &mut completed).await;
        assert_eq!(fired, 0);
        assert!(!completed);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_near_end_does_not_count_as_played() {
        let r = NullResource::new(Duration::from_secs(10));
        let mut m = BufferMonitor::new(MonitorConfig::default());
        let mut completed = false;
        r.play();
        run_ticks(&mut m, &r, 10, &mut completed).await;
        r.seek(Duration::from_millis(9_000));
        let fired = run_ticks(&mut m, &r, 30, &mut completed).await;
        assert_eq!(fired, 0);
        assert!(m.played() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_from_zero_is_new_play_through() {
        let r = NullResource::new(Duration::from_secs(4));
        let mut m = BufferMonitor::new(MonitorConfig::default());
        let mut completed = false;
        r.play();
        assert_eq!(run_ticks(&mut m, &r, 50, &mut completed).await, 1);

        r.seek(Duration::ZERO);
        r.play();
        tokio::time::sleep(TICK).await;
        let s = m.sample_playback(&r, completed);
        assert!(s.restarted);
        completed = false;

        assert_eq!(run_ticks(&mut m, &r, 50, &mut completed).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_blocks_completion() {
        let r = NullResource::new(Duration::from_secs(2));
        let mut m = BufferMonitor::new(MonitorConfig::default());
        let mut completed = false;
        r.play();
        run_ticks(&mut m, &r, 18, &mut completed).await;
        r.set_status(ResourceStatus::Failed("decode".into()));
        assert_eq!(run_ticks(&mut m, &r, 10, &mut completed).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_progress_is_ratio_of_target() {
        let r = NullResource::new(Duration::from_secs(60));
        r.set_buffered_ahead(Some(Duration::from_secs(4)));
        let m = BufferMonitor::new(MonitorConfig::default());
        let s = m.sample_buffer(&r);
        assert!((s.progress - 0.4).abs() < 1e-6);
        assert!(!s.stalled);

        r.set_buffered_ahead(Some(Duration::from_secs(30)));
        assert_eq!(m.sample_buffer(&r).progress, 1.0);

        r.play();
        r.set_stalled(true);
        assert!(m.sample_buffer(&r).stalled);
    }

    #[test]
    fn fully_buffered_short_clip_is_complete() {
        let r = NullResource::new(Duration::from_secs(3));
        assert_eq!(buffer_progress(&r, Duration::from_secs(10)), 1.0);
    }

    #[test]
    fn reload_is_attempted_once() {
        let mut m = BufferMonitor::new(MonitorConfig::default());
        assert_eq!(m.on_failure(), FailureAction::Reload);
        m.rearm();
        assert_eq!(m.on_failure(), FailureAction::GiveUp);
    }
}
