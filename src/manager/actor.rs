use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::ManagerConfig;
use super::handle::ManagerHandle;
use super::messages::{ManagerCommand, ManagerEvent, Reply, TaskEvent};
use super::request_tracker::{RequestKey, RequestTracker};
use crate::cleanup::CleanupCoordinator;
use crate::domain::{
    CleanupContext, KeepRange, ManagerSnapshot, ManagerState, NetworkState, PlaybackState, Slot,
    SlotIndex, TransitionState,
};
use crate::error::PreloadError;
use crate::media::{PlayableResource, Reachability, ResourceStatus, TimeControl};
use crate::monitor::{BufferMonitor, FailureAction};
use crate::pipeline::{LoadProgress, PreloadPipeline};
use crate::retry::RetryScheduler;

/// 事件通道满时先留在内部队列；超过这个长度才开始丢可以从快照推断的事件
const OUTBOX_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Fresh,
    /// 播放失败后的重载：先删掉缓存里的坏文件
    Reload,
}

struct InFlight {
    url: String,
    handle: JoinHandle<()>,
    waiters: Vec<Reply<Result<(), PreloadError>>>,
}

/// 播放资源管理器
///
/// 唯一的 slot 状态写入方。所有命令、后台任务结果、采样节拍和网络事件都在
/// 同一个循环里串行处理；加载和切换清理在独立任务里运行，结果带代次回报，
/// 过期的结果直接丢弃。
pub struct PlaybackResourceManager {
    pipeline: Arc<PreloadPipeline>,
    config: ManagerConfig,
    cleanup: CleanupCoordinator,
    rx_cmd: mpsc::Receiver<ManagerCommand>,
    tx_task: mpsc::Sender<TaskEvent>,
    rx_task: mpsc::Receiver<TaskEvent>,
    tx_evt: mpsc::Sender<ManagerEvent>,
    outbox: VecDeque<ManagerEvent>,
    tx_state: watch::Sender<ManagerSnapshot>,
    slots: BTreeMap<SlotIndex, Slot>,
    monitors: HashMap<SlotIndex, BufferMonitor>,
    inflight: HashMap<SlotIndex, InFlight>,
    tracker: RequestTracker<RequestKey>,
    retry: RetryScheduler,
    transition: TransitionState,
    transition_task: Option<JoinHandle<()>>,
    active_index: Option<SlotIndex>,
    focus: Option<SlotIndex>,
    play_when_ready: Option<SlotIndex>,
    current: ManagerState,
    network: NetworkState,
    dirty: bool,
}

impl PlaybackResourceManager {
    /// 启动管理器循环；`reachability` 为网络可达性事件流（可选）
    pub fn spawn(
        pipeline: Arc<PreloadPipeline>,
        config: ManagerConfig,
        reachability: Option<mpsc::Receiver<Reachability>>,
    ) -> (ManagerHandle, mpsc::Receiver<ManagerEvent>) {
        let (tx_cmd, rx_cmd) = mpsc::channel(64);
        let (tx_evt, rx_evt) = mpsc::channel(64);
        let (tx_task, rx_task) = mpsc::channel(256);
        let (tx_state, rx_state) = watch::channel(ManagerSnapshot::default());

        let cleanup = CleanupCoordinator::new(config.keep_radius);
        let retry = RetryScheduler::new(pipeline.config().retry);
        let manager = Self {
            pipeline,
            config,
            cleanup,
            rx_cmd,
            tx_task,
            rx_task,
            tx_evt,
            outbox: VecDeque::new(),
            tx_state,
            slots: BTreeMap::new(),
            monitors: HashMap::new(),
            inflight: HashMap::new(),
            tracker: RequestTracker::new(),
            retry,
            transition: TransitionState::None,
            transition_task: None,
            active_index: None,
            focus: None,
            play_when_ready: None,
            current: ManagerState::Idle,
            network: NetworkState::Unknown,
            dirty: false,
        };
        tokio::spawn(manager.run(reachability));
        tracing::info!(keep_radius = cleanup.keep_radius(), "PlaybackResourceManager 已启动");

        (ManagerHandle::new(tx_cmd, rx_state, cleanup), rx_evt)
    }

    async fn run(mut self, mut reachability: Option<mpsc::Receiver<Reachability>>) {
        let min = Duration::from_millis(1);
        let mut playback_tick = tokio::time::interval(self.config.monitor.completion_sample.max(min));
        playback_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buffer_tick = tokio::time::interval(self.config.monitor.buffer_sample.max(min));
        buffer_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 补发积压事件的发送端
        let tx_evt = self.tx_evt.clone();

        loop {
            select! {
                biased;
                Some(evt) = self.rx_task.recv() => {
                    self.handle_task_event(evt);
                }
                permit = tx_evt.reserve(), if !self.outbox.is_empty() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(evt) = self.outbox.pop_front() {
                                permit.send(evt);
                            }
                        }
                        Err(_) => self.outbox.clear(),
                    }
                }
                _ = playback_tick.tick(), if !self.monitors.is_empty() => {
                    self.tick_playback();
                }
                _ = buffer_tick.tick(), if !self.monitors.is_empty() => {
                    self.tick_buffer();
                }
                maybe = next_reachability(&mut reachability), if reachability.is_some() => {
                    match maybe {
                        Some(r) => self.on_reachability(r),
                        None => reachability = None,
                    }
                }
                maybe_cmd = self.rx_cmd.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        break;
                    };
                    self.handle_command(cmd);
                }
            }
            if self.dirty {
                self.publish();
            }
        }

        self.reset_all();
        self.publish();
        tracing::info!("PlaybackResourceManager 已退出");
    }

    fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Preload { index, url, reply } => self.preload(index, url, reply),
            ManagerCommand::PauseAllExcept { index, reply } => {
                self.pause_all_except(index);
                self.reply(reply, ());
            }
            ManagerCommand::Toggle { index, reply } => {
                let res = self.toggle(index);
                self.reply(reply, res);
            }
            ManagerCommand::Play { index, reply } => {
                let res = self.play(index);
                self.reply(reply, res);
            }
            ManagerCommand::Pause { index, reply } => {
                let res = self.pause(index);
                self.reply(reply, res);
            }
            ManagerCommand::SeekToBeginning { index, reply } => {
                let res = self.seek_to_beginning(index);
                self.reply(reply, res);
            }
            ManagerCommand::PrepareForTransition { from, to, reply } => {
                self.start_transition(TransitionState::Gesture { from, to });
                self.reply(reply, ());
            }
            ManagerCommand::BeginAutoAdvance { from, to, reply } => {
                self.start_transition(TransitionState::AutoAdvance { from, to });
                self.reply(reply, ());
            }
            ManagerCommand::FinishTransition { index, reply } => {
                self.active_index = Some(index);
                self.pause_all_except(index);
                self.reply(reply, ());
            }
            ManagerCommand::Cleanup { context, reply } => {
                self.cleanup(context);
                self.reply(reply, ());
            }
            ManagerCommand::ClearCache { reply } => {
                tracing::info!("清除媒体缓存");
                let cache = Arc::clone(self.pipeline.cache());
                tokio::spawn(async move {
                    let removed = cache.clear().await;
                    let _ = reply.send(removed);
                });
            }
        }
    }

    fn handle_task_event(&mut self, evt: TaskEvent) {
        match evt {
            TaskEvent::Progress {
                index,
                generation,
                progress,
            } => {
                if !self.tracker.is_current(&RequestKey::Preload(index), generation) {
                    return;
                }
                if let Some(slot) = self.slots.get_mut(&index) {
                    match progress {
                        LoadProgress::Fetching(p) => slot.set_loading_progress(p),
                        LoadProgress::Verifying => slot.set_verifying(),
                    }
                    self.dirty = true;
                }
            }
            TaskEvent::Finished {
                index,
                generation,
                result,
            } => self.on_load_finished(index, generation, result),
            TaskEvent::TransitionSettled { generation } => self.on_transition_settled(generation),
        }
    }

    // ---- preload ----

    fn preload(&mut self, index: SlotIndex, url: String, reply: Reply<Result<(), PreloadError>>) {
        if let Some(inflight) = self.inflight.get_mut(&index) {
            if inflight.url == url {
                tracing::debug!(index, url = %url, "相同地址的预加载已在进行，合并等待");
                inflight.waiters.push(reply);
                return;
            }
            tracing::info!(index, old = %inflight.url, new = %url, "新地址取代进行中的预加载");
            self.cancel_inflight(index);
        } else if self
            .slots
            .get(&index)
            .is_some_and(|s| s.is_ready() && s.source_url() == Some(url.as_str()))
        {
            self.reply(reply, Ok(()));
            return;
        }

        self.retry.remove(index);
        self.monitors.remove(&index);
        self.slots
            .entry(index)
            .or_insert_with(|| Slot::new(index))
            .begin_loading(&url);
        tracing::info!(index, url = %url, "开始预加载");
        self.start_load(index, url, LoadKind::Fresh, None, vec![reply]);
    }

    fn start_load(
        &mut self,
        index: SlotIndex,
        url: String,
        kind: LoadKind,
        not_before: Option<Instant>,
        waiters: Vec<Reply<Result<(), PreloadError>>>,
    ) {
        let generation = self.tracker.issue(RequestKey::Preload(index));
        let pipeline = Arc::clone(&self.pipeline);
        let tx = self.tx_task.clone();
        let task_url = url.clone();

        let handle = tokio::spawn(async move {
            if kind == LoadKind::Reload {
                pipeline.cache().invalidate(&task_url).await;
            }
            if let Some(at) = not_before {
                tokio::time::sleep_until(at).await;
            }
            let progress_tx = tx.clone();
            let on_progress = move |progress: LoadProgress| {
                let _ = progress_tx.try_send(TaskEvent::Progress {
                    index,
                    generation,
                    progress,
                });
            };
            let result = pipeline.load(&task_url, index, &on_progress).await;
            let _ = tx
                .send(TaskEvent::Finished {
                    index,
                    generation,
                    result,
                })
                .await;
        });

        self.inflight.insert(
            index,
            InFlight {
                url,
                handle,
                waiters,
            },
        );
        self.dirty = true;
    }

    fn on_load_finished(
        &mut self,
        index: SlotIndex,
        generation: u64,
        result: Result<Arc<dyn PlayableResource>, PreloadError>,
    ) {
        if !self.tracker.accept(&RequestKey::Preload(index), generation) {
            tracing::debug!(index, generation, "丢弃过期的预加载结果");
            if let Ok(resource) = result {
                resource.pause();
            }
            return;
        }
        let Some(inflight) = self.inflight.remove(&index) else {
            return;
        };
        let monitor_config = self.config.monitor;

        let outcome = match self.slots.get_mut(&index) {
            None => Err(PreloadError::Cancelled),
            Some(slot) => match result {
                Ok(resource) => {
                    slot.attach(&inflight.url, resource);
                    self.retry.remove(index);
                    self.monitors
                        .entry(index)
                        .or_insert_with(|| BufferMonitor::new(monitor_config))
                        .rearm();
                    if self.play_when_ready == Some(index) {
                        self.play_when_ready = None;
                        start_playing(slot);
                    }
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!(index, url = %inflight.url, err = %err, "预加载失败");
                    slot.fail(err.clone());
                    self.monitors.remove(&index);
                    if err.is_network_class() && self.retry.enqueue(index, &inflight.url, Instant::now()) {
                        tracing::info!(index, url = %inflight.url, "网络类失败，加入待重试队列");
                    }
                    Err(err)
                }
            },
        };

        self.publish();
        match &outcome {
            Ok(()) => self.emit(ManagerEvent::Ready { index }),
            Err(PreloadError::Cancelled) => {}
            Err(error) => self.emit(ManagerEvent::Failed {
                index,
                error: error.clone(),
            }),
        }
        for waiter in inflight.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn cancel_inflight(&mut self, index: SlotIndex) {
        self.tracker.clear(&RequestKey::Preload(index));
        if let Some(inflight) = self.inflight.remove(&index) {
            inflight.handle.abort();
            for waiter in inflight.waiters {
                let _ = waiter.send(Err(PreloadError::Cancelled));
            }
            tracing::debug!(index, url = %inflight.url, "已取消进行中的预加载");
        }
    }

    // ---- playback ----

    fn pause_all_except(&mut self, index: SlotIndex) {
        self.play_when_ready = None;
        self.focus = Some(index);
        for (i, slot) in self.slots.iter_mut() {
            if *i != index {
                stop_playing(slot);
            }
        }
        match self.slots.get_mut(&index) {
            Some(slot) if slot.is_ready() => {
                if slot.completed() {
                    tracing::debug!(index, "已播放完毕，不自动重播");
                    stop_playing(slot);
                } else {
                    start_playing(slot);
                }
            }
            _ => self.play_when_ready = Some(index),
        }
        self.dirty = true;
    }

    fn toggle(&mut self, index: SlotIndex) -> Result<(), PreloadError> {
        let slot = match ready_slot(&mut self.slots, index) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(index, "toggle: 没有就绪的播放资源，忽略");
                return Err(e);
            }
        };
        let playing = matches!(
            slot.state(),
            PlaybackState::Playing | PlaybackState::Buffering(_)
        ) || slot.resource().is_some_and(|r| r.is_playing());

        if playing {
            stop_playing(slot);
        } else if slot.completed() {
            restart_from_beginning(slot, self.monitors.get_mut(&index));
        } else {
            start_playing(slot);
        }
        self.focus = Some(index);
        self.dirty = true;
        Ok(())
    }

    fn play(&mut self, index: SlotIndex) -> Result<(), PreloadError> {
        let slot = ready_slot(&mut self.slots, index)?;
        if slot.completed() {
            restart_from_beginning(slot, self.monitors.get_mut(&index));
        } else {
            start_playing(slot);
        }
        self.focus = Some(index);
        self.dirty = true;
        Ok(())
    }

    fn pause(&mut self, index: SlotIndex) -> Result<(), PreloadError> {
        let slot = ready_slot(&mut self.slots, index)?;
        stop_playing(slot);
        self.dirty = true;
        Ok(())
    }

    fn seek_to_beginning(&mut self, index: SlotIndex) -> Result<(), PreloadError> {
        let slot = ready_slot(&mut self.slots, index)?;
        restart_from_beginning(slot, self.monitors.get_mut(&index));
        self.focus = Some(index);
        self.dirty = true;
        Ok(())
    }

    // ---- transition & cleanup ----

    fn start_transition(&mut self, transition: TransitionState) {
        let Some((from, to)) = transition.indices() else {
            return;
        };
        if let Some(prev) = self.transition_task.take() {
            prev.abort();
            tracing::debug!(transition = ?self.transition, "取消上一次切换");
        }
        let generation = self.tracker.issue(RequestKey::Transition);
        self.transition = transition;
        self.active_index = Some(to);
        self.focus = Some(to);

        let tx = self.tx_task.clone();
        let settle = self.config.transition_settle;
        self.transition_task = Some(tokio::spawn(async move {
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            let _ = tx.send(TaskEvent::TransitionSettled { generation }).await;
        }));
        tracing::info!(from, to, generation, ?transition, "开始切换");
        self.dirty = true;
    }

    fn on_transition_settled(&mut self, generation: u64) {
        if !self.tracker.accept(&RequestKey::Transition, generation) {
            tracing::debug!(generation, "丢弃过期的切换清理");
            return;
        }
        self.transition_task = None;
        if let Some((from, to)) = self.transition.indices() {
            let keep = self.cleanup.keep_range(CleanupContext::Navigation { from, to });
            self.evict_outside(keep);
            tracing::debug!(from, to, start = keep.start, end = keep.end, "切换清理完成");
        }
        self.transition = TransitionState::None;
        self.dirty = true;
    }

    fn cleanup(&mut self, context: CleanupContext) {
        tracing::info!(?context, "清理播放资源");
        match context {
            CleanupContext::Navigation { .. } => {
                let keep = self.cleanup.keep_range(context);
                self.evict_outside(keep);
            }
            CleanupContext::Dismissal | CleanupContext::Error => {
                let previous = self.active_index.or(self.focus);
                self.reset_all();
                self.current = match (context, previous) {
                    (CleanupContext::Error, Some(index)) => ManagerState::Error {
                        index,
                        reason: "播放出错，资源已全部释放".to_owned(),
                    },
                    _ => ManagerState::Idle,
                };
            }
        }
        self.dirty = true;
    }

    fn evict_outside(&mut self, keep: KeepRange) {
        let victims = self
            .cleanup
            .evict_outside(keep, self.slots.keys().copied());
        for index in victims {
            self.evict(index);
        }
    }

    fn evict(&mut self, index: SlotIndex) {
        self.cancel_inflight(index);
        self.monitors.remove(&index);
        self.retry.remove(index);
        if self.play_when_ready == Some(index) {
            self.play_when_ready = None;
        }
        if let Some(mut slot) = self.slots.remove(&index) {
            slot.release();
            tracing::debug!(index, "回收 slot");
        }
        self.dirty = true;
    }

    fn reset_all(&mut self) {
        if let Some(task) = self.transition_task.take() {
            task.abort();
        }
        let tracked: Vec<SlotIndex> = self.slots.keys().copied().collect();
        for index in tracked {
            self.evict(index);
        }
        let orphaned: Vec<SlotIndex> = self.inflight.keys().copied().collect();
        for index in orphaned {
            self.cancel_inflight(index);
        }
        self.monitors.clear();
        self.retry.clear();
        self.tracker.reset_all();
        self.transition = TransitionState::None;
        self.active_index = None;
        self.focus = None;
        self.play_when_ready = None;
        self.current = ManagerState::Idle;
        self.dirty = true;
    }

    // ---- monitoring ----

    fn tick_playback(&mut self) {
        let mut finished = Vec::new();
        let mut failed = Vec::new();

        for (&index, monitor) in self.monitors.iter_mut() {
            let Some(slot) = self.slots.get_mut(&index) else {
                continue;
            };
            let Some(resource) = slot.resource().cloned() else {
                continue;
            };
            if let ResourceStatus::Failed(reason) = resource.status() {
                failed.push((index, reason));
                continue;
            }

            let sample = monitor.sample_playback(resource.as_ref(), slot.completed());
            if sample.restarted && slot.completed() {
                tracing::debug!(index, "从头重新播放，清除完成标记");
                slot.set_completed(false);
                self.dirty = true;
            }
            if sample.reached_end {
                slot.set_completed(true);
                slot.set_state(PlaybackState::Paused);
                finished.push(index);
                self.dirty = true;
                continue;
            }

            let control = resource.time_control();
            let state = slot.state().clone();
            let state_changed = match state {
                PlaybackState::Playing | PlaybackState::Buffering(_)
                    if control == TimeControl::Paused =>
                {
                    slot.set_state(PlaybackState::Paused)
                }
                PlaybackState::Idle | PlaybackState::Paused if control == TimeControl::Playing => {
                    slot.set_state(PlaybackState::Playing)
                }
                _ => false,
            };
            self.dirty |= state_changed;
        }

        if !finished.is_empty() {
            self.publish();
        }
        for index in finished {
            tracing::info!(index, "播放自然结束");
            self.emit(ManagerEvent::Completed { index });
        }
        for (index, reason) in failed {
            self.on_resource_failed(index, reason);
        }
    }

    fn tick_buffer(&mut self) {
        for (&index, monitor) in self.monitors.iter() {
            let Some(slot) = self.slots.get_mut(&index) else {
                continue;
            };
            let Some(resource) = slot.resource().cloned() else {
                continue;
            };
            let sample = monitor.sample_buffer(resource.as_ref());
            if (slot.buffering_progress() - sample.progress).abs() > f32::EPSILON {
                slot.set_buffering_progress(sample.progress);
                self.dirty = true;
            }

            let state = slot.state().clone();
            let next = match state {
                PlaybackState::Playing if sample.stalled => {
                    Some(PlaybackState::Buffering(sample.progress))
                }
                PlaybackState::Buffering(_) if sample.stalled => {
                    Some(PlaybackState::Buffering(sample.progress))
                }
                PlaybackState::Buffering(_) if resource.is_playing() => Some(PlaybackState::Playing),
                _ => None,
            };
            if let Some(next) = next {
                self.dirty |= slot.set_state(next);
            }
        }
    }

    fn on_resource_failed(&mut self, index: SlotIndex, reason: String) {
        let action = match self.monitors.get_mut(&index) {
            Some(monitor) => monitor.on_failure(),
            None => return,
        };
        let Some(url) = self
            .slots
            .get(&index)
            .and_then(|s| s.source_url())
            .map(str::to_owned)
        else {
            return;
        };

        match action {
            FailureAction::Reload => {
                tracing::warn!(index, url = %url, reason = %reason, "播放资源失败，稍后重新加载一次");
                if self.focus == Some(index) {
                    self.play_when_ready = Some(index);
                }
                if let Some(slot) = self.slots.get_mut(&index) {
                    slot.begin_loading(&url);
                }
                let at = Instant::now() + self.config.monitor.reload_delay;
                self.start_load(index, url, LoadKind::Reload, Some(at), Vec::new());
            }
            FailureAction::GiveUp => {
                tracing::error!(index, url = %url, reason = %reason, "重新加载后仍然失败");
                self.monitors.remove(&index);
                let error = PreloadError::VerificationFailed(reason);
                if let Some(slot) = self.slots.get_mut(&index) {
                    slot.fail(error.clone());
                }
                self.publish();
                self.emit(ManagerEvent::Failed { index, error });
            }
        }
        self.dirty = true;
    }

    fn on_reachability(&mut self, reachability: Reachability) {
        match reachability {
            Reachability::Unavailable => {
                tracing::info!("网络不可用");
                self.network = NetworkState::Disconnected;
            }
            Reachability::Available => {
                self.network = NetworkState::Connected;
                let tasks = self.retry.drain();
                if !tasks.is_empty() {
                    tracing::info!(count = tasks.len(), "网络恢复，重放待重试的预加载");
                }
                let now = Instant::now();
                for task in tasks {
                    let still_wanted = self
                        .slots
                        .get(&task.index)
                        .is_some_and(|s| s.source_url() == Some(task.url.as_str()));
                    if !still_wanted || self.inflight.contains_key(&task.index) {
                        self.retry.remove(task.index);
                        continue;
                    }
                    if let Some(slot) = self.slots.get_mut(&task.index) {
                        slot.begin_loading(&task.url);
                    }
                    tracing::debug!(index = task.index, attempt = task.attempt, "重放预加载");
                    let not_before = (task.next_eligible > now).then_some(task.next_eligible);
                    self.start_load(task.index, task.url, LoadKind::Fresh, not_before, Vec::new());
                }
            }
        }
        self.dirty = true;
    }

    // ---- publishing ----

    fn reply<T>(&mut self, reply: Reply<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    /// 事件按产生顺序送达；通道满时排队，由主循环在有空位时补发
    fn emit(&mut self, evt: ManagerEvent) {
        self.outbox.push_back(evt);
        if self.outbox.len() > OUTBOX_LIMIT {
            // Completed 不能丢，其余事件的结果都能从快照里读到
            let droppable = self
                .outbox
                .iter()
                .position(|e| !matches!(e, ManagerEvent::Completed { .. }));
            if let Some(evt) = droppable.and_then(|pos| self.outbox.remove(pos)) {
                tracing::warn!(?evt, pending = self.outbox.len(), "事件积压过多，丢弃最早的非完成事件");
            }
        }
        self.flush_events();
    }

    fn flush_events(&mut self) {
        while let Some(evt) = self.outbox.pop_front() {
            match self.tx_evt.try_send(evt) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(evt)) => {
                    self.outbox.push_front(evt);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.outbox.clear();
                    break;
                }
            }
        }
    }

    fn refresh_current(&mut self) {
        let Some(index) = self.focus else {
            return;
        };
        self.current = match self.slots.get(&index) {
            None => ManagerState::Idle,
            Some(slot) => match slot.state() {
                PlaybackState::Loading => ManagerState::Loading { index },
                PlaybackState::Playing | PlaybackState::Buffering(_) => {
                    ManagerState::Playing { index }
                }
                PlaybackState::Paused => ManagerState::Paused { index },
                PlaybackState::Error(e) => ManagerState::Error {
                    index,
                    reason: e.to_string(),
                },
                PlaybackState::Idle if slot.is_ready() => ManagerState::Paused { index },
                PlaybackState::Idle => ManagerState::Idle,
            },
        };
    }

    fn publish(&mut self) {
        self.refresh_current();
        self.dirty = false;
        let snapshot = ManagerSnapshot {
            slots: self.slots.iter().map(|(i, s)| (*i, s.view())).collect(),
            current: self.current.clone(),
            active_index: self.active_index,
            is_transitioning: self.transition.is_active(),
            transition: self.transition,
            network: self.network,
            pending_retries: self.retry.len(),
        };
        self.tx_state.send_replace(snapshot);
    }
}

async fn next_reachability(
    rx: &mut Option<mpsc::Receiver<Reachability>>,
) -> Option<Reachability> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn ready_slot(
    slots: &mut BTreeMap<SlotIndex, Slot>,
    index: SlotIndex,
) -> Result<&mut Slot, PreloadError> {
    slots
        .get_mut(&index)
        .filter(|s| s.is_ready())
        .ok_or(PreloadError::PlayerNotFound { index })
}

fn start_playing(slot: &mut Slot) {
    if let Some(resource) = slot.resource() {
        resource.play();
        slot.set_state(PlaybackState::Playing);
    }
}

fn stop_playing(slot: &mut Slot) {
    if let Some(resource) = slot.resource() {
        resource.pause();
    }
    if matches!(
        slot.state(),
        PlaybackState::Playing | PlaybackState::Buffering(_)
    ) {
        slot.set_state(PlaybackState::Paused);
    }
}

fn restart_from_beginning(slot: &mut Slot, monitor: Option<&mut BufferMonitor>) {
    if let Some(resource) = slot.resource() {
        resource.seek(Duration::ZERO);
    }
    slot.set_completed(false);
    if let Some(monitor) = monitor {
        monitor.reset_play_through();
    }
    start_playing(slot);
}
