use std::sync::Arc;
use tokio::sync::oneshot;

use crate::domain::{CleanupContext, SlotIndex};
use crate::error::PreloadError;
use crate::media::PlayableResource;
use crate::pipeline::LoadProgress;

pub(crate) type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub(crate) enum ManagerCommand {
    Preload {
        index: SlotIndex,
        url: String,
        reply: Reply<Result<(), PreloadError>>,
    },
    PauseAllExcept {
        index: SlotIndex,
        reply: Reply<()>,
    },
    Toggle {
        index: SlotIndex,
        reply: Reply<Result<(), PreloadError>>,
    },
    Play {
        index: SlotIndex,
        reply: Reply<Result<(), PreloadError>>,
    },
    Pause {
        index: SlotIndex,
        reply: Reply<Result<(), PreloadError>>,
    },
    /// 跳回开头并播放，开始新一轮
    SeekToBeginning {
        index: SlotIndex,
        reply: Reply<Result<(), PreloadError>>,
    },
    PrepareForTransition {
        from: SlotIndex,
        to: SlotIndex,
        reply: Reply<()>,
    },
    BeginAutoAdvance {
        from: SlotIndex,
        to: SlotIndex,
        reply: Reply<()>,
    },
    FinishTransition {
        index: SlotIndex,
        reply: Reply<()>,
    },
    Cleanup {
        context: CleanupContext,
        reply: Reply<()>,
    },
    ClearCache {
        reply: Reply<(usize, u64)>,
    },
}

/// 发给信息流控制器的通知
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    Ready { index: SlotIndex },
    Failed { index: SlotIndex, error: PreloadError },
    /// 自然播放结束，每轮播放只发一次
    Completed { index: SlotIndex },
}

/// 后台任务回报给管理器循环的结果
pub(crate) enum TaskEvent {
    Progress {
        index: SlotIndex,
        generation: u64,
        progress: LoadProgress,
    },
    Finished {
        index: SlotIndex,
        generation: u64,
        result: Result<Arc<dyn PlayableResource>, PreloadError>,
    },
    TransitionSettled {
        generation: u64,
    },
}
