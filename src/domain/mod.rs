mod keep_range;
mod model;

pub use keep_range::KeepRange;
pub use model::{
    CleanupContext, ManagerSnapshot, ManagerState, NetworkState, PlaybackState, PreloadState,
    Slot, SlotIndex, SlotView, TransitionState,
};
