/*
 * Error taxonomy for the popover engine. Only attach-time and thread-affinity
 * failures are errors; a vetoed close is a normal outcome and is reported as
 * `false` from `Popover::request_close_async` instead.
 */
use crate::types::{AnchorId, HostId};

use std::thread::ThreadId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PopoverError {
    /// The host exists but cannot mount overlay visuals yet (e.g. not fully initialized).
    #[error("host {0:?} has no overlay surface")]
    NoOverlaySurface(HostId),

    /// A closed popover cannot be mounted again because its anchor has been dropped.
    #[error("anchor {0:?} no longer exists")]
    AnchorGone(AnchorId),

    /// The host was never registered with the controller, or has been torn down.
    #[error("host {0:?} is not registered")]
    UnknownHost(HostId),

    /// A UI-affine API was invoked from a thread other than the one owning the UI.
    #[error("called from thread {caller:?}, but the UI is owned by thread {owner:?}")]
    WrongThread { owner: ThreadId, caller: ThreadId },

    /// A job was posted after the owning controller was dropped.
    #[error("the UI dispatcher queue is closed")]
    DispatcherClosed,
}

pub type Result<T> = std::result::Result<T, PopoverError>;
