/*
 * Public entry point of the metro-popover crate: the anchored overlay engine
 * behind metro-styled flyouts and popovers. A popover is a floating content
 * surface attached to an anchor element inside a host window; it positions
 * itself below the anchor, opens once the host has laid it out, and closes on
 * request, on an outside click, or when its host goes away.
 *
 * The crate is windowing-system agnostic. Hosts, anchors and closing
 * animations are supplied by the embedding toolkit through the traits in
 * `surface`; everything else (placement, the overlay layer, the lifecycle
 * state machine, outside-click dismissal) lives here and runs on the single
 * UI thread that created the `PopoverController`.
 */
pub mod anchor_geometry;
pub mod dispatcher;
pub mod error;
pub mod event_channel;
pub mod overlay_layer;
pub mod popover;
pub mod popover_controller;
pub mod surface;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use anchor_geometry::{PlacementPolicy, compute_placement};
pub use dispatcher::UiDispatcher;
pub use error::{PopoverError, Result as PopoverResult};
pub use event_channel::PopoverEventChannel;
pub use overlay_layer::{OutsideListener, OverlayLayer};
pub use popover::{CloseCompletion, ClosePolicy, Popover, PopoverOptions, ReadySignal};
pub use popover_controller::{PopoverController, Showing};
pub use surface::{AnchorElement, CloseAnimation, HostSurface};
pub use types::{
    AnchorId, AttachmentHandle, CloseDecision, ClosingWindowRequest, HorizontalAlignment, HostId,
    LayoutSource, PopoverId, PopoverState, PopoverStateChangedEvent, Rect, Size,
    StateChangeKind, VisualId,
};
