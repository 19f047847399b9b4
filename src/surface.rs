/*
 * Capability contracts the engine expects from its external collaborators:
 * the host window, the anchor element, and the style/animation engine.
 *
 * Notification streams are push-based. A host forwards its re-layout and
 * pointer-down events (and those of its anchors) to
 * `PopoverController::handle_layout_changed` / `handle_pointer_down`; the
 * engine never holds callbacks into the host, so tearing an overlay down
 * leaves nothing registered on the host side.
 */
use crate::popover::{CloseCompletion, ReadySignal};
use crate::types::{AnchorId, HostId, PopoverId, Rect, VisualId};

pub trait HostSurface {
    fn id(&self) -> HostId;

    fn bounds(&self) -> Rect;

    /// Whether the host can currently mount overlay visuals.
    fn has_overlay_region(&self) -> bool;

    /*
     * Creates an overlay slot at `placement` and returns the root visual of
     * the slot. The host fires `ready` once the slot has finished its first
     * layout pass; it may do so before returning.
     */
    fn mount_overlay(&self, placement: Rect, ready: ReadySignal) -> VisualId;

    fn move_overlay(&self, visual: VisualId, placement: Rect);

    fn unmount_overlay(&self, visual: VisualId);

    /// Parent of `visual` in the host's visual tree, `None` at the root.
    fn visual_parent(&self, visual: VisualId) -> Option<VisualId>;
}

pub trait AnchorElement {
    fn id(&self) -> AnchorId;

    fn bounds(&self) -> Rect;

    /// Bottom margin declared by the anchor; the overlay overlaps it.
    fn bottom_inset(&self) -> f64 {
        0.0
    }
}

/*
 * Closing transition provided by the style engine. The engine must consume
 * `completion` exactly once when the transition ends; consuming it inside
 * `begin_close` is allowed.
 */
pub trait CloseAnimation {
    fn begin_close(&self, popover: PopoverId, completion: CloseCompletion);
}
