/*
 * Per-host compositing layer holding the overlay slots mounted above the
 * host's normal content. The layer owns each slot's placement and keeps it in
 * sync with the host and anchor as they re-lay-out; it never drives a
 * popover's lifecycle. Creating and removing attachments is left to the
 * controller.
 *
 * Subscriptions are plain bookkeeping inside the layer (which attachment
 * follows which layout source), so detaching an attachment removes every
 * trace of it in one place.
 */
use crate::anchor_geometry::PlacementPolicy;
use crate::error::{PopoverError, Result as PopoverResult};
use crate::popover::Popover;
use crate::surface::{AnchorElement, HostSurface};
use crate::types::{
    AnchorId, AttachmentHandle, HorizontalAlignment, HostId, LayoutSource, PopoverId, Rect,
    Size, VisualId,
};

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};

struct Attachment {
    popover: PopoverId,
    anchor: Weak<dyn AnchorElement>,
    anchor_id: AnchorId,
    visual: VisualId,
    desired_size: Size,
    alignment: HorizontalAlignment,
    placement: Rect,
    // Outside-interaction listener registered by the controller.
    listening: bool,
}

#[derive(Default)]
struct LayerState {
    attachments: BTreeMap<u64, Attachment>,
    layout_subscriptions: HashMap<LayoutSource, BTreeSet<u64>>,
    next_attachment_id: u64,
}

impl LayerState {
    fn subscribe(&mut self, source: LayoutSource, id: u64) {
        self.layout_subscriptions.entry(source).or_default().insert(id);
    }

    fn unsubscribe_all(&mut self, id: u64) {
        self.layout_subscriptions.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
    }
}

/// A pointer-down listener that should see the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutsideListener {
    pub handle: AttachmentHandle,
    pub popover: PopoverId,
    pub visual: VisualId,
}

pub struct OverlayLayer {
    host: Rc<dyn HostSurface>,
    state: RefCell<LayerState>,
}

impl OverlayLayer {
    pub fn new(host: Rc<dyn HostSurface>) -> Self {
        Self {
            host,
            state: RefCell::new(LayerState::default()),
        }
    }

    pub fn host_id(&self) -> HostId {
        self.host.id()
    }

    fn handle(&self, id: u64) -> AttachmentHandle {
        AttachmentHandle {
            host: self.host.id(),
            id,
        }
    }

    fn owns(&self, handle: AttachmentHandle) -> bool {
        handle.host == self.host.id()
    }

    fn place(&self, anchor: &dyn AnchorElement, alignment: HorizontalAlignment, size: Size) -> Rect {
        PlacementPolicy::new(anchor.bottom_inset(), alignment).place(
            anchor.bounds(),
            self.host.bounds(),
            size,
        )
    }

    /*
     * Mounts `popover` below `anchor`. Fails without touching the host when it
     * has no overlay region, so a failed attach leaves nothing behind.
     */
    pub fn attach<C: 'static>(
        &self,
        anchor: &Rc<dyn AnchorElement>,
        popover: &Popover<C>,
    ) -> PopoverResult<AttachmentHandle> {
        if !self.host.has_overlay_region() {
            log::warn!(
                "OverlayLayer: host {:?} has no overlay region; cannot attach popover {:?}.",
                self.host.id(),
                popover.id()
            );
            return Err(PopoverError::NoOverlaySurface(self.host.id()));
        }

        let desired_size = popover.desired_size();
        let alignment = popover.alignment();
        let placement = self.place(anchor.as_ref(), alignment, desired_size);
        let visual = self.host.mount_overlay(placement, popover.ready_signal());

        let mut state = self.state.borrow_mut();
        state.next_attachment_id += 1;
        let id = state.next_attachment_id;
        state.attachments.insert(
            id,
            Attachment {
                popover: popover.id(),
                anchor: Rc::downgrade(anchor),
                anchor_id: anchor.id(),
                visual,
                desired_size,
                alignment,
                placement,
                listening: false,
            },
        );
        state.subscribe(LayoutSource::Host, id);
        state.subscribe(LayoutSource::Anchor(anchor.id()), id);

        log::debug!(
            "OverlayLayer: attached popover {:?} to anchor {:?} on host {:?} at {placement:?} (attachment {id}).",
            popover.id(),
            anchor.id(),
            self.host.id()
        );
        Ok(self.handle(id))
    }

    /// Removes the attachment and unmounts its slot. Detaching twice is a no-op.
    pub fn detach(&self, handle: AttachmentHandle) -> bool {
        if !self.owns(handle) {
            return false;
        }
        let removed = {
            let mut state = self.state.borrow_mut();
            let removed = state.attachments.remove(&handle.id);
            if removed.is_some() {
                state.unsubscribe_all(handle.id);
            }
            removed
        };
        match removed {
            Some(attachment) => {
                self.host.unmount_overlay(attachment.visual);
                log::debug!(
                    "OverlayLayer: detached popover {:?} from host {:?}.",
                    attachment.popover,
                    self.host.id()
                );
                true
            }
            None => false,
        }
    }

    /// Detaches everything; used when the host goes away.
    pub fn detach_all(&self) -> Vec<PopoverId> {
        let ids: Vec<u64> = self.state.borrow().attachments.keys().copied().collect();
        let mut popovers = Vec::with_capacity(ids.len());
        for id in ids {
            let popover = self
                .state
                .borrow()
                .attachments
                .get(&id)
                .map(|attachment| attachment.popover);
            if self.detach(self.handle(id)) {
                popovers.extend(popover);
            }
        }
        popovers
    }

    /*
     * Recomputes the placement of every attachment following `source` and
     * moves its slot. Attachments whose anchor has been dropped keep their
     * last placement.
     */
    pub fn on_layout_changed(&self, source: LayoutSource) -> usize {
        let moves: Vec<(VisualId, Rect)> = {
            let mut state = self.state.borrow_mut();
            let ids: Vec<u64> = match state.layout_subscriptions.get(&source) {
                Some(ids) => ids.iter().copied().collect(),
                None => return 0,
            };
            let mut moves = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(attachment) = state.attachments.get_mut(&id) else {
                    continue;
                };
                let Some(anchor) = attachment.anchor.upgrade() else {
                    log::warn!(
                        "OverlayLayer: anchor {:?} of popover {:?} is gone; keeping last placement.",
                        attachment.anchor_id,
                        attachment.popover
                    );
                    continue;
                };
                let placement = PlacementPolicy::new(anchor.bottom_inset(), attachment.alignment)
                    .place(anchor.bounds(), self.host.bounds(), attachment.desired_size);
                if placement != attachment.placement {
                    attachment.placement = placement;
                    moves.push((attachment.visual, placement));
                }
            }
            moves
        };

        log::trace!(
            "OverlayLayer: {source:?} re-layout on host {:?} moved {} overlay(s).",
            self.host.id(),
            moves.len()
        );
        for (visual, placement) in &moves {
            self.host.move_overlay(*visual, *placement);
        }
        moves.len()
    }

    /// Updates the measured size of an attached popover and repositions it.
    pub fn update_desired_size(&self, handle: AttachmentHandle, size: Size) {
        if !self.owns(handle) {
            return;
        }
        let moved = {
            let mut state = self.state.borrow_mut();
            let Some(attachment) = state.attachments.get_mut(&handle.id) else {
                return;
            };
            attachment.desired_size = size;
            let Some(anchor) = attachment.anchor.upgrade() else {
                return;
            };
            attachment.placement = PlacementPolicy::new(anchor.bottom_inset(), attachment.alignment)
                .place(anchor.bounds(), self.host.bounds(), size);
            (attachment.visual, attachment.placement)
        };
        self.host.move_overlay(moved.0, moved.1);
    }

    /*
     * Moves an attachment to a new anchor: it is placed below `anchor` right
     * away and follows that anchor's re-layouts instead of the old one's.
     */
    pub fn retarget(&self, handle: AttachmentHandle, anchor: &Rc<dyn AnchorElement>) -> bool {
        if !self.owns(handle) {
            return false;
        }
        let Some((alignment, size)) = self
            .state
            .borrow()
            .attachments
            .get(&handle.id)
            .map(|attachment| (attachment.alignment, attachment.desired_size))
        else {
            return false;
        };
        let placement = self.place(anchor.as_ref(), alignment, size);

        let visual = {
            let mut state = self.state.borrow_mut();
            let Some(attachment) = state.attachments.get_mut(&handle.id) else {
                return false;
            };
            attachment.anchor = Rc::downgrade(anchor);
            attachment.anchor_id = anchor.id();
            attachment.placement = placement;
            let visual = attachment.visual;
            state.unsubscribe_all(handle.id);
            state.subscribe(LayoutSource::Host, handle.id);
            state.subscribe(LayoutSource::Anchor(anchor.id()), handle.id);
            visual
        };
        log::debug!(
            "OverlayLayer: attachment {} on host {:?} now follows anchor {:?}.",
            handle.id,
            self.host.id(),
            anchor.id()
        );
        self.host.move_overlay(visual, placement);
        true
    }

    pub fn listen_outside(&self, handle: AttachmentHandle) {
        self.set_listening(handle, true);
    }

    pub fn unlisten_outside(&self, handle: AttachmentHandle) {
        self.set_listening(handle, false);
    }

    fn set_listening(&self, handle: AttachmentHandle, listening: bool) {
        if !self.owns(handle) {
            return;
        }
        if let Some(attachment) = self.state.borrow_mut().attachments.get_mut(&handle.id) {
            attachment.listening = listening;
        }
    }

    /*
     * Listeners that should be told about a pointer-down on the host. The layer
     * only intercepts while something is attached and does not decide what the
     * event means.
     */
    pub fn route_pointer_down(&self) -> Vec<OutsideListener> {
        let state = self.state.borrow();
        state
            .attachments
            .iter()
            .filter(|(_, attachment)| attachment.listening)
            .map(|(id, attachment)| OutsideListener {
                handle: self.handle(*id),
                popover: attachment.popover,
                visual: attachment.visual,
            })
            .collect()
    }

    /*
     * Walks the host's visual ancestry from `node` looking for `ancestor`. A
     * parent chain that loops back on itself ends the walk with `false`.
     */
    pub fn is_descendant(&self, ancestor: VisualId, node: VisualId) -> bool {
        let mut visited = HashSet::new();
        let mut current = Some(node);
        while let Some(visual) = current {
            if visual == ancestor {
                return true;
            }
            if !visited.insert(visual) {
                log::warn!(
                    "OverlayLayer: visual tree of host {:?} has a parent cycle at {visual:?}.",
                    self.host.id()
                );
                return false;
            }
            current = self.host.visual_parent(visual);
        }
        false
    }

    pub fn attachment_of(&self, popover: PopoverId) -> Option<AttachmentHandle> {
        self.state
            .borrow()
            .attachments
            .iter()
            .find(|(_, attachment)| attachment.popover == popover)
            .map(|(id, _)| self.handle(*id))
    }

    pub fn is_attached(&self, handle: AttachmentHandle) -> bool {
        self.owns(handle) && self.state.borrow().attachments.contains_key(&handle.id)
    }

    pub fn attachment_count(&self) -> usize {
        self.state.borrow().attachments.len()
    }

    pub fn placement_of(&self, handle: AttachmentHandle) -> Option<Rect> {
        if !self.owns(handle) {
            return None;
        }
        self.state
            .borrow()
            .attachments
            .get(&handle.id)
            .map(|attachment| attachment.placement)
    }

    pub fn visual_of(&self, handle: AttachmentHandle) -> Option<VisualId> {
        if !self.owns(handle) {
            return None;
        }
        self.state
            .borrow()
            .attachments
            .get(&handle.id)
            .map(|attachment| attachment.visual)
    }

    #[cfg(test)]
    fn subscription_count(&self) -> usize {
        self.state.borrow().layout_subscriptions.len()
    }
}
