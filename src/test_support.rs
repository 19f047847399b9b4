/*
 * In-memory stand-ins for the host window, anchor and animation engine so the
 * engine can be exercised without a windowing system.
 */
use crate::popover::{CloseCompletion, ReadySignal};
use crate::surface::{AnchorElement, CloseAnimation, HostSurface};
use crate::types::{AnchorId, HostId, PopoverId, Rect, VisualId};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

pub(crate) const HOST_BOUNDS: Rect = Rect::new(0.0, 0.0, 800.0, 600.0);

type UnmountObserver = Box<dyn Fn(VisualId)>;

pub(crate) struct FakeHost {
    id: HostId,
    bounds: Cell<Rect>,
    overlay_region: Cell<bool>,
    // Fire the ready signal from inside `mount_overlay`.
    ready_on_mount: Cell<bool>,
    pending_ready: RefCell<Vec<ReadySignal>>,
    mounted: RefCell<HashMap<VisualId, Rect>>,
    unmounted: RefCell<Vec<VisualId>>,
    parents: RefCell<HashMap<VisualId, VisualId>>,
    next_visual: Cell<u64>,
    // Runs inside `unmount_overlay`, after the slot is gone.
    on_unmount: RefCell<Option<UnmountObserver>>,
}

impl FakeHost {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id: HostId(id),
            bounds: Cell::new(HOST_BOUNDS),
            overlay_region: Cell::new(true),
            ready_on_mount: Cell::new(false),
            pending_ready: RefCell::new(Vec::new()),
            mounted: RefCell::new(HashMap::new()),
            unmounted: RefCell::new(Vec::new()),
            parents: RefCell::new(HashMap::new()),
            next_visual: Cell::new(1000),
            on_unmount: RefCell::new(None),
        }
    }

    pub(crate) fn set_overlay_region(&self, available: bool) {
        self.overlay_region.set(available);
    }

    pub(crate) fn set_ready_on_mount(&self, immediate: bool) {
        self.ready_on_mount.set(immediate);
    }

    pub(crate) fn set_bounds(&self, bounds: Rect) {
        self.bounds.set(bounds);
    }

    /// Completes the first layout pass of every pending mount.
    pub(crate) fn fire_ready(&self) {
        let pending: Vec<ReadySignal> = self.pending_ready.borrow_mut().drain(..).collect();
        for signal in pending {
            signal.signal();
        }
    }

    pub(crate) fn add_child(&self, parent: VisualId, child: VisualId) {
        self.parents.borrow_mut().insert(child, parent);
    }

    pub(crate) fn placement_of(&self, visual: VisualId) -> Option<Rect> {
        self.mounted.borrow().get(&visual).copied()
    }

    pub(crate) fn mounted_count(&self) -> usize {
        self.mounted.borrow().len()
    }

    pub(crate) fn unmounted(&self) -> Vec<VisualId> {
        self.unmounted.borrow().clone()
    }

    pub(crate) fn observe_unmounts(&self, observer: impl Fn(VisualId) + 'static) {
        *self.on_unmount.borrow_mut() = Some(Box::new(observer));
    }
}

impl HostSurface for FakeHost {
    fn id(&self) -> HostId {
        self.id
    }

    fn bounds(&self) -> Rect {
        self.bounds.get()
    }

    fn has_overlay_region(&self) -> bool {
        self.overlay_region.get()
    }

    fn mount_overlay(&self, placement: Rect, ready: ReadySignal) -> VisualId {
        let visual = VisualId(self.next_visual.get());
        self.next_visual.set(visual.0 + 1);
        self.mounted.borrow_mut().insert(visual, placement);
        if self.ready_on_mount.get() {
            ready.signal();
        } else {
            self.pending_ready.borrow_mut().push(ready);
        }
        visual
    }

    fn move_overlay(&self, visual: VisualId, placement: Rect) {
        if let Some(slot) = self.mounted.borrow_mut().get_mut(&visual) {
            *slot = placement;
        }
    }

    fn unmount_overlay(&self, visual: VisualId) {
        self.mounted.borrow_mut().remove(&visual);
        self.unmounted.borrow_mut().push(visual);
        if let Some(observer) = self.on_unmount.borrow().as_ref() {
            observer(visual);
        }
    }

    fn visual_parent(&self, visual: VisualId) -> Option<VisualId> {
        self.parents.borrow().get(&visual).copied()
    }
}

#[derive(Debug)]
pub(crate) struct FakeAnchor {
    id: AnchorId,
    bounds: Cell<Rect>,
    bottom_inset: f64,
}

impl FakeAnchor {
    pub(crate) fn new(id: u32, bounds: Rect) -> Self {
        Self {
            id: AnchorId(id),
            bounds: Cell::new(bounds),
            bottom_inset: 0.0,
        }
    }

    pub(crate) fn with_bottom_inset(mut self, inset: f64) -> Self {
        self.bottom_inset = inset;
        self
    }

    pub(crate) fn set_bounds(&self, bounds: Rect) {
        self.bounds.set(bounds);
    }
}

impl AnchorElement for FakeAnchor {
    fn id(&self) -> AnchorId {
        self.id
    }

    fn bounds(&self) -> Rect {
        self.bounds.get()
    }

    fn bottom_inset(&self) -> f64 {
        self.bottom_inset
    }
}

/// Closing animation that only completes when the test says so.
#[derive(Debug, Default)]
pub(crate) struct ManualAnimation {
    running: RefCell<Vec<CloseCompletion>>,
    started: Cell<usize>,
}

impl ManualAnimation {
    pub(crate) fn started(&self) -> usize {
        self.started.get()
    }

    pub(crate) fn finish_all(&self) {
        let running: Vec<CloseCompletion> = self.running.borrow_mut().drain(..).collect();
        for completion in running {
            completion.complete();
        }
    }
}

impl CloseAnimation for ManualAnimation {
    fn begin_close(&self, _popover: PopoverId, completion: CloseCompletion) {
        self.started.set(self.started.get() + 1);
        self.running.borrow_mut().push(completion);
    }
}
