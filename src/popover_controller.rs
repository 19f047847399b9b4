/*
 * Entry point for applications. The controller owns one overlay layer per
 * registered host and every popover it has shown, and it is the only place
 * attachments are created or removed.
 *
 * Lifecycle wiring: each popover gets a sink pointing back at the controller.
 * On Opened the controller starts listening for outside pointer-downs (when the
 * popover auto-closes) and then publishes the event; on Closed it stops
 * listening, detaches the slot, and only then publishes. Subscribers therefore
 * never see a popover that is still mid-transition.
 *
 * A closed popover keeps a mount hook back to the controller, so opening it
 * again re-attaches it below its (possibly re-targeted) anchor.
 */
use crate::dispatcher::{UiDispatcher, UiJob};
use crate::error::{PopoverError, Result as PopoverResult};
use crate::event_channel::PopoverEventChannel;
use crate::overlay_layer::OverlayLayer;
use crate::popover::{Popover, PopoverOptions};
use crate::surface::{AnchorElement, HostSurface};
use crate::types::{
    AttachmentHandle, ClosingWindowRequest, HostId, LayoutSource, PopoverId, PopoverState,
    PopoverStateChangedEvent, Size, StateChangeKind, VisualId,
};

use futures::channel::mpsc::UnboundedReceiver;
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

struct Entry<C> {
    popover: Popover<C>,
    host: HostId,
    attachment: AttachmentHandle,
}

struct ControllerInner<C> {
    layers: RefCell<HashMap<HostId, Rc<OverlayLayer>>>,
    entries: RefCell<BTreeMap<PopoverId, Entry<C>>>,
    events: Rc<PopoverEventChannel>,
}

impl<C: 'static> ControllerInner<C> {
    /*
     * Attaches `popover` below `anchor` and records it. Must run before the
     * popover enters Opening so its Opened event finds the entry.
     */
    fn mount(&self, popover: &Popover<C>, anchor: &Rc<dyn AnchorElement>) -> PopoverResult<()> {
        let host = popover.owner();
        let layer = self.layer(host)?;
        let attachment = layer.attach(anchor, popover)?;
        self.entries.borrow_mut().insert(
            popover.id(),
            Entry {
                popover: popover.clone(),
                host,
                attachment,
            },
        );
        Ok(())
    }

    fn remount(&self, popover: &Popover<C>) -> PopoverResult<()> {
        let anchor = popover
            .anchor_element()
            .ok_or(PopoverError::AnchorGone(popover.target()))?;
        self.mount(popover, &anchor)
    }

    fn layer(&self, host: HostId) -> PopoverResult<Rc<OverlayLayer>> {
        self.layers
            .borrow()
            .get(&host)
            .cloned()
            .ok_or(PopoverError::UnknownHost(host))
    }

    fn on_lifecycle(&self, popover: &Popover<C>, kind: StateChangeKind) {
        match kind {
            StateChangeKind::Opened => self.on_opened(popover),
            StateChangeKind::Closed => self.on_closed(popover),
        }
    }

    fn on_opened(&self, popover: &Popover<C>) {
        let entry = self
            .entries
            .borrow()
            .get(&popover.id())
            .map(|entry| (entry.host, entry.attachment));
        let Some((host, attachment)) = entry else {
            log::warn!(
                "PopoverController: popover {:?} opened after its host was torn down.",
                popover.id()
            );
            return;
        };

        if popover.auto_close()
            && let Ok(layer) = self.layer(host)
        {
            layer.listen_outside(attachment);
        }
        log::debug!(
            "PopoverController: popover {:?} open on host {host:?}.",
            popover.id()
        );
        self.events.publish(PopoverStateChangedEvent {
            kind: StateChangeKind::Opened,
            popover: popover.id(),
            host,
        });
    }

    fn on_closed(&self, popover: &Popover<C>) {
        let Some(entry) = self.entries.borrow_mut().remove(&popover.id()) else {
            return;
        };
        // Stop listening before the slot goes away so no pointer-down can reach a detached attachment.
        if let Ok(layer) = self.layer(entry.host) {
            layer.unlisten_outside(entry.attachment);
            layer.detach(entry.attachment);
        }
        log::debug!(
            "PopoverController: popover {:?} closed and detached from host {:?}.",
            popover.id(),
            entry.host
        );
        self.events.publish(PopoverStateChangedEvent {
            kind: StateChangeKind::Closed,
            popover: popover.id(),
            host: entry.host,
        });
    }
}

/*
 * A popover on its way to Open. Resolves with the popover once it has opened;
 * the popover itself is reachable right away, e.g. to cancel it early.
 */
pub struct Showing<C> {
    popover: Popover<C>,
    opened: LocalBoxFuture<'static, ()>,
}

impl<C> Showing<C> {
    pub fn popover(&self) -> &Popover<C> {
        &self.popover
    }
}

impl<C> Future for Showing<C> {
    type Output = Popover<C>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.opened.poll_unpin(cx) {
            Poll::Ready(()) => Poll::Ready(this.popover.clone()),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct PopoverController<C> {
    inner: Rc<ControllerInner<C>>,
    dispatcher: UiDispatcher<C>,
    inbox: RefCell<UnboundedReceiver<UiJob<C>>>,
}

impl<C: 'static> PopoverController<C> {
    /// Creates a controller bound to the calling (UI) thread.
    pub fn new(events: Rc<PopoverEventChannel>) -> Self {
        let (dispatcher, inbox) = UiDispatcher::for_current_thread();
        Self {
            inner: Rc::new(ControllerInner {
                layers: RefCell::new(HashMap::new()),
                entries: RefCell::new(BTreeMap::new()),
                events,
            }),
            dispatcher,
            inbox: RefCell::new(inbox),
        }
    }

    pub fn events(&self) -> Rc<PopoverEventChannel> {
        Rc::clone(&self.inner.events)
    }

    pub fn dispatcher(&self) -> UiDispatcher<C> {
        self.dispatcher.clone()
    }

    /// Runs every job posted through the dispatcher so far. Returns how many ran.
    pub fn run_dispatched(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inbox.borrow_mut().try_next();
            match next {
                Ok(Some(job)) => {
                    job(self);
                    ran += 1;
                }
                _ => break,
            }
        }
        ran
    }

    /// Creates the overlay layer for `host`. Registering a host twice keeps the first layer.
    pub fn register_host(&self, host: Rc<dyn HostSurface>) {
        let id = host.id();
        let mut layers = self.inner.layers.borrow_mut();
        if layers.contains_key(&id) {
            log::warn!("PopoverController: host {id:?} is already registered.");
            return;
        }
        log::debug!("PopoverController: registered host {id:?}.");
        layers.insert(id, Rc::new(OverlayLayer::new(host)));
    }

    /*
     * Tears down everything attached to `host`. Open (and closing) popovers are
     * closed immediately, without consulting their close policy or animation,
     * and publish Closed as usual. Popovers still waiting for their mount are
     * detached silently and never open. Returns the popovers that were removed.
     */
    pub fn unregister_host(&self, host: HostId) -> Vec<PopoverId> {
        let Ok(layer) = self.inner.layer(host) else {
            return Vec::new();
        };

        let popovers: Vec<Popover<C>> = self
            .inner
            .entries
            .borrow()
            .values()
            .filter(|entry| entry.host == host)
            .map(|entry| entry.popover.clone())
            .collect();
        for popover in &popovers {
            if popover.state() == PopoverState::Opening {
                popover.invalidate_mount();
            } else {
                popover.force_close();
            }
        }

        let orphaned = layer.detach_all();
        {
            let mut entries = self.inner.entries.borrow_mut();
            for id in &orphaned {
                entries.remove(id);
            }
        }
        self.inner.layers.borrow_mut().remove(&host);
        log::debug!(
            "PopoverController: host {host:?} torn down; {} popover(s) removed.",
            popovers.len()
        );
        popovers.iter().map(Popover::id).collect()
    }

    /// Tears the host down unless a listener cancelled the closing request.
    pub fn close_host(&self, host: HostId, request: &ClosingWindowRequest) -> bool {
        if request.is_cancelled() {
            log::debug!("PopoverController: close of host {host:?} was cancelled.");
            return false;
        }
        self.unregister_host(host);
        true
    }

    pub fn overlay_layer(&self, host: HostId) -> Option<Rc<OverlayLayer>> {
        self.inner.layer(host).ok()
    }

    /// Shows `content` below `anchor` with default options.
    pub fn show(
        &self,
        host: HostId,
        anchor: Rc<dyn AnchorElement>,
        content: C,
    ) -> PopoverResult<Showing<C>> {
        self.show_with(host, anchor, content, PopoverOptions::default())
    }

    /*
     * Attaches a new popover and starts opening it. Attach failures are
     * returned synchronously and leave nothing behind. The returned future
     * resolves with the popover as soon as it is open; it does not wait for
     * dismissal.
     */
    pub fn show_with(
        &self,
        host: HostId,
        anchor: Rc<dyn AnchorElement>,
        content: C,
        options: PopoverOptions<C>,
    ) -> PopoverResult<Showing<C>> {
        self.inner.layer(host)?;
        let popover = Popover::new(host, anchor.id(), content, options);
        popover.set_anchor(&anchor);
        self.wire(&popover);

        self.inner.mount(&popover, &anchor)?;
        log::debug!(
            "PopoverController: showing popover {:?} on host {host:?} below anchor {:?}.",
            popover.id(),
            anchor.id()
        );

        let opened = popover.open_async();
        Ok(Showing { popover, opened })
    }

    fn wire(&self, popover: &Popover<C>) {
        let weak: Weak<ControllerInner<C>> = Rc::downgrade(&self.inner);
        popover.set_lifecycle_sink(Rc::new(move |popover: &Popover<C>, kind| {
            if let Some(inner) = weak.upgrade() {
                inner.on_lifecycle(popover, kind);
            }
        }));

        let weak: Weak<ControllerInner<C>> = Rc::downgrade(&self.inner);
        popover.set_mount_hook(Rc::new(move |popover: &Popover<C>| {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            match inner.remount(popover) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!(
                        "PopoverController: cannot mount popover {:?} again: {err}",
                        popover.id()
                    );
                    false
                }
            }
        }));
    }

    /*
     * Shows a popover that has closed (or was built by hand) again below its
     * anchor on its owner host. Mount failures are returned synchronously and
     * leave the popover Closed. A popover that is already opening or open just
     * yields its current cycle.
     */
    pub fn reopen(&self, popover: &Popover<C>) -> PopoverResult<Showing<C>> {
        self.wire(popover);
        let attached = self.inner.entries.borrow().contains_key(&popover.id());
        if popover.state() == PopoverState::Closed && !attached {
            self.inner.remount(popover)?;
            log::debug!(
                "PopoverController: reopening popover {:?} on host {:?}.",
                popover.id(),
                popover.owner()
            );
        }
        Ok(Showing {
            popover: popover.clone(),
            opened: popover.open_async(),
        })
    }

    /*
     * Moves `popover` to a new anchor. An attached popover is repositioned
     * right away and follows the new anchor's re-layouts from now on; a closed
     * one is mounted below it the next time it opens.
     */
    pub fn retarget(
        &self,
        popover: &Popover<C>,
        anchor: Rc<dyn AnchorElement>,
    ) -> PopoverResult<()> {
        let previous = popover.target();
        popover.set_anchor(&anchor);
        let attached = self
            .inner
            .entries
            .borrow()
            .get(&popover.id())
            .map(|entry| (entry.host, entry.attachment));
        if let Some((host, attachment)) = attached {
            self.inner.layer(host)?.retarget(attachment, &anchor);
        }
        log::debug!(
            "PopoverController: popover {:?} retargeted from anchor {previous:?} to {:?}.",
            popover.id(),
            anchor.id()
        );
        Ok(())
    }

    /*
     * Outside-interaction policy: every listening popover on `host` whose
     * visual subtree does not contain `origin` is asked to close. Returns the
     * number of close requests issued.
     */
    pub fn handle_pointer_down(&self, host: HostId, origin: VisualId) -> PopoverResult<usize> {
        let layer = self.inner.layer(host)?;
        let targets: Vec<Popover<C>> = {
            let entries = self.inner.entries.borrow();
            layer
                .route_pointer_down()
                .into_iter()
                .filter(|listener| !layer.is_descendant(listener.visual, origin))
                .filter_map(|listener| entries.get(&listener.popover))
                .map(|entry| entry.popover.clone())
                .collect()
        };
        log::trace!(
            "PopoverController: pointer-down at {origin:?} on host {host:?} dismisses {} popover(s).",
            targets.len()
        );
        for popover in &targets {
            popover.request_close();
        }
        Ok(targets.len())
    }

    /// Forwards a host or anchor re-layout to the host's layer.
    pub fn handle_layout_changed(&self, host: HostId, source: LayoutSource) -> PopoverResult<usize> {
        Ok(self.inner.layer(host)?.on_layout_changed(source))
    }

    /// Records a new measured size for a shown popover and repositions it.
    pub fn resize_popover(&self, popover: PopoverId, size: Size) -> PopoverResult<()> {
        let entry = self
            .inner
            .entries
            .borrow()
            .get(&popover)
            .map(|entry| (entry.popover.clone(), entry.host, entry.attachment));
        let Some((popover, host, attachment)) = entry else {
            return Ok(());
        };
        popover.set_desired_size(size);
        self.inner.layer(host)?.update_desired_size(attachment, size);
        Ok(())
    }

    pub fn popover(&self, id: PopoverId) -> Option<Popover<C>> {
        self.inner
            .entries
            .borrow()
            .get(&id)
            .map(|entry| entry.popover.clone())
    }

    pub fn open_popovers(&self) -> Vec<Popover<C>> {
        self.inner
            .entries
            .borrow()
            .values()
            .filter(|entry| entry.popover.state() == PopoverState::Open)
            .map(|entry| entry.popover.clone())
            .collect()
    }
}
