/*
 * The popover: a floating content container with an explicit lifecycle.
 *
 *   Closed --open()--> Opening --ready--> Open --request_close()--> Closing --completion--> Closed
 *
 * Every transition happens eagerly when the triggering call or signal arrives;
 * the futures returned by `open_async` and `request_close_async` only observe
 * the outcome, so dropping them never stalls the state machine. Each cycle has
 * one shared "opened" and one shared "closed" signal, so concurrent awaiters
 * see the same resolution.
 *
 * All state lives behind `Rc`/`RefCell`, which keeps popovers on the UI thread.
 * No borrow is held while user code runs (close policy, animation, lifecycle
 * sink), so any of them may call back into the popover. A close requested from
 * inside the close policy joins the close being decided.
 *
 * A popover shown through a controller knows how to get itself mounted again:
 * calling `open()` on it after it has closed re-attaches it to its host.
 */
use crate::surface::{AnchorElement, CloseAnimation};
use crate::types::{
    AnchorId, CloseDecision, HorizontalAlignment, HostId, PopoverId, PopoverState, Size,
    StateChangeKind,
};

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POPOVER_ID: AtomicU64 = AtomicU64::new(1);

pub type ClosePolicy<C> = Rc<dyn Fn(&C) -> CloseDecision>;

pub(crate) type LifecycleSink<C> = Rc<dyn Fn(&Popover<C>, StateChangeKind)>;

/// Re-attaches a detached popover; returns false when no slot could be mounted.
pub(crate) type MountHook<C> = Rc<dyn Fn(&Popover<C>) -> bool>;

/*
 * Per-popover configuration. The close policy is the veto strategy consulted
 * on the Open -> Closing edge; without one every close proceeds. Without a
 * close animation, Closing -> Closed happens synchronously.
 */
pub struct PopoverOptions<C> {
    pub desired_size: Size,
    pub alignment: HorizontalAlignment,
    /// Close when the user presses the pointer outside the popover.
    pub auto_close: bool,
    close_policy: Option<ClosePolicy<C>>,
    close_animation: Option<Rc<dyn CloseAnimation>>,
}

impl<C> Default for PopoverOptions<C> {
    fn default() -> Self {
        Self {
            desired_size: Size::default(),
            alignment: HorizontalAlignment::Left,
            auto_close: true,
            close_policy: None,
            close_animation: None,
        }
    }
}

impl<C> PopoverOptions<C> {
    pub fn with_desired_size(mut self, desired_size: Size) -> Self {
        self.desired_size = desired_size;
        self
    }

    pub fn with_alignment(mut self, alignment: HorizontalAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = auto_close;
        self
    }

    pub fn with_close_policy(mut self, policy: impl Fn(&C) -> CloseDecision + 'static) -> Self {
        self.close_policy = Some(Rc::new(policy));
        self
    }

    pub fn with_close_animation(mut self, animation: Rc<dyn CloseAnimation>) -> Self {
        self.close_animation = Some(animation);
        self
    }
}

impl<C> fmt::Debug for PopoverOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopoverOptions")
            .field("desired_size", &self.desired_size)
            .field("alignment", &self.alignment)
            .field("auto_close", &self.auto_close)
            .field("close_policy", &self.close_policy.is_some())
            .field("close_animation", &self.close_animation.is_some())
            .finish()
    }
}

/*
 * One-shot "mount is visually ready" signal handed to the host when the
 * popover is mounted. Consuming it is the only way to fire it, so it fires at
 * most once. Signals from a previous mount are ignored.
 */
pub struct ReadySignal {
    fire: Option<Box<dyn FnOnce()>>,
}

impl ReadySignal {
    pub fn signal(mut self) {
        if let Some(fire) = self.fire.take() {
            fire();
        }
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("pending", &self.fire.is_some())
            .finish()
    }
}

/*
 * Completion token for a closing animation. The animation engine consumes it
 * once the transition ends; a token dropped without completing leaves the
 * popover in Closing for good.
 */
pub struct CloseCompletion {
    popover: PopoverId,
    complete: Option<Box<dyn FnOnce()>>,
}

impl CloseCompletion {
    pub fn complete(mut self) {
        if let Some(complete) = self.complete.take() {
            complete();
        }
    }
}

impl Drop for CloseCompletion {
    fn drop(&mut self) {
        if self.complete.is_some() {
            log::warn!(
                "Popover {:?}: close animation dropped its completion; popover stays Closing.",
                self.popover
            );
        }
    }
}

impl fmt::Debug for CloseCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseCompletion")
            .field("popover", &self.popover)
            .field("pending", &self.complete.is_some())
            .finish()
    }
}

fn is_legal_transition(from: PopoverState, to: PopoverState) -> bool {
    matches!(
        (from, to),
        (PopoverState::Closed, PopoverState::Opening)
            | (PopoverState::Opening, PopoverState::Open)
            | (PopoverState::Open, PopoverState::Closing)
            | (PopoverState::Closing, PopoverState::Closed)
    )
}

#[derive(Default)]
struct Lifecycle {
    state: PopoverState,
    // Incremented on every Closed -> Opening.
    cycle: u64,
    // Incremented for every handed-out ReadySignal and on Closed; stale signals are dropped.
    mount_generation: u64,
    mount_ready: bool,
    // A ready signal has been handed out for a slot that is still mounted.
    mounted: bool,
    close_pending: bool,
    close_policy_running: bool,
    opened_tx: Option<oneshot::Sender<()>>,
    opened_rx: Option<Shared<oneshot::Receiver<()>>>,
    closed_tx: Option<oneshot::Sender<bool>>,
    closed_rx: Option<Shared<oneshot::Receiver<bool>>>,
    #[cfg(test)]
    history: Vec<PopoverState>,
}

impl Lifecycle {
    fn transition(&mut self, id: PopoverId, to: PopoverState) {
        debug_assert!(
            is_legal_transition(self.state, to),
            "illegal popover transition {:?} -> {to:?}",
            self.state
        );
        log::debug!("Popover {id:?}: {:?} -> {to:?}", self.state);
        self.state = to;
        #[cfg(test)]
        self.history.push(to);
    }

    fn closed_signal(&mut self) -> Shared<oneshot::Receiver<bool>> {
        if let Some(rx) = &self.closed_rx {
            return rx.clone();
        }
        let (tx, rx) = oneshot::channel();
        let rx = rx.shared();
        self.closed_tx = Some(tx);
        self.closed_rx = Some(rx.clone());
        rx
    }

    /// Detaches the sender of the current close signal; the next request starts a fresh one.
    fn take_close_resolver(&mut self) -> Option<oneshot::Sender<bool>> {
        self.closed_rx = None;
        self.closed_tx.take()
    }
}

struct PopoverInner<C> {
    id: PopoverId,
    owner: HostId,
    target: Cell<AnchorId>,
    anchor: RefCell<Option<Weak<dyn AnchorElement>>>,
    content: RefCell<Rc<C>>,
    desired_size: Cell<Size>,
    alignment: HorizontalAlignment,
    auto_close: bool,
    close_policy: Option<ClosePolicy<C>>,
    close_animation: Option<Rc<dyn CloseAnimation>>,
    lifecycle: RefCell<Lifecycle>,
    sink: RefCell<Option<LifecycleSink<C>>>,
    remount: RefCell<Option<MountHook<C>>>,
}

pub struct Popover<C> {
    inner: Rc<PopoverInner<C>>,
}

impl<C> Clone for Popover<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for Popover<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Popover")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("target", &self.inner.target.get())
            .field("state", &self.inner.lifecycle.borrow().state)
            .finish()
    }
}

async fn await_close(rx: Shared<oneshot::Receiver<bool>>) -> bool {
    match rx.await {
        Ok(closed) => closed,
        // The popover was dropped mid-close; nothing will ever resolve this wait.
        Err(oneshot::Canceled) => future::pending().await,
    }
}

async fn await_open(rx: Shared<oneshot::Receiver<()>>) {
    if rx.await.is_err() {
        future::pending::<()>().await;
    }
}

impl<C: 'static> Popover<C> {
    pub fn new(owner: HostId, target: AnchorId, content: C, options: PopoverOptions<C>) -> Self {
        let id = PopoverId(NEXT_POPOVER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Rc::new(PopoverInner {
                id,
                owner,
                target: Cell::new(target),
                anchor: RefCell::new(None),
                content: RefCell::new(Rc::new(content)),
                desired_size: Cell::new(options.desired_size),
                alignment: options.alignment,
                auto_close: options.auto_close,
                close_policy: options.close_policy,
                close_animation: options.close_animation,
                lifecycle: RefCell::new(Lifecycle::default()),
                sink: RefCell::new(None),
                remount: RefCell::new(None),
            }),
        }
    }

    pub fn id(&self) -> PopoverId {
        self.inner.id
    }

    pub fn owner(&self) -> HostId {
        self.inner.owner
    }

    pub fn target(&self) -> AnchorId {
        self.inner.target.get()
    }

    pub(crate) fn set_anchor(&self, anchor: &Rc<dyn AnchorElement>) {
        self.inner.target.set(anchor.id());
        *self.inner.anchor.borrow_mut() = Some(Rc::downgrade(anchor));
    }

    pub(crate) fn anchor_element(&self) -> Option<Rc<dyn AnchorElement>> {
        self.inner.anchor.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn state(&self) -> PopoverState {
        self.inner.lifecycle.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == PopoverState::Open
    }

    pub fn content(&self) -> Rc<C> {
        Rc::clone(&self.inner.content.borrow())
    }

    pub fn set_content(&self, content: C) {
        *self.inner.content.borrow_mut() = Rc::new(content);
    }

    pub fn desired_size(&self) -> Size {
        self.inner.desired_size.get()
    }

    pub(crate) fn set_desired_size(&self, size: Size) {
        self.inner.desired_size.set(size);
    }

    pub fn alignment(&self) -> HorizontalAlignment {
        self.inner.alignment
    }

    pub fn auto_close(&self) -> bool {
        self.inner.auto_close
    }

    pub(crate) fn set_lifecycle_sink(&self, sink: LifecycleSink<C>) {
        *self.inner.sink.borrow_mut() = Some(sink);
    }

    pub(crate) fn set_mount_hook(&self, hook: MountHook<C>) {
        *self.inner.remount.borrow_mut() = Some(hook);
    }

    /*
     * Hands out the mount-ready signal for a new mount. Any signal handed out
     * earlier becomes stale.
     */
    pub fn ready_signal(&self) -> ReadySignal {
        let generation = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            lifecycle.mount_generation += 1;
            lifecycle.mounted = true;
            lifecycle.mount_generation
        };
        let weak = Rc::downgrade(&self.inner);
        ReadySignal {
            fire: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Popover { inner }.on_mount_ready(generation);
                }
            })),
        }
    }

    /*
     * Closed -> Opening. A no-op in any other state. A popover whose slot was
     * detached when it last closed is mounted again first; if that fails it
     * stays Closed.
     */
    pub fn open(&self) {
        let needs_mount = {
            let lifecycle = self.inner.lifecycle.borrow();
            if lifecycle.state != PopoverState::Closed {
                log::debug!(
                    "Popover {:?}: open() ignored in state {:?}.",
                    self.inner.id,
                    lifecycle.state
                );
                return;
            }
            !lifecycle.mounted
        };
        // Mount while still Closed so a ready signal fired during the mount only latches.
        let hook = self.inner.remount.borrow().clone();
        if needs_mount
            && let Some(hook) = hook
            && !hook(self)
        {
            log::warn!(
                "Popover {:?}: could not be mounted again; staying Closed.",
                self.inner.id
            );
            return;
        }

        let ready = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            if lifecycle.state != PopoverState::Closed {
                return;
            }
            lifecycle.transition(self.inner.id, PopoverState::Opening);
            lifecycle.cycle += 1;
            let (tx, rx) = oneshot::channel();
            lifecycle.opened_tx = Some(tx);
            lifecycle.opened_rx = Some(rx.shared());
            lifecycle.mount_ready
        };
        if ready {
            self.enter_open();
        }
    }

    /*
     * Opens the popover if it is closed and resolves once it has reached Open.
     * Resolves immediately when this cycle has already opened. Never resolves
     * when the popover could not be mounted again.
     */
    pub fn open_async(&self) -> LocalBoxFuture<'static, ()> {
        self.open();
        let lifecycle = self.inner.lifecycle.borrow();
        match (lifecycle.state, &lifecycle.opened_rx) {
            (PopoverState::Opening, Some(rx)) => await_open(rx.clone()).boxed_local(),
            (PopoverState::Closed, _) => future::pending().boxed_local(),
            _ => future::ready(()).boxed_local(),
        }
    }

    /// Fire-and-forget form of `request_close_async`.
    pub fn request_close(&self) {
        drop(self.request_close_async());
    }

    /*
     * Asks the popover to close. Resolves `true` once Closed has been entered
     * and `false` when the close policy vetoed it. While Opening the request
     * is queued until Open is reached; while Closing it joins the close in
     * flight; while Closed it resolves `true` immediately.
     */
    pub fn request_close_async(&self) -> LocalBoxFuture<'static, bool> {
        let rx = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            match lifecycle.state {
                PopoverState::Closed => return future::ready(true).boxed_local(),
                PopoverState::Closing => {
                    return await_close(lifecycle.closed_signal()).boxed_local();
                }
                PopoverState::Opening => {
                    log::debug!(
                        "Popover {:?}: close requested while Opening; deferred until Open.",
                        self.inner.id
                    );
                    lifecycle.close_pending = true;
                    return await_close(lifecycle.closed_signal()).boxed_local();
                }
                PopoverState::Open if lifecycle.close_policy_running => {
                    return await_close(lifecycle.closed_signal()).boxed_local();
                }
                PopoverState::Open => lifecycle.closed_signal(),
            }
        };
        self.begin_close();
        await_close(rx).boxed_local()
    }

    fn on_mount_ready(&self, generation: u64) {
        let opening = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            if generation != lifecycle.mount_generation {
                log::warn!(
                    "Popover {:?}: ignoring stale mount-ready signal.",
                    self.inner.id
                );
                return;
            }
            lifecycle.mount_ready = true;
            lifecycle.state == PopoverState::Opening
        };
        if opening {
            self.enter_open();
        }
    }

    fn enter_open(&self) {
        let (opened_tx, close_pending) = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            lifecycle.transition(self.inner.id, PopoverState::Open);
            (
                lifecycle.opened_tx.take(),
                std::mem::take(&mut lifecycle.close_pending),
            )
        };
        if let Some(tx) = opened_tx {
            // Receiver may be gone.
            let _ = tx.send(());
        }
        self.emit(StateChangeKind::Opened);
        if close_pending && self.state() == PopoverState::Open {
            self.begin_close();
        }
    }

    fn consult_close_policy(&self) -> CloseDecision {
        match &self.inner.close_policy {
            Some(policy) => {
                let policy = Rc::clone(policy);
                let content = self.content();
                policy(&*content)
            }
            None => CloseDecision::Proceed,
        }
    }

    // Open -> Closing, unless vetoed.
    fn begin_close(&self) {
        self.inner.lifecycle.borrow_mut().close_policy_running = true;
        let decision = self.consult_close_policy();
        self.inner.lifecycle.borrow_mut().close_policy_running = false;

        if decision == CloseDecision::Veto {
            log::debug!("Popover {:?}: close vetoed; staying Open.", self.inner.id);
            let resolver = self.inner.lifecycle.borrow_mut().take_close_resolver();
            if let Some(tx) = resolver {
                // Receiver may be gone.
                let _ = tx.send(false);
            }
            return;
        }

        let cycle = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            if lifecycle.state != PopoverState::Open {
                return;
            }
            lifecycle.transition(self.inner.id, PopoverState::Closing);
            lifecycle.closed_signal();
            lifecycle.cycle
        };

        match self.inner.close_animation.clone() {
            Some(animation) => {
                let weak: Weak<PopoverInner<C>> = Rc::downgrade(&self.inner);
                let completion = CloseCompletion {
                    popover: self.inner.id,
                    complete: Some(Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            Popover { inner }.on_close_animation_completed(cycle);
                        }
                    })),
                };
                animation.begin_close(self.inner.id, completion);
            }
            None => self.finish_close(),
        }
    }

    fn on_close_animation_completed(&self, cycle: u64) {
        let current = {
            let lifecycle = self.inner.lifecycle.borrow();
            lifecycle.cycle == cycle && lifecycle.state == PopoverState::Closing
        };
        if current {
            self.finish_close();
        } else {
            log::warn!(
                "Popover {:?}: ignoring close completion from an earlier cycle.",
                self.inner.id
            );
        }
    }

    // Closing -> Closed.
    fn finish_close(&self) {
        let resolver = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            if lifecycle.state != PopoverState::Closing {
                return;
            }
            lifecycle.transition(self.inner.id, PopoverState::Closed);
            lifecycle.mount_ready = false;
            lifecycle.mounted = false;
            lifecycle.mount_generation += 1;
            lifecycle.opened_rx = None;
            lifecycle.take_close_resolver()
        };
        if let Some(tx) = resolver {
            // Receiver may be gone.
            let _ = tx.send(true);
        }
        self.emit(StateChangeKind::Closed);
    }

    /*
     * Closes without consulting the close policy or the animation. Used when
     * the host is torn down underneath an open popover. Opening popovers are
     * left alone since they cannot skip Open.
     */
    pub(crate) fn force_close(&self) {
        let state = self.state();
        if state == PopoverState::Open {
            self.inner
                .lifecycle
                .borrow_mut()
                .transition(self.inner.id, PopoverState::Closing);
        }
        if matches!(state, PopoverState::Open | PopoverState::Closing) {
            self.finish_close();
        }
    }

    /// Forgets the current mount; a ready signal handed out for it no longer opens the popover.
    pub(crate) fn invalidate_mount(&self) {
        let mut lifecycle = self.inner.lifecycle.borrow_mut();
        lifecycle.mount_generation += 1;
        lifecycle.mount_ready = false;
        lifecycle.mounted = false;
    }

    fn emit(&self, kind: StateChangeKind) {
        let sink = self.inner.sink.borrow().clone();
        if let Some(sink) = sink {
            sink(self, kind);
        }
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> Vec<PopoverState> {
        self.inner.lifecycle.borrow().history.clone()
    }
}
