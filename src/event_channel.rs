/*
 * Application-owned channel carrying `PopoverStateChangedEvent`s to passive
 * subscribers. Each controller publishes into the channel it was built with,
 * so windows wired to separate channels never see each other's popovers.
 * Subscribers whose receiver has been dropped are pruned on the next publish.
 */
use crate::types::PopoverStateChangedEvent;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use std::cell::RefCell;

#[derive(Debug, Default)]
pub struct PopoverEventChannel {
    subscribers: RefCell<Vec<UnboundedSender<PopoverStateChangedEvent>>>,
}

impl PopoverEventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<PopoverStateChangedEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn publish(&self, event: PopoverStateChangedEvent) {
        log::trace!("PopoverEventChannel: publishing {event:?}");
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}
