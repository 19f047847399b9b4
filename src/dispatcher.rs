/*
 * UI-thread affinity. The controller and everything it owns are `!Send`, so
 * other threads can only reach them through a `UiDispatcher`: they either ask
 * whether they are on the UI thread (failing fast with `WrongThread`) or post
 * a job that the UI loop runs later via `PopoverController::run_dispatched`.
 * Nothing here runs UI work off the owning thread.
 */
use crate::error::{PopoverError, Result as PopoverResult};
use crate::popover_controller::PopoverController;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use std::fmt;
use std::thread::{self, ThreadId};

pub type UiJob<C> = Box<dyn FnOnce(&PopoverController<C>) + Send>;

pub struct UiDispatcher<C> {
    owner: ThreadId,
    queue: UnboundedSender<UiJob<C>>,
}

impl<C> Clone for UiDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            queue: self.queue.clone(),
        }
    }
}

impl<C> fmt::Debug for UiDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiDispatcher")
            .field("owner", &self.owner)
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}

impl<C> UiDispatcher<C> {
    /// Binds a dispatcher to the calling thread.
    pub(crate) fn for_current_thread() -> (Self, UnboundedReceiver<UiJob<C>>) {
        let (queue, inbox) = mpsc::unbounded();
        (
            Self {
                owner: thread::current().id(),
                queue,
            },
            inbox,
        )
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn check_access(&self) -> PopoverResult<()> {
        let caller = thread::current().id();
        if caller == self.owner {
            Ok(())
        } else {
            Err(PopoverError::WrongThread {
                owner: self.owner,
                caller,
            })
        }
    }

    /// Queues `job` to run on the UI thread. Safe to call from any thread.
    pub fn post(
        &self,
        job: impl FnOnce(&PopoverController<C>) + Send + 'static,
    ) -> PopoverResult<()> {
        self.queue
            .unbounded_send(Box::new(job))
            .map_err(|_| PopoverError::DispatcherClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_thread_has_access() {
        let (dispatcher, _inbox) = UiDispatcher::<()>::for_current_thread();
        assert!(dispatcher.is_ui_thread());
        assert_eq!(dispatcher.check_access(), Ok(()));
    }

    #[test]
    fn other_threads_fail_fast() {
        let (dispatcher, _inbox) = UiDispatcher::<()>::for_current_thread();
        let owner = dispatcher.owner();
        let remote = dispatcher.clone();

        let result = thread::spawn(move || remote.check_access())
            .join()
            .expect("worker thread");

        match result {
            Err(PopoverError::WrongThread { owner: reported, caller }) => {
                assert_eq!(reported, owner);
                assert_ne!(caller, owner);
            }
            other => panic!("expected WrongThread, got {other:?}"),
        }
    }

    #[test]
    fn posting_after_owner_is_gone_fails() {
        let (dispatcher, inbox) = UiDispatcher::<()>::for_current_thread();
        drop(inbox);

        assert_eq!(dispatcher.post(|_| {}), Err(PopoverError::DispatcherClosed));
    }
}
