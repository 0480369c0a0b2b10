//! Single-slot observer registration.
//!
//! Every channel of the session holds at most one observer. Subscribing again
//! replaces the previous observer; the returned [`ObserverHandle`] removes the
//! observer again when disposed, unless it has been replaced in the meantime.

use std::sync::{Arc, Mutex, Weak};
use log::debug;

type Callback<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

struct Registered<T> {
    generation: u64,
    callback: Callback<T>,
}

struct SlotInner<T> {
    next_generation: u64,
    current: Option<Registered<T>>,
}

pub struct ObserverSlot<T> {
    channel: &'static str,
    inner: Mutex<SlotInner<T>>,
}

impl<T: 'static> ObserverSlot<T> {
    pub fn new(channel: &'static str) -> Arc<Self> {
        Arc::new(ObserverSlot {
            channel,
            inner: Mutex::new(SlotInner { next_generation: 1, current: None }),
        })
    }

    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> ObserverHandle<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("Failed to lock observer slot");
        let generation = inner.next_generation;
        inner.next_generation += 1;

        if inner.current.is_some() {
            debug!("Replacing {} observer", self.channel);
        }
        inner.current = Some(Registered { generation, callback: Arc::new(callback) });

        ObserverHandle { slot: Arc::downgrade(self), generation }
    }

    /// Invokes the current observer, if any. Returns whether an observer ran.
    pub fn notify(&self, value: T) -> bool {
        // the lock is not held while the callback runs, so callbacks may re-subscribe
        let callback = {
            let inner = self.inner.lock().expect("Failed to lock observer slot");
            inner.current.as_ref().map(|registered| registered.callback.clone())
        };

        match callback {
            Some(callback) => {
                callback(value);
                true
            },
            None => false,
        }
    }

    fn release(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock().expect("Failed to lock observer slot");

        match &inner.current {
            Some(registered) if registered.generation == generation => {
                inner.current = None;
                true
            },
            _ => false,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner.lock().expect("Failed to lock observer slot");
        matches!(&inner.current, Some(registered) if registered.generation == generation)
    }
}

/// Handle to one registration on an [`ObserverSlot`].
///
/// Dropping the handle leaves the observer registered; call [`ObserverHandle::dispose`].
#[must_use = "the observer stays registered until the handle is disposed"]
pub struct ObserverHandle<T> {
    slot: Weak<ObserverSlot<T>>,
    generation: u64,
}

impl<T: 'static> ObserverHandle<T> {
    /// Removes the observer. Returns false if it was already replaced or removed.
    pub fn dispose(self) -> bool {
        match self.slot.upgrade() {
            Some(slot) => slot.release(self.generation),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.upgrade().map_or(false, |slot| slot.is_current(self.generation))
    }
}

impl<T> std::fmt::Debug for ObserverHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle").field("generation", &self.generation).finish()
    }
}
