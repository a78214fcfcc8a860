use parking_lot::Mutex;
use std::sync::Arc;

type Callback<T> = Box<dyn FnMut(&T)>;

/// Ordered list of subscriber callbacks for one notification kind.
///
/// Dispatch swaps the list out of the lock, so a callback may re-enter the
/// owning engine or register further subscribers without deadlocking.
/// Subscribers added during a dispatch keep registration order and take
/// effect from the next notification.
pub struct Listeners<T> {
    callbacks: Arc<Mutex<Vec<Callback<T>>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

impl<T> Listeners<T> {
    /// Create an empty subscriber list
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a subscriber; subscribers are invoked in registration order
    pub fn subscribe(&self, callback: impl FnMut(&T) + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Invoke every subscriber with `value`, in order
    pub fn notify(&self, value: &T) {
        let mut active = std::mem::take(&mut *self.callbacks.lock());
        for callback in active.iter_mut() {
            callback(value);
        }
        let mut slot = self.callbacks.lock();
        let added = std::mem::take(&mut *slot);
        *slot = active;
        slot.extend(added);
    }

    /// Number of registered subscribers
    pub fn count(&self) -> usize {
        self.callbacks.lock().len()
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribers_run_in_order() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            listeners.subscribe(move |value: &u32| seen.lock().push((tag, *value)));
        }
        listeners.notify(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_subscribe_during_dispatch_takes_effect_next_time() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let registry = listeners.clone();
        let late_count = Arc::clone(&count);
        listeners.subscribe(move |_| {
            let count = Arc::clone(&late_count);
            registry.subscribe(move |_| {
                count.fetch_add(1, Ordering::Relaxed);
            });
        });
        listeners.notify(&());
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert_eq!(listeners.count(), 2);
        listeners.notify(&());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_notify_without_subscribers_is_noop() {
        let listeners: Listeners<u8> = Listeners::new();
        listeners.notify(&0);
        assert_eq!(listeners.count(), 0);
    }
}
