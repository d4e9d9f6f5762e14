//! Non-owning reference to the UI element currently in the foreground.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Tracks the current screen without extending its lifetime.
///
/// The platform's create/resume callback calls [`set`](Self::set); the
/// destroy callback calls [`clear_if`](Self::clear_if) so a late destroy of a
/// previous screen cannot clear its successor.
pub struct CurrentScreen<T> {
    current: Mutex<Weak<T>>,
}

impl<T> CurrentScreen<T> {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Weak::new()),
        }
    }

    pub fn set(&self, screen: &Arc<T>) {
        *self.current.lock() = Arc::downgrade(screen);
    }

    /// The current screen, if it is still alive.
    pub fn get(&self) -> Option<Arc<T>> {
        self.current.lock().upgrade()
    }

    /// Clear the reference if `screen` is the one currently held.
    pub fn clear_if(&self, screen: &Arc<T>) -> bool {
        let mut current = self.current.lock();
        if std::ptr::eq(current.as_ptr(), Arc::as_ptr(screen)) {
            *current = Weak::new();
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        *self.current.lock() = Weak::new();
    }
}

impl<T> Default for CurrentScreen<T> {
    fn default() -> Self {
        Self::new()
    }
}
