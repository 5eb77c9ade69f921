//! Scoped ownership of native handles and buffers.
//!
//! Every SDK object a session acquires is wrapped in an [`Owned`] right after
//! the acquiring call succeeds. The guard runs its release exactly once,
//! either explicitly through [`Owned::release`] (when teardown order matters)
//! or on drop (early error returns during init).

use std::fmt;

use tracing::debug;

type Release<T> = Box<dyn FnOnce(&mut T) + Send>;

/// A native value paired with the call that frees it.
pub struct Owned<T> {
    value: T,
    release: Option<Release<T>>,
    what: &'static str,
}

impl<T> Owned<T> {
    /// Take ownership of `value`; `release` runs once when the guard ends.
    pub fn new(what: &'static str, value: T, release: impl FnOnce(&mut T) + Send + 'static) -> Self {
        debug!(resource = what, "Native resource acquired");
        Self {
            value,
            release: Some(Box::new(release)),
            what,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Run the release now.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release(&mut self.value);
            debug!(resource = self.what, "Native resource released");
        }
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl<T: fmt::Debug> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("what", &self.what)
            .field("value", &self.value)
            .finish()
    }
}

/// Raw SDK pointer that may cross threads with its session.
#[derive(Debug)]
pub struct NativePtr<T>(pub *mut T);

impl<T> Clone for NativePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NativePtr<T> {}

// SAFETY: sessions are used from one thread at a time; the pointer only moves
// along with the session that owns the pointee.
unsafe impl<T> Send for NativePtr<T> {}

impl<T> NativePtr<T> {
    pub fn as_ptr(self) -> *mut T {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(counter: &Arc<AtomicUsize>) -> Owned<u32> {
        let counter = Arc::clone(counter);
        Owned::new("test", 7, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn drop_releases_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let guard = counted(&counter);
            assert_eq!(*guard.get(), 7);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_release_does_not_double_free() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = counted(&counter);
        guard.release();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_sees_mutated_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let mut guard = Owned::new("value", 1usize, move |v| {
            seen2.store(*v, Ordering::SeqCst);
        });
        *guard.get_mut() = 42;
        drop(guard);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }
}
