//! Process-wide cache of shared backend bindings.
//!
//! OpenH264, NETINT and VPE libraries are loaded at most once per registry
//! and shared by every session through an `Arc`. The registry is created by
//! the host, handed to the factory, and torn down with [`BindingRegistry::shutdown`].
//! A library stays mapped until the last session holding it is dropped.
//!
//! Quadra and Vastai bindings are not cached here; each of those sessions
//! owns its own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::binding::ApiLoader;
use crate::error::BindingError;
#[cfg(feature = "netint")]
use crate::netint::ffi::XcoderLibrary;
use crate::openh264::ffi::OpenH264Library;
use crate::vpe::ffi::VpeLibrary;

/// Which shared binding a query refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    OpenH264,
    Netint,
    Vpe,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenH264 => "openh264",
            Self::Netint => "netint",
            Self::Vpe => "vpe",
        })
    }
}

/// One lazily loaded handle.
struct SharedSlot<L> {
    handle: Mutex<Option<Arc<L>>>,
}

impl<L> SharedSlot<L> {
    fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Return the cached handle, loading it on first use.
    ///
    /// The lock is held across `load`, so concurrent first callers load once.
    fn get_or_load(&self, load: impl FnOnce() -> Result<L, BindingError>) -> Result<Arc<L>, BindingError> {
        let mut handle = self.handle.lock();
        if let Some(existing) = handle.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let loaded = Arc::new(load()?);
        *handle = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    fn is_loaded(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Drop the cached handle. Returns whether one was held.
    fn clear(&self) -> bool {
        self.handle.lock().take().is_some()
    }
}

/// Shared binding cache.
pub struct BindingRegistry {
    search_dir: Option<PathBuf>,
    openh264: SharedSlot<OpenH264Library>,
    #[cfg(feature = "netint")]
    netint: SharedSlot<XcoderLibrary>,
    vpe: SharedSlot<VpeLibrary>,
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("search_dir", &self.search_dir)
            .field("openh264", &self.is_loaded(BindingKind::OpenH264))
            .field("netint", &self.is_loaded(BindingKind::Netint))
            .field("vpe", &self.is_loaded(BindingKind::Vpe))
            .finish()
    }
}

impl BindingRegistry {
    /// Libraries are looked up in `search_dir` first when it is set.
    pub fn new(search_dir: Option<PathBuf>) -> Self {
        info!(search_dir = ?search_dir, "Binding registry created");
        Self {
            search_dir,
            openh264: SharedSlot::new(),
            #[cfg(feature = "netint")]
            netint: SharedSlot::new(),
            vpe: SharedSlot::new(),
        }
    }

    pub fn search_dir(&self) -> Option<&Path> {
        self.search_dir.as_deref()
    }

    pub fn openh264(&self) -> Result<Arc<OpenH264Library>, BindingError> {
        self.openh264.get_or_load(|| OpenH264Library::load(self.search_dir()))
    }

    #[cfg(feature = "netint")]
    pub fn netint(&self) -> Result<Arc<XcoderLibrary>, BindingError> {
        self.netint.get_or_load(|| XcoderLibrary::load(self.search_dir()))
    }

    pub fn vpe(&self) -> Result<Arc<VpeLibrary>, BindingError> {
        self.vpe.get_or_load(|| VpeLibrary::load(self.search_dir()))
    }

    pub fn is_loaded(&self, kind: BindingKind) -> bool {
        match kind {
            BindingKind::OpenH264 => self.openh264.is_loaded(),
            #[cfg(feature = "netint")]
            BindingKind::Netint => self.netint.is_loaded(),
            #[cfg(not(feature = "netint"))]
            BindingKind::Netint => false,
            BindingKind::Vpe => self.vpe.is_loaded(),
        }
    }

    /// Release every cached handle. Sessions that still hold one keep their
    /// library mapped until they drop it; the next lookup loads afresh.
    pub fn shutdown(&self) {
        let mut released = Vec::new();
        if self.openh264.clear() {
            released.push(BindingKind::OpenH264);
        }
        #[cfg(feature = "netint")]
        if self.netint.clear() {
            released.push(BindingKind::Netint);
        }
        if self.vpe.clear() {
            released.push(BindingKind::Vpe);
        }
        info!(released = ?released, "Binding registry shut down");
    }

    /// Loader that resolves through this registry.
    pub fn openh264_loader(self: &Arc<Self>) -> ApiLoader<OpenH264Library> {
        let registry = Arc::clone(self);
        Box::new(move || registry.openh264())
    }

    #[cfg(feature = "netint")]
    pub fn netint_loader(self: &Arc<Self>) -> ApiLoader<XcoderLibrary> {
        let registry = Arc::clone(self);
        Box::new(move || registry.netint())
    }

    pub fn vpe_loader(self: &Arc<Self>) -> ApiLoader<VpeLibrary> {
        let registry = Arc::clone(self);
        Box::new(move || registry.vpe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn slot_loads_once_and_shares() {
        let slot = SharedSlot::<u32>::new();
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        };

        let a = slot.get_or_load(load).unwrap();
        let b = slot.get_or_load(|| panic!("already loaded")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(slot.is_loaded());
    }

    #[test]
    fn slot_failure_leaves_slot_empty() {
        let slot = SharedSlot::<u32>::new();
        let err = slot
            .get_or_load(|| {
                Err(BindingError::LibraryNotFound {
                    library: "libvpi.so".to_string(),
                    reason: "missing".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, BindingError::LibraryNotFound { .. }));
        assert!(!slot.is_loaded());
        assert_eq!(*slot.get_or_load(|| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn concurrent_first_use_loads_once() {
        let slot = Arc::new(SharedSlot::<usize>::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let loads = Arc::clone(&loads);
                thread::spawn(move || {
                    *slot
                        .get_or_load(|| Ok(loads.fetch_add(1, Ordering::SeqCst)))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_keeps_outstanding_handles_alive() {
        let slot = SharedSlot::<String>::new();
        let held = slot.get_or_load(|| Ok("lib".to_string())).unwrap();
        assert!(slot.clear());
        assert!(!slot.clear());
        assert!(!slot.is_loaded());
        assert_eq!(held.as_str(), "lib");
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn missing_library_is_reported_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(BindingRegistry::new(Some(dir.path().to_path_buf())));

        let err = registry.openh264().unwrap_err();
        assert!(err.to_string().contains("libopenh264.so"));
        assert!(registry.vpe().is_err());
        assert!(!registry.is_loaded(BindingKind::OpenH264));
        assert!(!registry.is_loaded(BindingKind::Vpe));
        assert!(!registry.is_loaded(BindingKind::Netint));

        let loader = registry.vpe_loader();
        assert!(loader().is_err());
        registry.shutdown();
    }
}
