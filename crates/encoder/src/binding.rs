//! Runtime symbol resolution for backend libraries.
//!
//! A [`RawBinding`] is the only place where symbols are looked up by name.
//! Each backend converts it into a typed function table right after load and
//! never touches strings again.
//!
//! Load protocol:
//!
//! 1. Open the shared library (optionally from a configured directory).
//! 2. Resolve every required symbol into the slot table.
//! 3. Re-scan the table and reject any null slot.
//!
//! Any failure drops the half-built binding, which unloads the library, so a
//! partially populated table is never observable.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, info, warn};

use crate::error::BindingError;

/// Produces a backend API handle on demand.
///
/// Shared backends hand out clones of one registry-owned `Arc`; per-instance
/// backends load a fresh library on every call.
pub type ApiLoader<A> = Box<dyn Fn() -> Result<Arc<A>, BindingError> + Send + Sync>;

/// Name -> address table over an open library.
pub struct RawBinding {
    library_name: String,
    library: Option<Library>,
    slots: Vec<(&'static str, *mut c_void)>,
}

// SAFETY: the slot table holds plain addresses into a library that stays
// mapped while `library` is `Some`; nothing here is thread-affine.
unsafe impl Send for RawBinding {}
unsafe impl Sync for RawBinding {}

impl std::fmt::Debug for RawBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBinding")
            .field("library", &self.library_name)
            .field("loaded", &self.is_loaded())
            .field("symbols", &self.slots.len())
            .finish()
    }
}

impl RawBinding {
    /// Open `library_name` and resolve every symbol in `required`.
    ///
    /// With `search_dir` set the library is loaded from that directory,
    /// otherwise the platform search rules apply.
    pub fn open(
        library_name: &str,
        search_dir: Option<&Path>,
        required: &[&'static str],
    ) -> Result<Self, BindingError> {
        let path = match search_dir {
            Some(dir) => dir.join(library_name),
            None => PathBuf::from(library_name),
        };
        info!(library = %path.display(), symbols = required.len(), "Loading backend library");

        // SAFETY: loading a vendor SDK runs its initializers; the libraries we
        // load are the documented entry points of each SDK.
        let library = unsafe { Library::new(&path) }.map_err(|e| BindingError::LibraryNotFound {
            library: library_name.to_string(),
            reason: e.to_string(),
        })?;

        Self::resolve(library_name.to_string(), library, required)
    }

    fn resolve(
        library_name: String,
        library: Library,
        required: &[&'static str],
    ) -> Result<Self, BindingError> {
        let mut slots = Vec::with_capacity(required.len());
        for &symbol in required {
            // SAFETY: the symbol is only read as an address here; it is called
            // later through a typed pointer whose signature matches the SDK.
            let address = unsafe { library.get::<*mut c_void>(symbol.as_bytes()) }
                .map(|sym| *sym)
                .map_err(|e| BindingError::SymbolNotFound {
                    library: library_name.clone(),
                    symbol: symbol.to_string(),
                    reason: e.to_string(),
                })?;
            slots.push((symbol, address));
        }

        let binding = Self {
            library_name,
            library: Some(library),
            slots,
        };
        binding.verify()?;
        debug!(library = %binding.library_name, "All backend symbols resolved");
        Ok(binding)
    }

    /// Reject the table if any slot is null or the library is gone.
    pub fn verify(&self) -> Result<(), BindingError> {
        if self.library.is_none() {
            return Err(BindingError::LibraryNotFound {
                library: self.library_name.clone(),
                reason: "binding was unloaded".to_string(),
            });
        }
        match self.slots.iter().find(|(_, address)| address.is_null()) {
            Some((symbol, _)) => Err(BindingError::NullSymbol {
                library: self.library_name.clone(),
                symbol: symbol.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }

    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    /// Reinterpret a resolved slot as a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be an `unsafe extern "C" fn` type whose signature matches the
    /// C declaration of `symbol`.
    pub unsafe fn typed<F: Copy>(&self, symbol: &str) -> Result<F, BindingError> {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*mut c_void>());
        let address = self
            .slots
            .iter()
            .find(|(name, _)| *name == symbol)
            .map(|(_, address)| *address)
            .ok_or_else(|| BindingError::NotRequested(symbol.to_string()))?;
        if address.is_null() {
            return Err(BindingError::NullSymbol {
                library: self.library_name.clone(),
                symbol: symbol.to_string(),
            });
        }
        Ok(std::mem::transmute_copy::<*mut c_void, F>(&address))
    }

    /// Null every slot, then close the library. Safe to call repeatedly.
    pub fn unload(&mut self) {
        for slot in &mut self.slots {
            slot.1 = std::ptr::null_mut();
        }
        if let Some(library) = self.library.take() {
            match library.close() {
                Ok(()) => info!(library = %self.library_name, "Backend library unloaded"),
                Err(e) => warn!(library = %self.library_name, error = %e, "Backend library close failed"),
            }
        }
    }
}

impl Drop for RawBinding {
    fn drop(&mut self) {
        self.unload();
    }
}
