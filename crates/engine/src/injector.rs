//! Hands finished artifacts to the host's [`CodeLoader`].
//!
//! Calls into the host are serialised, and each coordinate is offered at most
//! once per injector. A repeat is answered with
//! [`InjectionError::AlreadyLoaded`] carrying the first handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use artifacts::{CodeLoader, CodeSource, CodeUnitHandle, Coordinate, InjectionError};
use tracing::{debug, warn};

/// Serialised, duplicate-aware access to the host loader.
pub struct Injector {
    loader: Arc<dyn CodeLoader>,
    injected: Mutex<HashMap<Coordinate, CodeUnitHandle>>,
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("injected", &self.len())
            .finish_non_exhaustive()
    }
}

impl Injector {
    /// Wraps the host's loader.
    pub fn new(loader: Arc<dyn CodeLoader>) -> Self {
        Self {
            loader,
            injected: Mutex::new(HashMap::new()),
        }
    }

    /// Offers one artifact to the host.
    ///
    /// # Errors
    ///
    /// - [`InjectionError::AlreadyLoaded`] if the coordinate was injected
    ///   before; the host is not called again.
    /// - [`InjectionError::IncompatibleHost`] if the host rejects it. A
    ///   rejected coordinate may be offered again.
    pub fn inject(&self, source: CodeSource<'_>) -> Result<CodeUnitHandle, InjectionError> {
        let coordinate = source.coordinate;
        // Held across the host call so calls never overlap.
        let mut injected = self
            .injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = injected.get(coordinate) {
            debug!(%coordinate, %handle, "Already injected");
            return Err(InjectionError::AlreadyLoaded {
                coordinate: coordinate.clone(),
                handle: *handle,
            });
        }

        match self.loader.add_code_source(source) {
            Ok(handle) => {
                injected.insert(coordinate.clone(), handle);
                debug!(%coordinate, %handle, "Injected");
                Ok(handle)
            }
            Err(rejection) => {
                warn!(%coordinate, reason = %rejection, "Host rejected code source");
                Err(InjectionError::IncompatibleHost {
                    coordinate: coordinate.clone(),
                    reason: rejection.reason,
                })
            }
        }
    }

    /// Handle of a previously injected coordinate.
    pub fn handle_of(&self, coordinate: &Coordinate) -> Option<CodeUnitHandle> {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(coordinate)
            .copied()
    }

    /// Number of coordinates injected so far.
    pub fn len(&self) -> usize {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been injected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
