//! Objects protected by a [`Lifecycle`] and the scoped accessor for them.
//!
//! ```
//! use lifecycle_sync::{make_lifecycle, use_object};
//!
//! let device = make_lifecycle(String::from("device"));
//!
//! if let Some(name) = use_object(&device).get() {
//!     assert_eq!(name, "device");
//! }
//!
//! device.release();
//! assert!(!use_object(&device).valid());
//! ```

use crate::error::LifecycleResult;
use crate::lifecycle::{Claim, Lifecycle};
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// An object paired with the guard that controls access to it.
pub struct ObjectLifecycle<T> {
    lifecycle: Lifecycle,
    object: T,
}

pub type ObjectLifecyclePtr<T> = Arc<ObjectLifecycle<T>>;

impl<T> ObjectLifecycle<T> {
    pub fn new(object: T) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            object,
        }
    }

    pub fn with_holder_limit(object: T, limit: usize) -> Self {
        Self {
            lifecycle: Lifecycle::with_holder_limit(limit),
            object,
        }
    }

    /// Claim the object for the calling thread.
    ///
    /// Prefer [`use_object`], which pairs the unlock automatically.
    pub fn lock(&self) -> LifecycleResult<(&T, Claim)> {
        self.lifecycle.lock().map(|claim| (&self.object, claim))
    }

    pub fn unlock(&self, claim: Claim) {
        self.lifecycle.unlock(claim);
    }

    /// See [`Lifecycle::release`].
    pub fn release(&self) {
        self.lifecycle.release();
    }

    /// See [`Lifecycle::try_release_for`].
    pub fn try_release_for(&self, timeout: Duration) -> bool {
        self.lifecycle.try_release_for(timeout)
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn is_released(&self) -> bool {
        self.lifecycle.is_released()
    }

    /// Take the object back out. Only possible with exclusive ownership,
    /// which rules out live wrappers.
    pub fn into_inner(self) -> T {
        self.object
    }
}

impl<T: fmt::Debug> fmt::Debug for ObjectLifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLifecycle")
            .field("lifecycle", &self.lifecycle)
            .field("object", &self.object)
            .finish()
    }
}

pub fn make_lifecycle<T>(object: T) -> ObjectLifecyclePtr<T> {
    Arc::new(ObjectLifecycle::new(object))
}

/// Claim `owner` for the current scope.
pub fn use_object<T>(owner: &ObjectLifecycle<T>) -> ObjectWrapper<'_, T> {
    ObjectWrapper::new(owner)
}

/// Scoped claim on an [`ObjectLifecycle`].
///
/// The claim is taken on construction and returned on drop. A wrapper
/// whose claim was refused (object released, holder limit hit) is empty:
/// [`valid`](Self::valid) is false and [`get`](Self::get) returns `None`.
///
/// Claims are per thread, so the wrapper is neither `Send` nor `Sync`.
pub struct ObjectWrapper<'a, T> {
    owner: &'a ObjectLifecycle<T>,
    claim: Option<Claim>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> ObjectWrapper<'a, T> {
    pub fn new(owner: &'a ObjectLifecycle<T>) -> Self {
        let claim = match owner.lifecycle.lock() {
            Ok(claim) => Some(claim),
            Err(err) => {
                tracing::debug!(error = %err, "object claim refused");
                None
            }
        };

        Self {
            owner,
            claim,
            _not_send: PhantomData,
        }
    }

    pub fn valid(&self) -> bool {
        self.claim.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.claim.map(|_| &self.owner.object)
    }

    pub fn claim(&self) -> Option<Claim> {
        self.claim
    }
}

impl<T> Deref for ObjectWrapper<'_, T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics on an empty wrapper; test [`valid`](Self::valid) first.
    fn deref(&self) -> &T {
        match self.get() {
            Some(object) => object,
            None => panic!("dereferenced an empty object wrapper"),
        }
    }
}

impl<T> Drop for ObjectWrapper<'_, T> {
    fn drop(&mut self) {
        if let Some(claim) = self.claim.take() {
            self.owner.lifecycle.unlock(claim);
        }
    }
}

impl<T> fmt::Debug for ObjectWrapper<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWrapper")
            .field("claim", &self.claim)
            .finish()
    }
}
