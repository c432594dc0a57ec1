//! Reference-counted handles over objects owned by a pool or a factory.
//!
//! A [`Handle`] shares a boxed object between clones, and hands it back to
//! its [`Deleter`] once the last clone is dropped. The handle borrows the
//! deleter, so it cannot outlive the factory the object came from.

use core::{fmt, ops};
use std::sync::Arc;

/// An owner objects of type `T` are returned to when no longer used.
pub trait Deleter<T: ?Sized> {
    /// Destroys `object` and reclaims the resources it holds.
    fn delete_object(&self, object: Box<T>);
}

/// A shared handle to an object, returned to its [`Deleter`] exactly once,
/// when the last clone of the handle is dropped.
///
/// The object is immutable while shared, see [`Handle::get_mut`].
pub struct Handle<'d, T, D: Deleter<T> + ?Sized> {
    inner: Arc<Managed<'d, T, D>>,
}

struct Managed<'d, T, D: Deleter<T> + ?Sized> {
    /// Taken only on drop.
    object: Option<Box<T>>,
    deleter: &'d D,
}

impl<'d, T, D: Deleter<T> + ?Sized> Handle<'d, T, D> {
    /// Creates a handle which returns `object` to `deleter` on last drop.
    #[must_use]
    pub fn new(object: Box<T>, deleter: &'d D) -> Self {
        Self {
            inner: Arc::new(Managed {
                object: Some(object),
                deleter,
            }),
        }
    }

    /// Returns a mutable reference to the object if there are no other
    /// clones of this handle.
    #[must_use]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        Arc::get_mut(&mut this.inner).and_then(|managed| managed.object.as_deref_mut())
    }

    /// Returns the number of clones of this handle, itself included.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }
}

impl<T, D: Deleter<T> + ?Sized> Clone for Handle<'_, T, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, D: Deleter<T> + ?Sized> ops::Deref for Handle<'_, T, D> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        self.inner
            .object
            .as_deref()
            .expect("object is present until the last handle is dropped")
    }
}

impl<T, D: Deleter<T> + ?Sized> Drop for Managed<'_, T, D> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.deleter.delete_object(object);
        }
    }
}

impl<T: fmt::Debug, D: Deleter<T> + ?Sized> fmt::Debug for Handle<'_, T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&**self).finish()
    }
}
