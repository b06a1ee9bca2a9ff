//! Shared ownership of objects owned jointly with the external engine.
//!
//! Engine objects (textures, semaphores, tables, link infos) carry their own
//! foreign reference count. A [`ForeignRef`] holds one such reference: it
//! retains on creation and on clone and releases on drop, so a raw object is
//! never duplicated without the count going up.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// An object with a foreign retain/release pair.
pub trait ForeignObject: Send + Sync {
    fn retain(&self);
    fn release(&self);
}

/// One counted reference to a foreign object.
pub struct ForeignRef<T: ?Sized + ForeignObject> {
    obj: Arc<T>,
}

impl<T: ?Sized + ForeignObject> ForeignRef<T> {
    /// Takes a new reference to `obj`.
    pub fn new(obj: Arc<T>) -> Self {
        obj.retain();
        Self { obj }
    }

    /// Identity comparison, two refs to the same foreign object are equal.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.obj, &b.obj)
    }

    /// Address of the underlying object, stable for its lifetime.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.obj) as *const () as usize
    }

    pub fn object(&self) -> &Arc<T> {
        &self.obj
    }
}

impl<T: ?Sized + ForeignObject> Clone for ForeignRef<T> {
    fn clone(&self) -> Self {
        Self::new(self.obj.clone())
    }
}

impl<T: ?Sized + ForeignObject> Drop for ForeignRef<T> {
    fn drop(&mut self) {
        self.obj.release();
    }
}

impl<T: ?Sized + ForeignObject> Deref for ForeignRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.obj
    }
}

impl<T: ?Sized + ForeignObject> fmt::Debug for ForeignRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ForeignRef").field(&format_args!("{:#x}", self.addr())).finish()
    }
}
