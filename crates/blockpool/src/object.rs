//! Object lifecycle - typed construction and destruction inside pool blocks
//!
//! A block handed out by a typed allocator is a [`Slot`]: aligned, correctly
//! sized, uninitialized memory. [`ObjectTraits::construct`] turns it into a
//! [`Live`] holding a value, [`ObjectTraits::destroy`] turns it back. Neither
//! transition allocates or frees the block itself.
//!
//! Dropping a `Slot` or a `Live` does not release the block, and dropping a
//! `Live` does not run the value's destructor.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use blockpool_core::{BlockHandle, PoolError};

/// Uninitialized memory for one `T`, borrowed from a pool for `'pool`
#[must_use = "dropping a slot leaks its block until the pool is reset"]
pub struct Slot<'pool, T> {
    handle: BlockHandle,
    ptr: NonNull<T>,
    _marker: PhantomData<&'pool mut T>,
}

impl<'pool, T> Slot<'pool, T> {
    /// Wrap a block's memory
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `T`, aligned, not aliased by any other
    /// slot, and hold no live value for as long as `'pool`.
    pub(crate) unsafe fn from_raw(handle: BlockHandle, ptr: NonNull<T>) -> Self {
        Self {
            handle,
            ptr,
            _marker: PhantomData,
        }
    }

    /// Handle of the underlying block
    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    /// Address of the slot
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> fmt::Debug for Slot<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({:?} @ {:p})", self.handle, self.ptr)
    }
}

/// A release the allocator refused, carrying the slot back to the caller
///
/// The block is still allocated; retry with the right allocator and count,
/// or reuse the slot.
pub struct Rejected<'pool, T> {
    error: PoolError,
    slot: Slot<'pool, T>,
}

impl<'pool, T> Rejected<'pool, T> {
    pub(crate) fn new(error: PoolError, slot: Slot<'pool, T>) -> Self {
        Self { error, slot }
    }

    /// Why the release was refused
    pub fn error(&self) -> &PoolError {
        &self.error
    }

    /// Take the slot back
    pub fn into_slot(self) -> Slot<'pool, T> {
        self.slot
    }

    /// Split into the error and the slot
    pub fn into_parts(self) -> (PoolError, Slot<'pool, T>) {
        (self.error, self.slot)
    }
}

impl<T> fmt::Debug for Rejected<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("slot", &self.slot)
            .finish()
    }
}

impl<T> fmt::Display for Rejected<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?} kept)", self.error, self.slot.handle)
    }
}

impl<T> std::error::Error for Rejected<'_, T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<Rejected<'_, T>> for PoolError {
    fn from(rejected: Rejected<'_, T>) -> Self {
        rejected.error
    }
}

/// A live `T` constructed in a pool block
#[must_use = "dropping a live slot leaks both the value and its block"]
pub struct Live<'pool, T> {
    handle: BlockHandle,
    ptr: NonNull<T>,
    _marker: PhantomData<&'pool mut T>,
}

impl<'pool, T> Live<'pool, T> {
    /// Handle of the underlying block
    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    /// Address of the value
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    fn into_slot(self) -> Slot<'pool, T> {
        Slot {
            handle: self.handle,
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for Live<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for Live<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Live<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Live")
            .field("handle", &self.handle)
            .field("value", &**self)
            .finish()
    }
}

/// Stateless helper managing the typed lifetime of values in slots
pub struct ObjectTraits<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectTraits<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Location of a live object
    #[inline]
    pub fn address(&self, obj: &T) -> NonNull<T> {
        NonNull::from(obj)
    }

    /// Copy-construct `value` into `slot`
    ///
    /// A panic from `T::clone` propagates; nothing is written in that case.
    pub fn construct<'pool>(&self, slot: Slot<'pool, T>, value: &T) -> Live<'pool, T>
    where
        T: Clone,
    {
        self.construct_with(slot, value.clone())
    }

    /// Move `value` into `slot`
    pub fn construct_with<'pool>(&self, slot: Slot<'pool, T>, value: T) -> Live<'pool, T> {
        unsafe { slot.ptr.as_ptr().write(value) };
        Live {
            handle: slot.handle,
            ptr: slot.ptr,
            _marker: PhantomData,
        }
    }

    /// Run the value's destructor in place
    pub fn destroy<'pool>(&self, live: Live<'pool, T>) -> Slot<'pool, T> {
        let slot = live.into_slot();
        unsafe { ptr::drop_in_place(slot.ptr.as_ptr()) };
        slot
    }

    /// Move the value out, leaving the slot uninitialized
    pub fn take<'pool>(&self, live: Live<'pool, T>) -> (T, Slot<'pool, T>) {
        let slot = live.into_slot();
        let value = unsafe { slot.ptr.as_ptr().read() };
        (value, slot)
    }

    /// The same helper for another element type
    pub const fn rebind<U>(&self) -> ObjectTraits<U> {
        ObjectTraits::new()
    }
}

impl<T> Clone for ObjectTraits<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectTraits<T> {}

impl<T> Default for ObjectTraits<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ObjectTraits<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectTraits<{}>", core::any::type_name::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockpool_core::PoolId;
    use core::mem::MaybeUninit;
    use std::cell::Cell;

    struct Counted<'a> {
        live: &'a Cell<i32>,
    }

    impl<'a> Counted<'a> {
        fn new(live: &'a Cell<i32>) -> Self {
            live.set(live.get() + 1);
            Self { live }
        }
    }

    impl Clone for Counted<'_> {
        fn clone(&self) -> Self {
            Self::new(self.live)
        }
    }

    impl Drop for Counted<'_> {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    fn slot_in<T>(storage: &mut MaybeUninit<T>) -> Slot<'_, T> {
        let handle = BlockHandle::new(PoolId::next(), 0, 1);
        unsafe { Slot::from_raw(handle, NonNull::from(storage).cast()) }
    }

    #[test]
    fn test_construct_destroy_balance() {
        let live = Cell::new(0);
        let traits = ObjectTraits::<Counted>::new();
        let mut storage = MaybeUninit::uninit();

        let original = Counted::new(&live);
        assert_eq!(live.get(), 1);

        let slot = slot_in(&mut storage);
        let value = traits.construct(slot, &original);
        assert_eq!(live.get(), 2);

        let slot = traits.destroy(value);
        assert_eq!(live.get(), 1);

        // The slot can be reused once destroyed
        let value = traits.construct(slot, &original);
        let _slot = traits.destroy(value);
        assert_eq!(live.get(), 1);

        drop(original);
        assert_eq!(live.get(), 0);
    }

    struct Fragile<'a> {
        live: &'a Cell<i32>,
        tag: u64,
    }

    impl<'a> Fragile<'a> {
        fn new(live: &'a Cell<i32>, tag: u64) -> Self {
            live.set(live.get() + 1);
            Self { live, tag }
        }
    }

    impl Clone for Fragile<'_> {
        fn clone(&self) -> Self {
            panic!("clone of tag {} failed", self.tag);
        }
    }

    impl Drop for Fragile<'_> {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    #[test]
    fn test_construct_panic_leaves_slot_untouched() {
        let live = Cell::new(0);
        let traits = ObjectTraits::<Fragile>::new();
        let original = Fragile::new(&live, 0xABCD);
        let mut storage = MaybeUninit::<Fragile>::zeroed();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let slot = slot_in(&mut storage);
            let _value = traits.construct(slot, &original);
        }));

        let payload = result.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert_eq!(message, "clone of tag 43981 failed");
        assert_eq!(live.get(), 1);

        let bytes = unsafe {
            core::slice::from_raw_parts(
                storage.as_ptr().cast::<u8>(),
                core::mem::size_of::<Fragile>(),
            )
        };
        assert!(bytes.iter().all(|&b| b == 0));

        drop(original);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn test_address_is_identity() {
        let traits = ObjectTraits::<String>::new();
        let mut storage = MaybeUninit::uninit();
        let slot = slot_in(&mut storage);
        let slot_ptr = slot.as_ptr();

        let value = traits.construct_with(slot, "pooled".to_string());
        assert_eq!(traits.address(&value).as_ptr(), slot_ptr);
        assert_eq!(value.as_ptr(), slot_ptr);

        let (inner, _slot) = traits.take(value);
        assert_eq!(inner, "pooled");
    }

    #[test]
    fn test_live_deref_mut() {
        let traits = ObjectTraits::<Vec<u32>>::new();
        let mut storage = MaybeUninit::uninit();
        let mut value = traits.construct_with(slot_in(&mut storage), vec![1, 2]);

        value.push(3);
        assert_eq!(*value, [1, 2, 3]);
        let _slot = traits.destroy(value);
    }
}
