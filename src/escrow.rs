use std::{
    cmp::Ordering, fmt, hash::Hash, hash::Hasher, marker::PhantomData, ptr,
    sync::atomic::AtomicBool, sync::atomic::Ordering::Relaxed, sync::Arc, sync::Mutex,
    sync::PoisonError, sync::Weak,
};

use thiserror::Error;

/// The error type for the fallible operations on [`Escrow`].
///
/// Every error is reported synchronously at the offending call and leaves the
/// handle untouched, so callers can always recover by not repeating the
/// operation. The read-only queries ([`Escrow::is_claimed`],
/// [`Escrow::is_expired`] and friends) never fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EscrowError {
    /// The resource was already claimed for exclusive ownership, through this
    /// handle or any other handle sharing the same control block.
    #[error("resource is already claimed for exclusive ownership")]
    AlreadyClaimed,

    /// The resource has already been destroyed. Only resources that carry a
    /// [`Beacon`] can report this after an external owner destroyed them.
    #[error("resource has already been destroyed")]
    Expired,
}

/// The shared record behind every handle to one resource: the raw resource
/// address, a destructor thunk for it, and the two tracked flags.
///
/// Held in an [`Arc`]; the last handle to drop its `Arc` runs the cleanup
/// below. The flags are atomics so that a racing claim resolves to exactly
/// one winner, but they are not a synchronization protocol.
struct ControlBlock {
    ptr: *mut (),
    drop_fn: unsafe fn(*mut ()),
    claimed: AtomicBool,
    expired: AtomicBool,
}

// A block only ever crosses threads inside an `Escrow`, whose `Send` and
// `Sync` impls require `T: Send + Sync`, or inside a `Beacon`, which touches
// nothing but the atomic flags.
unsafe impl Send for ControlBlock {}

unsafe impl Sync for ControlBlock {}

impl ControlBlock {
    fn new<T>(ptr: *mut T, claimed: bool) -> Arc<Self> {
        Arc::new(ControlBlock {
            ptr: ptr.cast(),
            drop_fn: drop_erased::<T>,
            claimed: AtomicBool::new(claimed),
            expired: AtomicBool::new(false),
        })
    }

    fn is_claimed(&self) -> bool {
        self.claimed.load(Relaxed)
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Relaxed)
    }
}

impl Drop for ControlBlock {
    fn drop(&mut self) {
        // an unclaimed resource is still owned by the handle group. a claimed
        // one is destroyed by whoever holds the `Box` returned from `claim`,
        // and only the block storage goes away here.
        if !self.claimed.load(Relaxed) {
            unsafe { (self.drop_fn)(self.ptr) };
        }
    }
}

unsafe fn drop_erased<T>(ptr: *mut ()) {
    drop(Box::from_raw(ptr.cast::<T>()));
}

/// A destruction notifier a resource type can carry by embedding it as a
/// field and exposing it through [`Tracked`].
///
/// The beacon holds a weak link back to the control block of the handle group
/// observing the resource. Its `Drop` runs as part of the resource's own drop
/// glue, no matter which path destroys the resource, and marks the block
/// expired if any handle is still alive to observe it. Firing against an
/// already dead block is a no-op.
///
/// ```
/// # use escrow::{Beacon, Escrow, Tracked};
/// struct Sensor {
///     beacon: Beacon,
///     reading: f64,
/// }
///
/// impl Tracked for Sensor {
///     fn beacon(&self) -> &Beacon {
///         &self.beacon
///     }
/// }
///
/// let handle = Escrow::new_tracked(Sensor {
///     beacon: Beacon::new(),
///     reading: 0.5,
/// });
/// let observer = handle.clone();
///
/// let owner = handle.claim().unwrap().unwrap();
/// assert!(!observer.is_expired());
///
/// drop(owner);
/// assert!(observer.is_expired());
/// ```
pub struct Beacon {
    block: Mutex<Weak<ControlBlock>>,
}

impl Beacon {
    /// Creates a beacon linked to nothing. The link is installed by the
    /// `*_tracked` constructors of [`Escrow`].
    pub fn new() -> Self {
        Beacon {
            block: Mutex::new(Weak::new()),
        }
    }

    fn install(&self, block: &Arc<ControlBlock>) {
        *self.block.lock().unwrap() = Arc::downgrade(block);
    }

    fn live_block(&self) -> Option<Arc<ControlBlock>> {
        self.block.lock().unwrap().upgrade()
    }
}

impl Default for Beacon {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Beacon")
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        let weak = self.block.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(block) = weak.upgrade() {
            block.expired.store(true, Relaxed);
        }
    }
}

/// The capability of carrying a [`Beacon`].
///
/// Implementing this trait is how a resource type opts into destruction
/// detection: embed a `Beacon` field and return it here. Types without the
/// capability can still be placed in escrow through the plain constructors,
/// but once claimed their destruction by the external owner goes unnoticed
/// and the remaining handles keep reporting the stale address.
pub trait Tracked {
    fn beacon(&self) -> &Beacon;
}

/// A one-shot token capturing the address inside an existing [`Box`] without
/// disturbing the box.
///
/// Created by [`lien`] and consumed by [`Escrow::observe`] or
/// [`Escrow::observe_tracked`] to build a handle that is observation-only
/// from birth. The token cannot be copied, and it borrows the box it was
/// taken from, so it can neither outlive the box nor be used across a
/// consuming move of it.
#[derive()]
pub struct Lien<'a, T> {
    ptr: *mut T,
    marker: PhantomData<&'a T>,
}

impl<T> fmt::Debug for Lien<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lien").field(&self.ptr).finish()
    }
}

/// Captures a [`Lien`] on the resource owned by `exclusive`.
///
/// The box is borrowed, not consumed: it keeps sole responsibility for
/// destroying the resource. The usual reason to take a lien is to compare a
/// box received as a parameter against escrow handles without taking the box
/// over.
///
/// ```
/// # use escrow::{lien, Escrow};
/// let owner = Box::new(7);
/// let handle = Escrow::observe(lien(&owner));
///
/// assert!(handle.is_claimed());
/// assert!(handle == owner);
/// ```
#[allow(clippy::borrowed_box)]
pub fn lien<T>(exclusive: &Box<T>) -> Lien<'_, T> {
    Lien {
        ptr: (&**exclusive as *const T).cast_mut(),
        marker: PhantomData,
    }
}

/// A reference counted handle through which many owners share one resource,
/// until at most one of them claims it for exclusive ownership.
///
/// All handles created by cloning share one control block. The block owns
/// the resource as long as nobody has claimed it; [`claim`][Escrow::claim]
/// hands the resource over to a returned [`Box`] exactly once, after which
/// every handle of the group is observation-only. Identity is the raw
/// resource address, which also drives the [`Eq`], [`Ord`] and [`Hash`]
/// impls.
#[derive()]
pub struct Escrow<T> {
    block: Option<Arc<ControlBlock>>,
    marker: PhantomData<*mut T>,
}

// The last handle may destroy the resource on its own thread, and any handle
// hands out the resource address, so both auto traits need the full bound.
unsafe impl<T> Send for Escrow<T> where T: Send + Sync {}

unsafe impl<T> Sync for Escrow<T> where T: Send + Sync {}

impl<T> fmt::Debug for Escrow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Escrow")
            .field("ptr", &self.raw())
            .field("claimed", &self.is_claimed())
            .field("expired", &self.is_expired())
            .finish()
    }
}

impl<T> Escrow<T> {
    /// Places a freshly constructed resource in escrow.
    ///
    /// The resource is moved to the heap and owned by the handle group until
    /// somebody claims it. No destruction detection is installed; use
    /// [`Escrow::new_tracked`] for that.
    ///
    /// # Examples
    ///
    /// ```
    /// # use escrow::Escrow;
    /// let handle = Escrow::new(5);
    ///
    /// assert!(!handle.is_claimed());
    /// assert!(!handle.is_null());
    /// ```
    pub fn new(value: T) -> Self {
        Self::from_block(ControlBlock::new(Box::into_raw(Box::new(value)), false))
    }

    /// Creates the null handle. Equivalent to `Escrow::default()`.
    ///
    /// Null handles never fail: claiming yields `Ok(None)` any number of
    /// times, the queries report `false`, and two null handles compare equal.
    pub fn null() -> Self {
        Escrow {
            block: None,
            marker: PhantomData,
        }
    }

    /// Takes ownership of the resource away from an exclusive owner,
    /// consuming the box, and starts a fresh unclaimed handle group for it.
    ///
    /// Also available as `Escrow::from(exclusive)`.
    pub fn adopt(exclusive: Box<T>) -> Self {
        Self::from_block(ControlBlock::new(Box::into_raw(exclusive), false))
    }

    /// Builds a handle that observes a resource whose exclusive ownership
    /// stays where it is, consuming the token taken by [`lien`].
    ///
    /// The handle group starts out claimed, so the resource can never be
    /// claimed a second time through it.
    ///
    /// Also available as `Escrow::from(token)`.
    pub fn observe(token: Lien<'_, T>) -> Self {
        Self::from_block(ControlBlock::new(token.ptr, true))
    }

    /// Claims the resource for exclusive ownership.
    ///
    /// This is the one-time hand-off point: on success the returned [`Box`]
    /// is the sole owner of the resource and every existing and future handle
    /// of this group becomes observation-only. A second claim fails with
    /// [`EscrowError::AlreadyClaimed`], a claim of an already destroyed
    /// resource fails with [`EscrowError::Expired`], and a claim of the null
    /// handle succeeds with `None` as often as you like.
    ///
    /// # Examples
    ///
    /// ```
    /// # use escrow::{Escrow, EscrowError};
    /// let handle = Escrow::new(5);
    /// let observer = handle.clone();
    ///
    /// let owner = handle.claim().unwrap().unwrap();
    /// assert!(*owner == 5);
    /// assert!(observer.claim() == Err(EscrowError::AlreadyClaimed));
    /// ```
    pub fn claim(&self) -> Result<Option<Box<T>>, EscrowError> {
        let block = match &self.block {
            Some(block) => block,
            None => return Ok(None),
        };

        if block.is_expired() {
            return Err(EscrowError::Expired);
        }
        if block.claimed.swap(true, Relaxed) {
            return Err(EscrowError::AlreadyClaimed);
        }

        // the swap above is the ownership hand-off: exactly one caller can
        // observe `claimed` going from false to true, so exactly one `Box`
        // is ever reconstituted from the block's pointer.
        Ok(Some(unsafe { Box::from_raw(block.ptr.cast::<T>()) }))
    }

    /// Gets the raw resource address, checking the expired flag on every
    /// call.
    ///
    /// Returns a null pointer (not an error) for the null handle. The address
    /// is returned raw rather than as a reference because once the resource
    /// is claimed its lifetime is controlled by the external owner and cannot
    /// be tied to this handle; dereferencing is the caller's responsibility.
    pub fn get(&self) -> Result<*mut T, EscrowError> {
        if self.is_expired() {
            return Err(EscrowError::Expired);
        }
        Ok(self.raw())
    }

    /// Gets the raw resource address without failing: null when the handle is
    /// null or the resource has already been destroyed.
    pub fn as_ptr(&self) -> *mut T {
        if self.is_expired() {
            ptr::null_mut()
        } else {
            self.raw()
        }
    }

    /// Whether the resource was claimed for exclusive ownership, through this
    /// handle or any other handle of the group. Never fails; false for the
    /// null handle.
    pub fn is_claimed(&self) -> bool {
        self.block.as_deref().map_or(false, ControlBlock::is_claimed)
    }

    /// Whether the resource has already been destroyed. Never fails; false
    /// for the null handle.
    ///
    /// Only resources carrying a [`Beacon`] can turn this on after an
    /// external owner destroyed them; for all other types the flag stays
    /// false and stale addresses go undetected.
    pub fn is_expired(&self) -> bool {
        self.block.as_deref().map_or(false, ControlBlock::is_expired)
    }

    /// Whether this is the null handle.
    pub fn is_null(&self) -> bool {
        self.block.is_none()
    }

    /// Gets the number of handles sharing this resource, or `0` for the null
    /// handle.
    ///
    /// # Examples
    ///
    /// ```
    /// # use escrow::Escrow;
    /// let handle = Escrow::new(5);
    /// assert!(handle.strong_count() == 1);
    ///
    /// let observer = handle.clone();
    /// assert!(handle.strong_count() == 2);
    ///
    /// drop(observer);
    /// assert!(handle.strong_count() == 1);
    /// ```
    pub fn strong_count(&self) -> usize {
        self.block.as_ref().map_or(0, Arc::strong_count)
    }

    fn from_block(block: Arc<ControlBlock>) -> Self {
        Escrow {
            block: Some(block),
            marker: PhantomData,
        }
    }

    // identity address. unlike `as_ptr` this ignores the expired flag, so
    // comparisons keep working on expired handles.
    fn raw(&self) -> *mut T {
        match &self.block {
            Some(block) => block.ptr.cast(),
            None => ptr::null_mut(),
        }
    }

    fn addr(&self) -> usize {
        self.raw() as usize
    }
}

impl<T> Escrow<T>
where
    T: Tracked,
{
    /// Places a freshly constructed resource in escrow and links its
    /// [`Beacon`] back to the handle group, so that every handle learns of
    /// the resource's destruction no matter which path destroys it.
    pub fn new_tracked(value: T) -> Self {
        let raw = Box::into_raw(Box::new(value));
        let block = ControlBlock::new(raw, false);
        unsafe { &*raw }.beacon().install(&block);
        Self::from_block(block)
    }

    /// Takes ownership of the resource away from an exclusive owner, reusing
    /// the handle group that is already observing it if there is one.
    ///
    /// If the resource's [`Beacon`] still links to a live group (the box came
    /// out of that group's [`claim`][Escrow::claim]), the new handle attaches
    /// to the same control block instead of starting a second one, and
    /// ownership of the resource returns to the group: the existing handles
    /// observe `is_claimed()` turning false again. This is the only way the
    /// claimed flag ever goes back down. Otherwise a fresh unclaimed group is
    /// started and the beacon is linked to it.
    pub fn adopt_tracked(exclusive: Box<T>) -> Self {
        let raw = Box::into_raw(exclusive);
        let beacon = unsafe { &*raw }.beacon();

        if let Some(block) = beacon.live_block() {
            debug_assert!(block.ptr == raw.cast());
            block.claimed.store(false, Relaxed);
            return Self::from_block(block);
        }

        let block = ControlBlock::new(raw, false);
        beacon.install(&block);
        Self::from_block(block)
    }

    /// Builds an observation-only handle from a [`lien`] token, attaching to
    /// the handle group already observing the resource if there is one.
    pub fn observe_tracked(token: Lien<'_, T>) -> Self {
        let beacon = unsafe { &*token.ptr }.beacon();

        if let Some(block) = beacon.live_block() {
            debug_assert!(block.ptr == token.ptr.cast());
            block.claimed.store(true, Relaxed);
            return Self::from_block(block);
        }

        let block = ControlBlock::new(token.ptr, true);
        beacon.install(&block);
        Self::from_block(block)
    }
}

impl<T> Clone for Escrow<T> {
    fn clone(&self) -> Self {
        Escrow {
            block: self.block.clone(),
            marker: PhantomData,
        }
    }
}

impl<T> Default for Escrow<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<Box<T>> for Escrow<T> {
    fn from(exclusive: Box<T>) -> Self {
        Self::adopt(exclusive)
    }
}

impl<T> From<Lien<'_, T>> for Escrow<T> {
    fn from(token: Lien<'_, T>) -> Self {
        Self::observe(token)
    }
}

impl<T, U> PartialEq<Escrow<U>> for Escrow<T> {
    fn eq(&self, other: &Escrow<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T> Eq for Escrow<T> {}

impl<T, U> PartialOrd<Escrow<U>> for Escrow<T> {
    fn partial_cmp(&self, other: &Escrow<U>) -> Option<Ordering> {
        Some(self.addr().cmp(&other.addr()))
    }
}

impl<T> Ord for Escrow<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T> Hash for Escrow<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&self.addr(), state)
    }
}

impl<T> PartialEq<*const T> for Escrow<T> {
    fn eq(&self, other: &*const T) -> bool {
        self.addr() == *other as usize
    }
}

impl<T> PartialEq<*mut T> for Escrow<T> {
    fn eq(&self, other: &*mut T) -> bool {
        self.addr() == *other as usize
    }
}

impl<T> PartialOrd<*const T> for Escrow<T> {
    fn partial_cmp(&self, other: &*const T) -> Option<Ordering> {
        Some(self.addr().cmp(&(*other as usize)))
    }
}

impl<T> PartialOrd<*mut T> for Escrow<T> {
    fn partial_cmp(&self, other: &*mut T) -> Option<Ordering> {
        Some(self.addr().cmp(&(*other as usize)))
    }
}

impl<T> PartialEq<Box<T>> for Escrow<T> {
    fn eq(&self, other: &Box<T>) -> bool {
        self.addr() == (&**other as *const T) as usize
    }
}
