/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use core::{
    cell::RefCell,
    fmt,
    marker::PhantomData,
    mem::size_of,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use log::{error, trace, warn};

use crate::{
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    page_manager::PageManager,
    util::{finalize_in_place, stride_of},
    vm_error::{VMError, VMResult},
    vm_mut_ref::VMMutRef,
    vm_ref::{check_placement, VMRef},
};

/// Page index of a pointer that is not bound to any storage
pub(crate) const UNBOUND_PAGE: usize = usize::MAX;

/// Heap block a pointer was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockAnchor {
    page: usize,
    offset: usize,
    stamp: u32,
    /// only owners may destroy the block, containers free their blocks themselves
    owned: bool,
}

/// Logical pointer to a single `T` that lives inside of a page.
///
/// Only `(page, offset)` is stored. Every access resolves this location
/// through the page manager again, so the page can be evicted and reloaded
/// at another RAM address in between.
///
/// Pointers into the heap remember the block they belong to. Accessing or
/// destroying a copy after the object was destroyed fails with an error.
///
/// Dropping a pointer does **not** drop the object it points to,
/// use [`VMPtr::destroy`] for that.
pub struct VMPtr<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> {
    manager: &'a RefCell<PageManager<S, M>>,
    page: usize,
    offset: usize,
    anchor: Option<BlockAnchor>,
    phantom_data: PhantomData<*mut T>,
}

impl<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> VMPtr<'a, T, S, M> {
    /// Pointer into raw page memory, only checked against the page table
    pub(crate) fn new(manager: &'a RefCell<PageManager<S, M>>, page: usize, offset: usize) -> Self {
        VMPtr {
            manager,
            page,
            offset,
            anchor: None,
            phantom_data: PhantomData,
        }
    }

    /// Pointer to the start of the heap block `(page, offset)` allocated with `stamp`
    pub(crate) fn in_block(
        manager: &'a RefCell<PageManager<S, M>>,
        page: usize,
        offset: usize,
        stamp: u32,
        owned: bool,
    ) -> Self {
        VMPtr {
            anchor: Some(BlockAnchor {
                page,
                offset,
                stamp,
                owned,
            }),
            ..Self::new(manager, page, offset)
        }
    }

    pub(crate) fn unbound(manager: &'a RefCell<PageManager<S, M>>) -> Self {
        Self::new(manager, UNBOUND_PAGE, 0)
    }

    /// Allocates a new heap block and moves `value` into it
    pub(crate) fn allocate(manager: &'a RefCell<PageManager<S, M>>, value: T) -> VMResult<Self> {
        let mut ptr = Self::unbound(manager);
        ptr.bind_with(value)?;
        Ok(ptr)
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.page != UNBOUND_PAGE
    }

    /// `(page, offset)` of the object or `None` if unbound
    #[inline]
    pub fn location(&self) -> Option<(usize, usize)> {
        if self.is_bound() {
            Some((self.page, self.offset))
        } else {
            None
        }
    }

    /// Checks that a bound location is inside of the page table and does not cross a page border.
    ///
    /// Heap pointers additionally have to stay inside of their block, which must still be allocated.
    fn validate(&self) -> VMResult<(usize, usize)> {
        let (page, offset) = self.location().ok_or(VMError::UnboundPointer)?;
        let len = size_of::<T>();

        let mut manager = self.manager.borrow_mut();
        if page >= manager.page_count() {
            return Err(VMError::InvalidPage(page));
        }
        if offset + len > manager.page_size() {
            return Err(VMError::InvalidOffset { page, offset, len });
        }

        if let Some(anchor) = self.anchor {
            let size = manager
                .heap_block_size_stamped(anchor.page, anchor.offset, anchor.stamp)
                .map_err(|err| match err {
                    VMError::InvalidFree { .. } => VMError::DanglingPointer { page, offset },
                    err => err,
                })?;

            if page != anchor.page || offset < anchor.offset || offset + len > anchor.offset + size
            {
                return Err(VMError::InvalidOffset { page, offset, len });
            }
        }

        Ok((page, offset))
    }

    fn bind_with(&mut self, value: T) -> VMResult<()> {
        debug_assert!(!self.is_bound());
        check_placement::<T>(0)?;

        let (allocation, ptr) = {
            let mut manager = self.manager.borrow_mut();
            let allocation = manager.heap_allocate(size_of::<T>())?;

            match manager.region_ptr(allocation.page, allocation.offset, size_of::<T>(), true) {
                Ok(ptr) => (allocation, ptr),
                Err(err) => {
                    if let Err(free_err) = manager.heap_free(allocation.page, allocation.offset) {
                        warn!(
                            "Could not release block at page {}, offset {}: {}",
                            allocation.page, allocation.offset, free_err
                        );
                    }
                    return Err(err);
                }
            }
        };

        // no other manager call in between, so the page is still resident
        unsafe { (ptr as *mut T).write(value) };

        trace!(
            "Bound pointer to page {}, offset {}",
            allocation.page,
            allocation.offset
        );
        *self = Self::in_block(
            self.manager,
            allocation.page,
            allocation.offset,
            allocation.stamp,
            true,
        );
        Ok(())
    }

    /// Strict shared access, fails with [`VMError::UnboundPointer`] if unbound
    pub fn get(&self) -> VMResult<VMRef<'_, T, S, M>> {
        let (page, offset) = self.validate()?;
        VMRef::acquire(self.manager, page, offset)
    }

    /// Strict mutable access, fails with [`VMError::UnboundPointer`] if unbound
    pub fn get_mut(&mut self) -> VMResult<VMMutRef<'_, T, S, M>> {
        let (page, offset) = self.validate()?;
        VMMutRef::acquire(self.manager, page, offset)
    }

    /// Replaces the object and returns the previous one
    pub fn replace(&self, value: T) -> VMResult<T> {
        let (page, offset) = self.validate()?;
        check_placement::<T>(offset)?;

        let mut manager = self.manager.borrow_mut();
        let ptr = manager.region_ptr(page, offset, size_of::<T>(), true)? as *mut T;
        Ok(unsafe { ptr.replace(value) })
    }

    /// Finalizes the object, frees its storage and unbinds this pointer.
    ///
    /// Calling this on an unbound pointer does nothing.
    /// The storage is freed even if the finalizer panics,
    /// [`VMError::FinalizerPanicked`] is returned in that case.
    ///
    /// Fails with [`VMError::InvalidFree`] without touching the object if this
    /// pointer does not own a heap block, e.g. because a copy of it destroyed
    /// the object already or it points into a container.
    pub fn destroy(&mut self) -> VMResult<()> {
        let (page, offset) = match self.location() {
            Some(location) => location,
            None => return Ok(()),
        };
        let size = size_of::<T>();

        let stamp = match self.anchor {
            Some(anchor) if anchor.owned && anchor.page == page && anchor.offset == offset => {
                anchor.stamp
            }
            _ => return Err(VMError::InvalidFree { page, offset }),
        };

        // keep the page pinned while the finalizer runs
        let ptr = {
            let mut manager = self.manager.borrow_mut();
            manager.heap_block_size_stamped(page, offset, stamp)?;
            manager.borrow_region(page, offset, size, true)?
        };

        let finalized = unsafe { finalize_in_place(ptr as *mut T) };

        let mut manager = self.manager.borrow_mut();
        manager.release_region(page, offset, size, true);

        // object is gone, so this pointer must not be destroyed again
        self.page = UNBOUND_PAGE;
        self.offset = 0;
        self.anchor = None;
        manager.heap_free(page, offset)?;

        if !finalized {
            error!("Finalizer panicked, freed page {}, offset {} anyway", page, offset);
            return Err(VMError::FinalizerPanicked);
        }

        Ok(())
    }

    /// Pointer `count` elements away, may cross page borders in both directions.
    ///
    /// # Panics
    ///
    /// Panics if this pointer is unbound or the result would be located before page 0.
    pub fn offset_by(self, count: isize) -> Self {
        assert!(self.is_bound(), "pointer arithmetic on an unbound pointer");

        let page_size = self.manager.borrow().page_size() as i64;
        let total = self.offset as i64 + count as i64 * stride_of::<T>() as i64;
        let page = self.page as i64 + total.div_euclid(page_size);
        assert!(page >= 0, "pointer arithmetic moved before the first page");

        VMPtr {
            page: page as usize,
            offset: total.rem_euclid(page_size) as usize,
            ..self
        }
    }

    /// Distance in elements from `origin` to this pointer.
    ///
    /// Both pointers have to be located in the same logically contiguous allocation.
    pub fn offset_from(&self, origin: &Self) -> isize {
        assert!(
            self.is_bound() && origin.is_bound(),
            "pointer arithmetic on an unbound pointer"
        );

        let page_size = self.manager.borrow().page_size() as i64;
        let bytes = (self.page as i64 - origin.page as i64) * page_size + self.offset as i64
            - origin.offset as i64;
        bytes.div_euclid(stride_of::<T>() as i64) as isize
    }
}

impl<'a, T: Sized + Default, S: PersistentStorageModule, M: MemoryProviderModule>
    VMPtr<'a, T, S, M>
{
    /// Binds this pointer to a new heap block holding `T::default()`.
    ///
    /// An already bound pointer is only validated.
    pub fn bind(&mut self) -> VMResult<()> {
        if self.is_bound() {
            return self.validate().map(|_| ());
        }

        self.bind_with(T::default())
    }

    /// Shared access, binds this pointer first if needed
    pub fn get_or_bind(&mut self) -> VMResult<VMRef<'_, T, S, M>> {
        self.bind()?;
        self.get()
    }

    /// Mutable access, binds this pointer first if needed
    pub fn get_mut_or_bind(&mut self) -> VMResult<VMMutRef<'_, T, S, M>> {
        self.bind()?;
        self.get_mut()
    }
}

impl<'a, T: Sized + Copy, S: PersistentStorageModule, M: MemoryProviderModule>
    VMPtr<'a, T, S, M>
{
    /// Copies the object out
    pub fn load(&self) -> VMResult<T> {
        let (page, offset) = self.validate()?;
        check_placement::<T>(offset)?;

        let mut manager = self.manager.borrow_mut();
        let ptr = manager.region_ptr(page, offset, size_of::<T>(), false)? as *const T;
        Ok(unsafe { ptr.read() })
    }

    pub fn store(&self, value: T) -> VMResult<()> {
        let (page, offset) = self.validate()?;
        check_placement::<T>(offset)?;

        unsafe { self.manager.borrow_mut().put_value(page, offset, value) }
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Clone for VMPtr<'_, T, S, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Copy for VMPtr<'_, T, S, M> {}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> PartialEq for VMPtr<'_, T, S, M> {
    fn eq(&self, other: &Self) -> bool {
        self.page == other.page && self.offset == other.offset
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Eq for VMPtr<'_, T, S, M> {}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> fmt::Debug
    for VMPtr<'_, T, S, M>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some((page, offset)) => write!(f, "VMPtr({}:{})", page, offset),
            None => write!(f, "VMPtr(unbound)"),
        }
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Add<isize>
    for VMPtr<'_, T, S, M>
{
    type Output = Self;

    fn add(self, rhs: isize) -> Self::Output {
        self.offset_by(rhs)
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Sub<isize>
    for VMPtr<'_, T, S, M>
{
    type Output = Self;

    fn sub(self, rhs: isize) -> Self::Output {
        self.offset_by(-rhs)
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> AddAssign<isize>
    for VMPtr<'_, T, S, M>
{
    fn add_assign(&mut self, rhs: isize) {
        *self = self.offset_by(rhs);
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> SubAssign<isize>
    for VMPtr<'_, T, S, M>
{
    fn sub_assign(&mut self, rhs: isize) {
        *self = self.offset_by(-rhs);
    }
}
