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
    marker::PhantomData,
    mem::{needs_drop, size_of},
};

use log::error;

use crate::{
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    page_manager::PageManager,
    util::{div_ceil, finalize_in_place, stride_of},
    vm_error::{VMError, VMResult},
    vm_mut_ref::VMMutRef,
    vm_ref::{check_placement, VMRef},
};

/// Array of `N` elements stored in dedicated, evictable pages
pub struct VMArray<'a, T: Sized, const N: usize, S: PersistentStorageModule, M: MemoryProviderModule>
{
    manager: &'a RefCell<PageManager<S, M>>,
    pages: Vec<usize>,
    per_page: usize,
    /// elements `0..initialized` hold a value
    initialized: usize,
    phantom_data: PhantomData<T>,
}

impl<'a, T: Sized, const N: usize, S: PersistentStorageModule, M: MemoryProviderModule>
    VMArray<'a, T, N, S, M>
{
    fn from_fn<F: FnMut(usize) -> T>(
        manager: &'a RefCell<PageManager<S, M>>,
        mut f: F,
    ) -> VMResult<Self> {
        check_placement::<T>(0)?;

        let stride = stride_of::<T>();
        let page_size = manager.borrow().page_size();
        if stride > page_size {
            return Err(VMError::SizeLimit {
                requested: stride,
                max: page_size,
            });
        }

        // cleans up by itself if something fails from now on
        let mut array = VMArray {
            manager,
            pages: Vec::new(),
            per_page: page_size / stride,
            initialized: 0,
            phantom_data: PhantomData,
        };

        for _ in 0..div_ceil(N, array.per_page) {
            let page = manager.borrow_mut().allocate_container_page()?;
            array.pages.push(page);
        }

        for i in 0..N {
            let value = f(i);
            let (page, offset) = array.location(i);
            let ptr = manager
                .borrow_mut()
                .region_ptr(page, offset, size_of::<T>(), true)?;

            unsafe { (ptr as *mut T).write(value) };
            array.initialized += 1;
        }

        Ok(array)
    }

    #[inline]
    pub const fn len(&self) -> usize {
        N
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    fn location(&self, index: usize) -> (usize, usize) {
        (
            self.pages[index / self.per_page],
            (index % self.per_page) * stride_of::<T>(),
        )
    }

    fn check_index(&self, index: usize) -> VMResult<()> {
        if index >= N {
            return Err(VMError::IndexOutOfBounds { index, len: N });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> VMResult<VMRef<'_, T, S, M>> {
        self.check_index(index)?;
        let (page, offset) = self.location(index);
        VMRef::acquire(self.manager, page, offset)
    }

    pub fn get_mut(&mut self, index: usize) -> VMResult<VMMutRef<'_, T, S, M>> {
        self.check_index(index)?;
        let (page, offset) = self.location(index);
        VMMutRef::acquire(self.manager, page, offset)
    }

    /// Replaces element `index` and returns the previous one
    pub fn replace(&mut self, index: usize, value: T) -> VMResult<T> {
        self.check_index(index)?;
        let (page, offset) = self.location(index);
        let ptr = self
            .manager
            .borrow_mut()
            .region_ptr(page, offset, size_of::<T>(), true)?;

        Ok(unsafe { (ptr as *mut T).replace(value) })
    }

    pub fn set(&mut self, index: usize, value: T) -> VMResult<()> {
        self.replace(index, value).map(drop)
    }

    /// Writes back and releases the RAM of all pages of this array
    pub fn unload(&mut self) -> VMResult<()> {
        let mut manager = self.manager.borrow_mut();
        for page in self.pages.iter() {
            manager.swap_out(*page, false)?;
        }
        Ok(())
    }

    fn release(&mut self) -> VMResult<()> {
        for i in 0..self.initialized {
            let (page, offset) = self.location(i);
            let ptr = self
                .manager
                .borrow_mut()
                .borrow_region(page, offset, size_of::<T>(), true)?;

            let finalized = unsafe { finalize_in_place(ptr as *mut T) };
            self.manager
                .borrow_mut()
                .release_region(page, offset, size_of::<T>(), true);

            if !finalized {
                error!("Finalizer of array element {} panicked", i);
            }
        }
        self.initialized = 0;

        let mut manager = self.manager.borrow_mut();
        while let Some(page) = self.pages.pop() {
            manager.free_page(page, false)?;
        }
        Ok(())
    }
}

impl<'a, T: Sized + Default, const N: usize, S: PersistentStorageModule, M: MemoryProviderModule>
    VMArray<'a, T, N, S, M>
{
    pub(crate) fn new(manager: &'a RefCell<PageManager<S, M>>) -> VMResult<Self> {
        Self::from_fn(manager, |_| T::default())
    }

    /// Resets every element to its default value and releases the RAM of this array
    pub fn clear(&mut self) -> VMResult<()> {
        for i in 0..N {
            self.set(i, T::default())?;
        }
        self.unload()
    }
}

impl<'a, T: Sized + Clone, const N: usize, S: PersistentStorageModule, M: MemoryProviderModule>
    VMArray<'a, T, N, S, M>
{
    pub(crate) fn filled(manager: &'a RefCell<PageManager<S, M>>, value: T) -> VMResult<Self> {
        Self::from_fn(manager, |_| value.clone())
    }

    pub fn fill(&mut self, value: T) -> VMResult<()> {
        for i in 0..N {
            self.set(i, value.clone())?;
        }
        Ok(())
    }
}

impl<'a, T: Sized + Copy, const N: usize, S: PersistentStorageModule, M: MemoryProviderModule>
    VMArray<'a, T, N, S, M>
{
    pub fn load(&self, index: usize) -> VMResult<T> {
        self.check_index(index)?;
        let (page, offset) = self.location(index);
        let ptr = self
            .manager
            .borrow_mut()
            .region_ptr(page, offset, size_of::<T>(), false)?;

        Ok(unsafe { (ptr as *const T).read() })
    }
}

impl<T: Sized, const N: usize, S: PersistentStorageModule, M: MemoryProviderModule> Drop
    for VMArray<'_, T, N, S, M>
{
    fn drop(&mut self) {
        if !needs_drop::<T>() {
            self.initialized = 0;
        }

        if let Err(err) = self.release() {
            error!("Could not release array storage: {}", err);
        }
    }
}
