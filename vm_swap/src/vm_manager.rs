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

use core::cell::RefCell;
use std::{mem::ManuallyDrop, path::Path};

use log::{error, info};

use crate::{
    heap::{HeapAllocation, HeapBlockInfo},
    modules::{
        memory_provider::{MemoryProviderModule, SystemMemoryProvider},
        persistent_storage::{FilePersistentStorageModule, PersistentStorageModule},
    },
    page_manager::{PageInfo, PageManager, PageOptions, VMStatistics},
    vm_array::VMArray,
    vm_config::VMConfig,
    vm_error::{VMError, VMResult},
    vm_ptr::VMPtr,
    vm_string::VMString,
    vm_vector::VMVector,
};

/// Entry point of this crate: owns the swap storage, the page table and all page buffers.
///
/// Pointers and containers borrow the manager, so it can not be shut down
/// while any of them is still alive.
pub struct VMManager<S: PersistentStorageModule, M: MemoryProviderModule = SystemMemoryProvider> {
    inner: ManuallyDrop<RefCell<PageManager<S, M>>>,
}

impl<M: MemoryProviderModule> VMManager<FilePersistentStorageModule, M> {
    /// Creates (or truncates) the swap file at `path` and initializes a manager on top of it
    pub fn begin<P: AsRef<Path>>(path: P, memory: M, config: VMConfig) -> VMResult<Self> {
        let storage =
            FilePersistentStorageModule::open(path).map_err(VMError::storage("open"))?;
        Self::new(storage, memory, config)
    }
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> VMManager<S, M> {
    /// Sizes `storage` to hold all pages and zero fills it
    pub fn new(storage: S, memory: M, config: VMConfig) -> VMResult<Self> {
        let inner = PageManager::new(storage, memory, config)?;
        Ok(VMManager {
            inner: ManuallyDrop::new(RefCell::new(inner)),
        })
    }

    /// Flushes all dirty pages, releases all buffers and hands the storage back
    pub fn end(self) -> VMResult<S> {
        let mut this = ManuallyDrop::new(self);

        // self is never used again, so taking inner out is fine
        let inner = unsafe { ManuallyDrop::take(&mut this.inner) };
        inner.into_inner().shutdown()
    }

    /// Writes back every dirty page and flushes the storage
    pub fn flush(&self) -> VMResult<()> {
        self.inner.borrow_mut().flush_all()
    }

    pub fn config(&self) -> VMConfig {
        *self.inner.borrow().config()
    }

    pub fn statistics(&self) -> VMStatistics {
        self.inner.borrow().statistics
    }

    pub fn page_info(&self, idx: usize) -> VMResult<PageInfo> {
        self.inner.borrow().page_info(idx)
    }

    /// Runs `f` with the memory provider, e.g. to change its limits
    pub fn with_memory_provider<R, F: FnOnce(&mut M) -> R>(&self, f: F) -> R {
        f(self.inner.borrow_mut().memory_mut())
    }

    /// Allocates the first free page
    pub fn allocate_page(&self, options: PageOptions) -> VMResult<usize> {
        self.inner.borrow_mut().allocate_page(options)
    }

    pub fn allocate_page_at(&self, idx: usize, options: PageOptions) -> VMResult<()> {
        self.inner.borrow_mut().allocate_page_at(idx, options)
    }

    pub fn swap_in(&self, idx: usize) -> VMResult<()> {
        self.inner.borrow_mut().swap_in(idx)
    }

    /// Writes the page back (if dirty or `force`) and releases its RAM if it may be evicted
    pub fn swap_out(&self, idx: usize, force: bool) -> VMResult<()> {
        self.inner.borrow_mut().swap_out(idx, force)
    }

    /// Frees a page allocated with [`VMManager::allocate_page`].
    ///
    /// Pages of the heap or of containers are refused with [`VMError::PageInUse`].
    pub fn free_page(&self, idx: usize, wipe: bool) -> VMResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.check_raw_page(idx)?;
        inner.free_page(idx, wipe)
    }

    pub fn set_evictable(&self, idx: usize, may_evict: bool) -> VMResult<()> {
        self.inner.borrow_mut().set_evictable(idx, may_evict)
    }

    /// Copies bytes out of a page, does not mark the page dirty
    pub fn read_page(&self, idx: usize, offset: usize, dest: &mut [u8]) -> VMResult<()> {
        self.inner.borrow_mut().read_bytes(idx, offset, dest)
    }

    /// Copies bytes into a page, pages of the heap or of containers are refused
    pub fn write_page(&self, idx: usize, offset: usize, src: &[u8]) -> VMResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.check_raw_page(idx)?;
        inner.write_bytes(idx, offset, src)
    }

    pub fn heap_allocate(&self, size: usize) -> VMResult<HeapAllocation> {
        self.inner.borrow_mut().heap_allocate(size)
    }

    /// Gives a heap block back to the allocator.
    ///
    /// # Safety
    ///
    /// The block has to be allocated by [`VMManager::heap_allocate`].
    /// Blocks of pointers and containers are freed by their owners,
    /// freeing them here lets the owner read another allocation as its own type.
    pub unsafe fn heap_free(&self, page: usize, offset: usize) -> VMResult<()> {
        self.inner.borrow_mut().heap_free(page, offset)
    }

    /// Moves a heap block into a new block of `new_size` bytes
    ///
    /// # Safety
    ///
    /// Same as [`VMManager::heap_free`], the old block is freed on success.
    pub unsafe fn heap_realloc(
        &self,
        page: usize,
        offset: usize,
        new_size: usize,
        copy_bytes: usize,
    ) -> VMResult<HeapAllocation> {
        self.inner
            .borrow_mut()
            .heap_realloc(page, offset, new_size, copy_bytes)
    }

    pub fn heap_blocks(&self, page: usize) -> VMResult<Vec<HeapBlockInfo>> {
        self.inner.borrow_mut().heap_blocks(page)
    }

    pub fn heap_pages(&self) -> Vec<usize> {
        self.inner.borrow().heap_pages()
    }

    pub fn max_heap_payload(&self) -> usize {
        self.inner.borrow().max_heap_payload()
    }

    /// Allocates storage for `value` and moves it there
    pub fn make_ptr<T: Sized>(&self, value: T) -> VMResult<VMPtr<'_, T, S, M>> {
        VMPtr::allocate(&self.inner, value)
    }

    /// Pointer without storage, it is bound on first access
    pub fn null_ptr<T: Sized>(&self) -> VMPtr<'_, T, S, M> {
        VMPtr::unbound(&self.inner)
    }

    pub fn new_vector<T: Sized>(&self) -> VMVector<'_, T, S, M> {
        VMVector::new(&self.inner)
    }

    pub fn new_array<T: Sized + Default, const N: usize>(&self) -> VMResult<VMArray<'_, T, N, S, M>> {
        VMArray::new(&self.inner)
    }

    pub fn new_array_filled<T: Sized + Clone, const N: usize>(
        &self,
        value: T,
    ) -> VMResult<VMArray<'_, T, N, S, M>> {
        VMArray::filled(&self.inner, value)
    }

    pub fn new_string(&self) -> VMString<'_, S, M> {
        VMString::new(&self.inner)
    }

    #[cfg(test)]
    pub(crate) fn get_inner(&self) -> &RefCell<PageManager<S, M>> {
        &self.inner
    }
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> Drop for VMManager<S, M> {
    fn drop(&mut self) {
        if let Err(err) = self.inner.borrow_mut().flush_all() {
            error!("Could not flush pages while dropping manager: {}", err);
        } else {
            info!("Dropped manager, all pages flushed");
        }

        unsafe { ManuallyDrop::drop(&mut self.inner) };
    }
}
