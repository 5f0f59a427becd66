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
    mem::{needs_drop, replace, size_of},
};

use log::{debug, error, trace, warn};

use crate::{
    heap::{HeapAllocation, HEAP_ALIGNMENT},
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    page_manager::PageManager,
    util::{div_ceil, round_up_to_nearest, stride_of},
    vm_error::{VMError, VMResult},
    vm_mut_ref::VMMutRef,
    vm_ptr::VMPtr,
    vm_ref::{check_placement, VMRef},
};

/// Capacity of the first flat block
const MIN_FLAT_CAPACITY: usize = 4;

/// Storage representation of a [`VMVector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    /// No storage yet
    Unallocated,
    /// All elements inside of one heap block
    Flat,
    /// Elements spread over dedicated pages
    Paged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageChunk {
    page: usize,
    /// elements stored in this chunk
    count: usize,
}

enum VectorStorage {
    Unallocated,
    Flat {
        page: usize,
        offset: usize,
        stamp: u32,
        capacity: usize,
    },
    Paged {
        chunks: Vec<PageChunk>,
        per_chunk: usize,
    },
}

impl VectorStorage {
    fn flat(allocation: HeapAllocation, stride: usize) -> Self {
        VectorStorage::Flat {
            page: allocation.page,
            offset: allocation.offset,
            stamp: allocation.stamp,
            capacity: allocation.size / stride,
        }
    }
}

/// Growable sequence that stores its elements inside of pages.
///
/// Starts with a single heap block that doubles its capacity on growth.
/// As soon as a single heap block is too small, all elements are moved
/// into dedicated pages (paged mode). This transition happens at most once.
pub struct VMVector<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> {
    manager: &'a RefCell<PageManager<S, M>>,
    storage: VectorStorage,
    len: usize,
    phantom_data: PhantomData<T>,
}

impl<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> VMVector<'a, T, S, M> {
    pub(crate) fn new(manager: &'a RefCell<PageManager<S, M>>) -> Self {
        VMVector {
            manager,
            storage: VectorStorage::Unallocated,
            len: 0,
            phantom_data: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Amount of elements that fit without allocating
    pub fn capacity(&self) -> usize {
        match &self.storage {
            VectorStorage::Unallocated => 0,
            VectorStorage::Flat { capacity, .. } => *capacity,
            VectorStorage::Paged { chunks, per_chunk } => chunks.len() * per_chunk,
        }
    }

    pub fn mode(&self) -> VectorMode {
        match self.storage {
            VectorStorage::Unallocated => VectorMode::Unallocated,
            VectorStorage::Flat { .. } => VectorMode::Flat,
            VectorStorage::Paged { .. } => VectorMode::Paged,
        }
    }

    /// Pointer to the first element while all elements are stored in one heap block.
    ///
    /// Returns `None` before the first allocation and once the vector is in paged mode.
    /// The pointer dangles as soon as the vector moves its elements into another block.
    pub fn data(&self) -> Option<VMPtr<'a, T, S, M>> {
        match self.storage {
            VectorStorage::Flat {
                page,
                offset,
                stamp,
                ..
            } => Some(VMPtr::in_block(self.manager, page, offset, stamp, false)),
            _ => None,
        }
    }

    /// `(page, offset)` of element `index`, which has to be smaller than the capacity
    fn location(&self, index: usize) -> (usize, usize) {
        debug_assert!(index < self.capacity());
        let stride = stride_of::<T>();

        match &self.storage {
            VectorStorage::Flat { page, offset, .. } => (*page, offset + index * stride),
            VectorStorage::Paged { chunks, per_chunk } => (
                chunks[index / per_chunk].page,
                (index % per_chunk) * stride,
            ),
            VectorStorage::Unallocated => (usize::MAX, 0),
        }
    }

    fn check_index(&self, index: usize) -> VMResult<()> {
        if index >= self.len {
            return Err(VMError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Keeps the per chunk counters in line with `len`
    fn sync_chunk_counts(&mut self) {
        if let VectorStorage::Paged { chunks, per_chunk } = &mut self.storage {
            for (i, chunk) in chunks.iter_mut().enumerate() {
                chunk.count = self.len.saturating_sub(i * *per_chunk).min(*per_chunk);
            }
            debug_assert_eq!(chunks.iter().map(|c| c.count).sum::<usize>(), self.len);
        }
    }

    /// Frees trailing chunks without any elements
    fn release_empty_chunks(&mut self) -> VMResult<()> {
        if let VectorStorage::Paged { chunks, .. } = &mut self.storage {
            while let Some(chunk) = chunks.last() {
                if chunk.count != 0 {
                    break;
                }

                self.manager.borrow_mut().free_page(chunk.page, false)?;
                trace!("Released empty chunk at page {}", chunk.page);
                chunks.pop();
            }
        }
        Ok(())
    }

    /// Writes `value` to a slot that does not hold an element
    fn write_new(&mut self, index: usize, value: T) -> VMResult<()> {
        let (page, offset) = self.location(index);
        let ptr = self
            .manager
            .borrow_mut()
            .region_ptr(page, offset, size_of::<T>(), true)?;

        unsafe { (ptr as *mut T).write(value) };
        Ok(())
    }

    /// Moves element `index` out, the slot does not hold an element afterwards
    fn take(&mut self, index: usize) -> VMResult<T> {
        let (page, offset) = self.location(index);
        unsafe { self.manager.borrow_mut().take_value(page, offset) }
    }

    /// Moves `count` elements starting at `from` so that they start at `to`
    fn move_elements(&mut self, from: usize, to: usize, count: usize) -> VMResult<()> {
        if count == 0 || from == to {
            return Ok(());
        }

        let stride = stride_of::<T>();
        let mut manager = self.manager.borrow_mut();

        if let VectorStorage::Flat { page, offset, .. } = self.storage {
            return manager.copy_between(
                page,
                offset + from * stride,
                page,
                offset + to * stride,
                count * stride,
            );
        }

        // element by element, in an order that never overwrites an element that still has to be moved
        let mut move_one = |i: usize| -> VMResult<()> {
            let (src_page, src_offset) = self.location(from + i);
            let (dest_page, dest_offset) = self.location(to + i);
            manager.copy_between(src_page, src_offset, dest_page, dest_offset, stride)
        };

        if to > from {
            (0..count).rev().try_for_each(&mut move_one)
        } else {
            (0..count).try_for_each(&mut move_one)
        }
    }

    /// Makes sure `required` elements fit, switches to paged mode if a single heap block is too small
    fn ensure_capacity(&mut self, required: usize) -> VMResult<()> {
        if required <= self.capacity() {
            return Ok(());
        }

        check_placement::<T>(0)?;
        let stride = stride_of::<T>();
        let (page_size, max_payload) = {
            let manager = self.manager.borrow();
            (manager.page_size(), manager.max_heap_payload())
        };

        if stride > page_size {
            return Err(VMError::SizeLimit {
                requested: stride,
                max: page_size,
            });
        }

        let max_flat = max_payload / stride;

        match self.storage {
            VectorStorage::Unallocated if required <= max_flat => {
                let capacity = required.max(MIN_FLAT_CAPACITY).min(max_flat);
                let allocation = self.manager.borrow_mut().heap_allocate(capacity * stride)?;

                self.storage = VectorStorage::flat(allocation, stride);
                Ok(())
            }
            VectorStorage::Unallocated => {
                // elements are too big for a heap block
                self.storage = VectorStorage::Paged {
                    chunks: Vec::new(),
                    per_chunk: page_size / stride,
                };
                self.grow_paged(required)
            }
            VectorStorage::Flat {
                page,
                offset,
                capacity,
                ..
            } => {
                let new_capacity = (capacity * 2).max(required).min(max_flat);
                if new_capacity < required {
                    return self.transition_to_paged(required);
                }

                let allocation = self.manager.borrow_mut().heap_realloc(
                    page,
                    offset,
                    new_capacity * stride,
                    self.len * stride,
                )?;

                trace!(
                    "Grew flat vector from {} to {} elements",
                    capacity,
                    allocation.size / stride
                );
                self.storage = VectorStorage::flat(allocation, stride);
                Ok(())
            }
            VectorStorage::Paged { .. } => self.grow_paged(required),
        }
    }

    fn grow_paged(&mut self, required: usize) -> VMResult<()> {
        if let VectorStorage::Paged { chunks, per_chunk } = &mut self.storage {
            while chunks.len() * *per_chunk < required {
                let page = self.manager.borrow_mut().allocate_container_page()?;
                chunks.push(PageChunk { page, count: 0 });
            }
        }
        Ok(())
    }

    /// Moves all elements from the flat block into new page chunks.
    ///
    /// This is the only place that switches from flat to paged mode.
    fn transition_to_paged(&mut self, required: usize) -> VMResult<()> {
        let (flat_page, flat_offset) = match self.storage {
            VectorStorage::Flat { page, offset, .. } => (page, offset),
            _ => return Ok(()),
        };

        let stride = stride_of::<T>();
        let mut manager = self.manager.borrow_mut();
        let per_chunk = manager.page_size() / stride;
        let needed = div_ceil(required.max(self.len), per_chunk);

        let mut chunks: Vec<PageChunk> = Vec::with_capacity(needed);
        let mut res = Ok(());
        for _ in 0..needed {
            match manager.allocate_container_page() {
                Ok(page) => chunks.push(PageChunk { page, count: 0 }),
                Err(err) => {
                    res = Err(err);
                    break;
                }
            }
        }

        let mut moved = 0;
        for chunk in chunks.iter_mut() {
            if res.is_err() || moved == self.len {
                break;
            }

            let count = per_chunk.min(self.len - moved);
            res = manager.copy_between(
                flat_page,
                flat_offset + moved * stride,
                chunk.page,
                0,
                count * stride,
            );
            chunk.count = count;
            moved += count;
        }

        if let Err(err) = res {
            // elements are still inside of the flat block
            for chunk in chunks {
                if let Err(free_err) = manager.free_page(chunk.page, false) {
                    warn!("Could not release chunk page {}: {}", chunk.page, free_err);
                }
            }
            return Err(err);
        }

        self.storage = VectorStorage::Paged { chunks, per_chunk };
        manager.record_mode_transition();
        debug!(
            "Vector of {} elements switched to paged mode ({} per page)",
            self.len, per_chunk
        );

        manager.heap_free(flat_page, flat_offset)
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

    pub fn push(&mut self, value: T) -> VMResult<()> {
        self.ensure_capacity(self.len + 1)?;
        self.write_new(self.len, value)?;

        self.len += 1;
        self.sync_chunk_counts();
        Ok(())
    }

    /// Removes the last element, in paged mode its chunk is freed if it becomes empty
    pub fn pop(&mut self) -> VMResult<Option<T>> {
        if self.len == 0 {
            return Ok(None);
        }

        let value = self.take(self.len - 1)?;
        self.len -= 1;
        self.sync_chunk_counts();
        self.release_empty_chunks()?;

        Ok(Some(value))
    }

    pub fn insert(&mut self, index: usize, value: T) -> VMResult<()> {
        if index > self.len {
            return Err(VMError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }

        self.ensure_capacity(self.len + 1)?;

        let res = self
            .move_elements(index, index + 1, self.len - index)
            .and_then(|_| self.write_new(index, value));

        if let Err(err) = res {
            // elements behind index could be duplicated now, leak them instead
            error!("Insert failed while shifting elements, forgetting elements from {} on", index);
            self.len = index;
            self.sync_chunk_counts();
            return Err(err);
        }

        self.len += 1;
        self.sync_chunk_counts();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> VMResult<T> {
        self.check_index(index)?;

        let value = self.take(index)?;
        if let Err(err) = self.move_elements(index + 1, index, self.len - index - 1) {
            error!("Remove failed while shifting elements, forgetting elements from {} on", index);
            self.len = index;
            self.sync_chunk_counts();
            return Err(err);
        }

        self.len -= 1;
        self.sync_chunk_counts();
        self.release_empty_chunks()?;

        Ok(value)
    }

    /// Shortens the vector to `len` elements and drops the rest
    pub fn truncate(&mut self, len: usize) -> VMResult<()> {
        if !needs_drop::<T>() && len < self.len {
            self.len = len;
            self.sync_chunk_counts();
            return self.release_empty_chunks();
        }

        while self.len > len {
            drop(self.pop()?);
        }
        Ok(())
    }

    pub fn clear(&mut self) -> VMResult<()> {
        self.truncate(0)
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) -> VMResult<()> {
        for value in iter {
            self.push(value)?;
        }
        Ok(())
    }

    /// Makes room for at least `additional` more elements
    pub fn reserve(&mut self, additional: usize) -> VMResult<()> {
        self.ensure_capacity(self.len + additional)
    }

    /// Frees capacity that is not used.
    ///
    /// A flat vector moves into a smaller block, a paged vector frees trailing empty chunks.
    pub fn shrink_to_fit(&mut self) -> VMResult<()> {
        let stride = stride_of::<T>();

        match self.storage {
            VectorStorage::Flat {
                page,
                offset,
                capacity,
                ..
            } => {
                let target = self.len.max(1);
                if round_up_to_nearest(target * stride, HEAP_ALIGNMENT) >= capacity * stride {
                    return Ok(());
                }

                let allocation = self.manager.borrow_mut().heap_realloc(
                    page,
                    offset,
                    target * stride,
                    self.len * stride,
                )?;
                self.storage = VectorStorage::flat(allocation, stride);
                Ok(())
            }
            VectorStorage::Paged { .. } => self.release_empty_chunks(),
            VectorStorage::Unallocated => Ok(()),
        }
    }

    /// Frees all storage, the vector is empty and unallocated afterwards
    fn release(&mut self) -> VMResult<()> {
        self.clear()?;

        match replace(&mut self.storage, VectorStorage::Unallocated) {
            VectorStorage::Unallocated => Ok(()),
            VectorStorage::Flat { page, offset, .. } => {
                self.manager.borrow_mut().heap_free(page, offset)
            }
            VectorStorage::Paged { chunks, .. } => {
                let mut manager = self.manager.borrow_mut();
                for chunk in chunks {
                    manager.free_page(chunk.page, false)?;
                }
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn chunk_counts(&self) -> Vec<usize> {
        match &self.storage {
            VectorStorage::Paged { chunks, .. } => chunks.iter().map(|c| c.count).collect(),
            _ => Vec::new(),
        }
    }
}

impl<'a, T: Sized + Copy, S: PersistentStorageModule, M: MemoryProviderModule>
    VMVector<'a, T, S, M>
{
    /// Copies element `index` out
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

impl<'a, T: Sized + Clone, S: PersistentStorageModule, M: MemoryProviderModule>
    VMVector<'a, T, S, M>
{
    /// Resizes to `new_len` elements, new elements are clones of `value`
    pub fn resize(&mut self, new_len: usize, value: T) -> VMResult<()> {
        if new_len <= self.len {
            return self.truncate(new_len);
        }

        self.reserve(new_len - self.len)?;
        while self.len < new_len {
            self.push(value.clone())?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> VMResult<Vec<T>> {
        (0..self.len)
            .map(|i| self.get(i).map(|value| value.clone()))
            .collect()
    }
}

impl<'a, T: Sized + PartialEq, S: PersistentStorageModule, M: MemoryProviderModule>
    VMVector<'a, T, S, M>
{
    pub fn position(&self, value: &T) -> VMResult<Option<usize>> {
        for i in 0..self.len {
            if *self.get(i)? == *value {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, value: &T) -> VMResult<bool> {
        Ok(self.position(value)?.is_some())
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Drop
    for VMVector<'_, T, S, M>
{
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            error!("Could not release vector storage: {}", err);
        }
    }
}
