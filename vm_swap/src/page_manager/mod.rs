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

mod eviction;
mod page_slot;

use std::ptr;

use log::{debug, info, trace};

use crate::{
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    vm_config::VMConfig,
    vm_error::{VMError, VMResult},
};

pub(crate) use page_slot::PageSlot;

/// How a new page should be set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    /// RAM of this page may be reclaimed under memory pressure
    pub can_evict: bool,

    /// Start with zeroed contents
    pub zero: bool,

    /// Load the contents that are currently stored in the backing slot
    pub reuse_existing_contents: bool,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            can_evict: true,
            zero: true,
            reuse_existing_contents: false,
        }
    }
}

/// Snapshot of a page table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub allocated: bool,
    pub resident: bool,
    pub may_evict: bool,
    pub dirty: bool,
    pub is_heap: bool,
    pub is_container: bool,
    pub backing_offset: usize,
    pub last_access: u64,
    /// Amount of active references into this page
    pub pinned: usize,
}

/// Counters of everything the page manager did since initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VMStatistics {
    pub page_allocations: usize,
    pub page_frees: usize,
    pub swap_ins: usize,
    pub write_backs: usize,
    pub evictions: usize,
    pub heap_allocations: usize,
    pub heap_frees: usize,
    pub mode_transitions: usize,
}

/// Owns the page table, the storage and all page buffers.
///
/// Raw pointers returned by this type are only valid until the next call
/// that could evict pages, unless the accessed region is borrowed.
pub(crate) struct PageManager<S: PersistentStorageModule, M: MemoryProviderModule> {
    storage: S,
    memory: M,
    config: VMConfig,
    slots: Vec<PageSlot>,
    access_counter: u64,
    /// source of heap block stamps
    heap_stamp: u32,
    pub(crate) statistics: VMStatistics,
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> PageManager<S, M> {
    /// Sizes the storage to `page_count * page_size` zeroed bytes and sets up an empty page table
    pub(crate) fn new(mut storage: S, memory: M, config: VMConfig) -> VMResult<Self> {
        config.validate()?;

        storage
            .set_len(config.storage_size())
            .map_err(VMError::storage("resize"))?;

        // set_len does not overwrite data that is already there
        let zero_page = vec![0u8; config.page_size];
        for page in 0..config.page_count {
            let written = storage
                .write(page * config.page_size, &zero_page)
                .map_err(VMError::storage("write"))?;
            check_transfer("write", page, config.page_size, written)?;
        }
        storage.flush().map_err(VMError::storage("flush"))?;

        let slots = (0..config.page_count)
            .map(|page| PageSlot::new(page * config.page_size))
            .collect();

        info!(
            "Initialized page manager with {} pages of {} bytes",
            config.page_count, config.page_size
        );

        Ok(PageManager {
            storage,
            memory,
            config,
            slots,
            access_counter: 0,
            heap_stamp: 0,
            statistics: VMStatistics::default(),
        })
    }

    #[inline]
    pub(crate) fn config(&self) -> &VMConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn page_size(&self) -> usize {
        self.config.page_size
    }

    #[inline]
    pub(crate) fn page_count(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn memory(&self) -> &M {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    #[cfg(test)]
    pub(crate) fn storage(&self) -> &S {
        &self.storage
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub(crate) fn slot(&self, idx: usize) -> VMResult<&PageSlot> {
        self.slots.get(idx).ok_or(VMError::InvalidPage(idx))
    }

    pub(crate) fn slot_mut(&mut self, idx: usize) -> VMResult<&mut PageSlot> {
        self.slots.get_mut(idx).ok_or(VMError::InvalidPage(idx))
    }

    fn allocated_slot_mut(&mut self, idx: usize) -> VMResult<&mut PageSlot> {
        let slot = self.slot_mut(idx)?;
        if !slot.allocated {
            return Err(VMError::PageNotAllocated(idx));
        }
        Ok(slot)
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (usize, &PageSlot)> {
        self.slots.iter().enumerate()
    }

    pub(crate) fn next_heap_stamp(&mut self) -> u32 {
        self.heap_stamp = self.heap_stamp.wrapping_add(1);
        self.heap_stamp
    }

    fn touch(&mut self, idx: usize) {
        self.access_counter += 1;
        self.slots[idx].last_access = self.access_counter;
    }

    pub(crate) fn page_info(&self, idx: usize) -> VMResult<PageInfo> {
        let slot = self.slot(idx)?;
        Ok(PageInfo {
            allocated: slot.allocated,
            resident: slot.is_resident(),
            may_evict: slot.may_evict,
            dirty: slot.dirty,
            is_heap: slot.is_heap,
            is_container: slot.is_container,
            backing_offset: slot.backing_offset,
            last_access: slot.last_access,
            pinned: slot.pin_count(),
        })
    }

    /// Allocates the first free page slot
    pub(crate) fn allocate_page(&mut self, options: PageOptions) -> VMResult<usize> {
        let idx = self
            .slots
            .iter()
            .position(|slot| !slot.allocated)
            .ok_or(VMError::OutOfPages(self.slots.len()))?;

        self.allocate_page_at(idx, options)?;
        Ok(idx)
    }

    /// Allocates an evictable page that stores elements of a container
    pub(crate) fn allocate_container_page(&mut self) -> VMResult<usize> {
        let idx = self.allocate_page(PageOptions::default())?;
        self.slots[idx].is_container = true;
        Ok(idx)
    }

    /// Fails for pages whose contents belong to the heap or to a container
    pub(crate) fn check_raw_page(&self, idx: usize) -> VMResult<()> {
        let slot = self.slot(idx)?;
        if slot.is_heap || slot.is_container {
            return Err(VMError::PageInUse(idx));
        }
        Ok(())
    }

    pub(crate) fn allocate_page_at(&mut self, idx: usize, options: PageOptions) -> VMResult<()> {
        if self.slot(idx)?.allocated {
            return Err(VMError::PageAlreadyAllocated(idx));
        }

        let mut buffer = self.acquire_buffer(Some(idx))?;

        let dirty = if options.reuse_existing_contents {
            let backing_offset = self.slots[idx].backing_offset;
            if let Err(err) = self.read_into(idx, backing_offset, buffer.as_mut_slice()) {
                self.memory.release_page(buffer);
                return Err(err);
            }
            false
        } else {
            // buffers are handed out zeroed, so there is nothing to do for `zero`
            // new contents have to be persisted in both cases
            true
        };

        let slot = &mut self.slots[idx];
        slot.allocated = true;
        slot.may_evict = options.can_evict;
        slot.dirty = dirty;
        slot.is_heap = false;
        slot.is_container = false;
        slot.heap_free_hint = 0;
        slot.buffer = Some(buffer);

        self.touch(idx);
        self.statistics.page_allocations += 1;

        trace!("Allocated page {} ({:?})", idx, options);
        Ok(())
    }

    fn read_into(&mut self, page: usize, backing_offset: usize, dest: &mut [u8]) -> VMResult<()> {
        let read = self
            .storage
            .read(backing_offset, dest)
            .map_err(VMError::storage("read"))?;
        check_transfer("read", page, dest.len(), read)
    }

    /// Writes the page back to storage.
    ///
    /// Pages with active mutable references are skipped and stay dirty.
    /// On failure the page stays dirty and resident.
    fn write_back(&mut self, idx: usize) -> VMResult<bool> {
        let slot = &self.slots[idx];
        let buffer = match &slot.buffer {
            Some(buffer) => buffer,
            None => return Ok(false),
        };

        if slot.has_mutable_borrow() {
            trace!("Skipping write back of page {}: mutably borrowed", idx);
            return Ok(false);
        }

        let written = self
            .storage
            .write(slot.backing_offset, buffer.as_slice())
            .map_err(VMError::storage("write"))?;
        check_transfer("write", idx, self.config.page_size, written)?;

        self.slots[idx].dirty = false;
        self.statistics.write_backs += 1;
        trace!("Wrote back page {}", idx);

        Ok(true)
    }

    /// Writes the page back if it is dirty (or `force` is set) and releases its RAM if it may be evicted
    pub(crate) fn swap_out(&mut self, idx: usize, force: bool) -> VMResult<()> {
        let slot = self.allocated_slot_mut(idx)?;
        if !slot.is_resident() {
            return Ok(());
        }

        if slot.dirty || force {
            self.write_back(idx)?;
        }

        let slot = &mut self.slots[idx];
        if slot.may_evict && !slot.is_pinned() && !slot.dirty {
            if let Some(buffer) = slot.buffer.take() {
                self.memory.release_page(buffer);
                trace!("Released RAM of page {}", idx);
            }
        }

        Ok(())
    }

    /// Makes sure the page is resident
    pub(crate) fn swap_in(&mut self, idx: usize) -> VMResult<()> {
        let slot = self.allocated_slot_mut(idx)?;
        if slot.is_resident() {
            self.touch(idx);
            return Ok(());
        }

        let mut buffer = self.acquire_buffer(Some(idx))?;
        let backing_offset = self.slots[idx].backing_offset;
        if let Err(err) = self.read_into(idx, backing_offset, buffer.as_mut_slice()) {
            self.memory.release_page(buffer);
            return Err(err);
        }

        let slot = &mut self.slots[idx];
        slot.buffer = Some(buffer);
        slot.dirty = false;

        self.touch(idx);
        self.statistics.swap_ins += 1;
        trace!("Swapped in page {}", idx);

        Ok(())
    }

    /// Releases the page.
    ///
    /// If `wipe` is set, the backing bytes are overwritten with zeros instead of being flushed.
    pub(crate) fn free_page(&mut self, idx: usize, wipe: bool) -> VMResult<()> {
        let slot = self.allocated_slot_mut(idx)?;
        if slot.is_pinned() {
            return Err(VMError::PagePinned(idx));
        }

        if wipe {
            let zero_page = vec![0u8; self.config.page_size];
            let backing_offset = self.slots[idx].backing_offset;
            let written = self
                .storage
                .write(backing_offset, &zero_page)
                .map_err(VMError::storage("write"))?;
            check_transfer("write", idx, self.config.page_size, written)?;
        } else if self.slots[idx].dirty {
            self.write_back(idx)?;
        }

        if let Some(buffer) = self.slots[idx].reset() {
            self.memory.release_page(buffer);
        }

        self.statistics.page_frees += 1;
        trace!("Freed page {} (wipe: {})", idx, wipe);
        Ok(())
    }

    pub(crate) fn set_evictable(&mut self, idx: usize, may_evict: bool) -> VMResult<()> {
        self.allocated_slot_mut(idx)?.may_evict = may_evict;
        Ok(())
    }

    /// Writes back every dirty page and flushes the storage
    pub(crate) fn flush_all(&mut self) -> VMResult<()> {
        for idx in 0..self.slots.len() {
            let slot = &self.slots[idx];
            if slot.allocated && slot.dirty {
                self.write_back(idx)?;
            }
        }

        self.storage.flush().map_err(VMError::storage("flush"))
    }

    /// Flushes everything and gives the storage back
    pub(crate) fn shutdown(mut self) -> VMResult<S> {
        self.flush_all()?;

        for slot in self.slots.iter_mut() {
            if let Some(buffer) = slot.buffer.take() {
                self.memory.release_page(buffer);
            }
        }

        info!(
            "Shut down page manager after {} swap ins and {} write backs",
            self.statistics.swap_ins, self.statistics.write_backs
        );

        Ok(self.storage)
    }

    fn check_region(&self, idx: usize, offset: usize, len: usize) -> VMResult<()> {
        let page_size = self.config.page_size;
        match offset.checked_add(len) {
            Some(end) if offset < page_size && end <= page_size => Ok(()),
            _ => Err(VMError::InvalidOffset {
                page: idx,
                offset,
                len,
            }),
        }
    }

    /// Resolves `(idx, offset)` to a RAM address.
    ///
    /// Swaps the page in if needed and marks it dirty for write access.
    /// The returned pointer must not be used after the next call to this manager.
    pub(crate) fn region_ptr(
        &mut self,
        idx: usize,
        offset: usize,
        len: usize,
        write: bool,
    ) -> VMResult<*mut u8> {
        self.check_region(idx, offset, len)?;
        self.swap_in(idx)?;

        let slot = &mut self.slots[idx];
        if slot.conflicts(offset, len, write) {
            return Err(VMError::AlreadyBorrowed { page: idx, offset });
        }
        if write {
            slot.dirty = true;
        }

        match &slot.buffer {
            Some(buffer) => Ok(unsafe { buffer.as_ptr().add(offset) }),
            None => Err(VMError::PageNotAllocated(idx)),
        }
    }

    /// Same as `region_ptr` but pins the page until `release_region` is called.
    ///
    /// The pointer stays valid until then.
    pub(crate) fn borrow_region(
        &mut self,
        idx: usize,
        offset: usize,
        len: usize,
        mutable: bool,
    ) -> VMResult<*mut u8> {
        let ptr = self.region_ptr(idx, offset, len, mutable)?;
        self.slots[idx].add_borrow(offset, len, mutable);
        Ok(ptr)
    }

    pub(crate) fn release_region(&mut self, idx: usize, offset: usize, len: usize, mutable: bool) {
        let released = self
            .slots
            .get_mut(idx)
            .map(|slot| slot.remove_borrow(offset, len, mutable))
            .unwrap_or(false);
        debug_assert!(released, "released region that was not borrowed");
    }

    pub(crate) fn read_bytes(&mut self, idx: usize, offset: usize, dest: &mut [u8]) -> VMResult<()> {
        let src = self.region_ptr(idx, offset, dest.len(), false)?;
        unsafe { ptr::copy_nonoverlapping(src, dest.as_mut_ptr(), dest.len()) };
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, idx: usize, offset: usize, src: &[u8]) -> VMResult<()> {
        let dest = self.region_ptr(idx, offset, src.len(), true)?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dest, src.len()) };
        Ok(())
    }

    /// Moves the value at `(idx, offset)` out of the page
    ///
    /// # Safety
    ///
    /// There has to be an initialized `T` at this location, which is logically uninitialized afterwards.
    pub(crate) unsafe fn take_value<T>(&mut self, idx: usize, offset: usize) -> VMResult<T> {
        let src = self.region_ptr(idx, offset, std::mem::size_of::<T>(), true)?;
        Ok((src as *const T).read())
    }

    /// Moves `value` into the page without dropping the old contents
    ///
    /// # Safety
    ///
    /// `(idx, offset)` has to be suitably aligned for `T` and must not hold a value that still needs to be dropped.
    pub(crate) unsafe fn put_value<T>(&mut self, idx: usize, offset: usize, value: T) -> VMResult<()> {
        let dest = self.region_ptr(idx, offset, std::mem::size_of::<T>(), true)?;
        (dest as *mut T).write(value);
        Ok(())
    }

    /// Copies `len` bytes between two pages, both pages are resident at the same time while copying
    pub(crate) fn copy_between(
        &mut self,
        src_page: usize,
        src_offset: usize,
        dest_page: usize,
        dest_offset: usize,
        len: usize,
    ) -> VMResult<()> {
        if len == 0 {
            return Ok(());
        }

        if src_page != dest_page {
            // pin source, so it stays resident while the destination is swapped in
            self.borrow_region(src_page, src_offset, len, false)?;
            let res = self.swap_in(dest_page);
            self.release_region(src_page, src_offset, len, false);
            res?;
        }

        // both pages are resident now, so resolving them does not evict anything
        let dest = self.region_ptr(dest_page, dest_offset, len, true)?;
        let src = self.region_ptr(src_page, src_offset, len, false)?;
        unsafe { ptr::copy(src, dest, len) };
        Ok(())
    }

    pub(crate) fn record_mode_transition(&mut self) {
        self.statistics.mode_transitions += 1;
        debug!(
            "Sequence transitioned to paged mode ({} so far)",
            self.statistics.mode_transitions
        );
    }
}

fn check_transfer(operation: &'static str, page: usize, expected: usize, actual: usize) -> VMResult<()> {
    if expected != actual {
        return Err(VMError::ShortIo {
            operation,
            page,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::{
        modules::{memory_provider::LimitedMemoryProvider, persistent_storage::MemoryStorageModule},
        vm_config::VMConfig,
        vm_error::VMError,
    };

    use super::{PageManager, PageOptions};

    fn get_test_manager(
        page_count: usize,
        max_resident: usize,
    ) -> PageManager<MemoryStorageModule, LimitedMemoryProvider> {
        PageManager::new(
            MemoryStorageModule::new(),
            LimitedMemoryProvider::new(max_resident),
            VMConfig::new(256, page_count),
        )
        .unwrap()
    }

    #[test]
    fn test_page_manager_init_zero_fills() {
        let manager = get_test_manager(4, 2);
        assert_eq!(manager.storage().data().len(), 4 * 256);
        assert!(manager.storage().data().iter().all(|x| *x == 0));
        assert!(manager.slots().all(|(_, slot)| !slot.allocated && !slot.is_resident()));
    }

    #[test]
    fn test_page_manager_invalid_config() {
        let res = PageManager::new(
            MemoryStorageModule::new(),
            LimitedMemoryProvider::new(1),
            VMConfig::new(100, 4),
        );
        assert!(matches!(res, Err(VMError::InvalidConfig(_))));
    }

    #[test]
    fn test_page_manager_dirty_tracking() {
        let mut manager = get_test_manager(4, 4);
        let page = manager.allocate_page(PageOptions::default()).unwrap();
        assert!(manager.page_info(page).unwrap().dirty);

        manager.write_bytes(page, 10, &[1, 2, 3]).unwrap();
        manager.swap_out(page, false).unwrap();
        let info = manager.page_info(page).unwrap();
        assert!(!info.dirty);
        assert!(!info.resident);

        let mut buffer = [0u8; 3];
        manager.read_bytes(page, 10, &mut buffer).unwrap();
        assert_eq!(buffer, [1, 2, 3]);
        assert!(!manager.page_info(page).unwrap().dirty);

        assert!(matches!(
            manager.read_bytes(page, 255, &mut buffer),
            Err(VMError::InvalidOffset { .. })
        ));
        assert!(matches!(
            manager.read_bytes(7, 0, &mut buffer),
            Err(VMError::InvalidPage(7))
        ));
        assert!(matches!(
            manager.read_bytes(1, 0, &mut buffer),
            Err(VMError::PageNotAllocated(1))
        ));
    }

    #[test]
    fn test_page_manager_reuse_existing_contents() {
        let mut manager = get_test_manager(2, 2);
        let page = manager.allocate_page(PageOptions::default()).unwrap();
        manager.write_bytes(page, 0, &[9; 16]).unwrap();
        manager.free_page(page, false).unwrap();

        manager
            .allocate_page_at(
                page,
                PageOptions {
                    reuse_existing_contents: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!manager.page_info(page).unwrap().dirty);

        let mut buffer = [0u8; 16];
        manager.read_bytes(page, 0, &mut buffer).unwrap();
        assert_eq!(buffer, [9; 16]);

        assert!(matches!(
            manager.allocate_page_at(page, PageOptions::default()),
            Err(VMError::PageAlreadyAllocated(0))
        ));

        manager.free_page(page, true).unwrap();
        assert!(manager.storage().data()[..256].iter().all(|x| *x == 0));
    }

    #[test]
    fn test_page_manager_out_of_pages() {
        let mut manager = get_test_manager(2, 2);
        manager.allocate_page(PageOptions::default()).unwrap();
        manager.allocate_page(PageOptions::default()).unwrap();

        let err = manager.allocate_page(PageOptions::default()).unwrap_err();
        assert!(matches!(err, VMError::OutOfPages(2)));
        assert!(err.is_capacity_exhaustion());
    }

    #[test]
    fn test_page_manager_pinned_free() {
        let mut manager = get_test_manager(2, 2);
        let page = manager.allocate_page(PageOptions::default()).unwrap();

        manager.borrow_region(page, 0, 8, false).unwrap();
        assert!(matches!(
            manager.free_page(page, false),
            Err(VMError::PagePinned(0))
        ));
        assert!(matches!(
            manager.write_bytes(page, 4, &[1]),
            Err(VMError::AlreadyBorrowed { page: 0, offset: 4 })
        ));

        manager.release_region(page, 0, 8, false);
        manager.free_page(page, false).unwrap();
    }

    #[test]
    fn test_page_manager_copy_between() {
        let mut manager = get_test_manager(3, 2);
        let a = manager.allocate_page(PageOptions::default()).unwrap();
        let b = manager.allocate_page(PageOptions::default()).unwrap();
        manager.write_bytes(a, 0, &[5; 32]).unwrap();

        let c = manager.allocate_page(PageOptions::default()).unwrap();
        manager.copy_between(a, 0, c, 100, 32).unwrap();

        let mut buffer = [0u8; 32];
        manager.read_bytes(c, 100, &mut buffer).unwrap();
        assert_eq!(buffer, [5; 32]);

        // overlapping copy inside of one page
        manager.copy_between(c, 100, c, 104, 32).unwrap();
        manager.read_bytes(c, 104, &mut buffer).unwrap();
        assert_eq!(buffer, [5; 32]);

        manager.read_bytes(b, 0, &mut buffer).unwrap();
        assert_eq!(buffer, [0; 32]);
    }
}
