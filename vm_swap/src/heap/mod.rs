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

mod free_list;

use log::{trace, warn};

use crate::{
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    page_manager::{PageManager, PageOptions},
    util::round_up_to_nearest,
    vm_error::{VMError, VMResult},
};

pub use free_list::HeapBlockInfo;
use free_list::{HeapPageView, PageFit};

/// Every heap payload offset and size is a multiple of this
pub const HEAP_ALIGNMENT: usize = 8;

/// Size of the header at the beginning of each heap page
pub const HEAP_HEADER_SIZE: usize = 16;

/// Size of the header in front of each heap block
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Location of a heap block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapAllocation {
    pub page: usize,
    /// payload offset inside of the page
    pub offset: usize,
    /// payload size, can be bigger than requested
    pub size: usize,
    /// differs between successive allocations of the same block
    pub stamp: u32,
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> PageManager<S, M> {
    /// Largest payload a single heap block can hold
    pub(crate) fn max_heap_payload(&self) -> usize {
        HeapPageView::max_payload(self.page_size())
    }

    /// Returns a view on the heap page `idx` that has to be resident already
    fn heap_view(&mut self, idx: usize) -> VMResult<HeapPageView> {
        let page_size = self.page_size();
        let base = self.region_ptr(idx, 0, 0, false)?;
        Ok(unsafe { HeapPageView::new(base, page_size, idx) })
    }

    fn mark_dirty(&mut self, idx: usize) -> VMResult<()> {
        self.slot_mut(idx)?.dirty = true;
        Ok(())
    }

    /// First fit allocation over all heap pages, creates a new heap page if nothing fits
    pub(crate) fn heap_allocate(&mut self, size: usize) -> VMResult<HeapAllocation> {
        let max = self.max_heap_payload();
        let aligned = round_up_to_nearest(size.max(1), HEAP_ALIGNMENT);
        if size > max || aligned > max {
            return Err(VMError::SizeLimit {
                requested: size,
                max,
            });
        }

        let candidates: Vec<usize> = self
            .slots()
            .filter(|(_, slot)| slot.allocated && slot.is_heap && slot.heap_free_hint >= aligned)
            .map(|(idx, _)| idx)
            .collect();

        for idx in candidates {
            if let Some(allocation) = self.heap_allocate_on(idx, aligned)? {
                return Ok(allocation);
            }
        }

        let idx = self.allocate_page(PageOptions {
            can_evict: true,
            zero: true,
            reuse_existing_contents: false,
        })?;
        self.format_heap_page(idx)?;

        match self.heap_allocate_on(idx, aligned)? {
            Some(allocation) => Ok(allocation),
            None => Err(VMError::CorruptedHeapPage {
                page: idx,
                reason: "fresh heap page has no room",
            }),
        }
    }

    fn format_heap_page(&mut self, idx: usize) -> VMResult<()> {
        let mut view = self.heap_view(idx)?;
        view.format();
        self.mark_dirty(idx)?;

        let max = self.max_heap_payload();
        let slot = self.slot_mut(idx)?;
        slot.is_heap = true;
        slot.heap_free_hint = max;

        trace!("Formatted heap page {}", idx);
        Ok(())
    }

    fn heap_allocate_on(&mut self, idx: usize, size: usize) -> VMResult<Option<HeapAllocation>> {
        self.swap_in(idx)?;
        let mut view = self.heap_view(idx)?;

        match view.allocate(size)? {
            PageFit::Allocated { offset, size } => {
                let stamp = self.next_heap_stamp();
                view.set_block_stamp(offset, stamp)?;
                let remaining = view.free_bytes();
                self.mark_dirty(idx)?;

                let slot = self.slot_mut(idx)?;
                slot.heap_free_hint = slot.heap_free_hint.min(remaining);
                self.statistics.heap_allocations += 1;
                trace!(
                    "Allocated heap block of {} bytes at page {}, offset {}",
                    size,
                    idx,
                    offset
                );

                Ok(Some(HeapAllocation {
                    page: idx,
                    offset,
                    size,
                    stamp,
                }))
            }
            PageFit::NoFit { largest } => {
                self.slot_mut(idx)?.heap_free_hint = largest;
                Ok(None)
            }
        }
    }

    fn checked_heap_page(&self, page: usize, offset: usize) -> VMResult<()> {
        let slot = self.slot(page)?;
        if !slot.allocated || !slot.is_heap {
            return Err(VMError::InvalidFree { page, offset });
        }
        Ok(())
    }

    /// Payload size of the used block at `(page, offset)`
    pub(crate) fn heap_block_size(&mut self, page: usize, offset: usize) -> VMResult<usize> {
        self.checked_heap_page(page, offset)?;
        self.swap_in(page)?;
        self.heap_view(page)?.used_block_size(offset)
    }

    /// Payload size of the used block at `(page, offset)` if it is still the allocation with `stamp`.
    ///
    /// Fails with [`VMError::InvalidFree`] once the block was freed, even if it got reused since.
    pub(crate) fn heap_block_size_stamped(
        &mut self,
        page: usize,
        offset: usize,
        stamp: u32,
    ) -> VMResult<usize> {
        let size = self.heap_block_size(page, offset)?;
        if self.heap_view(page)?.block_stamp(offset)? != stamp {
            return Err(VMError::InvalidFree { page, offset });
        }
        Ok(size)
    }

    /// Puts the block back into the free list of its page.
    ///
    /// Fails if the block is still referenced or not allocated (e.g. a double free).
    pub(crate) fn heap_free(&mut self, page: usize, offset: usize) -> VMResult<()> {
        self.checked_heap_page(page, offset)?;
        self.swap_in(page)?;

        let mut view = self.heap_view(page)?;
        let size = view.used_block_size(offset)?;
        if self.slot(page)?.conflicts(offset, size, true) {
            return Err(VMError::AlreadyBorrowed { page, offset });
        }

        view.free(offset)?;
        self.mark_dirty(page)?;

        let slot = self.slot_mut(page)?;
        slot.heap_free_hint = slot.heap_free_hint.max(size);
        self.statistics.heap_frees += 1;

        trace!("Freed heap block of {} bytes at page {}, offset {}", size, page, offset);
        Ok(())
    }

    /// Moves a block into a new allocation of `new_size` bytes.
    ///
    /// Copies `min(copy_bytes, new_size)` bytes and frees the old block afterwards.
    pub(crate) fn heap_realloc(
        &mut self,
        page: usize,
        offset: usize,
        new_size: usize,
        copy_bytes: usize,
    ) -> VMResult<HeapAllocation> {
        let old_size = self.heap_block_size(page, offset)?;
        let new = self.heap_allocate(new_size)?;

        let len = copy_bytes.min(new_size).min(old_size);
        let copied = self
            .copy_between(page, offset, new.page, new.offset, len)
            .and_then(|_| self.heap_free(page, offset));

        if let Err(err) = copied {
            // keep the old block, give the new one back
            if let Err(free_err) = self.heap_free(new.page, new.offset) {
                warn!(
                    "Could not release block at page {}, offset {} after failed realloc: {}",
                    new.page, new.offset, free_err
                );
            }
            return Err(err);
        }

        Ok(new)
    }

    /// Walks all blocks of heap page `page` in physical order
    pub(crate) fn heap_blocks(&mut self, page: usize) -> VMResult<Vec<HeapBlockInfo>> {
        let slot = self.slot(page)?;
        if !slot.allocated {
            return Err(VMError::PageNotAllocated(page));
        }
        if !slot.is_heap {
            return Err(VMError::CorruptedHeapPage {
                page,
                reason: "not a heap page",
            });
        }

        self.swap_in(page)?;
        self.heap_view(page)?.blocks()
    }

    /// Indices of all heap pages
    pub(crate) fn heap_pages(&self) -> Vec<usize> {
        self.slots()
            .filter(|(_, slot)| slot.allocated && slot.is_heap)
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use crate::{
        modules::{memory_provider::LimitedMemoryProvider, persistent_storage::MemoryStorageModule},
        page_manager::PageManager,
        vm_config::VMConfig,
        vm_error::VMError,
    };

    use super::{HeapAllocation, BLOCK_HEADER_SIZE, HEAP_HEADER_SIZE};

    type TestManager = PageManager<MemoryStorageModule, LimitedMemoryProvider>;

    fn get_test_manager(page_size: usize, page_count: usize, max_resident: usize) -> TestManager {
        PageManager::new(
            MemoryStorageModule::new(),
            LimitedMemoryProvider::new(max_resident),
            VMConfig::new(page_size, page_count),
        )
        .unwrap()
    }

    fn check_conservation(manager: &mut TestManager) {
        let page_size = manager.page_size();
        for page in manager.heap_pages() {
            let blocks = manager.heap_blocks(page).unwrap();
            let covered: usize = blocks.iter().map(|b| b.size + BLOCK_HEADER_SIZE).sum();
            assert_eq!(covered + HEAP_HEADER_SIZE, page_size, "page {}", page);
        }
    }

    #[test]
    fn test_heap_second_page_for_big_block() {
        let mut manager = get_test_manager(4096, 16, 16);
        assert_eq!(manager.max_heap_payload(), 4064);

        let a = manager.heap_allocate(100).unwrap();
        assert_eq!(a.size, 104);

        // 3944 bytes are left on the first page
        let b = manager.heap_allocate(4000).unwrap();
        assert_ne!(a.page, b.page);

        let c = manager.heap_allocate(50).unwrap();
        assert_eq!(c.page, a.page);
        assert_eq!(manager.heap_pages().len(), 2);

        check_conservation(&mut manager);
    }

    #[test]
    fn test_heap_size_limit() {
        let mut manager = get_test_manager(4096, 4, 4);

        assert!(manager.heap_allocate(4064).is_ok());
        let err = manager.heap_allocate(4065).unwrap_err();
        assert!(matches!(
            err,
            VMError::SizeLimit {
                requested: 4065,
                max: 4064
            }
        ));
        assert!(!err.is_capacity_exhaustion());
    }

    #[test]
    fn test_heap_double_free() {
        let mut manager = get_test_manager(512, 4, 4);
        let a = manager.heap_allocate(24).unwrap();
        manager.heap_free(a.page, a.offset).unwrap();

        assert!(matches!(
            manager.heap_free(a.page, a.offset),
            Err(VMError::InvalidFree { .. })
        ));
        assert!(matches!(
            manager.heap_free(3, 32),
            Err(VMError::InvalidFree { page: 3, offset: 32 })
        ));
    }

    #[test]
    fn test_heap_stamp_changes_on_reuse() {
        let mut manager = get_test_manager(512, 4, 4);
        let a = manager.heap_allocate(16).unwrap();
        assert_eq!(manager.heap_block_size_stamped(a.page, a.offset, a.stamp).unwrap(), 16);

        manager.heap_free(a.page, a.offset).unwrap();
        let b = manager.heap_allocate(16).unwrap();
        assert_eq!((b.page, b.offset), (a.page, a.offset));
        assert_ne!(b.stamp, a.stamp);

        assert!(matches!(
            manager.heap_block_size_stamped(a.page, a.offset, a.stamp),
            Err(VMError::InvalidFree { .. })
        ));
        assert_eq!(manager.heap_block_size_stamped(b.page, b.offset, b.stamp).unwrap(), 16);
    }

    #[test]
    fn test_heap_realloc_moves_data() {
        let mut manager = get_test_manager(512, 4, 2);
        let a = manager.heap_allocate(16).unwrap();
        manager.write_bytes(a.page, a.offset, &[1, 2, 3, 4]).unwrap();

        let b = manager.heap_realloc(a.page, a.offset, 400, 16).unwrap();
        assert!(b.size >= 400);

        let mut buffer = [0u8; 4];
        manager.read_bytes(b.page, b.offset, &mut buffer).unwrap();
        assert_eq!(buffer, [1, 2, 3, 4]);

        // old block is free again
        assert!(manager.heap_free(a.page, a.offset).is_err());
        check_conservation(&mut manager);
    }

    #[test]
    fn test_heap_skips_full_pages_without_swap_in() {
        let mut manager = get_test_manager(512, 4, 4);
        let max = manager.max_heap_payload();

        let a = manager.heap_allocate(max).unwrap();
        manager.swap_out(a.page, false).unwrap();
        manager.heap_allocate(max).unwrap();

        // scanning the first (full) page would have swapped it back in
        assert!(!manager.page_info(a.page).unwrap().resident);
    }

    #[test]
    fn test_heap_allocator_conservation_random() {
        const SEED: u64 = 7355608;
        let mut rand = SmallRng::seed_from_u64(SEED);
        let mut manager = get_test_manager(1024, 8, 3);
        let mut live: Vec<HeapAllocation> = Vec::new();

        for _ in 0..500 {
            if live.is_empty() || rand.gen_bool(0.6) {
                let size = rand.gen_range(1..200);
                match manager.heap_allocate(size) {
                    Ok(allocation) => {
                        assert!(allocation.size >= size);
                        live.push(allocation);
                    }
                    Err(err) => assert!(err.is_capacity_exhaustion()),
                }
            } else {
                let index = rand.gen_range(0..live.len());
                let allocation = live.swap_remove(index);
                manager
                    .heap_free(allocation.page, allocation.offset)
                    .unwrap();
            }

            check_conservation(&mut manager);
        }

        let live_blocks: usize = manager
            .heap_pages()
            .into_iter()
            .map(|page| {
                manager
                    .heap_blocks(page)
                    .unwrap()
                    .into_iter()
                    .filter(|b| !b.free)
                    .count()
            })
            .sum();
        assert_eq!(live_blocks, live.len());
    }
}
