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

use std::mem::size_of;

use memoffset::offset_of;
use static_assertions::const_assert_eq;

use crate::vm_error::{VMError, VMResult};

use super::{BLOCK_HEADER_SIZE, HEAP_ALIGNMENT, HEAP_HEADER_SIZE};

pub(crate) const HEAP_MAGIC: u32 = 0x564D_4850;
pub(crate) const HEAP_VERSION: u32 = 1;

pub(crate) const BLOCK_USED: u32 = 0x5553_4544;
pub(crate) const BLOCK_FREE: u32 = 0x4652_4545;

/// Marks the end of the free list
pub(crate) const NULL_OFFSET: u32 = u32::MAX;

/// Header at offset 0 of every heap page
#[repr(C)]
struct HeapHeader {
    magic: u32,
    version: u32,
    first_free: u32,
    /// sum of the payload sizes of all free blocks
    free_bytes: u32,
}

/// Header in front of every block payload
#[repr(C)]
struct BlockHeader {
    /// payload size
    size: u32,
    state: u32,
    /// only meaningful while free
    next_free: u32,
    /// set on every allocation, tells apart successive owners of the same block
    stamp: u32,
}

const_assert_eq!(size_of::<HeapHeader>(), HEAP_HEADER_SIZE);
const_assert_eq!(size_of::<BlockHeader>(), BLOCK_HEADER_SIZE);

/// One physical block of a heap page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBlockInfo {
    /// offset of the payload inside of the page
    pub offset: usize,
    /// payload size in bytes
    pub size: usize,
    pub free: bool,
}

/// Result of a first fit search inside of one heap page
pub(crate) enum PageFit {
    /// Block was taken: payload offset and actual payload size
    Allocated { offset: usize, size: usize },
    /// Nothing fits, payload size of the largest free block
    NoFit { largest: usize },
}

/// View on the heap structures of a resident page.
///
/// Only the header fields are accessed, so payloads handed out to
/// references stay untouched while the allocator works on the same page.
pub(crate) struct HeapPageView {
    base: *mut u8,
    page_size: usize,
    page: usize,
}

impl HeapPageView {
    /// # Safety
    ///
    /// `base` has to point to a resident page buffer with `page_size` bytes
    /// that stays alive and in place as long as this view is used.
    pub(crate) unsafe fn new(base: *mut u8, page_size: usize, page: usize) -> Self {
        debug_assert!(page_size <= u32::MAX as usize);
        HeapPageView {
            base,
            page_size,
            page,
        }
    }

    /// Largest payload a single block of a page can hold
    pub(crate) const fn max_payload(page_size: usize) -> usize {
        page_size - HEAP_HEADER_SIZE - BLOCK_HEADER_SIZE
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.page_size);
        let bytes = unsafe { (self.base.add(offset) as *const [u8; 4]).read_unaligned() };
        u32::from_le_bytes(bytes)
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.page_size);
        unsafe { (self.base.add(offset) as *mut [u8; 4]).write_unaligned(value.to_le_bytes()) }
    }

    fn corrupted(&self, reason: &'static str) -> VMError {
        VMError::CorruptedHeapPage {
            page: self.page,
            reason,
        }
    }

    fn header_field(&self, field: usize) -> u32 {
        self.read_u32(field)
    }

    fn set_header_field(&mut self, field: usize, value: u32) {
        self.write_u32(field, value)
    }

    fn block_field(&self, block: usize, field: usize) -> u32 {
        self.read_u32(block + field)
    }

    fn set_block_field(&mut self, block: usize, field: usize, value: u32) {
        self.write_u32(block + field, value)
    }

    /// Writes an empty heap: the header followed by one free block spanning the rest of the page
    pub(crate) fn format(&mut self) {
        let first = HEAP_HEADER_SIZE;
        let size = Self::max_payload(self.page_size) as u32;

        self.set_header_field(offset_of!(HeapHeader, magic), HEAP_MAGIC);
        self.set_header_field(offset_of!(HeapHeader, version), HEAP_VERSION);
        self.set_header_field(offset_of!(HeapHeader, first_free), first as u32);
        self.set_header_field(offset_of!(HeapHeader, free_bytes), size);

        self.write_block(first, size, BLOCK_FREE, NULL_OFFSET);
    }

    fn write_block(&mut self, block: usize, size: u32, state: u32, next_free: u32) {
        self.set_block_field(block, offset_of!(BlockHeader, size), size);
        self.set_block_field(block, offset_of!(BlockHeader, state), state);
        self.set_block_field(block, offset_of!(BlockHeader, next_free), next_free);
        self.set_block_field(block, offset_of!(BlockHeader, stamp), 0);
    }

    fn check_header(&self) -> VMResult<()> {
        if self.header_field(offset_of!(HeapHeader, magic)) != HEAP_MAGIC {
            return Err(self.corrupted("invalid magic"));
        }
        if self.header_field(offset_of!(HeapHeader, version)) != HEAP_VERSION {
            return Err(self.corrupted("unsupported format version"));
        }
        Ok(())
    }

    /// Checks that `block` can be a block header and returns its payload size
    fn checked_block(&self, block: usize) -> VMResult<usize> {
        if block < HEAP_HEADER_SIZE
            || block % HEAP_ALIGNMENT != 0
            || block + BLOCK_HEADER_SIZE > self.page_size
        {
            return Err(self.corrupted("block offset out of range"));
        }

        let size = self.block_field(block, offset_of!(BlockHeader, size)) as usize;
        if size % HEAP_ALIGNMENT != 0 || block + BLOCK_HEADER_SIZE + size > self.page_size {
            return Err(self.corrupted("block size out of range"));
        }

        Ok(size)
    }

    /// Maximum steps of a walk, bounds walks over a cyclic free list
    fn max_steps(&self) -> usize {
        self.page_size / BLOCK_HEADER_SIZE
    }

    pub(crate) fn free_bytes(&self) -> usize {
        self.header_field(offset_of!(HeapHeader, free_bytes)) as usize
    }

    /// First fit search for a block with at least `size` payload bytes.
    ///
    /// `size` has to be aligned to [`HEAP_ALIGNMENT`] already.
    pub(crate) fn allocate(&mut self, size: usize) -> VMResult<PageFit> {
        debug_assert_eq!(size % HEAP_ALIGNMENT, 0);
        self.check_header()?;

        if self.free_bytes() < size {
            // free_bytes is an upper bound of the largest block
            return Ok(PageFit::NoFit {
                largest: self.free_bytes(),
            });
        }

        let mut prev: Option<usize> = None;
        let mut curr = self.header_field(offset_of!(HeapHeader, first_free));
        let mut largest = 0;
        let mut steps = 0;

        while curr != NULL_OFFSET {
            steps += 1;
            if steps > self.max_steps() {
                return Err(self.corrupted("cycle in free list"));
            }

            let block = curr as usize;
            let block_size = self.checked_block(block)?;
            if self.block_field(block, offset_of!(BlockHeader, state)) != BLOCK_FREE {
                return Err(self.corrupted("used block inside of free list"));
            }

            let next = self.block_field(block, offset_of!(BlockHeader, next_free));

            if block_size >= size {
                let leftover = block_size - size;
                let free_bytes = self.free_bytes();

                let (replacement, consumed, actual) =
                    if leftover >= BLOCK_HEADER_SIZE + HEAP_ALIGNMENT {
                        // split, the remainder takes the place of this block inside of the list
                        let rest = block + BLOCK_HEADER_SIZE + size;
                        let rest_size = (leftover - BLOCK_HEADER_SIZE) as u32;
                        self.write_block(rest, rest_size, BLOCK_FREE, next);
                        self.set_block_field(block, offset_of!(BlockHeader, size), size as u32);

                        (rest as u32, size + BLOCK_HEADER_SIZE, size)
                    } else {
                        (next, block_size, block_size)
                    };

                match prev {
                    Some(prev) => {
                        self.set_block_field(prev, offset_of!(BlockHeader, next_free), replacement)
                    }
                    None => self.set_header_field(offset_of!(HeapHeader, first_free), replacement),
                }

                self.set_block_field(block, offset_of!(BlockHeader, state), BLOCK_USED);
                self.set_block_field(block, offset_of!(BlockHeader, next_free), NULL_OFFSET);
                self.set_header_field(
                    offset_of!(HeapHeader, free_bytes),
                    free_bytes.saturating_sub(consumed) as u32,
                );

                return Ok(PageFit::Allocated {
                    offset: block + BLOCK_HEADER_SIZE,
                    size: actual,
                });
            }

            largest = largest.max(block_size);
            prev = Some(block);
            curr = next;
        }

        Ok(PageFit::NoFit { largest })
    }

    /// Payload size of the used block at payload offset `offset`
    pub(crate) fn used_block_size(&self, offset: usize) -> VMResult<usize> {
        self.check_header()?;

        let invalid = VMError::InvalidFree {
            page: self.page,
            offset,
        };
        if offset < HEAP_HEADER_SIZE + BLOCK_HEADER_SIZE || offset % HEAP_ALIGNMENT != 0 {
            return Err(invalid);
        }

        let block = offset - BLOCK_HEADER_SIZE;
        if block + BLOCK_HEADER_SIZE > self.page_size
            || self.block_field(block, offset_of!(BlockHeader, state)) != BLOCK_USED
        {
            return Err(invalid);
        }

        self.checked_block(block)
    }

    /// Stamp of the used block at payload offset `offset`
    pub(crate) fn block_stamp(&self, offset: usize) -> VMResult<u32> {
        self.used_block_size(offset)?;
        Ok(self.block_field(offset - BLOCK_HEADER_SIZE, offset_of!(BlockHeader, stamp)))
    }

    pub(crate) fn set_block_stamp(&mut self, offset: usize, stamp: u32) -> VMResult<()> {
        self.used_block_size(offset)?;
        self.set_block_field(offset - BLOCK_HEADER_SIZE, offset_of!(BlockHeader, stamp), stamp);
        Ok(())
    }

    /// Puts the block at payload offset `offset` at the head of the free list.
    ///
    /// Adjacent free blocks are not merged. Returns the payload size of the freed block.
    pub(crate) fn free(&mut self, offset: usize) -> VMResult<usize> {
        let size = self.used_block_size(offset)?;
        let block = offset - BLOCK_HEADER_SIZE;

        let head = self.header_field(offset_of!(HeapHeader, first_free));
        self.set_block_field(block, offset_of!(BlockHeader, state), BLOCK_FREE);
        self.set_block_field(block, offset_of!(BlockHeader, next_free), head);
        self.set_header_field(offset_of!(HeapHeader, first_free), block as u32);

        let free_bytes = self.free_bytes() + size;
        self.set_header_field(offset_of!(HeapHeader, free_bytes), free_bytes as u32);

        Ok(size)
    }

    /// Walks all blocks in physical order
    pub(crate) fn blocks(&self) -> VMResult<Vec<HeapBlockInfo>> {
        self.check_header()?;

        let mut blocks = Vec::new();
        let mut block = HEAP_HEADER_SIZE;
        while block < self.page_size {
            if blocks.len() > self.max_steps() {
                return Err(self.corrupted("too many blocks"));
            }

            let size = self.checked_block(block)?;
            let free = match self.block_field(block, offset_of!(BlockHeader, state)) {
                BLOCK_FREE => true,
                BLOCK_USED => false,
                _ => return Err(self.corrupted("invalid block state")),
            };

            blocks.push(HeapBlockInfo {
                offset: block + BLOCK_HEADER_SIZE,
                size,
                free,
            });
            block += BLOCK_HEADER_SIZE + size;
        }

        if block != self.page_size {
            return Err(self.corrupted("blocks do not cover the page"));
        }

        Ok(blocks)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        heap::{BLOCK_HEADER_SIZE, HEAP_HEADER_SIZE},
        modules::memory_provider::PageBuffer,
        vm_error::VMError,
    };

    use super::{HeapPageView, PageFit};

    const PAGE_SIZE: usize = 512;

    fn allocated(fit: PageFit) -> (usize, usize) {
        match fit {
            PageFit::Allocated { offset, size } => (offset, size),
            PageFit::NoFit { largest } => panic!("no fit, largest block: {}", largest),
        }
    }

    #[test]
    fn test_heap_page_split_and_exact_fit() {
        let buffer = PageBuffer::new_zeroed(PAGE_SIZE).unwrap();
        let mut view = unsafe { HeapPageView::new(buffer.as_ptr(), PAGE_SIZE, 0) };
        view.format();

        let max = HeapPageView::max_payload(PAGE_SIZE);
        assert_eq!(view.free_bytes(), max);

        let (a, a_size) = allocated(view.allocate(64).unwrap());
        assert_eq!(a, HEAP_HEADER_SIZE + BLOCK_HEADER_SIZE);
        assert_eq!(a_size, 64);
        assert_eq!(view.free_bytes(), max - 64 - BLOCK_HEADER_SIZE);

        // remaining block is too small to split off another block
        let rest = view.free_bytes();
        let (b, b_size) = allocated(view.allocate(rest - 8).unwrap());
        assert_eq!(b, a + 64 + BLOCK_HEADER_SIZE);
        assert_eq!(b_size, rest);
        assert_eq!(view.free_bytes(), 0);

        assert!(matches!(view.allocate(8).unwrap(), PageFit::NoFit { largest: 0 }));
    }

    #[test]
    fn test_heap_page_free_reuse() {
        let buffer = PageBuffer::new_zeroed(PAGE_SIZE).unwrap();
        let mut view = unsafe { HeapPageView::new(buffer.as_ptr(), PAGE_SIZE, 3) };
        view.format();

        let (a, _) = allocated(view.allocate(32).unwrap());
        let (b, _) = allocated(view.allocate(32).unwrap());
        let (_c, _) = allocated(view.allocate(32).unwrap());

        assert_eq!(view.free(a).unwrap(), 32);
        assert_eq!(view.free(b).unwrap(), 32);

        // freed blocks are not merged, b is the head of the free list now
        let (d, _) = allocated(view.allocate(32).unwrap());
        assert_eq!(d, b);
        let (e, _) = allocated(view.allocate(24).unwrap());
        assert_eq!(e, a);

        let blocks = view.blocks().unwrap();
        let covered: usize = blocks.iter().map(|b| b.size + BLOCK_HEADER_SIZE).sum();
        assert_eq!(covered + HEAP_HEADER_SIZE, PAGE_SIZE);
    }

    #[test]
    fn test_heap_page_invalid_free() {
        let buffer = PageBuffer::new_zeroed(PAGE_SIZE).unwrap();
        let mut view = unsafe { HeapPageView::new(buffer.as_ptr(), PAGE_SIZE, 1) };
        view.format();

        let (a, _) = allocated(view.allocate(16).unwrap());
        view.set_block_stamp(a, 77).unwrap();
        assert_eq!(view.block_stamp(a).unwrap(), 77);
        view.free(a).unwrap();

        // stamps of free blocks are not readable
        assert!(matches!(view.block_stamp(a), Err(VMError::InvalidFree { .. })));

        assert!(matches!(
            view.free(a),
            Err(VMError::InvalidFree { page: 1, offset }) if offset == a
        ));
        assert!(matches!(view.free(3), Err(VMError::InvalidFree { .. })));
        assert!(matches!(view.free(PAGE_SIZE + 8), Err(VMError::InvalidFree { .. })));
    }

    #[test]
    fn test_heap_page_detects_corruption() {
        let mut buffer = PageBuffer::new_zeroed(PAGE_SIZE).unwrap();
        {
            let view = unsafe { HeapPageView::new(buffer.as_ptr(), PAGE_SIZE, 2) };
            assert!(matches!(
                view.blocks(),
                Err(VMError::CorruptedHeapPage { page: 2, .. })
            ));
        }

        let mut view = unsafe { HeapPageView::new(buffer.as_ptr(), PAGE_SIZE, 2) };
        view.format();

        // let the first free block point to itself
        let first = HEAP_HEADER_SIZE;
        buffer.as_mut_slice()[first..first + 4].copy_from_slice(&8u32.to_le_bytes());
        buffer.as_mut_slice()[first + 8..first + 12].copy_from_slice(&(first as u32).to_le_bytes());

        assert!(matches!(
            view.allocate(64),
            Err(VMError::CorruptedHeapPage { page: 2, .. })
        ));
    }
}
