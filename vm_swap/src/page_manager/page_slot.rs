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

use crate::modules::memory_provider::PageBuffer;

/// Region of a page that is handed out to a reference guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Borrow {
    offset: usize,
    len: usize,
    mutable: bool,
}

impl Borrow {
    fn overlaps(&self, offset: usize, len: usize) -> bool {
        // zero sized regions still occupy their start address
        let end = offset + len.max(1);
        let self_end = self.offset + self.len.max(1);
        offset < self_end && self.offset < end
    }
}

/// Page table entry
pub(crate) struct PageSlot {
    pub(crate) allocated: bool,

    /// RAM may be reclaimed after a write back
    pub(crate) may_evict: bool,

    /// RAM contents differ from the backing storage
    pub(crate) dirty: bool,

    pub(crate) is_heap: bool,

    /// holds elements of a vector or an array
    pub(crate) is_container: bool,

    /// fixed position inside of the storage
    pub(crate) backing_offset: usize,

    pub(crate) last_access: u64,

    /// `Some` while resident
    pub(crate) buffer: Option<PageBuffer>,

    /// upper bound of the largest block that could be allocated on this heap page
    pub(crate) heap_free_hint: usize,

    borrows: Vec<Borrow>,
}

impl PageSlot {
    pub(crate) fn new(backing_offset: usize) -> Self {
        PageSlot {
            allocated: false,
            may_evict: false,
            dirty: false,
            is_heap: false,
            is_container: false,
            backing_offset,
            last_access: 0,
            buffer: None,
            heap_free_hint: 0,
            borrows: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn is_resident(&self) -> bool {
        self.buffer.is_some()
    }

    /// Pinned pages are referenced and can neither be evicted nor freed
    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        !self.borrows.is_empty()
    }

    #[inline]
    pub(crate) fn pin_count(&self) -> usize {
        self.borrows.len()
    }

    #[inline]
    pub(crate) fn has_mutable_borrow(&self) -> bool {
        self.borrows.iter().any(|b| b.mutable)
    }

    /// Can this page give its buffer back right now?
    #[inline]
    pub(crate) fn is_evictable(&self) -> bool {
        self.allocated && self.may_evict && self.is_resident() && !self.is_pinned()
    }

    /// Checks if accessing `[offset, offset + len)` conflicts with an active borrow.
    ///
    /// Mutable access conflicts with every overlapping borrow, shared access only with mutable ones.
    pub(crate) fn conflicts(&self, offset: usize, len: usize, mutable: bool) -> bool {
        self.borrows
            .iter()
            .any(|b| (mutable || b.mutable) && b.overlaps(offset, len))
    }

    pub(crate) fn add_borrow(&mut self, offset: usize, len: usize, mutable: bool) {
        self.borrows.push(Borrow {
            offset,
            len,
            mutable,
        });
    }

    /// Removes one borrow of the region, returns `false` if there is none
    pub(crate) fn remove_borrow(&mut self, offset: usize, len: usize, mutable: bool) -> bool {
        let target = Borrow {
            offset,
            len,
            mutable,
        };
        match self.borrows.iter().position(|b| *b == target) {
            Some(index) => {
                self.borrows.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Resets everything except for the backing offset.
    ///
    /// Returns the buffer if the slot was resident.
    pub(crate) fn reset(&mut self) -> Option<PageBuffer> {
        debug_assert!(self.borrows.is_empty());

        self.allocated = false;
        self.may_evict = false;
        self.dirty = false;
        self.is_heap = false;
        self.is_container = false;
        self.last_access = 0;
        self.heap_free_hint = 0;
        self.buffer.take()
    }
}

#[cfg(test)]
mod test {
    use super::PageSlot;

    #[test]
    fn test_page_slot_borrows() {
        let mut slot = PageSlot::new(0);
        assert!(!slot.is_pinned());

        slot.add_borrow(16, 8, false);
        slot.add_borrow(16, 8, false);
        assert_eq!(slot.pin_count(), 2);

        // shared borrows only conflict with mutable access
        assert!(!slot.conflicts(16, 8, false));
        assert!(slot.conflicts(20, 8, true));
        assert!(!slot.conflicts(24, 8, true));
        assert!(!slot.conflicts(8, 8, true));

        slot.add_borrow(32, 0, true);
        assert!(slot.has_mutable_borrow());
        assert!(slot.conflicts(32, 4, false));

        assert!(slot.remove_borrow(16, 8, false));
        assert!(slot.remove_borrow(32, 0, true));
        assert!(!slot.remove_borrow(32, 0, true));
        assert_eq!(slot.pin_count(), 1);
        assert!(!slot.has_mutable_borrow());
    }
}
