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

mod limited;
mod system;

use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    ptr::NonNull,
    slice,
};

pub use limited::LimitedMemoryProvider;
pub use system::SystemMemoryProvider;

/// Alignment of every page buffer
pub const PAGE_BUFFER_ALIGNMENT: usize = 16;

/// Owned and zeroed RAM block that holds the resident contents of one page.
pub struct PageBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl PageBuffer {
    /// Allocates a new zeroed buffer with `size` bytes from the global allocator.
    ///
    /// Returns `None` if the allocator is out of memory or `size` is zero.
    pub fn new_zeroed(size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }

        let layout = Layout::from_size_align(size, PAGE_BUFFER_ALIGNMENT).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };

        NonNull::new(ptr).map(|ptr| PageBuffer { ptr, layout })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Raw pointer to the first byte of this buffer.
    ///
    /// The address does not change while this buffer is alive.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// A module that provides RAM for resident pages during runtime.
///
/// Returning `None` makes the page manager evict other pages and try again.
pub trait MemoryProviderModule {
    /// Returns a new zeroed buffer with `size` bytes or `None` if no RAM is left
    fn allocate_page(&mut self, size: usize) -> Option<PageBuffer>;

    /// Gives a buffer previously returned by `allocate_page` back
    fn release_page(&mut self, buffer: PageBuffer);
}
