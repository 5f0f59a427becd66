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

use std::io;

use thiserror::Error;

/// Errors returned by the page manager, the heap allocator and the containers on top of them.
#[derive(Error, Debug)]
pub enum VMError {
    /// The storage backend reported an error
    #[error("storage {operation} failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// The storage backend transferred less bytes than requested
    #[error("short {operation} on page {page}: expected {expected} bytes, got {actual}")]
    ShortIo {
        operation: &'static str,
        page: usize,
        expected: usize,
        actual: usize,
    },

    /// No RAM could be obtained, even after evicting every evictable page
    #[error("out of memory: no evictable page left to make room for page data")]
    OutOfMemory,

    /// Every page slot is allocated already
    #[error("out of pages: all {0} page slots are allocated")]
    OutOfPages(usize),

    #[error("page index {0} is out of range")]
    InvalidPage(usize),

    #[error("page {0} is not allocated")]
    PageNotAllocated(usize),

    #[error("offset {offset} (length {len}) is outside of page {page}")]
    InvalidOffset {
        page: usize,
        offset: usize,
        len: usize,
    },

    #[error("page {0} is allocated already")]
    PageAlreadyAllocated(usize),

    /// The page is currently referenced and can therefore not be freed
    #[error("page {0} is pinned by an active reference")]
    PagePinned(usize),

    /// The page holds heap blocks or container elements and can not be accessed as raw bytes
    #[error("page {0} is in use by the heap or a container")]
    PageInUse(usize),

    /// An active reference overlaps the requested region in a conflicting way
    #[error("region at page {page}, offset {offset} is already borrowed")]
    AlreadyBorrowed { page: usize, offset: usize },

    /// Tried to free something that is not an allocated heap block (e.g. a double free)
    #[error("no allocated heap block at page {page}, offset {offset}")]
    InvalidFree { page: usize, offset: usize },

    #[error("heap page {page} is corrupted: {reason}")]
    CorruptedHeapPage { page: usize, reason: &'static str },

    #[error("data is corrupted: {0}")]
    CorruptedData(&'static str),

    /// Strict access to a pointer that is not bound to any storage
    #[error("pointer is not bound to any storage")]
    UnboundPointer,

    /// Access through a pointer whose object was destroyed already
    #[error("object at page {page}, offset {offset} was destroyed")]
    DanglingPointer { page: usize, offset: usize },

    #[error("index {index} is out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Request is bigger than what a single page/heap block can hold
    #[error("{requested} bytes exceed the maximum of {max} bytes")]
    SizeLimit { requested: usize, max: usize },

    #[error("alignment of {0} bytes is not supported")]
    UnsupportedAlignment(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A finalizer panicked, storage of the object was reclaimed nevertheless
    #[error("finalizer panicked while dropping an object")]
    FinalizerPanicked,
}

impl VMError {
    /// Returns `true` if this error reports exhausted capacity.
    ///
    /// These are the only errors a caller is expected to recover from,
    /// e.g. by releasing other allocations and retrying.
    pub fn is_capacity_exhaustion(&self) -> bool {
        matches!(self, VMError::OutOfMemory | VMError::OutOfPages(_))
    }

    pub(crate) fn storage(operation: &'static str) -> impl FnOnce(io::Error) -> VMError {
        move |source| VMError::Storage { operation, source }
    }
}

pub type VMResult<T> = Result<T, VMError>;
