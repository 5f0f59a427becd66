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

use crate::{
    heap::{BLOCK_HEADER_SIZE, HEAP_ALIGNMENT, HEAP_HEADER_SIZE},
    vm_error::{VMError, VMResult},
};

/// Default size of a single page in bytes
pub const VM_PAGE_SIZE: usize = 4096;

/// Default amount of page slots inside the swap file
pub const VM_PAGE_COUNT: usize = 16;

/// Configuration of a [`crate::VMManager`].
///
/// Both values are fixed once the manager is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VMConfig {
    /// Size of a single page in bytes
    pub page_size: usize,

    /// Amount of page slots, the swap file will be `page_size * page_count` bytes big
    pub page_count: usize,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            page_size: VM_PAGE_SIZE,
            page_count: VM_PAGE_COUNT,
        }
    }
}

impl VMConfig {
    pub const fn new(page_size: usize, page_count: usize) -> Self {
        Self {
            page_size,
            page_count,
        }
    }

    /// Total size of the swap file in bytes
    pub const fn storage_size(&self) -> usize {
        self.page_size * self.page_count
    }

    pub(crate) fn validate(&self) -> VMResult<()> {
        if self.page_count == 0 {
            return Err(VMError::InvalidConfig("page count has to be greater than zero"));
        }

        if self.page_size % HEAP_ALIGNMENT != 0 {
            return Err(VMError::InvalidConfig(
                "page size has to be a multiple of the heap alignment",
            ));
        }

        if self.page_size < HEAP_HEADER_SIZE + BLOCK_HEADER_SIZE + HEAP_ALIGNMENT {
            return Err(VMError::InvalidConfig(
                "page size is too small to hold a single heap block",
            ));
        }

        // heap offsets are stored as u32 and u32::MAX is reserved
        if self.page_size >= u32::MAX as usize {
            return Err(VMError::InvalidConfig("page size has to be addressable with 32 bits"));
        }

        if self.page_size.checked_mul(self.page_count).is_none() {
            return Err(VMError::InvalidConfig("swap file size overflows"));
        }

        Ok(())
    }
}
