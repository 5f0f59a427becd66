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

use core::{cell::RefCell, fmt};

use log::error;

use crate::{
    heap::HeapAllocation,
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    page_manager::PageManager,
    vm_error::{VMError, VMResult},
};

/// Capacity of the first allocation
const INITIAL_CAPACITY: usize = 64;

/// Mutable UTF-8 string stored inside of a single heap block
pub struct VMString<'a, S: PersistentStorageModule, M: MemoryProviderModule> {
    manager: &'a RefCell<PageManager<S, M>>,
    block: Option<HeapAllocation>,
    len: usize,
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule> VMString<'a, S, M> {
    pub(crate) fn new(manager: &'a RefCell<PageManager<S, M>>) -> Self {
        VMString {
            manager,
            block: None,
            len: 0,
        }
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.block.map(|block| block.size).unwrap_or(0)
    }

    fn reserve_bytes(&mut self, required: usize) -> VMResult<()> {
        if required <= self.capacity() {
            return Ok(());
        }

        let mut manager = self.manager.borrow_mut();
        let max = manager.max_heap_payload();
        if required > max {
            return Err(VMError::SizeLimit {
                requested: required,
                max,
            });
        }

        let new_capacity = (required * 2).max(INITIAL_CAPACITY).min(max);
        let block = match self.block {
            None => manager.heap_allocate(new_capacity)?,
            Some(block) => {
                manager.heap_realloc(block.page, block.offset, new_capacity, self.len)?
            }
        };

        self.block = Some(block);
        Ok(())
    }

    pub fn push_str(&mut self, s: &str) -> VMResult<()> {
        if s.is_empty() {
            return Ok(());
        }

        self.reserve_bytes(self.len + s.len())?;
        if let Some(block) = self.block {
            self.manager
                .borrow_mut()
                .write_bytes(block.page, block.offset + self.len, s.as_bytes())?;
        }

        self.len += s.len();
        Ok(())
    }

    pub fn push(&mut self, c: char) -> VMResult<()> {
        let mut buffer = [0u8; 4];
        self.push_str(c.encode_utf8(&mut buffer))
    }

    /// Replaces the contents, keeps the current block if it is big enough
    pub fn assign(&mut self, s: &str) -> VMResult<()> {
        self.len = 0;
        self.push_str(s)
    }

    pub fn byte_at(&self, index: usize) -> VMResult<u8> {
        if index >= self.len {
            return Err(VMError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }

        let mut byte = [0u8; 1];
        if let Some(block) = self.block {
            self.manager
                .borrow_mut()
                .read_bytes(block.page, block.offset + index, &mut byte)?;
        }
        Ok(byte[0])
    }

    pub fn to_bytes(&self) -> VMResult<Vec<u8>> {
        let mut bytes = vec![0u8; self.len];
        if let (Some(block), false) = (self.block, bytes.is_empty()) {
            self.manager
                .borrow_mut()
                .read_bytes(block.page, block.offset, &mut bytes)?;
        }
        Ok(bytes)
    }

    pub fn to_string(&self) -> VMResult<String> {
        String::from_utf8(self.to_bytes()?)
            .map_err(|_| VMError::CorruptedData("string contents are not valid UTF-8"))
    }

    /// Empties the string and gives its heap block back
    pub fn clear(&mut self) -> VMResult<()> {
        self.len = 0;
        if let Some(block) = self.block.take() {
            self.manager.borrow_mut().heap_free(block.page, block.offset)?;
        }
        Ok(())
    }

    fn bytes_eq(&self, other: &[u8]) -> bool {
        self.len == other.len() && self.to_bytes().map(|b| b == other).unwrap_or(false)
    }
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> PartialEq<str> for VMString<'_, S, M> {
    fn eq(&self, other: &str) -> bool {
        self.bytes_eq(other.as_bytes())
    }
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> PartialEq<&str> for VMString<'_, S, M> {
    fn eq(&self, other: &&str) -> bool {
        self.bytes_eq(other.as_bytes())
    }
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> PartialEq for VMString<'_, S, M> {
    fn eq(&self, other: &Self) -> bool {
        match other.to_bytes() {
            Ok(bytes) => self.bytes_eq(&bytes),
            Err(_) => false,
        }
    }
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> fmt::Debug for VMString<'_, S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VMString")
            .field("block", &self.block)
            .field("len", &self.len)
            .finish()
    }
}

impl<S: PersistentStorageModule, M: MemoryProviderModule> Drop for VMString<'_, S, M> {
    fn drop(&mut self) {
        if let Err(err) = self.clear() {
            error!("Could not release string storage: {}", err);
        }
    }
}
