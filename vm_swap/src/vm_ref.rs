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
    mem::{align_of, size_of},
    ops::Deref,
};

use crate::{
    heap::HEAP_ALIGNMENT,
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    page_manager::PageManager,
    vm_error::{VMError, VMResult},
};

/// Checks that values of `T` can be placed at `offset` of a page buffer
pub(crate) fn check_placement<T>(offset: usize) -> VMResult<()> {
    if align_of::<T>() > HEAP_ALIGNMENT || offset % align_of::<T>() != 0 {
        return Err(VMError::UnsupportedAlignment(align_of::<T>()));
    }
    Ok(())
}

/// Shared reference into a page.
///
/// The page is pinned (stays resident and can not be freed) until this reference is dropped.
pub struct VMRef<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> {
    manager: &'a RefCell<PageManager<S, M>>,
    page: usize,
    offset: usize,
    data_ref: &'a T,
}

impl<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> VMRef<'a, T, S, M> {
    pub(crate) fn acquire(
        manager: &'a RefCell<PageManager<S, M>>,
        page: usize,
        offset: usize,
    ) -> VMResult<Self> {
        check_placement::<T>(offset)?;

        let ptr = manager
            .borrow_mut()
            .borrow_region(page, offset, size_of::<T>(), false)?;

        Ok(VMRef {
            manager,
            page,
            offset,
            data_ref: unsafe { &*(ptr as *const T) },
        })
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Deref for VMRef<'_, T, S, M> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data_ref
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Drop for VMRef<'_, T, S, M> {
    fn drop(&mut self) {
        self.manager
            .borrow_mut()
            .release_region(self.page, self.offset, size_of::<T>(), false);
    }
}
