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
    mem::size_of,
    ops::{Deref, DerefMut},
};

use crate::{
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    page_manager::PageManager,
    vm_error::VMResult,
    vm_ref::check_placement,
};

/// Mutable reference into a page.
///
/// Marks the page dirty and pins it until this reference is dropped.
pub struct VMMutRef<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> {
    manager: &'a RefCell<PageManager<S, M>>,
    page: usize,
    offset: usize,
    data_ref: &'a mut T,
}

impl<'a, T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> VMMutRef<'a, T, S, M> {
    pub(crate) fn acquire(
        manager: &'a RefCell<PageManager<S, M>>,
        page: usize,
        offset: usize,
    ) -> VMResult<Self> {
        check_placement::<T>(offset)?;

        let ptr = manager
            .borrow_mut()
            .borrow_region(page, offset, size_of::<T>(), true)?;

        Ok(VMMutRef {
            manager,
            page,
            offset,
            data_ref: unsafe { &mut *(ptr as *mut T) },
        })
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Deref
    for VMMutRef<'_, T, S, M>
{
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data_ref
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> DerefMut
    for VMMutRef<'_, T, S, M>
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_ref
    }
}

impl<T: Sized, S: PersistentStorageModule, M: MemoryProviderModule> Drop
    for VMMutRef<'_, T, S, M>
{
    fn drop(&mut self) {
        // contents could have changed until now, so keep the page dirty
        let mut manager = self.manager.borrow_mut();
        manager.release_region(self.page, self.offset, size_of::<T>(), true);
        if let Ok(slot) = manager.slot_mut(self.page) {
            slot.dirty = true;
        }
    }
}
