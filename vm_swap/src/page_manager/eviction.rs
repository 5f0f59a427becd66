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

use log::{debug, warn};

use crate::{
    modules::{
        memory_provider::{MemoryProviderModule, PageBuffer},
        persistent_storage::PersistentStorageModule,
    },
    vm_error::{VMError, VMResult},
};

use super::PageManager;

impl<S: PersistentStorageModule, M: MemoryProviderModule> PageManager<S, M> {
    /// Least recently used page that may give its RAM back.
    ///
    /// Pinned and non evictable pages are never selected.
    pub(crate) fn lru_victim(&self, exclude: Option<usize>) -> Option<usize> {
        self.slots()
            .filter(|(idx, slot)| Some(*idx) != exclude && slot.is_evictable())
            .min_by_key(|(_, slot)| slot.last_access)
            .map(|(idx, _)| idx)
    }

    /// Evicts the least recently used page, returns `false` if there is no candidate
    fn evict_one(&mut self, exclude: Option<usize>) -> VMResult<bool> {
        let victim = match self.lru_victim(exclude) {
            Some(victim) => victim,
            None => return Ok(false),
        };

        self.swap_out(victim, false)?;
        if self.slot(victim)?.is_resident() {
            // only possible if the write back was skipped
            return Err(VMError::PagePinned(victim));
        }

        self.statistics.evictions += 1;
        debug!("Evicted page {}", victim);
        Ok(true)
    }

    /// Gets a RAM buffer for one page, evicts other pages until one is available.
    ///
    /// Gives up after `page_count` attempts.
    pub(super) fn acquire_buffer(&mut self, exclude: Option<usize>) -> VMResult<PageBuffer> {
        let page_size = self.page_size();

        for _ in 0..=self.page_count() {
            if let Some(buffer) = self.memory_mut().allocate_page(page_size) {
                return Ok(buffer);
            }

            if !self.evict_one(exclude)? {
                warn!("No RAM left and no page can be evicted");
                return Err(VMError::OutOfMemory);
            }
        }

        warn!(
            "Could not get RAM after {} evictions",
            self.page_count()
        );
        Err(VMError::OutOfMemory)
    }
}
