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

use log::trace;

use super::{MemoryProviderModule, PageBuffer};

/// Hands out at most `max_pages` buffers at the same time.
///
/// Models a device with little RAM: as soon as the limit is reached,
/// the page manager has to evict pages before new ones become resident.
#[derive(Debug)]
pub struct LimitedMemoryProvider {
    max_pages: usize,
    outstanding: usize,
}

impl LimitedMemoryProvider {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages,
            outstanding: 0,
        }
    }

    /// Changes the limit, already handed out buffers stay valid
    pub fn set_limit(&mut self, max_pages: usize) {
        self.max_pages = max_pages;
    }

    pub fn limit(&self) -> usize {
        self.max_pages
    }

    /// Amount of buffers that are currently handed out
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

impl MemoryProviderModule for LimitedMemoryProvider {
    fn allocate_page(&mut self, size: usize) -> Option<PageBuffer> {
        if self.outstanding >= self.max_pages {
            trace!(
                "Page buffer limit reached ({}/{})",
                self.outstanding,
                self.max_pages
            );
            return None;
        }

        let buffer = PageBuffer::new_zeroed(size)?;
        self.outstanding += 1;
        Some(buffer)
    }

    fn release_page(&mut self, buffer: PageBuffer) {
        debug_assert!(self.outstanding > 0);
        self.outstanding = self.outstanding.saturating_sub(1);
        drop(buffer);
    }
}
