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

use super::{MemoryProviderModule, PageBuffer};

/// Takes page buffers from the global allocator without any limit
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemoryProvider;

impl SystemMemoryProvider {
    pub fn new() -> Self {
        SystemMemoryProvider
    }
}

impl MemoryProviderModule for SystemMemoryProvider {
    fn allocate_page(&mut self, size: usize) -> Option<PageBuffer> {
        PageBuffer::new_zeroed(size)
    }

    fn release_page(&mut self, buffer: PageBuffer) {
        drop(buffer);
    }
}
