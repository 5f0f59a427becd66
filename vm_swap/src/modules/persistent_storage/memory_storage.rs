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

use super::PersistentStorageModule;

/// Storage module that keeps all data inside of a RAM buffer.
///
/// Counts every read and write call, which makes it useful to check
/// how much I/O an operation caused.
#[derive(Debug, Default)]
pub struct MemoryStorageModule {
    data: Vec<u8>,
    read_count: usize,
    write_count: usize,
}

impl MemoryStorageModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `read` was called
    pub fn read_count(&self) -> usize {
        self.read_count
    }

    /// How many times `write` was called
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    pub fn reset_counters(&mut self) {
        self.read_count = 0;
        self.write_count = 0;
    }

    /// Raw view of the stored bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn check_range(&self, offset: usize, len: usize) -> io::Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "access outside of memory storage",
            )),
        }
    }
}

impl PersistentStorageModule for MemoryStorageModule {
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> io::Result<usize> {
        self.read_count += 1;
        self.check_range(offset, dest.len())?;

        dest.copy_from_slice(&self.data[offset..offset + dest.len()]);
        Ok(dest.len())
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> io::Result<usize> {
        self.write_count += 1;
        self.check_range(offset, src.len())?;

        self.data[offset..offset + src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_len(&mut self, size: usize) -> io::Result<()> {
        self.data.resize(size, 0);
        Ok(())
    }

    fn get_max_size(&self) -> usize {
        self.data.len()
    }
}
