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

/// Wrapper that transfers at most `limit` bytes per call.
///
/// Models devices that return short reads/writes (e.g. a full flash sector).
pub struct TruncatedStorageModule<S: PersistentStorageModule> {
    inner: S,
    limit: usize,
}

impl<S: PersistentStorageModule> TruncatedStorageModule<S> {
    pub fn new(storage: S, limit: usize) -> Self {
        Self {
            inner: storage,
            limit,
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: PersistentStorageModule> PersistentStorageModule for TruncatedStorageModule<S> {
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> io::Result<usize> {
        let len = dest.len().min(self.limit);
        self.inner.read(offset, &mut dest[..len])
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> io::Result<usize> {
        let len = src.len().min(self.limit);
        self.inner.write(offset, &src[..len])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn set_len(&mut self, size: usize) -> io::Result<()> {
        self.inner.set_len(size)
    }

    fn get_max_size(&self) -> usize {
        self.inner.get_max_size()
    }
}
