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

/// Splits every transfer into chunks of at most `SLICE_SIZE` bytes.
///
/// Useful for devices with a maximum transfer size (e.g. SPI).
pub struct SlicedStorageModule<const SLICE_SIZE: usize, S: PersistentStorageModule> {
    inner: S,
}

impl<const SLICE_SIZE: usize, S: PersistentStorageModule> SlicedStorageModule<SLICE_SIZE, S> {
    pub fn new(storage: S) -> Self {
        assert!(SLICE_SIZE > 0, "slice size has to be greater than zero");

        Self { inner: storage }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<const SLICE_SIZE: usize, S: PersistentStorageModule> PersistentStorageModule
    for SlicedStorageModule<SLICE_SIZE, S>
{
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> io::Result<usize> {
        let mut rel_offset = 0;
        while rel_offset < dest.len() {
            let end_read = (rel_offset + SLICE_SIZE).min(dest.len());
            let expected = end_read - rel_offset;
            let read = self
                .inner
                .read(offset + rel_offset, &mut dest[rel_offset..end_read])?;

            rel_offset += read;
            if read < expected {
                break;
            }
        }

        Ok(rel_offset)
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> io::Result<usize> {
        let mut rel_offset = 0;
        while rel_offset < src.len() {
            let end_write = (rel_offset + SLICE_SIZE).min(src.len());
            let expected = end_write - rel_offset;
            let written = self
                .inner
                .write(offset + rel_offset, &src[rel_offset..end_write])?;

            rel_offset += written;
            if written < expected {
                // short write, stop here and report it
                break;
            }
        }

        Ok(rel_offset)
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

#[cfg(test)]
mod test {
    use crate::modules::persistent_storage::{
        test::{test_persistent_storage_normal, PERSISTENT_STORAGE_NORMAL_TEST_SIZE},
        MemoryStorageModule, PersistentStorageModule, TruncatedStorageModule,
    };

    use super::SlicedStorageModule;

    #[test]
    fn test_sliced_storage_module_normal() {
        let mut storage = MemoryStorageModule::new();
        storage
            .set_len(PERSISTENT_STORAGE_NORMAL_TEST_SIZE)
            .unwrap();
        test_persistent_storage_normal(SlicedStorageModule::<7, _>::new(storage));
    }

    #[test]
    fn test_sliced_storage_module_slices() {
        let mut storage = SlicedStorageModule::<16, _>::new(MemoryStorageModule::new());
        storage.set_len(100).unwrap();

        assert_eq!(storage.write(0, &[1u8; 100]).unwrap(), 100);
        // 100 bytes in slices of 16 bytes
        assert_eq!(storage.inner().write_count(), 7);

        let mut buffer = [0u8; 40];
        assert_eq!(storage.read(50, &mut buffer).unwrap(), 40);
        assert_eq!(storage.inner().read_count(), 3);
    }

    #[test]
    fn test_sliced_storage_module_stops_on_short_transfer() {
        let mut inner = TruncatedStorageModule::new(MemoryStorageModule::new(), 5);
        inner.set_len(64).unwrap();
        let mut storage = SlicedStorageModule::<8, _>::new(inner);

        assert_eq!(storage.write(0, &[9u8; 32]).unwrap(), 5);

        let mut buffer = [0u8; 32];
        assert_eq!(storage.read(0, &mut buffer).unwrap(), 5);
    }
}
