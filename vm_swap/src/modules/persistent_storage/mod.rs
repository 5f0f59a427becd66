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

mod file_storage;
mod memory_storage;
mod sliced;
mod truncated;

use std::io;

pub use file_storage::FilePersistentStorageModule;
pub use memory_storage::MemoryStorageModule;
pub use sliced::SlicedStorageModule;
pub use truncated::TruncatedStorageModule;

/// Byte addressable storage that holds the swap area.
///
/// Implementations are allowed to transfer less bytes than requested.
/// The amount of transferred bytes is returned and checked by the caller.
pub trait PersistentStorageModule {
    /// Reads the region `[offset, offset + dest.len())` into `dest`.
    ///
    /// Returns how many bytes were actually read.
    /// If this call fails, it could be that already some data was written to `dest`.
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> io::Result<usize>;

    /// Writes `src` to the region `[offset, offset + src.len())`.
    ///
    /// Returns how many bytes were actually written.
    fn write(&mut self, offset: usize, src: &[u8]) -> io::Result<usize>;

    /// Pushes all buffered writes down to the underlying device
    fn flush(&mut self) -> io::Result<()>;

    /// Resizes the storage to `size` bytes, new bytes are zero
    fn set_len(&mut self, size: usize) -> io::Result<()>;

    /// Returns the current size in bytes of this storage
    ///
    /// **It is illegal to read/write across this border!**
    fn get_max_size(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod test {
    use super::{FilePersistentStorageModule, PersistentStorageModule};

    pub(crate) fn get_test_storage(test_name: &str, size: usize) -> FilePersistentStorageModule {
        let mut storage =
            FilePersistentStorageModule::open(format!("/tmp/{}.tmp", test_name)).unwrap();
        storage.set_len(size).unwrap();
        storage
    }

    fn gen_number(i: usize) -> u8 {
        (i * 3 + (i % 3) * 7 + (i % 11) * 51) as u8
    }

    pub(crate) const PERSISTENT_STORAGE_NORMAL_TEST_SIZE: usize = 4096;

    /// test if write saves all data and read restores all of it
    pub(crate) fn test_persistent_storage_normal<T: PersistentStorageModule>(mut module: T) {
        const SUB_TEST_SIZE: usize = PERSISTENT_STORAGE_NORMAL_TEST_SIZE / 32;

        assert!(module.get_max_size() >= PERSISTENT_STORAGE_NORMAL_TEST_SIZE);

        let mut source_slice = [0u8; PERSISTENT_STORAGE_NORMAL_TEST_SIZE];
        for i in 0..PERSISTENT_STORAGE_NORMAL_TEST_SIZE {
            source_slice[i] = gen_number(i);
        }

        for i in 0..PERSISTENT_STORAGE_NORMAL_TEST_SIZE / SUB_TEST_SIZE {
            let offset = i * SUB_TEST_SIZE;
            let written = module
                .write(offset, &source_slice[offset..offset + SUB_TEST_SIZE])
                .unwrap();
            assert_eq!(written, SUB_TEST_SIZE);
        }
        module.flush().unwrap();

        let mut test_slice = [0u8; SUB_TEST_SIZE];
        for i in 0..PERSISTENT_STORAGE_NORMAL_TEST_SIZE / SUB_TEST_SIZE {
            let offset = i * SUB_TEST_SIZE;
            let read = module.read(offset, &mut test_slice).unwrap();
            assert_eq!(read, SUB_TEST_SIZE);

            for x in 0..SUB_TEST_SIZE {
                assert_eq!(test_slice[x], source_slice[offset + x]);
            }
        }
    }

    /// test that resizing keeps old data and zero fills new data
    pub(crate) fn test_persistent_storage_resize<T: PersistentStorageModule>(mut module: T) {
        module.set_len(128).unwrap();
        assert_eq!(module.get_max_size(), 128);

        module.write(0, &[7u8; 128]).unwrap();
        module.set_len(256).unwrap();
        assert_eq!(module.get_max_size(), 256);

        let mut buffer = [1u8; 256];
        assert_eq!(module.read(0, &mut buffer).unwrap(), 256);
        assert!(buffer[..128].iter().all(|x| *x == 7));
        assert!(buffer[128..].iter().all(|x| *x == 0));
    }
}
