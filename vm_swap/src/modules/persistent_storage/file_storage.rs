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

use std::{
    fs::{remove_file, File},
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    mem::ManuallyDrop,
    path::{Path, PathBuf},
};

use log::{trace, warn};

use super::PersistentStorageModule;

/// Storage module backed by a swap file on some file system.
///
/// The swap file only lives for one session: it is truncated when opened
/// and removed again once this module is dropped.
pub struct FilePersistentStorageModule {
    /// underlying swap file
    file: ManuallyDrop<File>,

    /// path of file, save for deleting file later
    file_path: PathBuf,

    /// cached file size, so no `metadata` call necessary
    file_size: usize,
}

impl FilePersistentStorageModule {
    /// Creates the swap file at `path` (or truncates an existing one) and opens it for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        let file = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(&file_path)?;

        trace!("Opened swap file {}", file_path.display());

        Ok(Self {
            file: ManuallyDrop::new(file),
            file_path,
            file_size: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Closes and deletes the swap file
    pub fn remove(self) -> io::Result<()> {
        let mut this = ManuallyDrop::new(self);

        // close file before removing it
        // note that after this call, file is never accessed again
        unsafe { ManuallyDrop::drop(&mut this.file) };
        let path = std::mem::take(&mut this.file_path);

        remove_file(path)
    }
}

impl PersistentStorageModule for FilePersistentStorageModule {
    fn read(&mut self, offset: usize, dest: &mut [u8]) -> io::Result<usize> {
        debug_assert!(
            offset + dest.len() <= self.file_size,
            "illegal access, offset: {}, len: {}, file_size: {}",
            offset,
            dest.len(),
            self.file_size
        );

        self.file.seek(SeekFrom::Start(offset as u64))?;

        // a single read call may return less bytes than available
        let mut total = 0;
        while total < dest.len() {
            match self.file.read(&mut dest[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    fn write(&mut self, offset: usize, src: &[u8]) -> io::Result<usize> {
        debug_assert!(
            offset + src.len() <= self.file_size,
            "illegal access, offset: {}, len: {}, file_size: {}",
            offset,
            src.len(),
            self.file_size
        );

        self.file.seek(SeekFrom::Start(offset as u64))?;

        let mut total = 0;
        while total < src.len() {
            match self.file.write(&src[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn set_len(&mut self, size: usize) -> io::Result<()> {
        self.file.set_len(size as u64)?;
        self.file_size = size;
        Ok(())
    }

    fn get_max_size(&self) -> usize {
        self.file_size
    }
}

impl Drop for FilePersistentStorageModule {
    fn drop(&mut self) {
        // drop and close file before removing
        // note that after this call, file should never be accessed again...
        unsafe {
            ManuallyDrop::drop(&mut self.file);
        }

        if self.file_path.exists() {
            if let Err(err) = remove_file(&self.file_path) {
                warn!("Could not remove swap file {}: {}", self.file_path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use crate::modules::persistent_storage::{
        test::{
            get_test_storage, test_persistent_storage_normal, test_persistent_storage_resize,
            PERSISTENT_STORAGE_NORMAL_TEST_SIZE,
        },
        PersistentStorageModule,
    };

    use super::FilePersistentStorageModule;

    #[test]
    fn test_file_storage_module_normal() {
        let storage = get_test_storage(
            "test_file_storage_module_normal",
            PERSISTENT_STORAGE_NORMAL_TEST_SIZE,
        );
        test_persistent_storage_normal(storage);
    }

    #[test]
    fn test_file_storage_module_resize() {
        let storage = FilePersistentStorageModule::open("/tmp/test_file_storage_module_resize.tmp")
            .unwrap();
        test_persistent_storage_resize(storage);
    }

    #[test]
    fn test_file_storage_module_truncates() {
        const PATH: &str = "/tmp/test_file_storage_module_truncates.tmp";
        std::fs::write(PATH, [1u8; 64]).unwrap();

        let storage = FilePersistentStorageModule::open(PATH).unwrap();
        assert_eq!(std::fs::metadata(PATH).unwrap().len(), 0);
        assert_eq!(storage.get_max_size(), 0);
    }

    #[test]
    fn test_file_storage_module_removes_file() {
        const PATH: &str = "/tmp/test_file_storage_module_removes_file.tmp";

        let storage = FilePersistentStorageModule::open(PATH).unwrap();
        assert!(Path::new(PATH).exists());
        drop(storage);
        assert!(!Path::new(PATH).exists());

        let storage = FilePersistentStorageModule::open(PATH).unwrap();
        assert_eq!(storage.path(), Path::new(PATH));
        storage.remove().unwrap();
        assert!(!Path::new(PATH).exists());
    }
}
