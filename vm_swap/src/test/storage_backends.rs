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

use std::fs;

use crate::{
    modules::{
        memory_provider::{LimitedMemoryProvider, SystemMemoryProvider},
        persistent_storage::{
            MemoryStorageModule, PersistentStorageModule, SlicedStorageModule,
            TruncatedStorageModule,
        },
    },
    PageOptions, VMConfig, VMError, VMManager,
};

use super::init_logger;

#[test]
fn test_short_write_is_fatal() {
    init_logger();
    let storage = TruncatedStorageModule::new(MemoryStorageModule::new(), usize::MAX);
    let manager = VMManager::new(storage, LimitedMemoryProvider::new(2), VMConfig::new(256, 4)).unwrap();

    let page = manager.allocate_page(PageOptions::default()).unwrap();
    manager.write_page(page, 0, &[5; 256]).unwrap();

    manager.get_inner().borrow_mut().storage_mut().set_limit(100);
    assert!(matches!(
        manager.swap_out(page, false),
        Err(VMError::ShortIo {
            operation: "write",
            expected: 256,
            actual: 100,
            ..
        })
    ));

    // nothing was lost
    let info = manager.page_info(page).unwrap();
    assert!(info.dirty);
    assert!(info.resident);

    manager.get_inner().borrow_mut().storage_mut().set_limit(usize::MAX);
    manager.swap_out(page, false).unwrap();
    assert!(!manager.page_info(page).unwrap().resident);

    // short reads are fatal as well
    manager.get_inner().borrow_mut().storage_mut().set_limit(10);
    let mut buffer = [0u8; 4];
    assert!(matches!(
        manager.read_page(page, 0, &mut buffer),
        Err(VMError::ShortIo {
            operation: "read",
            ..
        })
    ));
    assert!(!manager.page_info(page).unwrap().resident);

    manager.get_inner().borrow_mut().storage_mut().set_limit(usize::MAX);
    manager.read_page(page, 252, &mut buffer).unwrap();
    assert_eq!(buffer, [5; 4]);
}

#[test]
fn test_sliced_storage_backend() {
    init_logger();
    let storage: SlicedStorageModule<48, _> = SlicedStorageModule::new(MemoryStorageModule::new());
    let manager = VMManager::new(storage, LimitedMemoryProvider::new(2), VMConfig::new(256, 8)).unwrap();

    let mut vec = manager.new_vector::<u32>();
    vec.extend(0..300).unwrap();
    for i in (0..300).step_by(7) {
        assert_eq!(vec.load(i).unwrap(), i as u32);
    }
    drop(vec);

    let storage = manager.end().unwrap();
    assert_eq!(storage.get_max_size(), 8 * 256);

    // each page was transferred in slices of 48 bytes
    assert!(storage.inner().write_count() >= 8 * 6);
}

#[test]
fn test_end_returns_storage() {
    init_logger();
    let manager = VMManager::new(
        MemoryStorageModule::new(),
        SystemMemoryProvider::new(),
        VMConfig::new(256, 4),
    )
    .unwrap();

    let ptr = manager.make_ptr(0xDEADBEEFu32).unwrap();
    let (page, offset) = ptr.location().unwrap();
    drop(ptr);

    // contents only reach the storage through the final flush
    assert_eq!(manager.get_inner().borrow().storage().data()[page * 256 + offset], 0);

    let storage = manager.end().unwrap();
    let start = page * 256 + offset;
    assert_eq!(
        storage.data()[start..start + 4],
        0xDEADBEEFu32.to_ne_bytes()
    );

    // storage can be used for a new session, which starts zeroed
    let manager = VMManager::new(storage, SystemMemoryProvider::new(), VMConfig::new(128, 4)).unwrap();
    assert!(manager.get_inner().borrow().storage().data().iter().all(|x| *x == 0));
    assert_eq!(manager.get_inner().borrow().storage().data().len(), 512);
}

#[test]
fn test_begin_with_swap_file() {
    init_logger();
    let path = "/tmp/test_begin_with_swap_file.tmp";
    let manager = VMManager::begin(path, SystemMemoryProvider::new(), VMConfig::new(512, 4)).unwrap();
    assert_eq!(fs::metadata(path).unwrap().len(), 2048);

    let mut string = manager.new_string();
    string.assign("stored in a swap file").unwrap();
    manager.flush().unwrap();
    assert!(string == "stored in a swap file");
    drop(string);

    let storage = manager.end().unwrap();
    assert_eq!(storage.path().to_str(), Some(path));
    drop(storage);
    assert!(fs::metadata(path).is_err());
}

#[test]
fn test_invalid_config() {
    init_logger();
    let res = VMManager::new(
        MemoryStorageModule::new(),
        SystemMemoryProvider::new(),
        VMConfig::new(100, 4),
    );
    assert!(matches!(res, Err(VMError::InvalidConfig(_))));
}
