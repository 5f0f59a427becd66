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

use crate::{
    modules::{
        memory_provider::LimitedMemoryProvider,
        persistent_storage::{test::get_test_storage, FilePersistentStorageModule, MemoryStorageModule},
    },
    VMConfig, VMManager,
};

mod logical_pointer;
mod storage_backends;

pub(crate) fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .is_test(true)
        .try_init();
}

/// Manager with a swap file under `/tmp` that keeps at most `max_resident` pages in RAM
pub(crate) fn get_test_manager(
    test_name: &str,
    config: VMConfig,
    max_resident: usize,
) -> VMManager<FilePersistentStorageModule, LimitedMemoryProvider> {
    init_logger();

    let storage = get_test_storage(test_name, config.storage_size());
    VMManager::new(storage, LimitedMemoryProvider::new(max_resident), config).unwrap()
}

/// Same as [`get_test_manager`] but with a RAM storage that counts I/O calls
pub(crate) fn get_memory_manager(
    config: VMConfig,
    max_resident: usize,
) -> VMManager<MemoryStorageModule, LimitedMemoryProvider> {
    init_logger();

    VMManager::new(
        MemoryStorageModule::new(),
        LimitedMemoryProvider::new(max_resident),
        config,
    )
    .unwrap()
}
