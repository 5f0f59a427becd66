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

use core::hint::black_box;

use serde::Serialize;

use crate::{
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    VMManager,
};

use super::{Benchmark, ModuleOptions, Timer};

#[derive(Serialize)]
pub struct HeapFreeBenchmarkOptions {
    object_size: usize,
    modules: ModuleOptions,
}

pub struct HeapFreeBenchmark<'a, S: PersistentStorageModule, M: MemoryProviderModule, const OBJ_SIZE: usize> {
    manager: &'a VMManager<S, M>,
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const OBJ_SIZE: usize>
    HeapFreeBenchmark<'a, S, M, OBJ_SIZE>
{
    pub fn new(manager: &'a VMManager<S, M>) -> Self {
        Self { manager }
    }
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const OBJ_SIZE: usize>
    Benchmark<HeapFreeBenchmarkOptions> for HeapFreeBenchmark<'a, S, M, OBJ_SIZE>
{
    #[inline]
    fn get_name(&self) -> &'static str {
        "heap_free"
    }

    #[inline]
    fn get_bench_options(&self) -> HeapFreeBenchmarkOptions {
        HeapFreeBenchmarkOptions {
            object_size: OBJ_SIZE,
            modules: ModuleOptions::new::<S, M>(self.manager.config()),
        }
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        let allocation = self.manager.heap_allocate(OBJ_SIZE).unwrap();

        let timer = T::start();

        black_box(unsafe {
            self.manager
                .heap_free(black_box(allocation.page), black_box(allocation.offset))
        })
        .unwrap();

        timer.stop()
    }
}
