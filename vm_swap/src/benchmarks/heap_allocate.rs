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
    HeapAllocation, VMManager,
};

use super::{Benchmark, ModuleOptions, Timer};

#[derive(Serialize)]
pub struct HeapAllocateBenchmarkOptions {
    object_size: usize,
    modules: ModuleOptions,
}

/// Allocation of a block on an already formatted heap page
pub struct HeapAllocateBenchmark<'a, S: PersistentStorageModule, M: MemoryProviderModule, const OBJ_SIZE: usize> {
    manager: &'a VMManager<S, M>,
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const OBJ_SIZE: usize>
    HeapAllocateBenchmark<'a, S, M, OBJ_SIZE>
{
    pub fn new(manager: &'a VMManager<S, M>) -> Self {
        // formats the first heap page, so it is not part of the measurement
        let warm_up = manager.heap_allocate(OBJ_SIZE).unwrap();
        // block comes straight from heap_allocate
        unsafe { manager.heap_free(warm_up.page, warm_up.offset) }.unwrap();

        Self { manager }
    }
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const OBJ_SIZE: usize>
    Benchmark<HeapAllocateBenchmarkOptions> for HeapAllocateBenchmark<'a, S, M, OBJ_SIZE>
{
    #[inline]
    fn get_name(&self) -> &'static str {
        "heap_allocate"
    }

    #[inline]
    fn get_bench_options(&self) -> HeapAllocateBenchmarkOptions {
        HeapAllocateBenchmarkOptions {
            object_size: OBJ_SIZE,
            modules: ModuleOptions::new::<S, M>(self.manager.config()),
        }
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        let timer = T::start();

        let allocation: HeapAllocation = black_box(self.manager.heap_allocate(black_box(OBJ_SIZE))).unwrap();

        let ticks = timer.stop();

        unsafe { self.manager.heap_free(allocation.page, allocation.offset) }.unwrap();
        ticks
    }
}
