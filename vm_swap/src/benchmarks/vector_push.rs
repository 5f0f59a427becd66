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
    VMManager, VectorMode,
};

use super::{Benchmark, ModuleOptions, Timer};

#[derive(Serialize)]
pub struct VectorPushBenchmarkOptions {
    element_count: usize,
    element_size: usize,
    modules: ModuleOptions,
}

/// Pushes `COUNT` elements into a new vector, which switches to paged mode on the way
pub struct VectorPushBenchmark<'a, S: PersistentStorageModule, M: MemoryProviderModule, const COUNT: usize> {
    manager: &'a VMManager<S, M>,
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const COUNT: usize>
    VectorPushBenchmark<'a, S, M, COUNT>
{
    pub fn new(manager: &'a VMManager<S, M>) -> Self {
        assert!(
            COUNT * 4 > manager.max_heap_payload(),
            "vector has to leave flat mode during the benchmark"
        );

        Self { manager }
    }
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const COUNT: usize>
    Benchmark<VectorPushBenchmarkOptions> for VectorPushBenchmark<'a, S, M, COUNT>
{
    #[inline]
    fn get_name(&self) -> &'static str {
        "vector_push"
    }

    #[inline]
    fn get_bench_options(&self) -> VectorPushBenchmarkOptions {
        VectorPushBenchmarkOptions {
            element_count: COUNT,
            element_size: 4,
            modules: ModuleOptions::new::<S, M>(self.manager.config()),
        }
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        let mut vec = self.manager.new_vector::<u32>();

        let timer = T::start();

        for i in 0..COUNT as u32 {
            black_box(vec.push(black_box(i))).unwrap();
        }

        let ticks = timer.stop();

        assert_eq!(vec.mode(), VectorMode::Paged);
        ticks
    }
}
