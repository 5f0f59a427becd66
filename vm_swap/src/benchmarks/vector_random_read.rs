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

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;

use crate::{
    modules::{memory_provider::MemoryProviderModule, persistent_storage::PersistentStorageModule},
    VMManager, VMVector,
};

use super::{Benchmark, ModuleOptions, Timer};

#[derive(Serialize)]
pub struct VectorRandomReadBenchmarkOptions {
    element_count: usize,
    modules: ModuleOptions,
}

/// Reads random elements of a paged vector while only a few pages fit into RAM
pub struct VectorRandomReadBenchmark<'a, S: PersistentStorageModule, M: MemoryProviderModule, const COUNT: usize> {
    manager: &'a VMManager<S, M>,
    vec: VMVector<'a, u64, S, M>,
    rand: Xoshiro256PlusPlus,
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const COUNT: usize>
    VectorRandomReadBenchmark<'a, S, M, COUNT>
{
    pub fn new(manager: &'a VMManager<S, M>) -> Self {
        let mut vec = manager.new_vector::<u64>();
        vec.extend(0..COUNT as u64).unwrap();

        Self {
            manager,
            vec,
            rand: Xoshiro256PlusPlus::seed_from_u64(8850346),
        }
    }
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule, const COUNT: usize>
    Benchmark<VectorRandomReadBenchmarkOptions> for VectorRandomReadBenchmark<'a, S, M, COUNT>
{
    #[inline]
    fn get_name(&self) -> &'static str {
        "vector_random_read"
    }

    #[inline]
    fn get_bench_options(&self) -> VectorRandomReadBenchmarkOptions {
        VectorRandomReadBenchmarkOptions {
            element_count: COUNT,
            modules: ModuleOptions::new::<S, M>(self.manager.config()),
        }
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        let index = self.rand.gen_range(0..COUNT);

        let timer = T::start();

        let value = black_box(self.vec.load(black_box(index))).unwrap();

        let ticks = timer.stop();

        assert_eq!(value, index as u64);
        ticks
    }
}
