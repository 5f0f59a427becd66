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
    PageOptions, VMManager,
};

use super::{Benchmark, ModuleOptions, Timer};

#[derive(Serialize)]
pub struct SwapOutBenchmarkOptions {
    page_size: usize,
    modules: ModuleOptions,
}

/// Time to write back a dirty page and release its RAM
pub struct SwapOutBenchmark<'a, S: PersistentStorageModule, M: MemoryProviderModule> {
    manager: &'a VMManager<S, M>,
    page: usize,
    round: u8,
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule> SwapOutBenchmark<'a, S, M> {
    pub fn new(manager: &'a VMManager<S, M>) -> Self {
        let page = manager.allocate_page(PageOptions::default()).unwrap();

        Self {
            manager,
            page,
            round: 0,
        }
    }
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule> Benchmark<SwapOutBenchmarkOptions>
    for SwapOutBenchmark<'a, S, M>
{
    #[inline]
    fn get_name(&self) -> &'static str {
        "swap_out"
    }

    #[inline]
    fn get_bench_options(&self) -> SwapOutBenchmarkOptions {
        let config = self.manager.config();
        SwapOutBenchmarkOptions {
            page_size: config.page_size,
            modules: ModuleOptions::new::<S, M>(config),
        }
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        self.round = self.round.wrapping_add(1);
        self.manager.write_page(self.page, 0, &[self.round; 16]).unwrap();
        assert!(self.manager.page_info(self.page).unwrap().dirty);

        let timer = T::start();

        black_box(self.manager.swap_out(black_box(self.page), false)).unwrap();

        timer.stop()
    }
}
