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
pub struct SwapInBenchmarkOptions {
    page_size: usize,
    modules: ModuleOptions,
}

/// Time to load a page that is not resident
pub struct SwapInBenchmark<'a, S: PersistentStorageModule, M: MemoryProviderModule> {
    manager: &'a VMManager<S, M>,
    page: usize,
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule> SwapInBenchmark<'a, S, M> {
    pub fn new(manager: &'a VMManager<S, M>) -> Self {
        let page = manager.allocate_page(PageOptions::default()).unwrap();
        manager.write_page(page, 0, &[0xA5; 64]).unwrap();

        Self { manager, page }
    }
}

impl<'a, S: PersistentStorageModule, M: MemoryProviderModule> Benchmark<SwapInBenchmarkOptions>
    for SwapInBenchmark<'a, S, M>
{
    #[inline]
    fn get_name(&self) -> &'static str {
        "swap_in"
    }

    #[inline]
    fn get_bench_options(&self) -> SwapInBenchmarkOptions {
        let config = self.manager.config();
        SwapInBenchmarkOptions {
            page_size: config.page_size,
            modules: ModuleOptions::new::<S, M>(config),
        }
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        self.manager.swap_out(self.page, false).unwrap();
        assert!(!self.manager.page_info(self.page).unwrap().resident);

        let timer = T::start();

        black_box(self.manager.swap_in(black_box(self.page))).unwrap();

        timer.stop()
    }
}
