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

use core::any::type_name;

#[cfg(not(test))]
use std::io::stdout;

use serde::Serialize;

mod heap_allocate;
mod heap_free;
mod swap_in;
mod swap_out;
mod vector_push;
mod vector_random_read;

pub use heap_allocate::*;
pub use heap_free::*;
pub use swap_in::*;
pub use swap_out::*;
pub use vector_push::*;
pub use vector_random_read::*;

use crate::{
    modules::{
        memory_provider::{LimitedMemoryProvider, MemoryProviderModule, SystemMemoryProvider},
        persistent_storage::PersistentStorageModule,
    },
    VMConfig, VMManager,
};

pub struct RunAllBenchmarkOptions {
    pub run_swap_benchmarks: bool,
    pub run_heap_benchmarks: bool,
    pub run_vector_benchmarks: bool,
}

impl Default for RunAllBenchmarkOptions {
    fn default() -> Self {
        Self {
            run_swap_benchmarks: false,
            run_heap_benchmarks: false,
            run_vector_benchmarks: false,
        }
    }
}

impl RunAllBenchmarkOptions {
    pub fn all() -> Self {
        Self {
            run_swap_benchmarks: true,
            run_heap_benchmarks: true,
            run_vector_benchmarks: true,
        }
    }
}

pub fn run_all_benchmarks<TIMER: Timer, S: PersistentStorageModule, F: Fn() -> S>(
    get_storage: F,
    mut run_options: BenchmarkRunOptions,
    options: RunAllBenchmarkOptions,
) {
    // NOTE: if you change one of these variables
    // you also have to update the value in the for_obj_size macro!
    const PAGE_SIZE: usize = 4096;
    const STEP_SIZE: usize = 256;
    const MIN_OBJ_SIZE: usize = 8;
    const MAX_OBJ_SIZE: usize = PAGE_SIZE - 32;
    const STEP_COUNT: usize = (MAX_OBJ_SIZE - MIN_OBJ_SIZE) / STEP_SIZE + 1;

    // reads during random access benchmarks have to miss the RAM most of the time
    const RESIDENT_PAGES: usize = 2;

    macro_rules! for_obj_size {
        ($index: ident, $inner: expr) => {
            // the second number has to be equal to STEP_COUNT
            static_assertions::const_assert_eq!(16, STEP_COUNT);
            seq_macro::seq!($index in 0..16 {
                {
                    $inner
                }
            });
        };
    }

    let get_manager = || {
        VMManager::new(
            get_storage(),
            SystemMemoryProvider::new(),
            VMConfig::new(PAGE_SIZE, 16),
        )
        .unwrap()
    };

    let mut curr_iteration = 0usize;
    let mut iteration_count = 0;

    if options.run_swap_benchmarks {
        iteration_count += 2;
    }
    if options.run_heap_benchmarks {
        iteration_count += 2 * STEP_COUNT;
    }
    if options.run_vector_benchmarks {
        iteration_count += 2;
    }

    fn handle_curr_iteration(curr_iteration: &mut usize, iteration_count: usize) {
        let percentage = (100 * *curr_iteration) / (iteration_count);
        print!("[{}%] ", percentage);

        *curr_iteration += 1;
    }

    if options.run_swap_benchmarks {
        {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            let manager = get_manager();
            let bench = SwapInBenchmark::new(&manager);
            bench.run_benchmark::<TIMER>(&mut run_options);
        }
        {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            let manager = get_manager();
            let bench = SwapOutBenchmark::new(&manager);
            bench.run_benchmark::<TIMER>(&mut run_options);
        }
    }

    if options.run_heap_benchmarks {
        for_obj_size!(I, {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            const SIZE: usize = I * STEP_SIZE + MIN_OBJ_SIZE;
            let manager = get_manager();
            let bench: HeapAllocateBenchmark<S, SystemMemoryProvider, SIZE> = HeapAllocateBenchmark::new(&manager);
            bench.run_benchmark::<TIMER>(&mut run_options);
        });
        for_obj_size!(I, {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            const SIZE: usize = I * STEP_SIZE + MIN_OBJ_SIZE;
            let manager = get_manager();
            let bench: HeapFreeBenchmark<S, SystemMemoryProvider, SIZE> = HeapFreeBenchmark::new(&manager);
            bench.run_benchmark::<TIMER>(&mut run_options);
        });
    }

    if options.run_vector_benchmarks {
        {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            let manager = get_manager();
            let bench: VectorPushBenchmark<S, SystemMemoryProvider, 2048> = VectorPushBenchmark::new(&manager);
            bench.run_benchmark::<TIMER>(&mut run_options);
        }
        {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            let manager = VMManager::new(
                get_storage(),
                LimitedMemoryProvider::new(RESIDENT_PAGES),
                VMConfig::new(PAGE_SIZE, 16),
            )
            .unwrap();
            let bench: VectorRandomReadBenchmark<S, LimitedMemoryProvider, 4096> =
                VectorRandomReadBenchmark::new(&manager);
            bench.run_benchmark::<TIMER>(&mut run_options);
        }
    }
}

pub trait Benchmark<O: Serialize> {
    fn get_name(&self) -> &'static str;

    fn get_bench_options(&self) -> O;

    fn execute<T: Timer>(&mut self) -> u32;

    #[inline(never)]
    fn run_benchmark<T: Timer>(mut self, options: &mut BenchmarkRunOptions) -> BenchmarkRunResult
    where
        Self: Sized,
    {
        assert_eq!(options.repetitions as usize, options.result_buffer.len());

        print!("Running Benchmark \"{}\" with options ", self.get_name());

        #[cfg(not(test))]
        serde_json::to_writer(stdout(), &self.get_bench_options()).unwrap();
        println!();

        for _ in 0..options.cold_start {
            self.execute::<T>();
        }

        for i in 0..options.result_buffer.len() {
            let res = self.execute::<T>();
            options.result_buffer[i] = res;
        }

        print!("[BENCH-INFO] ");

        #[cfg(not(test))]
        {
            let run_info = BenchmarkRunInfo {
                bench_name: self.get_name(),
                bench_options: &self.get_bench_options(),
                machine_name: options.machine_name,
                cold_start: options.cold_start,
                repetitions: options.repetitions,
                ticks_per_ms: T::get_ticks_per_ms(),
                data: &options.result_buffer,
            };
            serde_json::to_writer(stdout(), &run_info).unwrap();
        }
        println!();

        let res = BenchmarkRunResult::from_buffer(&options.result_buffer);
        println!(
            "-> Finished {}: mean={}, min={}, max={}",
            self.get_name(),
            res.mean_latency,
            res.min_latency,
            res.max_latency
        );
        println!();

        res
    }
}

pub struct BenchmarkRunOptions<'a> {
    pub repetitions: u32,
    pub result_buffer: &'a mut [u32],

    pub cold_start: u32,

    pub machine_name: &'static str,
}

#[derive(Serialize)]
pub struct ModuleOptions {
    persistent_storage: &'static str,
    memory_provider: &'static str,
    config: VMConfig,
}

impl ModuleOptions {
    pub fn new<S: PersistentStorageModule, M: MemoryProviderModule>(config: VMConfig) -> Self {
        Self {
            persistent_storage: type_name::<S>(),
            memory_provider: type_name::<M>(),
            config,
        }
    }
}

#[derive(Serialize)]
pub struct BenchmarkRunInfo<'a, O: Serialize> {
    bench_name: &'static str,
    bench_options: &'a O,
    machine_name: &'static str,
    cold_start: u32,
    repetitions: u32,
    ticks_per_ms: u32,
    data: &'a [u32],
}

pub struct BenchmarkRunResult {
    pub mean_latency: u32,
    pub min_latency: u32,
    pub max_latency: u32,
}

impl BenchmarkRunResult {
    fn from_buffer(buffer: &[u32]) -> Self {
        Self {
            mean_latency: buffer.iter().map(|x| *x).sum::<u32>() / (buffer.len() as u32),
            min_latency: buffer.iter().min().map(|x| *x).unwrap_or(0),
            max_latency: buffer.iter().max().map(|x| *x).unwrap_or(0),
        }
    }
}

pub trait Timer {
    fn get_ticks_per_ms() -> u32;

    fn start() -> Self;

    fn stop(self) -> u32;
}
