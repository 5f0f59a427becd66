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

use std::time::Instant;

use env_logger::{Builder, Env};
use log::info;
use vm_swap::{
    modules::memory_provider::LimitedMemoryProvider, VMConfig, VMManager, VMResult,
};

/// Element type with teardown logic
struct Sensor {
    pin: i32,
    initialized: bool,
}

impl Default for Sensor {
    fn default() -> Self {
        println!("Sensor::default() called");
        Self {
            pin: -1,
            initialized: false,
        }
    }
}

impl Sensor {
    fn init(&mut self, pin: i32) {
        self.pin = pin;
        self.initialized = true;
        println!("Sensor initialized on pin {}", pin);
    }

    fn read_value(&self) -> i32 {
        // stand-in for reading an analog input
        if self.initialized {
            self.pin * 100 + 7
        } else {
            -1
        }
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        println!("Sensor on pin {} dropped", self.pin);
        if self.initialized {
            println!("Sensor on pin {} cleaned up", self.pin);
        }
    }
}

/// Plain data, nothing to do when dropped
#[derive(Debug, Default, Clone, Copy)]
struct SensorReading {
    value: i32,
    timestamp: u64,
}

fn main() -> VMResult<()> {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Info)
        .format_module_path(false)
        .init();

    // only two pages fit into RAM at the same time
    let manager = VMManager::begin(
        "swap.data",
        LimitedMemoryProvider::new(2),
        VMConfig::new(512, 16),
    )?;
    let start = Instant::now();

    println!("\n=== Array with elements that need to be dropped ===");
    {
        let mut sensors = manager.new_array::<Sensor, 3>()?;
        for (i, pin) in [14, 15, 16].into_iter().enumerate() {
            sensors.get_mut(i)?.init(pin);
        }

        for i in 0..sensors.len() {
            println!("Sensor {} value: {}", i, sensors.get(i)?.read_value());
        }

        println!("Leaving scope, sensors will be dropped...");
    }

    println!("\n=== Array with plain data ===");
    {
        let mut readings = manager.new_array::<SensorReading, 10>()?;
        println!("Initial reading 0: {:?}", readings.load(0)?);

        for i in 0..readings.len() {
            readings.set(
                i,
                SensorReading {
                    value: (i * 31 % 1024) as i32,
                    timestamp: start.elapsed().as_micros() as u64,
                },
            )?;
        }

        // give the RAM back, values are loaded again on access
        readings.unload()?;
        println!("Reading 9 after unload: {:?}", readings.load(9)?);
    }

    println!("\n=== Pointer with destroy() ===");
    {
        let mut sensor = manager.make_ptr(Sensor::default())?;
        sensor.get_mut()?.init(17);
        println!("Dynamic sensor value: {}", sensor.get()?.read_value());

        println!("Calling destroy()...");
        sensor.destroy()?;

        // second call does nothing
        sensor.destroy()?;
        println!("Sensor destroyed and memory freed");
    }

    println!("\n=== Pointer to plain data ===");
    {
        let mut data = manager.make_ptr(0i32)?;
        data.store(42)?;
        println!("Data value: {}", data.load()?);

        data.destroy()?;
        println!("Data destroyed");
    }

    info!("Statistics: {:?}", manager.statistics());

    let storage = manager.end()?;
    storage.remove().map_err(|source| vm_swap::VMError::Storage {
        operation: "remove",
        source,
    })?;

    println!("\n=== All examples complete ===");
    Ok(())
}
