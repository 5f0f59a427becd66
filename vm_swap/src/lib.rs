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

mod heap;
mod page_manager;
mod util;
mod vm_array;
mod vm_config;
mod vm_error;
mod vm_manager;
mod vm_mut_ref;
mod vm_ptr;
mod vm_ref;
mod vm_string;
mod vm_vector;

#[cfg(test)]
mod test;

#[cfg(feature = "benchmarks")]
pub mod benchmarks;

pub use crate::heap::{HeapAllocation, HeapBlockInfo, BLOCK_HEADER_SIZE, HEAP_ALIGNMENT, HEAP_HEADER_SIZE};
pub use crate::page_manager::{PageInfo, PageOptions, VMStatistics};
pub use crate::vm_array::VMArray;
pub use crate::vm_manager::VMManager;
pub use crate::vm_mut_ref::VMMutRef;
pub use crate::vm_ptr::VMPtr;
pub use crate::vm_ref::VMRef;
pub use crate::vm_string::VMString;
pub use crate::vm_vector::{VMVector, VectorMode};
pub use vm_config::{VMConfig, VM_PAGE_COUNT, VM_PAGE_SIZE};
pub use vm_error::{VMError, VMResult};
pub mod modules;
