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

use std::{
    mem::{align_of, needs_drop, size_of},
    panic::{catch_unwind, AssertUnwindSafe},
    ptr::drop_in_place,
};

#[inline]
pub(crate) const fn round_up_to_nearest(num: usize, multiple: usize) -> usize {
    ((num + multiple - 1) / multiple) * multiple
}

#[inline]
pub(crate) const fn div_ceil(num: usize, div: usize) -> usize {
    (num + div - 1) / div
}

/// Distance in bytes between two neighboring elements of type `T`.
///
/// Same as `size_of::<T>()` except for zero sized types, which still get their own slot.
#[inline]
pub(crate) const fn stride_of<T>() -> usize {
    if size_of::<T>() == 0 {
        align_of::<T>()
    } else {
        size_of::<T>()
    }
}

/// Runs the destructor of the object behind `ptr`.
///
/// Returns `false` if the destructor panicked. The object counts as dropped in both cases.
///
/// # Safety
///
/// `ptr` has to point to a valid and initialized `T` that is never used again afterwards.
pub(crate) unsafe fn finalize_in_place<T>(ptr: *mut T) -> bool {
    if !needs_drop::<T>() {
        return true;
    }

    catch_unwind(AssertUnwindSafe(|| drop_in_place(ptr))).is_ok()
}

#[cfg(test)]
mod test {
    use std::{cell::Cell, mem::ManuallyDrop};

    use super::{div_ceil, finalize_in_place, round_up_to_nearest, stride_of};

    #[test]
    fn test_util_arithmetic() {
        assert_eq!(round_up_to_nearest(0, 8), 0);
        assert_eq!(round_up_to_nearest(1, 8), 8);
        assert_eq!(round_up_to_nearest(100, 8), 104);
        assert_eq!(div_ceil(10, 4), 3);
        assert_eq!(div_ceil(8, 4), 2);
        assert_eq!(stride_of::<u32>(), 4);
        assert_eq!(stride_of::<()>(), 1);
        assert_eq!(stride_of::<[u64; 0]>(), 8);
    }

    #[test]
    fn test_finalize_in_place() {
        struct Tracked<'a>(&'a Cell<usize>);
        impl Drop for Tracked<'_> {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        struct Panicking;
        impl Drop for Panicking {
            fn drop(&mut self) {
                panic!("finalizer failed");
            }
        }

        let counter = Cell::new(0);
        let mut tracked = ManuallyDrop::new(Tracked(&counter));
        assert!(unsafe { finalize_in_place(&mut *tracked as *mut Tracked) });
        assert_eq!(counter.get(), 1);

        let mut value = 5u32;
        assert!(unsafe { finalize_in_place(&mut value as *mut u32) });

        let mut panicking = ManuallyDrop::new(Panicking);
        assert!(!unsafe { finalize_in_place(&mut *panicking as *mut Panicking) });
    }
}
