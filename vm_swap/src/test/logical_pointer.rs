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

use std::{cell::Cell, rc::Rc};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{vm_ptr::VMPtr, PageOptions, VMConfig, VMError};

use super::get_memory_manager;

#[test]
fn test_no_dangling_access() {
    let manager = get_memory_manager(VMConfig::new(256, 32), 2);
    let mut rand = SmallRng::seed_from_u64(120931);

    let mut ptrs = vec![];
    for i in 0..40u64 {
        let value = [i, i * 7, i * 13];
        ptrs.push((manager.make_ptr(value).unwrap(), value));
    }

    // unrelated traffic that allocates, evicts and frees pages
    for round in 0..50 {
        let page = manager.allocate_page(PageOptions::default()).unwrap();
        manager.write_page(page, 0, &[round as u8; 256]).unwrap();

        let (ptr, value) = &ptrs[rand.gen_range(0..ptrs.len())];
        assert_eq!(*ptr.get().unwrap(), *value);

        manager.free_page(page, rand.gen_bool(0.5)).unwrap();
    }

    for (ptr, value) in ptrs.iter() {
        assert_eq!(ptr.load().unwrap(), *value);
    }
    assert!(manager.statistics().evictions > 0);
}

#[test]
fn test_guard_pins_page() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 1);
    let ptr = manager.make_ptr(7u16).unwrap();
    let (page, _) = ptr.location().unwrap();

    {
        let guard = ptr.get().unwrap();
        assert_eq!(manager.page_info(page).unwrap().pinned, 1);
        assert!(matches!(manager.free_page(page, false), Err(VMError::PageInUse(_))));

        // the only buffer is pinned, so no other page can become resident
        let err = manager.allocate_page(PageOptions::default()).unwrap_err();
        assert!(err.is_capacity_exhaustion());

        // mutable access through a copy of the pointer conflicts with the guard
        let mut copy = ptr;
        assert!(matches!(copy.get_mut(), Err(VMError::AlreadyBorrowed { .. })));
        assert_eq!(*guard, 7);
    }

    assert_eq!(manager.page_info(page).unwrap().pinned, 0);
    manager.allocate_page(PageOptions::default()).unwrap();
    assert!(!manager.page_info(page).unwrap().resident);
    assert_eq!(ptr.load().unwrap(), 7);
}

#[test]
fn test_mutable_guard_marks_dirty() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);
    let mut ptr = manager.make_ptr(1u64).unwrap();
    let (page, _) = ptr.location().unwrap();
    manager.flush().unwrap();
    assert!(!manager.page_info(page).unwrap().dirty);

    {
        let mut guard = ptr.get_mut().unwrap();
        *guard += 10;

        // write back skips mutably borrowed pages
        manager.flush().unwrap();
        assert!(manager.page_info(page).unwrap().dirty);
    }

    assert!(manager.page_info(page).unwrap().dirty);
    manager.swap_out(page, false).unwrap();
    assert_eq!(ptr.load().unwrap(), 11);
}

#[test]
fn test_lazy_binding() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);
    let mut ptr = manager.null_ptr::<u64>();
    assert!(!ptr.is_bound());
    assert!(matches!(ptr.get(), Err(VMError::UnboundPointer)));
    assert!(matches!(ptr.load(), Err(VMError::UnboundPointer)));

    assert_eq!(*ptr.get_or_bind().unwrap(), 0);
    assert!(ptr.is_bound());
    let location = ptr.location();

    *ptr.get_mut_or_bind().unwrap() = 99;
    assert_eq!(ptr.location(), location);
    assert_eq!(ptr.replace(5).unwrap(), 99);
    assert_eq!(ptr.load().unwrap(), 5);
    assert_eq!(manager.statistics().heap_allocations, 1);
}

#[test]
fn test_idempotent_destroy() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);
    let counter = Rc::new(Cell::new(0u32));

    struct Finalized(Rc<Cell<u32>>);
    impl Drop for Finalized {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let mut ptr = manager.make_ptr(Finalized(counter.clone())).unwrap();
    let (page, offset) = ptr.location().unwrap();

    ptr.destroy().unwrap();
    assert_eq!(counter.get(), 1);
    assert!(!ptr.is_bound());
    assert!(matches!(ptr.get(), Err(VMError::UnboundPointer)));

    ptr.destroy().unwrap();
    assert_eq!(counter.get(), 1);
    assert_eq!(manager.statistics().heap_frees, 1);

    // freeing the block behind a stale copy is detected
    assert!(matches!(
        unsafe { manager.heap_free(page, offset) },
        Err(VMError::InvalidFree { .. })
    ));
}

#[test]
fn test_destroy_through_copy() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);
    let counter = Rc::new(Cell::new(0u32));

    struct Finalized(Rc<Cell<u32>>);
    impl Drop for Finalized {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let mut ptr = manager.make_ptr(Finalized(counter.clone())).unwrap();
    let mut copy = ptr;
    let (page, offset) = ptr.location().unwrap();

    ptr.destroy().unwrap();
    assert_eq!(counter.get(), 1);
    assert_eq!(Rc::strong_count(&counter), 1);

    // the copy still carries the old location, but the object is gone
    assert!(copy.is_bound());
    assert!(matches!(
        copy.destroy(),
        Err(VMError::InvalidFree { page: p, offset: o }) if p == page && o == offset
    ));
    assert_eq!(counter.get(), 1);
    assert!(matches!(copy.get(), Err(VMError::DanglingPointer { .. })));
    assert!(matches!(copy.get_mut(), Err(VMError::DanglingPointer { .. })));
    assert_eq!(manager.statistics().heap_frees, 1);
}

#[test]
fn test_stale_copy_after_block_reuse() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);

    let mut ptr = manager.make_ptr(42u64).unwrap();
    let mut copy = ptr;
    ptr.destroy().unwrap();
    assert!(matches!(copy.load(), Err(VMError::DanglingPointer { .. })));

    // same size, so the freed block is handed out again
    let other = manager.make_ptr(7u64).unwrap();
    assert_eq!(other.location(), copy.location());

    assert!(matches!(copy.load(), Err(VMError::DanglingPointer { .. })));
    assert!(matches!(copy.store(1), Err(VMError::DanglingPointer { .. })));
    assert!(matches!(copy.replace(1), Err(VMError::DanglingPointer { .. })));
    assert!(matches!(copy.destroy(), Err(VMError::InvalidFree { .. })));
    assert!(matches!(copy.bind(), Err(VMError::DanglingPointer { .. })));
    assert_eq!(other.load().unwrap(), 7);
}

#[test]
fn test_raw_access_refuses_managed_pages() {
    let manager = get_memory_manager(VMConfig::new(256, 8), 4);

    let ptr = manager.make_ptr(5u32).unwrap();
    let (heap_page, _) = ptr.location().unwrap();
    assert!(matches!(
        manager.write_page(heap_page, 0, &[0; 16]),
        Err(VMError::PageInUse(page)) if page == heap_page
    ));
    assert!(matches!(manager.free_page(heap_page, true), Err(VMError::PageInUse(_))));

    // arrays live on pages of their own
    let array = manager.new_array_filled::<u64, 40>(3).unwrap();
    let array_page = (0..8)
        .find(|idx| manager.page_info(*idx).unwrap().is_container)
        .unwrap();
    assert!(matches!(
        manager.write_page(array_page, 0, &[0xFF; 8]),
        Err(VMError::PageInUse(_))
    ));
    assert!(matches!(manager.free_page(array_page, false), Err(VMError::PageInUse(_))));

    // reading raw bytes is fine
    let mut bytes = [0u8; 8];
    manager.read_page(array_page, 0, &mut bytes).unwrap();
    assert_eq!(u64::from_ne_bytes(bytes), 3);
    assert_eq!(array.load(0).unwrap(), 3);
    assert_eq!(ptr.load().unwrap(), 5);

    drop(array);
    assert!(!manager.page_info(array_page).unwrap().allocated);
}

#[test]
fn test_finalizer_panic_frees_storage() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);

    struct PanicOnDrop(#[allow(dead_code)] u32);
    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("finalizer failed");
        }
    }

    let mut ptr = manager.make_ptr(PanicOnDrop(3)).unwrap();
    let (page, _) = ptr.location().unwrap();

    assert!(matches!(ptr.destroy(), Err(VMError::FinalizerPanicked)));
    assert!(!ptr.is_bound());
    assert_eq!(manager.statistics().heap_frees, 1);
    assert_eq!(manager.page_info(page).unwrap().pinned, 0);

    let blocks = manager.heap_blocks(page).unwrap();
    assert!(blocks.iter().all(|block| block.free));

    // storage can be reused right away
    let other = manager.make_ptr(8u32).unwrap();
    assert_eq!(other.load().unwrap(), 8);
}

#[test]
fn test_pointer_arithmetic_across_pages() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);

    // 64 u32 per page, pages 0..3 are contiguous
    for _ in 0..3 {
        manager.allocate_page(PageOptions::default()).unwrap();
    }
    for i in 0..192u32 {
        let index = i as usize;
        manager
            .write_page(index / 64, (index % 64) * 4, &i.to_ne_bytes())
            .unwrap();
    }

    let base: VMPtr<u32, _, _> = VMPtr::new(manager.get_inner(), 0, 0);
    let far = base + 130;
    assert_eq!(far.location(), Some((2, 8)));
    assert_eq!(far.load().unwrap(), 130);
    assert_eq!(far.offset_from(&base), 130);

    // backwards over two page borders
    let back = far - 129;
    assert_eq!(back.location(), Some((0, 4)));
    assert_eq!(back.load().unwrap(), 1);

    let mut cursor = base + 63;
    cursor += 1;
    assert_eq!(cursor.location(), Some((1, 0)));
    cursor -= 1;
    assert_eq!(cursor.location(), Some((0, 252)));
    assert_eq!(cursor.load().unwrap(), 63);
    assert_eq!(base.offset_from(&cursor), -63);
    assert!(cursor == base + 63);
}

#[test]
#[should_panic]
fn test_pointer_arithmetic_before_first_page() {
    let manager = get_memory_manager(VMConfig::new(256, 4), 2);
    let base: VMPtr<u32, _, _> = VMPtr::new(manager.get_inner(), 0, 4);
    let _ = base - 2;
}

#[test]
fn test_unsupported_alignment() {
    #[repr(align(16))]
    struct Aligned(#[allow(dead_code)] u8);

    let manager = get_memory_manager(VMConfig::new(256, 4), 2);
    assert!(matches!(
        manager.make_ptr(Aligned(1)),
        Err(VMError::UnsupportedAlignment(16))
    ));
}
