//! End-to-end paging tests over a simulated physical memory.
//!
//! "RAM" is a vector of 4 KiB-aligned frames; physical addresses are byte
//! offsets from zero, so frame `n` of the buddy allocator is backed by
//! vector slot `n`. Only table frames are ever dereferenced; mapped
//! target addresses just flow through translations as numbers.

use std::cell::UnsafeCell;

use kernel_addrs::{PhysicalAddress, VirtualAddress};
use kernel_frames::{BuddyAllocator, FrameInfo, OutOfFrames, FrameUse};
use kernel_info::boot::{MemoryMap, PhysicalRange, RangeKind};
use kernel_info::cpu::CpuFeatures;
use kernel_paging::{AddressSpace, PageAttrs, PhysAccess};

const PAGE: u64 = 4096;
const MIB2: u64 = 2 * 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

#[repr(align(4096))]
struct RawFrame([u8; 4096]);

struct TestRam {
    frames: Vec<UnsafeCell<RawFrame>>,
}

impl TestRam {
    fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| UnsafeCell::new(RawFrame([0; 4096])))
                .collect(),
        }
    }
}

impl PhysAccess for TestRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = (pa.as_u64() >> 12) as usize;
        let off = (pa.as_u64() & 0xfff) as usize;
        // The editor only dereferences whole table frames.
        debug_assert_eq!(off, 0);
        let ptr = self.frames[idx].get().cast::<T>();
        unsafe { &mut *ptr }
    }
}

/// Run `f` with a simulated RAM of `frames` frames and a buddy allocator
/// seeded over all of it.
fn with_env<R>(frames: u64, f: impl FnOnce(&TestRam, &mut BuddyAllocator<'_>) -> R) -> R {
    let ram = TestRam::new(frames as usize);
    let mut storage = vec![FrameInfo::default(); frames as usize];
    let ranges = [PhysicalRange::new(0, frames * PAGE, RangeKind::Available)];
    let map = MemoryMap::new(&ranges, PhysicalAddress::new(frames * PAGE));
    let mut alloc = BuddyAllocator::new(&mut storage, &map);
    f(&ram, &mut alloc)
}

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

fn pa(v: u64) -> PhysicalAddress {
    PhysicalAddress::new(v)
}

#[test]
fn map_then_translate_every_page() {
    with_env(128, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();

        let base = 0x40_0000u64;
        let target = 0x10_0000u64;
        space
            .map(alloc, va(base), va(base + 8 * PAGE), pa(target), PageAttrs::user_rw())
            .unwrap();

        for k in 0..8 {
            let t = space.translate(va(base + k * PAGE + 0x123)).unwrap();
            assert_eq!(t.phys.as_u64(), target + k * PAGE + 0x123);
            assert!(t.perms.writable && t.perms.user && t.perms.no_execute);
        }
        assert!(space.translate(va(base - PAGE)).is_none());
        assert!(space.translate(va(base + 8 * PAGE)).is_none());
    });
}

#[test]
fn translate_reflects_leaf_permissions() {
    with_env(128, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();

        space
            .map(alloc, va(0x40_0000), va(0x40_1000), pa(0x1000), PageAttrs::user_rx())
            .unwrap();
        let t = space.translate(va(0x40_0000)).unwrap();
        assert!(!t.perms.writable && t.perms.user && !t.perms.no_execute);

        space
            .map(alloc, va(0x50_0000), va(0x50_1000), pa(0x2000), PageAttrs::kernel_rw())
            .unwrap();
        let t = space.translate(va(0x50_0000)).unwrap();
        // Intermediate links are permissive; the kernel-only leaf narrows
        // the walk.
        assert!(t.perms.writable && !t.perms.user && t.perms.no_execute);
    });
}

#[test]
fn aligned_ranges_use_large_leaves() {
    with_env(64, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let before = alloc.free_frames();

        // 2 MiB aligned on both sides: one PDPT + one PD, leaf at the PD.
        space
            .map(alloc, va(0x20_0000), va(0x40_0000), pa(0), PageAttrs::kernel_rw())
            .unwrap();
        assert_eq!(before - alloc.free_frames(), 2);
        assert_eq!(space.translate(va(0x20_1234)).unwrap().phys.as_u64(), 0x1234);

        // 1 GiB aligned, under a fresh top-level slot: one new PDPT, the
        // PDPT entry itself carries the leaf.
        let before = alloc.free_frames();
        let high = 512 * GIB;
        space
            .map(alloc, va(high), va(high + GIB), pa(0), PageAttrs::kernel_rw())
            .unwrap();
        assert_eq!(before - alloc.free_frames(), 1);
        let t = space.translate(va(high + 123 * PAGE)).unwrap();
        assert_eq!(t.phys.as_u64(), 123 * PAGE);
    });
}

#[test]
fn gigabyte_leaves_require_the_cpu_feature() {
    with_env(64, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::baseline()).unwrap();
        let before = alloc.free_frames();

        // Same 1 GiB request, but without the feature it tiles 512
        // 2 MiB leaves through one PD.
        space
            .map(alloc, va(GIB), va(2 * GIB), pa(0), PageAttrs::kernel_rw())
            .unwrap();
        assert_eq!(before - alloc.free_frames(), 2);
        let t = space.translate(va(GIB + MIB2 + 0x42)).unwrap();
        assert_eq!(t.phys.as_u64(), MIB2 + 0x42);
        // Baseline also lacks NX, so the bit must not have been emitted.
        assert!(!t.perms.no_execute);
    });
}

#[test]
fn unmap_returns_every_table_frame() {
    with_env(128, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let before = alloc.free_frames();

        let base = 0x40_0000u64;
        space
            .map(alloc, va(base), va(base + 8 * PAGE), pa(0x10_0000), PageAttrs::user_rw())
            .unwrap();
        assert_eq!(before - alloc.free_frames(), 3); // PDPT + PD + PT

        let reached = space.unmap(alloc, va(base), va(base + 8 * PAGE));
        assert_eq!(reached.as_u64(), base + 8 * PAGE);
        assert_eq!(alloc.free_frames(), before);
        for k in 0..8 {
            assert!(space.translate(va(base + k * PAGE)).is_none());
        }
        alloc.check_coalesced();
    });
}

#[test]
fn partial_unmap_splits_and_preserves_fragments() {
    with_env(128, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let before = alloc.free_frames();

        // One 2 MiB leaf.
        space
            .map(alloc, va(0x20_0000), va(0x40_0000), pa(0), PageAttrs::kernel_rw())
            .unwrap();

        // Carve four pages out of its middle.
        let hole = 0x20_4000u64;
        let reached = space.unmap(alloc, va(hole), va(hole + 4 * PAGE));
        assert_eq!(reached.as_u64(), hole + 4 * PAGE);

        // Head fragment unchanged.
        assert_eq!(space.translate(va(0x20_3fff)).unwrap().phys.as_u64(), 0x3fff);
        // Hole absent.
        for k in 0..4 {
            assert!(space.translate(va(hole + k * PAGE)).is_none());
        }
        // Tail fragment unchanged.
        assert_eq!(
            space.translate(va(hole + 4 * PAGE)).unwrap().phys.as_u64(),
            0x8000
        );
        assert_eq!(space.translate(va(0x3f_ffff)).unwrap().phys.as_u64(), 0x1f_ffff);

        // Removing the fragments reclaims the split PT and the whole chain.
        space.unmap(alloc, va(0x20_0000), va(hole));
        space.unmap(alloc, va(hole + 4 * PAGE), va(0x40_0000));
        assert_eq!(alloc.free_frames(), before);
        alloc.check_coalesced();
    });
}

#[test]
fn remap_overwrites_and_supersedes() {
    with_env(128, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();

        space
            .map(alloc, va(0x20_0000), va(0x40_0000), pa(0), PageAttrs::kernel_rw())
            .unwrap();
        let after_big = alloc.free_frames();

        // Punching one finer mapping into the leaf splits it...
        space
            .map(alloc, va(0x20_4000), va(0x20_5000), pa(0x80_0000), PageAttrs::kernel_rw())
            .unwrap();
        assert_eq!(after_big - alloc.free_frames(), 1); // the split PT
        assert_eq!(space.translate(va(0x20_4000)).unwrap().phys.as_u64(), 0x80_0000);
        assert_eq!(space.translate(va(0x20_3000)).unwrap().phys.as_u64(), 0x3000);

        // ...and re-mapping the whole span as one leaf tears the split
        // table back down, last write winning everywhere.
        space
            .map(alloc, va(0x20_0000), va(0x40_0000), pa(0x40_0000), PageAttrs::kernel_rw())
            .unwrap();
        assert_eq!(alloc.free_frames(), after_big);
        assert_eq!(
            space.translate(va(0x20_4000)).unwrap().phys.as_u64(),
            0x40_4000
        );
    });
}

#[test]
fn unmap_of_unmapped_space_is_a_quiet_skip() {
    with_env(64, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let before = alloc.free_frames();
        let reached = space.unmap(alloc, va(0x7000_0000), va(0x7800_0000));
        assert_eq!(reached.as_u64(), 0x7800_0000);
        assert_eq!(alloc.free_frames(), before);
    });
}

#[test]
fn map_reports_out_of_frames() {
    with_env(2, |ram, alloc| {
        // Root takes the first frame; a 4 KiB mapping needs three more.
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let err = space
            .map(alloc, va(0x40_0000), va(0x40_1000), pa(0), PageAttrs::kernel_rw())
            .unwrap_err();
        assert_eq!(err, OutOfFrames { rank: 0 });
        // The failed call left no dangling translation behind.
        assert!(space.translate(va(0x40_0000)).is_none());
    });
}

#[test]
fn unmap_split_stops_at_exhaustion() {
    with_env(8, |ram, alloc| {
        let space = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        space
            .map(alloc, va(0x20_0000), va(0x40_0000), pa(0), PageAttrs::kernel_rw())
            .unwrap();

        // Drain the allocator so the split below cannot get its table.
        while alloc.alloc(0, FrameUse::Kernel).is_ok() {}

        let reached = space.unmap(alloc, va(0x20_4000), va(0x20_8000));
        assert_eq!(reached.as_u64(), 0x20_4000, "no progress without a split table");
        // The large mapping is still fully intact.
        assert_eq!(space.translate(va(0x20_4000)).unwrap().phys.as_u64(), 0x4000);
    });
}

#[test]
fn context_lifecycle_returns_every_frame() {
    with_env(256, |ram, alloc| {
        let kernel = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let kva = 0xffff_8000_0000_0000u64;
        kernel
            .map(alloc, va(kva), va(kva + MIB2), pa(0), PageAttrs::kernel_rw())
            .unwrap();

        let before = alloc.free_frames();
        let ctx = AddressSpace::create(alloc, &kernel).unwrap();

        ctx.map(alloc, va(0x20_0000), va(0x40_0000), pa(0), PageAttrs::user_rw())
            .unwrap();
        assert_eq!(ctx.translate(va(0x20_0123)).unwrap().phys.as_u64(), 0x123);

        // The copied upper half resolves kernel addresses too.
        assert_eq!(ctx.translate(va(kva + 0x456)).unwrap().phys.as_u64(), 0x456);

        let reached = ctx.unmap(alloc, va(0x20_0000), va(0x40_0000));
        assert_eq!(reached.as_u64(), 0x40_0000);
        assert!(ctx.translate(va(0x20_0123)).is_none());

        ctx.delete(alloc);
        assert_eq!(alloc.free_frames(), before);
        alloc.check_coalesced();

        // The kernel's own view never wavered.
        assert_eq!(kernel.translate(va(kva + 0x456)).unwrap().phys.as_u64(), 0x456);
    });
}

#[test]
fn context_delete_leaves_shared_tables_alone() {
    with_env(256, |ram, alloc| {
        let kernel = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let kva = 0xffff_8000_0000_0000u64;
        kernel
            .map(alloc, va(kva), va(kva + MIB2), pa(0), PageAttrs::kernel_rw())
            .unwrap();

        // Two contexts sharing the kernel trees; deleting both must not
        // free anything the kernel still walks through.
        let a = AddressSpace::create(alloc, &kernel).unwrap();
        let b = AddressSpace::create(alloc, &kernel).unwrap();
        assert_eq!(a.translate(va(kva)).unwrap().phys.as_u64(), 0);
        a.delete(alloc);
        assert_eq!(b.translate(va(kva)).unwrap().phys.as_u64(), 0);
        b.delete(alloc);
        assert_eq!(kernel.translate(va(kva)).unwrap().phys.as_u64(), 0);
    });
}

#[test]
fn kernel_half_tables_survive_context_unmap() {
    with_env(256, |ram, alloc| {
        let kernel = AddressSpace::new_kernel(alloc, ram, CpuFeatures::all()).unwrap();
        let kva = 0xffff_8000_0000_0000u64;
        kernel
            .map(alloc, va(kva), va(kva + MIB2), pa(0), PageAttrs::kernel_rw())
            .unwrap();
        let ctx = AddressSpace::create(alloc, &kernel).unwrap();

        // Unmapping a kernel range through the context edits the shared
        // trees (visible to everyone) and may free the emptied PD, but
        // the PDPT hanging off the shared top-level slot must survive.
        let before = alloc.free_frames();
        ctx.unmap(alloc, va(kva), va(kva + MIB2));
        assert_eq!(alloc.free_frames(), before + 1, "PD freed, shared PDPT kept");
        assert!(kernel.translate(va(kva)).is_none());

        // The surviving PDPT keeps later kernel mappings visible to the
        // already existing context.
        kernel
            .map(alloc, va(kva), va(kva + MIB2), pa(MIB2), PageAttrs::kernel_rw())
            .unwrap();
        assert_eq!(ctx.translate(va(kva)).unwrap().phys.as_u64(), MIB2);

        ctx.delete(alloc);
    });
}
