//! # Memory Layout

/// Size of one physical frame and of every page-table node.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Entries per page-table node at every level.
pub const TABLE_ENTRIES: usize = 512;

/// First virtual address of the kernel-shared higher half.
///
/// Everything at or above this address is mapped identically in every
/// address space; the top-level entries covering it are copied into each
/// new context and are never freed by context teardown.
pub const KERNEL_HALF_BASE: u64 = 0xffff_8000_0000_0000;

/// First top-level (PML4) slot belonging to the kernel-shared half.
///
/// Context teardown frees sub-tables strictly below this slot.
pub const KERNEL_HALF_FIRST_SLOT: usize = 256;

/// Base of the higher-half direct map: physical byte `pa` is readable at
/// `HHDM_BASE + pa` once paging is up.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel image executes (VMA); must match the linker script.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    // The shared-half boundary must fall exactly on a top-level slot.
    assert!((KERNEL_HALF_BASE >> 39) & 0x1ff == KERNEL_HALF_FIRST_SLOT as u64);
    assert!(KERNEL_HALF_BASE & ((1 << 39) - 1) == 0);
    assert!(HHDM_BASE >= KERNEL_HALF_BASE);
    assert!(KERNEL_BASE > HHDM_BASE);
};
