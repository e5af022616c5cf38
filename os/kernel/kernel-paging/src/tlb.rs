//! TLB maintenance.
//!
//! Policy: every leaf entry the editor removes or replaces is invalidated
//! with one `invlpg` of an address inside it (the CPU drops the covering
//! TLB entry whatever its size). When a whole sub-table is superseded at
//! once, the editor falls back to a full flush instead of touching every
//! address the subtree used to map.
//!
//! On hosted builds these are no-ops so the editor can be unit-tested.

use kernel_addrs::VirtualAddress;

/// Invalidate the TLB entry covering `va` on this CPU.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
pub fn invalidate_page(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}

/// Flush all non-global TLB entries on this CPU by reloading CR3.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
pub fn flush_all() {
    unsafe {
        let cr3: u64;
        core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
pub fn invalidate_page(_va: VirtualAddress) {}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
pub fn flush_all() {}
