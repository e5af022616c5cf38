use crate::node::PageTableNode;
use kernel_addrs::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_info::memory::HHDM_BASE;

/// Reaches the contents of a physical frame from the current virtual
/// address space.
///
/// Every physical→virtual translation in the editor funnels through this
/// one seam instead of ad-hoc address casts at each call site. The kernel
/// implements it with the higher-half direct map ([`HhdmAccess`]); tests
/// implement it over a simulated RAM.
pub trait PhysAccess {
    /// Convert a physical address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped (and writable for `&mut` use) in the current
    ///   address space for the duration of `'a`.
    /// - The bytes at `pa` must be a valid `T`, and the caller must not
    ///   create aliasing references to them.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// View a frame as a page-table node.
    ///
    /// # Safety
    /// As for [`Self::phys_to_mut`]; `page` must actually host a table.
    #[inline]
    unsafe fn table_mut<'a>(&self, page: PhysicalPage<Size4K>) -> &'a mut PageTableNode {
        unsafe { self.phys_to_mut::<PageTableNode>(page.base()) }
    }
}

/// [`PhysAccess`] through the higher-half direct map: physical byte `pa`
/// is visible at `HHDM_BASE + pa` once the kernel's own tables are live.
pub struct HhdmAccess;

impl PhysAccess for HhdmAccess {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (HHDM_BASE + pa.as_u64()) as *mut T;
        // SAFETY: the HHDM covers all physical memory and is writable;
        // the caller vouches for the type.
        unsafe { &mut *va }
    }
}
