use crate::addr::{PhysicalAddress, VirtualAddress};
use crate::page_size::PageSize;
use core::fmt;
use core::marker::PhantomData;

/// Page-aligned physical base for size `S`.
///
/// The low `S::SHIFT` bits are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

/// Page-aligned virtual base for size `S`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// Page containing `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self {
            base: addr.as_u64() & !(S::SIZE - 1),
            _size: PhantomData,
        }
    }

    /// Page starting exactly at `addr`; `addr` must be `S`-aligned.
    #[inline]
    #[must_use]
    pub const fn from_base(addr: PhysicalAddress) -> Self {
        debug_assert!(addr.as_u64() & (S::SIZE - 1) == 0);
        Self::containing(addr)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Full address `base + off` (`off` below `S::SIZE`).
    #[inline]
    #[must_use]
    pub const fn join(self, off: u64) -> PhysicalAddress {
        debug_assert!(off < S::SIZE);
        PhysicalAddress::new(self.base + off)
    }
}

impl<S: PageSize> VirtualPage<S> {
    #[inline]
    #[must_use]
    pub const fn containing(addr: VirtualAddress) -> Self {
        Self {
            base: addr.as_u64() & !(S::SIZE - 1),
            _size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_base(addr: VirtualAddress) -> Self {
        debug_assert!(addr.as_u64() & (S::SIZE - 1) == 0);
        Self::containing(addr)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.base)
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>({:#018x})", S::NAME, self.base)
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}>({:#018x})", S::NAME, self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_size::{Size1G, Size2M, Size4K};

    #[test]
    fn containing_masks_low_bits() {
        let pa = PhysicalAddress::new(0x1234_5678);
        assert_eq!(pa.page::<Size4K>().base().as_u64(), 0x1234_5000);
        assert_eq!(pa.page::<Size2M>().base().as_u64(), 0x1220_0000);
        assert_eq!(pa.page::<Size1G>().base().as_u64(), 0);
    }

    #[test]
    fn join_restores_address() {
        let pa = PhysicalAddress::new(0x0000_0008_1234_5678);
        let page = pa.page::<Size2M>();
        assert_eq!(page.join(pa.offset::<Size2M>()), pa);
    }
}
