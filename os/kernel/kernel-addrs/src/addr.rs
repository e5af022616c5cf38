use crate::page::{PhysicalPage, VirtualPage};
use crate::page_size::PageSize;
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// A physical memory address (machine bus address).
///
/// No alignment guarantee by itself; page-table entries store these with
/// the low `S::SHIFT` bits implicitly zero.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

/// A virtual memory address.
///
/// x86-64 virtual addresses are canonical: bits 63..48 replicate bit 47.
/// [`VirtualAddress::canonical`] rebuilds that form when an address is
/// reconstructed from table indices.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Page base containing this address.
    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> PhysicalPage<S> {
        PhysicalPage::containing(self)
    }

    /// In-page offset of this address for size `S`.
    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> u64 {
        self.0 & (S::SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, a: u64) -> bool {
        debug_assert!(a.is_power_of_two());
        self.0 & (a - 1) == 0
    }
}

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Sign-extend bit 47 into bits 63..48.
    ///
    /// Used when rebuilding an address from the 9-bit table indices of a
    /// page walk; the raw concatenation leaves the high bits zero.
    #[inline]
    #[must_use]
    pub const fn canonical(raw: u64) -> Self {
        let extended = ((raw << 16) as i64 >> 16) as u64;
        Self(extended)
    }

    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let high = self.0 >> 47;
        high == 0 || high == 0x1_ffff
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> VirtualPage<S> {
        VirtualPage::containing(self)
    }

    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> u64 {
        self.0 & (S::SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, a: u64) -> bool {
        debug_assert!(a.is_power_of_two());
        self.0 & (a - 1) == 0
    }

    /// 9-bit table index at a level whose entries cover `1 << shift` bytes.
    #[inline]
    #[must_use]
    pub const fn table_index(self, shift: u32) -> usize {
        ((self.0 >> shift) & 0x1ff) as usize
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0.checked_add(rhs).expect("PhysicalAddress overflow"))
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl Sub<PhysicalAddress> for PhysicalAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0.checked_sub(rhs.0).expect("PhysicalAddress underflow")
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0.checked_add(rhs).expect("VirtualAddress overflow"))
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl Sub<VirtualAddress> for VirtualAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0.checked_sub(rhs.0).expect("VirtualAddress underflow")
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA({:#018x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({:#018x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
