use core::fmt;
use core::hash::Hash;

/// Restricts [`PageSize`] implementations to the three markers below.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the x86-64 page sizes.
pub trait PageSize:
    sealed::Sealed + Copy + Clone + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// `log2(SIZE)`: number of low offset bits.
    const SHIFT: u32;
    /// Short human-readable name.
    const NAME: &'static str;
}

/// 4 KiB page, mapped by a PT entry.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;

/// 2 MiB page, mapped by a PD entry with `PS=1`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size2M;

/// 1 GiB page, mapped by a PDPT entry with `PS=1`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size1G;

impl sealed::Sealed for Size4K {}
impl sealed::Sealed for Size2M {}
impl sealed::Sealed for Size1G {}

impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
    const NAME: &'static str = "4K";
}

impl PageSize for Size2M {
    const SIZE: u64 = 2 * 1024 * 1024;
    const SHIFT: u32 = 21;
    const NAME: &'static str = "2M";
}

impl PageSize for Size1G {
    const SIZE: u64 = 1024 * 1024 * 1024;
    const SHIFT: u32 = 30;
    const NAME: &'static str = "1G";
}

impl fmt::Debug for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}

impl fmt::Debug for Size2M {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}

impl fmt::Debug for Size1G {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}
