use bitfield_struct::bitfield;
use kernel_addrs::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_info::cpu::CpuFeatures;

/// One 64-bit page-table entry in its hardware bit layout.
///
/// Models the common superset of all four levels (PML4E, PDPTE, PDE, PTE):
///
/// | Bits  | Name | Meaning |
/// |-------|------|---------|
/// | 0     | P    | present |
/// | 1     | RW   | writable |
/// | 2     | US   | user-mode accessible |
/// | 3     | PWT  | write-through caching |
/// | 4     | PCD  | caching disabled |
/// | 5     | A    | accessed (set by CPU) |
/// | 6     | D    | dirty (leaf only, set by CPU) |
/// | 7     | PS   | large-page leaf (PDPTE/PDE only) |
/// | 8     | G    | global (leaf only) |
/// | 9–11  | AVL  | OS use |
/// | 12–51 | addr | physical bits 51:12 |
/// | 52–58 | AVL  | OS use |
/// | 59–62 | PK   | protection key / OS use |
/// | 63    | NX   | no-execute (requires `EFER.NXE`) |
///
/// The address field stores bits 51:12 uniformly; large leaves simply have
/// their additional low address bits zero by alignment, which matches the
/// hardware encoding as long as PAT is left unused (this kernel never sets
/// it).
#[bitfield(u64)]
pub struct Entry {
    /// Present (P, bit 0).
    pub present: bool,
    /// Writable (RW, bit 1).
    pub writable: bool,
    /// User/Supervisor (US, bit 2).
    pub user: bool,
    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,
    /// Page Cache Disable (PCD, bit 4).
    pub cache_disable: bool,
    /// Accessed (A, bit 5); set by the CPU on first use.
    pub accessed: bool,
    /// Dirty (D, bit 6); set by the CPU on first write to a leaf.
    pub dirty: bool,
    /// Page Size (PS, bit 7): large-page leaf at the PDPT/PD levels.
    /// Must stay clear in PML4 entries and 4 KiB PTEs.
    pub huge: bool,
    /// Global (G, bit 8): TLB entry survives CR3 reloads (leaf only).
    pub global: bool,
    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub avl_low: u8,
    /// Physical address bits 51:12.
    #[bits(40)]
    addr_51_12: u64,
    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub avl_high: u8,
    /// Protection key / OS use (bits 59..=62).
    #[bits(4)]
    pub protection_key: u8,
    /// No-Execute (NX, bit 63). Only valid with `EFER.NXE`.
    pub no_execute: bool,
}

impl Entry {
    /// The physical address carried by the entry (page or next table base).
    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.addr_51_12() << 12)
    }

    #[inline]
    pub const fn set_address(&mut self, pa: PhysicalAddress) {
        self.set_addr_51_12(pa.as_u64() >> 12);
    }

    /// Next-level table referenced by a non-leaf entry.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_base(self.address())
    }

    /// Non-leaf link to `table`.
    ///
    /// Links are deliberately permissive (present, writable, user): the
    /// effective permissions of a translation are the *intersection* over
    /// the walk, so restrictions are expressed at the leaf.
    #[inline]
    #[must_use]
    pub fn table_link(table: PhysicalPage<Size4K>) -> Self {
        let mut e = Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true);
        e.set_address(table.base());
        e
    }

    /// Leaf mapping `pa` with `attrs`. `huge` selects the PS bit for
    /// PDPT/PD-level leaves; the NX bit is suppressed when the CPU lacks
    /// no-execute support.
    #[inline]
    #[must_use]
    pub fn leaf(pa: PhysicalAddress, attrs: PageAttrs, huge: bool, features: CpuFeatures) -> Self {
        let mut e = Self::new()
            .with_present(true)
            .with_writable(attrs.writable)
            .with_user(attrs.user)
            .with_write_through(attrs.write_through)
            .with_cache_disable(attrs.cache_disable)
            .with_huge(huge)
            .with_global(attrs.global)
            .with_no_execute(attrs.no_execute && features.no_execute);
        e.set_address(pa);
        e
    }

    /// The caller-facing attributes stored in this entry.
    #[inline]
    #[must_use]
    pub const fn attrs(self) -> PageAttrs {
        PageAttrs {
            writable: self.writable(),
            user: self.user(),
            no_execute: self.no_execute(),
            global: self.global(),
            write_through: self.write_through(),
            cache_disable: self.cache_disable(),
        }
    }
}

/// Caller-facing mapping attributes, independent of entry form.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PageAttrs {
    pub writable: bool,
    pub user: bool,
    pub no_execute: bool,
    pub global: bool,
    pub write_through: bool,
    pub cache_disable: bool,
}

impl PageAttrs {
    /// Kernel read-write data.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self {
            writable: true,
            user: false,
            no_execute: true,
            global: false,
            write_through: false,
            cache_disable: false,
        }
    }

    /// User read-write data.
    #[must_use]
    pub const fn user_rw() -> Self {
        Self {
            writable: true,
            user: true,
            no_execute: true,
            global: false,
            write_through: false,
            cache_disable: false,
        }
    }

    /// User read-execute (text).
    #[must_use]
    pub const fn user_rx() -> Self {
        Self {
            writable: false,
            user: true,
            no_execute: false,
            global: false,
            write_through: false,
            cache_disable: false,
        }
    }
}

/// Effective permissions of a translation: the logical AND of every
/// traversed entry's grants. An ancestor can only narrow, never widen,
/// matching the hardware's permission combining.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Permissions {
    pub writable: bool,
    pub user: bool,
    pub no_execute: bool,
}

impl Permissions {
    /// Starting point before any entry has been examined.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            writable: true,
            user: true,
            no_execute: false,
        }
    }

    /// Narrow by one traversed entry.
    #[must_use]
    pub const fn narrow(self, e: Entry) -> Self {
        Self {
            writable: self.writable && e.writable(),
            user: self.user && e.user(),
            no_execute: self.no_execute || e.no_execute(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_bit_positions() {
        let e = Entry::new()
            .with_present(true)
            .with_writable(true)
            .with_huge(true)
            .with_no_execute(true);
        let raw = e.into_bits();
        assert_eq!(raw & 1, 1, "P is bit 0");
        assert_eq!(raw & (1 << 1), 1 << 1, "RW is bit 1");
        assert_eq!(raw & (1 << 7), 1 << 7, "PS is bit 7");
        assert_eq!(raw & (1 << 63), 1 << 63, "NX is bit 63");
        assert_eq!(raw & !(1 | 1 << 1 | 1 << 7 | 1 << 63), 0);
    }

    #[test]
    fn address_field_masks_low_and_high_bits() {
        let mut e = Entry::new();
        e.set_address(PhysicalAddress::new(0x0000_0008_1234_5000));
        assert_eq!(e.address().as_u64(), 0x0000_0008_1234_5000);
        assert_eq!(e.into_bits() & 0xfff, 0);
        assert_eq!(e.into_bits() >> 52, 0);
    }

    #[test]
    fn leaf_encodes_attrs_and_gates_nx() {
        let attrs = PageAttrs {
            no_execute: true,
            ..PageAttrs::user_rw()
        };
        let pa = PhysicalAddress::new(0x20_0000);

        let with_nx = Entry::leaf(pa, attrs, true, CpuFeatures::all());
        assert!(with_nx.present() && with_nx.huge() && with_nx.no_execute());
        assert!(with_nx.user() && with_nx.writable());
        assert_eq!(with_nx.address(), pa);

        let without_nx = Entry::leaf(pa, attrs, true, CpuFeatures::baseline());
        assert!(!without_nx.no_execute());
    }

    #[test]
    fn permissions_intersect_across_levels() {
        let p = Permissions::unrestricted()
            .narrow(Entry::new().with_present(true).with_writable(true).with_user(true))
            .narrow(Entry::new().with_present(true).with_writable(false).with_user(true))
            .narrow(
                Entry::new()
                    .with_present(true)
                    .with_writable(true)
                    .with_user(true)
                    .with_no_execute(true),
            );
        assert!(!p.writable, "one read-only level makes the walk read-only");
        assert!(p.user);
        assert!(p.no_execute, "one NX level poisons the walk");
    }

    #[test]
    fn table_link_round_trip() {
        let page = PhysicalPage::from_base(PhysicalAddress::new(0x1234_5000));
        let e = Entry::table_link(page);
        assert!(e.present() && !e.huge());
        assert_eq!(e.next_table(), page);
    }
}
