use crate::access::PhysAccess;
use crate::entry::{Entry, PageAttrs, Permissions};
use crate::node::{Level, PageTableNode};
use crate::tlb;
use kernel_addrs::{
    FrameNumber, PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, align_down,
};
use kernel_frames::{BuddyAllocator, FrameUse, OutOfFrames};
use kernel_info::cpu::CpuFeatures;
use kernel_info::memory::{KERNEL_HALF_FIRST_SLOT, TABLE_ENTRIES};

/// Result of a successful [`Walker::translate`].
#[derive(Copy, Clone, Debug)]
pub struct Translation {
    /// Physical address the virtual address resolves to.
    pub phys: PhysicalAddress,
    /// Permissions intersected across every traversed level.
    pub perms: Permissions,
}

/// The level-generic page-table editor.
///
/// One recursive implementation drives all four levels off the constants
/// in [`Level`]. Table nodes come from (and return to) the buddy
/// allocator, which also keeps each node's present-entry count in the
/// node's frame descriptor; every count transition happens here, exactly
/// once per entry changing presence.
///
/// The walker holds no lock. A context has at most one concurrent editor
/// (its owner serializes edits); the `&mut BuddyAllocator` threaded
/// through every mutating call is obtained under the frame bank's lock.
pub struct Walker<'m, M: PhysAccess> {
    access: &'m M,
    features: CpuFeatures,
}

impl<'m, M: PhysAccess> Walker<'m, M> {
    #[must_use]
    pub const fn new(access: &'m M, features: CpuFeatures) -> Self {
        Self { access, features }
    }

    fn node_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTableNode {
        // SAFETY: every page reaching the walker hosts a live table frame
        // covered by the access seam; borrows are kept transient so no two
        // references to the same node overlap.
        unsafe { self.access.table_mut(page) }
    }

    /// Map `[va, va_end)` onto `[pa, pa + (va_end - va))` with `attrs`.
    ///
    /// Every entry spanned is installed as the largest leaf the remaining
    /// length and the alignment of both addresses permit. Existing
    /// mappings in the range are overwritten unconditionally; a live
    /// sub-table fully covered by a new large leaf is torn down, and a
    /// large leaf partially covered by the request is first split into a
    /// finer table carrying the old mapping.
    ///
    /// All addresses must be page-aligned and `va < va_end`.
    ///
    /// # Errors
    /// [`OutOfFrames`] if a needed table node cannot be allocated. Already
    /// installed portions of the range remain mapped.
    pub fn map(
        &self,
        frames: &mut BuddyAllocator<'_>,
        root: PhysicalPage<Size4K>,
        va: VirtualAddress,
        va_end: VirtualAddress,
        pa: PhysicalAddress,
        attrs: PageAttrs,
    ) -> Result<(), OutOfFrames> {
        debug_assert!(va.is_aligned_to(Size4K::SIZE) && va_end.is_aligned_to(Size4K::SIZE));
        debug_assert!(pa.is_aligned_to(Size4K::SIZE));
        debug_assert!(va < va_end);
        let mapped = self.map_level(frames, Level::Pml4, root, va, va_end, pa, attrs)?;
        debug_assert_eq!(mapped, va_end - va);
        Ok(())
    }

    /// Per-level mapping: one loop iteration per entry spanned by the
    /// range. Returns the number of bytes mapped.
    fn map_level(
        &self,
        frames: &mut BuddyAllocator<'_>,
        level: Level,
        table: PhysicalPage<Size4K>,
        va: VirtualAddress,
        va_end: VirtualAddress,
        pa: PhysicalAddress,
        attrs: PageAttrs,
    ) -> Result<u64, OutOfFrames> {
        let span = level.entry_span();
        let mut cur = va;
        let mut pa = pa;
        let mut index = level.index_of(va);
        let mut mapped = 0u64;

        while cur < va_end && index < TABLE_ENTRIES {
            let slot_end = slot_end(cur, span, va_end);
            let chunk = slot_end - cur;

            if chunk == span && level.leaf_allowed(self.features) && pa.is_aligned_to(span) {
                self.install_leaf(frames, level, table, index, cur, pa, attrs);
            } else {
                let child = self.ensure_child(frames, level, table, index)?;
                let next = level.child().expect("bottom-level entries fill their slot");
                let inner = self.map_level(frames, next, child, cur, slot_end, pa, attrs)?;
                debug_assert_eq!(inner, chunk);
            }

            mapped += chunk;
            cur = slot_end;
            pa += chunk;
            index += 1;
        }
        Ok(mapped)
    }

    /// Write one leaf entry, handling whatever occupied the slot before.
    fn install_leaf(
        &self,
        frames: &mut BuddyAllocator<'_>,
        level: Level,
        table: PhysicalPage<Size4K>,
        index: usize,
        va: VirtualAddress,
        pa: PhysicalAddress,
        attrs: PageAttrs,
    ) {
        let old = self.node_mut(table).get(index);
        if old.present() {
            if !level.entry_is_leaf(old) {
                // The new leaf covers the whole sub-table.
                let next = level.child().expect("bottom-level entries are leaves");
                self.free_subtree(frames, next, old.next_table());
            }
        } else {
            frames.add_table_entry(FrameNumber::from(table));
        }
        let leaf = Entry::leaf(pa, attrs, level != Level::Pt, self.features);
        self.node_mut(table).set(index, leaf);

        // Last write wins; drop whatever translations the slot held.
        if old.present() {
            if level.entry_is_leaf(old) {
                tlb::invalidate_page(va);
            } else {
                tlb::flush_all();
            }
        }
    }

    /// Get the next-level table under `table[index]`, allocating it if the
    /// slot is empty and splitting a large leaf that only partially
    /// overlaps the operation.
    fn ensure_child(
        &self,
        frames: &mut BuddyAllocator<'_>,
        level: Level,
        table: PhysicalPage<Size4K>,
        index: usize,
    ) -> Result<PhysicalPage<Size4K>, OutOfFrames> {
        let e = self.node_mut(table).get(index);
        if e.present() {
            if level.entry_is_leaf(e) {
                self.split_leaf(frames, level, table, index)
            } else {
                Ok(e.next_table())
            }
        } else {
            let frame = frames.alloc(0, FrameUse::PageTable)?;
            let child = frame.page();
            self.node_mut(child).zero();
            self.node_mut(table).set(index, Entry::table_link(child));
            frames.add_table_entry(FrameNumber::from(table));
            Ok(child)
        }
    }

    /// Replace the large leaf at `table[index]` with a next-level table
    /// mapping the same range at finer granularity.
    ///
    /// All 512 child entries are populated (hosted count starts at 512),
    /// carrying the old entry's bits, accessed/dirty included, so the
    /// translation is unchanged and no TLB maintenance is needed here.
    /// Whoever then modifies part of the new table invalidates that part.
    fn split_leaf(
        &self,
        frames: &mut BuddyAllocator<'_>,
        level: Level,
        table: PhysicalPage<Size4K>,
        index: usize,
    ) -> Result<PhysicalPage<Size4K>, OutOfFrames> {
        debug_assert!(matches!(level, Level::Pdpt | Level::Pd));
        let frame = frames.alloc(0, FrameUse::PageTable)?;
        let child_page = frame.page();
        let child_level = level.child().expect("split only happens above PT");

        let old = self.node_mut(table).get(index);
        debug_assert!(old.present() && level.entry_is_leaf(old));
        log::trace!("splitting {level:?} leaf #{index} into a {child_level:?} table");

        let span = child_level.entry_span();
        let base = old.address();
        let child = self.node_mut(child_page);
        for i in 0..TABLE_ENTRIES {
            let mut e = old;
            e.set_huge(child_level != Level::Pt);
            e.set_address(base + span * i as u64);
            child.set(i, e);
        }
        frames.set_table_entries(frame, TABLE_ENTRIES as u16);
        self.node_mut(table).set(index, Entry::table_link(child_page));
        Ok(child_page)
    }

    /// Remove all mappings in `[va, va_end)`.
    ///
    /// Absent entries are skipped. Large leaves only partially covered by
    /// the range are split first, exactly as in [`Self::map`]. A sub-table
    /// whose present-entry count reaches zero is freed and unlinked on the
    /// way back up, unless it hangs off the kernel-shared upper half of
    /// the root, which outlives every context.
    ///
    /// Returns the address unmapping actually reached: `va_end` normally,
    /// or earlier if a split could not allocate its finer table.
    pub fn unmap(
        &self,
        frames: &mut BuddyAllocator<'_>,
        root: PhysicalPage<Size4K>,
        va: VirtualAddress,
        va_end: VirtualAddress,
    ) -> VirtualAddress {
        debug_assert!(va.is_aligned_to(Size4K::SIZE) && va_end.is_aligned_to(Size4K::SIZE));
        debug_assert!(va < va_end);
        self.unmap_level(frames, Level::Pml4, root, va, va_end)
    }

    fn unmap_level(
        &self,
        frames: &mut BuddyAllocator<'_>,
        level: Level,
        table: PhysicalPage<Size4K>,
        va: VirtualAddress,
        va_end: VirtualAddress,
    ) -> VirtualAddress {
        let span = level.entry_span();
        let mut cur = va;
        let mut index = level.index_of(va);

        while cur < va_end && index < TABLE_ENTRIES {
            let slot_end = slot_end(cur, span, va_end);

            let e = self.node_mut(table).get(index);
            if e.present() {
                if level.entry_is_leaf(e) && slot_end - cur == span {
                    self.node_mut(table).set(index, Entry::new());
                    frames.remove_table_entry(FrameNumber::from(table));
                    tlb::invalidate_page(cur);
                } else {
                    let child = if level.entry_is_leaf(e) {
                        match self.split_leaf(frames, level, table, index) {
                            Ok(child) => child,
                            // No frame for the finer table; report how far
                            // unmapping got.
                            Err(OutOfFrames { .. }) => return cur,
                        }
                    } else {
                        e.next_table()
                    };
                    let next = level.child().expect("PT leaves fill their slot");
                    let reached = self.unmap_level(frames, next, child, cur, slot_end);

                    let shared = level == Level::Pml4 && index >= KERNEL_HALF_FIRST_SLOT;
                    let child_frame = FrameNumber::from(child);
                    if frames.table_entries(child_frame) == 0 && !shared {
                        frames.free(child_frame);
                        self.node_mut(table).set(index, Entry::new());
                        frames.remove_table_entry(FrameNumber::from(table));
                    }
                    if reached < slot_end {
                        return reached;
                    }
                }
            }
            cur = slot_end;
            index += 1;
        }
        cur
    }

    /// Translate `va`, combining permissions across the walk.
    ///
    /// Read-only; absent mappings are a normal `None`, not an error.
    #[must_use]
    pub fn translate(&self, root: PhysicalPage<Size4K>, va: VirtualAddress) -> Option<Translation> {
        let mut level = Level::Pml4;
        let mut table = root;
        let mut perms = Permissions::unrestricted();
        loop {
            let e = self.node_mut(table).get(level.index_of(va));
            if !e.present() {
                return None;
            }
            perms = perms.narrow(e);
            if level.entry_is_leaf(e) {
                let phys = e.address() + (va.as_u64() & (level.entry_span() - 1));
                return Some(Translation { phys, perms });
            }
            table = e.next_table();
            level = level.child().expect("PT entries are always leaves");
        }
    }

    /// Free an entire root table.
    ///
    /// Recursively frees every owned sub-table, then the root frame
    /// itself. With `keep_shared_half`, entries at and above the
    /// kernel-half boundary slot are skipped: their sub-trees are
    /// referenced by every address space and belong to the kernel's
    /// canonical context alone.
    pub fn free_table(
        &self,
        frames: &mut BuddyAllocator<'_>,
        root: PhysicalPage<Size4K>,
        keep_shared_half: bool,
    ) {
        let limit = if keep_shared_half {
            KERNEL_HALF_FIRST_SLOT
        } else {
            TABLE_ENTRIES
        };
        for index in 0..limit {
            let e = self.node_mut(root).get(index);
            if e.present() {
                self.free_subtree(frames, Level::Pdpt, e.next_table());
            }
        }
        frames.free(FrameNumber::from(root));
    }

    /// Free a table and every table below it. Leaf target frames are not
    /// owned by the tables and are left alone.
    fn free_subtree(
        &self,
        frames: &mut BuddyAllocator<'_>,
        level: Level,
        table: PhysicalPage<Size4K>,
    ) {
        for index in 0..TABLE_ENTRIES {
            let e = self.node_mut(table).get(index);
            if e.present() && !level.entry_is_leaf(e) {
                let next = level.child().expect("PT entries are always leaves");
                self.free_subtree(frames, next, e.next_table());
            }
        }
        frames.free(FrameNumber::from(table));
    }
}

/// End of the table slot containing `cur`, clamped to `va_end`. The top
/// slot of the address space would overflow the naive computation.
fn slot_end(cur: VirtualAddress, span: u64, va_end: VirtualAddress) -> VirtualAddress {
    let boundary = align_down(cur.as_u64(), span).wrapping_add(span);
    if boundary == 0 {
        va_end
    } else {
        VirtualAddress::new(boundary.min(va_end.as_u64()))
    }
}
