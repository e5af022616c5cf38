use crate::frame::{FrameInfo, FrameState, FrameTable, FrameUse};
use crate::list::FreeList;
use crate::{MAX_RANK, OutOfFrames, RANK_NUM};
use kernel_addrs::FrameNumber;
use kernel_info::boot::{MemoryMap, PhysicalRange, RangeKind};

/// Buddy allocator over the frame descriptor arena.
///
/// All state lives in the descriptors and the rank-indexed list heads;
/// callers serialize access (see [`FrameBank`](crate::FrameBank) for the
/// locked facade).
pub struct BuddyAllocator<'t> {
    table: FrameTable<'t>,
    free: [FreeList; RANK_NUM],
}

impl<'t> BuddyAllocator<'t> {
    /// Build the allocator from pre-carved descriptor `storage` and the
    /// boot memory map.
    ///
    /// `storage` must cover at least [`MemoryMap::frame_count`] slots;
    /// early boot carves it out of an `Available` range before calling
    /// this (and excludes the carved part from the map it passes in).
    ///
    /// `Available` ranges become free blocks, `Reclaimable` ranges become
    /// [`FrameUse::Firmware`] blocks that a later [`Self::free`] can hand
    /// to the pool, and `Reserved` ranges keep the default reserved
    /// descriptors.
    #[must_use]
    pub fn new(storage: &'t mut [FrameInfo], map: &MemoryMap<'_>) -> Self {
        let frames = usize::try_from(map.frame_count()).expect("frame count");
        debug_assert!(storage.len() >= frames);
        let storage = &mut storage[..frames];
        for slot in storage.iter_mut() {
            *slot = FrameInfo::default();
        }

        let mut this = Self {
            table: FrameTable::new(storage),
            free: [const { FreeList::new() }; RANK_NUM],
        };
        for range in map.ranges {
            if range.kind != RangeKind::Reserved {
                this.seed_range(range);
            }
        }
        log::info!(
            "frame allocator: {} of {} frames free after seeding {} ranges",
            this.free_frames(),
            this.table.len(),
            map.ranges.len(),
        );
        this
    }

    /// Carve one range into maximal power-of-two aligned blocks.
    fn seed_range(&mut self, range: &PhysicalRange) {
        let mut cur = range.first_frame().as_u64();
        let end = range.end_frame().as_u64();
        debug_assert!(end <= self.table.len());
        while cur < end {
            let align_rank = if cur == 0 {
                u32::from(MAX_RANK)
            } else {
                cur.trailing_zeros().min(u32::from(MAX_RANK))
            };
            let fit_rank = (end - cur).ilog2().min(u32::from(MAX_RANK));
            let rank = align_rank.min(fit_rank) as u8;

            let head = FrameNumber::new(cur);
            self.init_block(head, rank);
            match range.kind {
                RangeKind::Available => self.insert_free(head, rank),
                RangeKind::Reclaimable => self.mark_allocated(head, rank, FrameUse::Firmware),
                RangeKind::Reserved => unreachable!(),
            }
            cur += 1 << rank;
        }
        log::debug!(
            "frame allocator: seeded {:?} [{}, {})",
            range.kind,
            range.first_frame(),
            range.end_frame(),
        );
    }

    /// Set up body descriptors for a fresh block of `1 << rank` frames.
    fn init_block(&mut self, head: FrameNumber, rank: u8) {
        for i in 1..(1u64 << rank) {
            self.table.get_mut(head + i).state = FrameState::Body;
        }
    }

    /// Allocate a block of `1 << rank` frames tagged with `kind`.
    ///
    /// Searches the free list at `rank` first, then increasing ranks,
    /// splitting a larger block down and returning the split-off siblings
    /// to their lists.
    ///
    /// # Errors
    /// [`OutOfFrames`] when no rank has a usable block. The allocator is
    /// left untouched in that case.
    pub fn alloc(&mut self, rank: u8, kind: FrameUse) -> Result<FrameNumber, OutOfFrames> {
        debug_assert!(rank <= MAX_RANK);
        for r in rank..=MAX_RANK {
            if let Some(head) = self.free[r as usize].pop(&mut self.table) {
                let head = self.split_to(head, r, head, rank);
                self.mark_allocated(head, rank, kind);
                return Ok(head);
            }
        }
        Err(OutOfFrames { rank })
    }

    /// Allocate like [`Self::alloc`], but only accept placements whose head
    /// frame index is congruent to `phase` modulo `period`.
    ///
    /// `period` must be a power of two no smaller than the block size, and
    /// `phase` must be block-aligned; otherwise no aligned block of this
    /// rank could ever carry the color, which is a caller bug.
    ///
    /// # Errors
    /// [`OutOfFrames`] when no free block of any rank contains a sub-block
    /// of the requested color.
    pub fn alloc_colored(
        &mut self,
        rank: u8,
        kind: FrameUse,
        period: u64,
        phase: u64,
    ) -> Result<FrameNumber, OutOfFrames> {
        let block = 1u64 << rank;
        debug_assert!(rank <= MAX_RANK);
        debug_assert!(period.is_power_of_two() && period >= block);
        debug_assert!(phase < period && phase % block == 0);

        for r in rank..=MAX_RANK {
            let found = self.free[r as usize]
                .iter(&self.table)
                .find_map(|head| colored_sub_block(head, r, rank, period, phase).map(|t| (head, t)));
            if let Some((head, target)) = found {
                self.free[r as usize].unlink(&mut self.table, head);
                let head = self.split_to(head, r, target, rank);
                debug_assert_eq!(head, target);
                self.mark_allocated(target, rank, kind);
                return Ok(target);
            }
        }
        Err(OutOfFrames { rank })
    }

    /// Return a block to the pool, merging greedily.
    ///
    /// `frame` must be the head of a currently allocated block; anything
    /// else is a double free or a mid-block pointer, i.e. a kernel bug.
    ///
    /// While the equal-rank buddy is itself a free head, the buddy is
    /// unlinked and both halves fuse into the next rank; the loop stops at
    /// the first unavailable buddy or at the top rank. The fused block is
    /// then pushed, so the maximal-coalescing invariant holds on return.
    pub fn free(&mut self, frame: FrameNumber) {
        debug_assert_eq!(
            self.table.get(frame).state,
            FrameState::Allocated,
            "free of a frame that is not an allocated block head",
        );

        let mut id = frame.as_u64();
        let mut rank = self.table.get(frame).rank;
        self.table.get_mut(frame).entries = 0;

        while rank < MAX_RANK {
            let buddy = id ^ (1u64 << rank);
            if buddy + (1u64 << rank) > self.table.len() {
                break;
            }
            let info = self.table.get(FrameNumber::new(buddy));
            if info.state != FrameState::Free || info.rank != rank {
                break;
            }
            self.free[rank as usize].unlink(&mut self.table, FrameNumber::new(buddy));
            let hi = id.max(buddy);
            self.table.get_mut(FrameNumber::new(hi)).state = FrameState::Body;
            id = id.min(buddy);
            rank += 1;
        }

        self.insert_free(FrameNumber::new(id), rank);
    }

    /// Split `head` (a just-unlinked block of `from` rank) down to `to`
    /// rank, keeping the half containing `target` at each step and
    /// returning the off halves to their free lists.
    fn split_to(&mut self, head: FrameNumber, from: u8, target: FrameNumber, to: u8) -> FrameNumber {
        debug_assert!(target >= head && (target - head) < (1 << from));
        let mut cur = head.as_u64();
        let mut r = from;
        while r > to {
            r -= 1;
            let half = 1u64 << r;
            if target.as_u64() >= cur + half {
                self.insert_free(FrameNumber::new(cur), r);
                cur += half;
            } else {
                self.insert_free(FrameNumber::new(cur + half), r);
            }
        }
        FrameNumber::new(cur)
    }

    fn insert_free(&mut self, head: FrameNumber, rank: u8) {
        {
            let info = self.table.get_mut(head);
            info.state = FrameState::Free;
            info.rank = rank;
        }
        self.free[rank as usize].push(&mut self.table, head);
    }

    fn mark_allocated(&mut self, head: FrameNumber, rank: u8, kind: FrameUse) {
        let info = self.table.get_mut(head);
        info.state = FrameState::Allocated;
        info.rank = rank;
        info.kind = kind;
        info.entries = 0;
    }

    /// Total number of free frames across all ranks.
    #[must_use]
    pub fn free_frames(&self) -> u64 {
        self.free
            .iter()
            .enumerate()
            .map(|(rank, list)| (list.len() as u64) << rank)
            .sum()
    }

    /// Read access to a frame's descriptor.
    #[must_use]
    pub fn info(&self, frame: FrameNumber) -> &FrameInfo {
        self.table.get(frame)
    }

    /// Whether `frame` lies inside the managed arena.
    #[must_use]
    pub fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u64() < self.table.len()
    }

    /// Present-entry count of the table hosted by `frame`.
    #[must_use]
    pub fn table_entries(&self, frame: FrameNumber) -> u16 {
        let info = self.table.get(frame);
        debug_assert_eq!(info.kind, FrameUse::PageTable);
        info.entries
    }

    /// Overwrite the present-entry count (used when a table is built
    /// wholesale, e.g. while splitting a large leaf).
    pub fn set_table_entries(&mut self, frame: FrameNumber, entries: u16) {
        debug_assert!(entries <= 512);
        let info = self.table.get_mut(frame);
        debug_assert_eq!(info.state, FrameState::Allocated);
        debug_assert_eq!(info.kind, FrameUse::PageTable);
        info.entries = entries;
    }

    /// Record one entry of the hosted table turning present. Returns the
    /// new count.
    pub fn add_table_entry(&mut self, frame: FrameNumber) -> u16 {
        let info = self.table.get_mut(frame);
        debug_assert_eq!(info.kind, FrameUse::PageTable);
        debug_assert!(info.entries < 512);
        info.entries += 1;
        info.entries
    }

    /// Record one entry of the hosted table turning not-present. Returns
    /// the new count; a result of zero means the table is reclaimable.
    pub fn remove_table_entry(&mut self, frame: FrameNumber) -> u16 {
        let info = self.table.get_mut(frame);
        debug_assert_eq!(info.kind, FrameUse::PageTable);
        debug_assert!(info.entries > 0);
        info.entries -= 1;
        info.entries
    }

    /// Walk every free list and assert the maximal-coalescing invariant:
    /// no free head's equal-rank buddy is also a free head.
    ///
    /// Diagnostic; linear in the number of free blocks.
    pub fn check_coalesced(&self) {
        for rank in 0..MAX_RANK {
            for head in self.free[rank as usize].iter(&self.table) {
                debug_assert!(head.is_block_aligned(u32::from(rank)));
                let buddy = head.buddy(u32::from(rank));
                if buddy.as_u64() >= self.table.len() {
                    continue;
                }
                let info = self.table.get(buddy);
                assert!(
                    !(info.state == FrameState::Free && info.rank == rank),
                    "buddies {head} and {buddy} both free at rank {rank}",
                );
            }
        }
    }
}

/// Smallest frame index inside the block `[base, base + 2^block_rank)`
/// that is congruent to `phase` mod `period` and can head an aligned
/// `1 << rank` sub-block, if any.
fn colored_sub_block(
    base: FrameNumber,
    block_rank: u8,
    rank: u8,
    period: u64,
    phase: u64,
) -> Option<FrameNumber> {
    let base = base.as_u64();
    let size = 1u64 << block_rank;
    let shift = (phase + period - base % period) % period;
    let target = base + shift;
    if target + (1 << rank) <= base + size {
        debug_assert!(target % (1 << rank) == 0);
        Some(FrameNumber::new(target))
    } else {
        None
    }
}
