use crate::buddy::BuddyAllocator;
use crate::frame::FrameUse;
use crate::OutOfFrames;
use kernel_addrs::FrameNumber;
use kernel_sync::SpinMutex;

/// The system-wide frame allocator behind its single lock.
///
/// Allocation can be triggered from interrupt context (page-fault paths),
/// so every entry point masks local interrupts for the whole critical
/// section via [`SpinMutex::lock_irq`]. The allocator's internal helpers
/// never lock; the guard held here covers them.
pub struct FrameBank {
    inner: SpinMutex<Option<BuddyAllocator<'static>>>,
}

/// The global frame allocator, installed once during early boot.
pub static FRAMES: FrameBank = FrameBank::empty();

impl FrameBank {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            inner: SpinMutex::new(None),
        }
    }

    /// Install the seeded allocator. Called exactly once at boot, before
    /// any other entry point.
    pub fn init(&self, alloc: BuddyAllocator<'static>) {
        let mut guard = self.inner.lock_irq();
        debug_assert!(guard.is_none(), "frame bank initialized twice");
        *guard = Some(alloc);
    }

    /// Allocate a block of `1 << rank` frames.
    ///
    /// # Errors
    /// [`OutOfFrames`] when no rank can satisfy the request.
    pub fn alloc_block(&self, rank: u8, kind: FrameUse) -> Result<FrameNumber, OutOfFrames> {
        self.with(|a| a.alloc(rank, kind))
    }

    /// Allocate a block whose head index is `phase` modulo `period`.
    ///
    /// # Errors
    /// [`OutOfFrames`] when no block of that color is free.
    pub fn alloc_block_colored(
        &self,
        rank: u8,
        kind: FrameUse,
        period: u64,
        phase: u64,
    ) -> Result<FrameNumber, OutOfFrames> {
        self.with(|a| a.alloc_colored(rank, kind, period, phase))
    }

    /// Return a block to the pool (greedy merge applies).
    pub fn free_block(&self, frame: FrameNumber) {
        self.with(|a| a.free(frame));
    }

    /// Run `f` with the allocator under the bank's lock.
    ///
    /// Used by the page-table editor for compound operations that
    /// interleave node allocation with entry-count bookkeeping.
    pub fn with<R>(&self, f: impl FnOnce(&mut BuddyAllocator<'static>) -> R) -> R {
        let mut guard = self.inner.lock_irq();
        let alloc = guard.as_mut().expect("frame bank not initialized");
        f(alloc)
    }
}
