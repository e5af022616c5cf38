//! # Physical frame allocator
//!
//! Buddy allocation over a flat arena of frame descriptors.
//!
//! Physical memory is carved into power-of-two, power-of-two-aligned
//! *blocks* of 4 KiB frames. A block of `1 << rank` frames is tracked
//! entirely through the descriptor of its first frame (the *head*); the
//! remaining descriptors are inert [`FrameState::Body`] placeholders. Free
//! blocks sit in one of [`RANK_NUM`] rank-indexed intrusive lists threaded
//! through the descriptors themselves, so the allocator needs no heap.
//!
//! Two invariants carry the whole structure:
//!
//! - only head frames have meaningful `rank`/`kind` metadata, and
//! - after any [`BuddyAllocator::free`] returns, no two buddy blocks of
//!   equal rank are simultaneously free; merging is greedy and maximal,
//!   never deferred.
//!
//! [`BuddyAllocator::alloc_colored`] additionally constrains *where* a
//! block lands: the returned head index is congruent to `phase` modulo
//! `period`, which lets per-CPU regions land on the same cache sets.
//!
//! [`FrameBank`] wraps one allocator behind a single interrupt-masking spin
//! lock for use from regular kernel threads and fault handlers alike.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bank;
mod buddy;
mod frame;
mod list;

pub use crate::bank::{FRAMES, FrameBank};
pub use crate::buddy::BuddyAllocator;
pub use crate::frame::{FrameInfo, FrameState, FrameTable, FrameUse};

/// Number of block ranks: rank 0 is one 4 KiB frame, rank
/// `RANK_NUM - 1` is a 1 GiB run (`2^18` frames).
pub const RANK_NUM: usize = 19;

/// Largest valid rank.
pub const MAX_RANK: u8 = (RANK_NUM - 1) as u8;

/// The allocator cannot satisfy a request at the given rank (or color).
///
/// This is an ordinary outcome, reported synchronously; the allocator's
/// state is unchanged. Contract violations (double free, unaligned
/// arguments) are *not* errors; they are bugs, caught by debug
/// assertions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("out of physical frames (rank {rank})")]
pub struct OutOfFrames {
    /// The rank that could not be satisfied.
    pub rank: u8,
}
