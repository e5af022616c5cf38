//! # Page-table editor
//!
//! Builds and edits the hardware 4-level translation tables on x86-64.
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! A mapping request is realized with the largest page size alignment
//! permits: 1 GiB leaves at the PDPT level (when the CPU supports them),
//! 2 MiB leaves at the PD level, 4 KiB leaves at the PT level. The four
//! levels are structurally identical, so a single [`Walker`] drives all of
//! them off the per-level constants in [`Level`] instead of four
//! hand-written copies.
//!
//! Table nodes are physical frames obtained from the
//! [`kernel-frames`](kernel_frames) buddy allocator. Each node's
//! present-entry count lives in its frame descriptor; a node is created the
//! first time an entry below it is needed and freed the moment its count
//! returns to zero. The exception is nodes reached through the kernel-shared
//! upper half of a root table, which every address space links to and which
//! only kernel teardown may free.
//!
//! Physical frames are reached through the [`PhysAccess`] seam; the kernel
//! uses the higher-half direct map ([`HhdmAccess`]), tests substitute a
//! simulated RAM.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod access;
mod entry;
mod node;
mod space;
pub mod tlb;
mod walk;

pub use crate::access::{HhdmAccess, PhysAccess};
pub use crate::entry::{Entry, PageAttrs, Permissions};
pub use crate::node::{Level, PageTableNode};
pub use crate::space::AddressSpace;
pub use crate::walk::{Translation, Walker};
