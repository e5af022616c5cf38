//! # CPU feature report
//!
//! Filled in by the CPUID probing code at boot; consumed by the paging
//! editor to decide which entry forms it may ever emit.

/// Paging-relevant CPU capabilities.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CpuFeatures {
    /// 1 GiB leaf entries (PDPTE with `PS=1`) are supported.
    pub gigabyte_pages: bool,
    /// The no-execute bit (`EFER.NXE`) is supported. When false, the
    /// editor must never set bit 63 in any entry.
    pub no_execute: bool,
}

impl CpuFeatures {
    /// Everything on; convenient for modern hardware and tests.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            gigabyte_pages: true,
            no_execute: true,
        }
    }

    /// Baseline x86-64 without optional paging features.
    #[must_use]
    pub const fn baseline() -> Self {
        Self {
            gigabyte_pages: false,
            no_execute: false,
        }
    }
}
