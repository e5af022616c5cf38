//! # Kernel layout and platform facts
//!
//! Compile-time constants describing the virtual memory layout, plus the
//! two pieces of runtime information the memory subsystem consumes at
//! initialization and treats as external input:
//!
//! - the firmware memory map ([`boot::MemoryMap`]), and
//! - the CPU feature report ([`cpu::CpuFeatures`]).
//!
//! Discovering either (ACPI/bootloader parsing, CPUID probing) happens
//! elsewhere; this crate only defines the handoff types.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod cpu;
pub mod memory;
