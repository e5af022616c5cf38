//! # Kernel synchronization primitives
//!
//! A TATAS spin mutex plus an interrupt-masking RAII guard. The frame
//! allocator is callable from fault handlers, so its critical sections use
//! [`SpinMutex::lock_irq`], which disables local interrupts before taking
//! the lock and restores the saved state after releasing it.
//!
//! On hosted builds (unit tests) the interrupt guard is a no-op; the mutex
//! itself works everywhere.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin;

pub use irq::IrqGuard;
pub use spin::{IrqSpinGuard, SpinGuard, SpinMutex};
