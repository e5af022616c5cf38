//! Local interrupt masking.
//!
//! `cli`/`sti` and the `RFLAGS.IF` snapshot are only meaningful at CPL0 on
//! x86-64; hosted builds compile these to no-ops so the rest of the crate
//! can be unit-tested.

/// RAII guard: disables local interrupts on creation, restores the previous
/// state on drop.
///
/// Nesting is safe: an inner guard sees interrupts already disabled and
/// leaves them that way on drop; only the outermost guard re-enables.
pub struct IrqGuard {
    /// IF was set when the guard was created.
    were_enabled: bool,
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}

/// Whether `RFLAGS.IF` is currently set.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    let rflags: u64;
    unsafe {
        core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(nostack, preserves_flags));
    }
    rflags & (1 << 9) != 0
}

/// `cli`.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
pub fn disable_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// `sti`.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
pub fn enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    false
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
pub fn disable_interrupts() {}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
pub fn enable_interrupts() {}
