use crate::access::PhysAccess;
use crate::entry::PageAttrs;
use crate::walk::{Translation, Walker};
use kernel_addrs::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_frames::{BuddyAllocator, FrameUse, OutOfFrames};
use kernel_info::cpu::CpuFeatures;
use kernel_info::memory::{KERNEL_HALF_FIRST_SLOT, TABLE_ENTRIES};

/// One address space: a root (PML4) table frame plus the facts needed to
/// edit it.
///
/// The kernel's canonical space is built once with [`Self::new_kernel`];
/// every later context starts as a copy of its upper half
/// ([`Self::create`]). The lower half of a context is private; the upper
/// half aliases the kernel's sub-tables, which is why
/// [`Self::delete`] tears down strictly below the boundary slot.
pub struct AddressSpace<'m, M: PhysAccess> {
    root: PhysicalPage<Size4K>,
    access: &'m M,
    features: CpuFeatures,
    kernel: bool,
}

impl<'m, M: PhysAccess> AddressSpace<'m, M> {
    /// Build the kernel's canonical address space with an empty root.
    ///
    /// # Errors
    /// [`OutOfFrames`] if no frame is available for the root table.
    pub fn new_kernel(
        frames: &mut BuddyAllocator<'_>,
        access: &'m M,
        features: CpuFeatures,
    ) -> Result<Self, OutOfFrames> {
        let frame = frames.alloc(0, FrameUse::PageTable)?;
        let root = frame.page();
        // SAFETY: the frame was just allocated for this table.
        unsafe { access.table_mut(root) }.zero();
        Ok(Self {
            root,
            access,
            features,
            kernel: true,
        })
    }

    /// Create a context: a fresh root whose upper half is copied from the
    /// kernel's canonical space.
    ///
    /// The copied entries point straight into the kernel's sub-tables:
    /// shared, not owned. Kernel mappings installed through `kernel`
    /// *after* this call only appear here if they reuse one of the copied
    /// top-level entries.
    ///
    /// # Errors
    /// [`OutOfFrames`] if no frame is available for the root table.
    pub fn create(
        frames: &mut BuddyAllocator<'_>,
        kernel: &Self,
    ) -> Result<Self, OutOfFrames> {
        debug_assert!(kernel.kernel, "contexts are created from the canonical space");
        let frame = frames.alloc(0, FrameUse::PageTable)?;
        let root = frame.page();

        // SAFETY: fresh frame for the new root; the kernel root is live.
        let node = unsafe { kernel.access.table_mut(root) };
        node.zero();
        let kernel_node = unsafe { kernel.access.table_mut(kernel.root) };
        let mut present = 0u16;
        for i in KERNEL_HALF_FIRST_SLOT..TABLE_ENTRIES {
            let e = kernel_node.get(i);
            if e.present() {
                node.set(i, e);
                present += 1;
            }
        }
        frames.set_table_entries(frame, present);

        Ok(Self {
            root,
            access: kernel.access,
            features: kernel.features,
            kernel: false,
        })
    }

    /// Tear the space down and return its table frames to the allocator.
    ///
    /// For a context this frees all private (lower-half) sub-tables and
    /// the root, identified purely by the boundary slot index; the shared
    /// upper-half trees are untouched. Deleting the canonical kernel space
    /// (kernel shutdown) frees everything.
    pub fn delete(self, frames: &mut BuddyAllocator<'_>) {
        self.walker().free_table(frames, self.root, !self.kernel);
    }

    /// Map `[va, va_end)` to `[pa, ...)` with `attrs`, using the largest
    /// page sizes alignment permits.
    ///
    /// # Errors
    /// [`OutOfFrames`] if a table node cannot be allocated.
    pub fn map(
        &self,
        frames: &mut BuddyAllocator<'_>,
        va: VirtualAddress,
        va_end: VirtualAddress,
        pa: PhysicalAddress,
        attrs: PageAttrs,
    ) -> Result<(), OutOfFrames> {
        self.walker().map(frames, self.root, va, va_end, pa, attrs)
    }

    /// Unmap `[va, va_end)`; returns the address actually reached.
    pub fn unmap(
        &self,
        frames: &mut BuddyAllocator<'_>,
        va: VirtualAddress,
        va_end: VirtualAddress,
    ) -> VirtualAddress {
        self.walker().unmap(frames, self.root, va, va_end)
    }

    /// Translate `va` through this space's tables.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<Translation> {
        self.walker().translate(self.root, va)
    }

    /// The root table frame (the value CR3 would hold).
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    /// Load CR3 with this space's root.
    ///
    /// # Safety
    /// The space must map the currently executing code and stack, and the
    /// caller is responsible for any required TLB reasoning beyond the
    /// implicit flush of non-global entries.
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    pub unsafe fn activate(&self) {
        let cr3 = self.root.base().as_u64();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }

    const fn walker(&self) -> Walker<'m, M> {
        Walker::new(self.access, self.features)
    }
}
