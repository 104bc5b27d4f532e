//! The narrow interface through which the control core consumes
//! architecture-specific primitives.
//!
//! Every operation here acts on real hardware state: CPU run control, guest
//! page tables and the temporary mapping window for guest memory. The core
//! calls them in carefully ordered sequences; ports must keep them
//! individually synchronous (e.g. [`Arch::suspend_cpu`] returns only once
//! the target CPU has acknowledged quiescence).

use crate::HvResult;
use crate::cell::{Cell, CpuId};
use crate::memory::PhysAddr;
use crate::memory::region::MemRegion;

pub trait Arch: Send + Sync {
    /// Stops the CPU and waits until it has acknowledged quiescence. The CPU
    /// later continues at the same instruction via [`Arch::resume_cpu`].
    fn suspend_cpu(&self, cpu: CpuId);

    fn resume_cpu(&self, cpu: CpuId);

    /// Brings the CPU into a quiescent state where it executes no guest code
    /// until reset.
    fn park_cpu(&self, cpu: CpuId);

    /// Restarts the CPU at its cell's entry point.
    fn reset_cpu(&self, cpu: CpuId);

    /// Releases the CPU back to full host control during hypervisor
    /// shutdown. Not expected to fail.
    fn shutdown_cpu(&self, cpu: CpuId);

    /// Tears down hypervisor mode on the machine. Runs after every non-root
    /// CPU has been released.
    fn shutdown(&self);

    /// Architecture-level setup for a new cell (VM structures, page-table
    /// roots).
    fn cell_create(&self, cell: &Cell) -> HvResult;

    fn cell_destroy(&self, cell: &Cell);

    /// Installs `region` into `cell`'s guest address space.
    fn map_memory_region(&self, cell: &Cell, region: &MemRegion) -> HvResult;

    /// Removes `region` from `cell`'s guest address space. Cannot fail for
    /// regions that were mapped whole.
    fn unmap_memory_region(&self, cell: &Cell, region: &MemRegion) -> HvResult;

    /// Makes all pending mapping changes visible to the affected CPUs.
    /// `cell` is the cell just created or destroyed, if any.
    fn config_commit(&self, cell: Option<&Cell>);

    /// Terminal stop of a panicking CPU. Does not return on real hardware.
    fn panic_stop(&self, cpu: CpuId);

    /// Parks a panicking CPU while the rest of its cell keeps running.
    fn panic_halt(&self, cpu: CpuId);

    fn phys_processor_id(&self) -> CpuId;

    /// Busy-wait relaxation hint used between poll iterations.
    fn cpu_relax(&self);

    /// Maps `pages` guest pages starting at the page-aligned `base` into the
    /// hypervisor's temporary window, read-only. Returns `None` if the guest
    /// range is not accessible.
    fn get_guest_pages(&self, base: PhysAddr, pages: usize) -> Option<&[u8]>;
}
