//! Physical memory region descriptors and the overlap arithmetic used when
//! regions are handed back to the root cell.

use bitflags::bitflags;

use corral_abi::config::{MemRegionRaw, mem_flags};

use crate::memory::{PhysAddr, VirtAddr};
use crate::{HvError, HvResult, error};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u64 {
        const READ = mem_flags::READ;
        const WRITE = mem_flags::WRITE;
        const EXECUTE = mem_flags::EXECUTE;
        const DMA = mem_flags::DMA;
        const COMM_REGION = mem_flags::COMM_REGION;
        const LOADABLE = mem_flags::LOADABLE;
    }
}

/// A page-aligned physical region and where the owning cell sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    pub phys_start: PhysAddr,
    pub virt_start: VirtAddr,
    pub size: u64,
    pub flags: MemFlags,
}

impl MemRegion {
    /// Validates a raw descriptor: all three addresses and the size must be
    /// page-aligned and the flags must be recognized.
    pub fn from_raw(raw: &MemRegionRaw) -> HvResult<Self> {
        let phys_start = PhysAddr::new(raw.phys_start);
        let virt_start = VirtAddr::new(raw.virt_start);

        if !phys_start.is_page_aligned()
            || !virt_start.is_page_aligned()
            || raw.size % crate::memory::PAGE_SIZE as u64 != 0
        {
            return Err(HvError::Inval);
        }

        let flags = MemFlags::from_bits(raw.flags).ok_or(HvError::Inval)?;

        Ok(Self {
            phys_start,
            virt_start,
            size: raw.size,
            flags,
        })
    }

    #[inline]
    pub fn contains_phys(&self, addr: PhysAddr) -> bool {
        addr >= self.phys_start && addr < self.phys_start + self.size
    }

    /// The part of `self` that falls inside the root-cell region `root_mem`,
    /// described the way the root cell maps it (root's virt offset, root's
    /// flags). `None` for adjacent or disjoint pairs.
    pub fn overlap_in_root(&self, root_mem: &MemRegion) -> Option<MemRegion> {
        let (phys_start, size) = if root_mem.contains_phys(self.phys_start) {
            let size = root_mem.size - (self.phys_start - root_mem.phys_start);
            (self.phys_start, size.min(self.size))
        } else if self.contains_phys(root_mem.phys_start) {
            let size = self.size - (root_mem.phys_start - self.phys_start);
            (root_mem.phys_start, size.min(root_mem.size))
        } else {
            return None;
        };

        Some(MemRegion {
            phys_start,
            virt_start: root_mem.virt_start + (phys_start - root_mem.phys_start),
            size,
            flags: root_mem.flags,
        })
    }
}

/// Validates every region of a candidate configuration, rejecting the whole
/// config on the first malformed descriptor.
pub fn check_mem_regions(raw_regions: &[MemRegionRaw]) -> HvResult<alloc::vec::Vec<MemRegion>> {
    let mut regions = alloc::vec::Vec::with_capacity(raw_regions.len());
    for raw in raw_regions {
        regions.push(MemRegion::from_raw(raw).inspect_err(|_| {
            error!(
                "invalid memory region ({:#x}, {:#x}, {:#x}, {:#x})",
                raw.phys_start, raw.virt_start, raw.size, raw.flags
            );
        })?);
    }
    Ok(regions)
}
