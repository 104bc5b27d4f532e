//! Validated, hypervisor-owned cell configurations.
//!
//! A [`CellConfig`] is the in-core copy of a guest-supplied descriptor
//! ([`corral_abi::config`]): bounded name, configuration flags, the raw
//! CPU-set bitmap and the checked memory-region list. The root cell's
//! configuration arrives through the [`SystemConfig`] instead, assembled at
//! enablement from the system configuration the driver loaded.

use alloc::vec::Vec;

use bitflags::bitflags;
use thiserror::Error;

use corral_abi::config::{CellDescRaw, MemRegionRaw, NAME_LEN, cell_flags};

use crate::memory::region::{self, MemRegion};
use crate::utils::types::Name;
use crate::{HvError, HvResult};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u32 {
        const PASSIVE_COMMREG = cell_flags::PASSIVE_COMMREG;
    }
}

#[derive(Debug, Clone, Copy, Error)]
pub enum ConfigError {
    #[error("descriptor truncated")]
    Truncated,
    #[error("cell name is not NUL-terminated utf-8")]
    BadName,
}

impl From<ConfigError> for HvError {
    fn from(_: ConfigError) -> Self {
        HvError::Inval
    }
}

/// Reads the fixed descriptor header off a guest mapping.
pub fn read_header(bytes: &[u8]) -> Result<CellDescRaw, ConfigError> {
    if bytes.len() < size_of::<CellDescRaw>() {
        return Err(ConfigError::Truncated);
    }
    // bounds-checked above; the descriptor has no alignment guarantee in
    // guest memory
    Ok(unsafe { bytes.as_ptr().cast::<CellDescRaw>().read_unaligned() })
}

/// Decodes the NUL-padded name field.
pub fn parse_name(header: &CellDescRaw) -> Result<Name, ConfigError> {
    let len = header
        .name
        .iter()
        .position(|b| *b == 0)
        .ok_or(ConfigError::BadName)?;
    let name = core::str::from_utf8(&header.name[..len]).map_err(|_| ConfigError::BadName)?;
    Name::try_from(name).map_err(|_| ConfigError::BadName)
}

/// A validated cell configuration, immutable for the cell's lifetime.
#[derive(Debug, Clone)]
pub struct CellConfig {
    name: Name,
    flags: CellFlags,
    cpu_bitmap: Vec<u8>,
    regions: Vec<MemRegion>,
    /// Wire size of the descriptor this config was copied from
    total_size: usize,
}

impl CellConfig {
    /// Validates and copies a complete guest descriptor. `bytes` must span
    /// exactly the size implied by the header.
    pub fn parse(bytes: &[u8]) -> HvResult<Self> {
        let header = read_header(bytes)?;
        let total_size = header.config_size();
        if bytes.len() < total_size {
            return Err(ConfigError::Truncated.into());
        }

        let name = parse_name(&header)?;
        let flags = CellFlags::from_bits_truncate(header.flags);

        let bitmap_start = size_of::<CellDescRaw>();
        let regions_start = bitmap_start + header.cpu_set_size as usize;
        let cpu_bitmap = bytes[bitmap_start..regions_start].to_vec();

        let mut raw_regions = Vec::with_capacity(header.num_memory_regions as usize);
        for n in 0..header.num_memory_regions as usize {
            let offset = regions_start + n * size_of::<MemRegionRaw>();
            let desc = &bytes[offset..offset + size_of::<MemRegionRaw>()];
            raw_regions.push(unsafe { desc.as_ptr().cast::<MemRegionRaw>().read_unaligned() });
        }
        let regions = region::check_mem_regions(&raw_regions)?;

        Ok(Self {
            name,
            flags,
            cpu_bitmap,
            regions,
            total_size,
        })
    }

    /// Assembles a configuration directly, used for the root cell.
    pub fn from_parts(
        name: &str,
        flags: CellFlags,
        cpu_bitmap: Vec<u8>,
        regions: Vec<MemRegion>,
    ) -> Result<Self, ConfigError> {
        let total_size = size_of::<CellDescRaw>()
            + cpu_bitmap.len()
            + regions.len() * size_of::<MemRegionRaw>();
        if name.len() >= NAME_LEN {
            return Err(ConfigError::BadName);
        }

        Ok(Self {
            name: Name::try_from(name).map_err(|_| ConfigError::BadName)?,
            flags,
            cpu_bitmap,
            regions,
            total_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    pub fn cpu_bitmap(&self) -> &[u8] {
        &self.cpu_bitmap
    }

    pub fn regions(&self) -> &[MemRegion] {
        &self.regions
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

/// The system configuration the hypervisor was enabled with.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// The root cell: at rest it owns every CPU and memory region in the
    /// system
    pub root_cell: CellConfig,
    pub mem_pool_pages: usize,
    pub remap_pool_pages: usize,
}

/// Serializes a descriptor the way a root-cell driver lays it out in guest
/// memory.
#[cfg(test)]
pub(crate) fn encode_config(
    name: &str,
    flags: u32,
    cpu_bitmap: &[u8],
    regions: &[MemRegionRaw],
) -> Vec<u8> {
    let mut raw_name = [0u8; NAME_LEN];
    raw_name[..name.len()].copy_from_slice(name.as_bytes());

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&raw_name);
    bytes.extend_from_slice(&flags.to_ne_bytes());
    bytes.extend_from_slice(&(cpu_bitmap.len() as u32).to_ne_bytes());
    bytes.extend_from_slice(&(regions.len() as u32).to_ne_bytes());
    bytes.extend_from_slice(cpu_bitmap);
    for r in regions {
        bytes.extend_from_slice(&r.phys_start.to_ne_bytes());
        bytes.extend_from_slice(&r.virt_start.to_ne_bytes());
        bytes.extend_from_slice(&r.size.to_ne_bytes());
        bytes.extend_from_slice(&r.flags.to_ne_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_abi::config::mem_flags;

    #[test]
    fn parses_a_well_formed_descriptor() {
        let bytes = encode_config(
            "apu",
            cell_flags::PASSIVE_COMMREG,
            &[0b0000_0110],
            &[MemRegionRaw {
                phys_start: 0x1000,
                virt_start: 0x0,
                size: 0x2000,
                flags: mem_flags::READ | mem_flags::LOADABLE,
            }],
        );

        let config = CellConfig::parse(&bytes).unwrap();
        assert_eq!(config.name(), "apu");
        assert!(config.flags().contains(CellFlags::PASSIVE_COMMREG));
        assert_eq!(config.cpu_bitmap(), &[0b0000_0110]);
        assert_eq!(config.regions().len(), 1);
        assert_eq!(config.total_size(), bytes.len());
    }

    #[test]
    fn rejects_truncated_descriptors() {
        let bytes = encode_config("apu", 0, &[0b10], &[]);
        assert!(matches!(CellConfig::parse(&bytes[..10]), Err(HvError::Inval)));
    }

    #[test]
    fn rejects_a_bad_region() {
        let bytes = encode_config(
            "apu",
            0,
            &[0b10],
            &[MemRegionRaw {
                phys_start: 0x1000,
                virt_start: 0x0,
                size: 0x1234,
                flags: mem_flags::READ,
            }],
        );
        assert!(matches!(CellConfig::parse(&bytes), Err(HvError::Inval)));
    }

    #[test]
    fn rejects_an_unterminated_name() {
        let mut bytes = encode_config("x", 0, &[0b10], &[]);
        for b in bytes[..NAME_LEN].iter_mut() {
            *b = b'a';
        }
        assert!(matches!(CellConfig::parse(&bytes), Err(HvError::Inval)));
    }
}
