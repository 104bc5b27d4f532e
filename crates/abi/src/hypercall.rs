/// Hypercall numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum HypercallCode {
    /// Orderly shutdown of the whole hypervisor
    Disable = 0,
    CellCreate = 1,
    CellStart = 2,
    CellSetLoadable = 3,
    CellDestroy = 4,
    HypervisorGetInfo = 5,
    CellGetState = 6,
    CpuGetInfo = 7,
}

impl HypercallCode {
    // update when a new hypercall is added
    const MAX: u64 = Self::CpuGetInfo as u64;
}

impl TryFrom<u64> for HypercallCode {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value <= Self::MAX {
            Ok(unsafe { core::mem::transmute::<u64, HypercallCode>(value) })
        } else {
            Err(())
        }
    }
}

/// `HYPERVISOR_GET_INFO` query types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum InfoType {
    MemPoolSize = 0,
    MemPoolUsed = 1,
    RemapPoolSize = 2,
    RemapPoolUsed = 3,
    NumCells = 4,
}

impl InfoType {
    const MAX: u64 = Self::NumCells as u64;
}

impl TryFrom<u64> for InfoType {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value <= Self::MAX {
            Ok(unsafe { core::mem::transmute::<u64, InfoType>(value) })
        } else {
            Err(())
        }
    }
}

/// `CPU_GET_INFO` query types: the state query, or a statistics counter
/// offset by [`CPU_INFO_STAT_BASE`].
pub const CPU_INFO_STATE: u64 = 0;
pub const CPU_INFO_STAT_BASE: u64 = 1000;

/// `CPU_GET_INFO` state results.
pub const CPU_RUNNING: i64 = 0;
pub const CPU_FAILED: i64 = 1;
