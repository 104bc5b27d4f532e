//! Per-CPU records.
//!
//! One record exists for every CPU ID the system configuration knows about.
//! Each CPU only ever writes its own record, and the control core writes the
//! records of CPUs it has quiesced, so plain atomics are sufficient.

use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use int_enum::IntEnum;

use crate::HvError;
use crate::cell::{CellId, CpuId, ROOT_CELL_ID};

pub const NUM_CPU_STATS: usize = 4;

/// Event counter slots. The dispatcher bumps [`CpuStat::VmexitsTotal`] and
/// [`CpuStat::VmexitsHypercall`] on entry; the remaining slots belong to the
/// architecture's exit handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
#[repr(u32)]
pub enum CpuStat {
    VmexitsTotal = 0,
    VmexitsHypercall = 1,
    VmexitsManagement = 2,
    VmexitsMmio = 3,
}

/// Progress of the shutdown rendezvous on one root CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    None,
    Started,
    /// Shutdown was refused; retryable
    Failed(HvError),
}

impl ShutdownState {
    fn encode(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Started => 1,
            Self::Failed(err) => err.as_retval(),
        }
    }

    fn decode(raw: i64) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::Started,
            err => Self::Failed(HvError::try_from((-err) as i32).unwrap_or(HvError::Perm)),
        }
    }
}

#[derive(Debug)]
pub struct PerCpu {
    cpu_id: CpuId,
    /// The cell this CPU currently belongs to
    cell: AtomicU32,
    failed: AtomicBool,
    cpu_stopped: AtomicBool,
    shutdown_state: AtomicI64,
    stats: [AtomicU32; NUM_CPU_STATS],
}

impl PerCpu {
    pub fn new(cpu_id: CpuId) -> Self {
        Self {
            cpu_id,
            cell: AtomicU32::new(ROOT_CELL_ID),
            failed: AtomicBool::new(false),
            cpu_stopped: AtomicBool::new(false),
            shutdown_state: AtomicI64::new(0),
            stats: [const { AtomicU32::new(0) }; NUM_CPU_STATS],
        }
    }

    pub fn cpu_id(&self) -> CpuId {
        self.cpu_id
    }

    pub fn cell_id(&self) -> CellId {
        self.cell.load(Ordering::Acquire)
    }

    pub fn set_cell(&self, cell: CellId) {
        self.cell.store(cell, Ordering::Release);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn set_failed(&self, failed: bool) {
        self.failed.store(failed, Ordering::Release);
    }

    pub fn stopped(&self) -> bool {
        self.cpu_stopped.load(Ordering::Acquire)
    }

    pub fn set_stopped(&self) {
        self.cpu_stopped.store(true, Ordering::Release);
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        ShutdownState::decode(self.shutdown_state.load(Ordering::Acquire))
    }

    pub fn set_shutdown_state(&self, state: ShutdownState) {
        self.shutdown_state.store(state.encode(), Ordering::Release);
    }

    pub fn count(&self, stat: CpuStat) {
        self.stats[stat as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Raw counter value; the top bit is reserved and never reported.
    pub fn stat(&self, stat: CpuStat) -> u32 {
        self.stats[stat as usize].load(Ordering::Relaxed)
    }

    pub fn clear_stats(&self) {
        for stat in &self.stats {
            stat.store(0, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_stat(&self, stat: CpuStat, value: u32) {
        self.stats[stat as usize].store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_state_round_trips() {
        for state in [
            ShutdownState::None,
            ShutdownState::Started,
            ShutdownState::Failed(HvError::Perm),
        ] {
            assert_eq!(ShutdownState::decode(state.encode()), state);
        }
    }

    #[test]
    fn fresh_cpus_belong_to_root() {
        let cpu = PerCpu::new(3);
        assert_eq!(cpu.cell_id(), ROOT_CELL_ID);
        assert!(!cpu.failed());
        assert_eq!(cpu.shutdown_state(), ShutdownState::None);
    }
}
