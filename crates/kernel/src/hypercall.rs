//! The hypercall dispatcher.

use corral_abi::errors::{HvError, into_retval};
use corral_abi::hypercall::HypercallCode;

use crate::cell::CpuId;
use crate::control::Hypervisor;
use crate::memory::PhysAddr;
use crate::percpu::CpuStat;

impl Hypervisor {
    /// Entry point from the architecture's trap handler. Runs on the
    /// invoking CPU with interrupts disabled; `cpu_id` identifies that CPU.
    ///
    /// Returns the operation's non-negative result, or a negated
    /// [`HvError`].
    pub fn hypercall(&self, cpu_id: CpuId, code: u64, arg1: u64, arg2: u64) -> i64 {
        self.percpu(cpu_id).count(CpuStat::VmexitsTotal);
        self.percpu(cpu_id).count(CpuStat::VmexitsHypercall);

        let result = match HypercallCode::try_from(code) {
            Ok(HypercallCode::Disable) => self.shutdown(cpu_id).map(|_| 0),
            Ok(HypercallCode::CellCreate) => self
                .cell_create(cpu_id, PhysAddr::new(arg1))
                .map(|id| id as i64),
            Ok(HypercallCode::CellStart) => self.cell_start(cpu_id, arg1).map(|_| 0),
            Ok(HypercallCode::CellSetLoadable) => self.cell_set_loadable(cpu_id, arg1).map(|_| 0),
            Ok(HypercallCode::CellDestroy) => self.cell_destroy(cpu_id, arg1).map(|_| 0),
            Ok(HypercallCode::HypervisorGetInfo) => self.hypervisor_get_info(arg1),
            Ok(HypercallCode::CellGetState) => self.cell_get_state(cpu_id, arg1),
            Ok(HypercallCode::CpuGetInfo) => self.cpu_get_info(cpu_id, arg1, arg2),
            Err(()) => Err(HvError::NoSys),
        };

        into_retval(result)
    }
}
