//! The control core: global state, quiescence, messaging, introspection,
//! shutdown and the panic paths.
//!
//! Any operation that mutates the cell registry, root's CPU set, a cell's
//! memory mappings or a per-CPU cell pointer first quiesces every other
//! root-cell CPU ([`Hypervisor::cell_suspend`] on root) and holds the writer
//! side of the control lock for its critical section. Guests and panic
//! paths touch only per-CPU records and communication pages, which are
//! independently atomic, so they never contend on that lock.

mod lifecycle;


use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use corral_abi::comm::{CellState, msg, reply};
use corral_abi::hypercall::{self as hc, InfoType};

use crate::arch::Arch;
use crate::cell::{Cell, CellId, CellRegistry, CpuId, CpuSet, ROOT_CELL_ID};
use crate::config::{CellFlags, SystemConfig};
use crate::memory::VirtAddr;
use crate::memory::pool::PagePool;
use crate::memory::region::{MemFlags, MemRegion};
use crate::percpu::{CpuStat, PerCpu, ShutdownState};
use crate::utils::locks::{Mutex, RwLock};
use crate::{HvError, HvResult, debug, error, info, warn};

const INVALID_CPU: CpuId = CpuId::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MsgType {
    Request,
    Information,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagementTask {
    Start,
    SetLoadable,
    Destroy,
}

/// How [`Hypervisor::remap_to_root_cell`] treats mapping failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    /// Return the first error, leaving earlier overlaps installed; the
    /// caller owns tearing them down.
    AbortOnError,
    /// Log and continue; used on destroy where best-effort restoration is
    /// the only correct policy.
    WarnOnError,
}

/// The process-wide hypervisor context, created at enablement and torn down
/// by the `DISABLE` hypercall.
pub struct Hypervisor {
    arch: &'static dyn Arch,
    system_config: SystemConfig,
    state: RwLock<CellRegistry>,
    /// Per-CPU records, indexed by CPU ID
    cpus: Box<[PerCpu]>,
    mem_pool: Arc<PagePool>,
    remap_pool: Arc<PagePool>,
    /// Serializes the shutdown rendezvous; the only conventional lock beside
    /// the control lock
    shutdown_lock: Mutex<()>,
    panic_cpu: AtomicU32,
    panic_in_progress: AtomicBool,
}

impl Hypervisor {
    pub fn new(arch: &'static dyn Arch, system_config: SystemConfig) -> HvResult<Self> {
        let mem_pool = PagePool::new("mem", system_config.mem_pool_pages);
        let remap_pool = PagePool::new("remap", system_config.remap_pool_pages);

        let root_config = system_config.root_cell.clone();
        let cpu_set = CpuSet::init(root_config.cpu_bitmap(), &mem_pool)?;
        let cpus: Vec<PerCpu> = (0..root_config.cpu_bitmap().len() as CpuId * 8)
            .map(PerCpu::new)
            .collect();
        let root = Cell::root(root_config, cpu_set);

        Ok(Self {
            arch,
            system_config,
            state: RwLock::new(CellRegistry::new(root)),
            cpus: cpus.into_boxed_slice(),
            mem_pool,
            remap_pool,
            shutdown_lock: Mutex::new(()),
            panic_cpu: AtomicU32::new(INVALID_CPU),
            panic_in_progress: AtomicBool::new(false),
        })
    }

    pub fn percpu(&self, cpu: CpuId) -> &PerCpu {
        &self.cpus[cpu as usize]
    }

    pub fn num_cells(&self) -> usize {
        self.state.read().num_cells()
    }

    /// Whether the system configuration knows this CPU at all.
    pub fn cpu_id_valid(&self, cpu_id: u64) -> bool {
        let bitmap = self.system_config.root_cell.cpu_bitmap();
        (cpu_id as usize) < bitmap.len() * 8
            && bitmap[cpu_id as usize / 8] & (1 << (cpu_id % 8)) != 0
    }

    /// Quiesces every CPU of `cell` other than the calling one. Each
    /// `suspend_cpu` returns only once the target has acknowledged.
    fn cell_suspend(&self, cell: &Cell, self_cpu: CpuId) {
        for cpu in cell.cpu_set().iter_except(self_cpu) {
            self.arch.suspend_cpu(cpu);
        }
    }

    /// Mirror of [`Hypervisor::cell_suspend`] on the calling CPU's own cell.
    /// Every path that suspends must resume, including all error paths.
    fn cell_resume(&self, reg: &CellRegistry, self_cpu: CpuId) {
        if let Some(cell) = reg.find(self.percpu(self_cpu).cell_id()) {
            for cpu in cell.cpu_set().iter_except(self_cpu) {
                self.arch.resume_cpu(cpu);
            }
        }
    }

    /// Delivers a message to the cell and polls for the reply.
    ///
    /// Accepted when a request is approved or an information message is
    /// acknowledged, and unconditionally when the cell is shut down, failed
    /// or has a passive communication region. Any other non-`NONE` reply is
    /// a denial. Blocks for as long as the guest stays silent.
    fn cell_send_message(&self, cell: &Cell, message: u32, msg_type: MsgType) -> bool {
        if cell.config().flags().contains(CellFlags::PASSIVE_COMMREG) {
            return true;
        }

        let comm = cell.comm();
        comm.post_message(message);

        loop {
            let answer = comm.reply_from_cell();
            let state = comm.cell_state_raw();

            if state == CellState::ShutDown as u32 || state == CellState::Failed as u32 {
                return true;
            }

            match (msg_type, answer) {
                (MsgType::Request, reply::REQUEST_APPROVED)
                | (MsgType::Information, reply::RECEIVED) => return true,
                _ if answer != reply::NONE => return false,
                _ => self.arch.cpu_relax(),
            }
        }
    }

    /// Reconfiguration is vetoed while any non-root cell other than
    /// `excluded` reports itself running-locked.
    fn cell_reconfig_ok(&self, reg: &CellRegistry, excluded: Option<CellId>) -> bool {
        reg.non_root_cells()
            .filter(|cell| Some(cell.id()) != excluded)
            .all(|cell| cell.comm().cell_state_raw() != CellState::RunningLocked as u32)
    }

    /// Tells every surviving non-root cell that the cell set changed.
    fn cell_reconfig_completed(&self, reg: &CellRegistry) {
        for cell in reg.non_root_cells() {
            self.cell_send_message(cell, msg::RECONFIG_COMPLETED, MsgType::Information);
        }
    }

    fn cell_shutdown_ok(&self, cell: &Cell) -> bool {
        self.cell_send_message(cell, msg::SHUTDOWN_REQUEST, MsgType::Request)
    }

    /// Removes `mem` from the root cell's address space. The root cell is
    /// identity-mapped, so the unmap descriptor uses the physical address as
    /// its virtual one. Cannot fail for regions that were mapped whole.
    fn unmap_from_root_cell(&self, reg: &CellRegistry, mem: &MemRegion) -> HvResult {
        let mut tmp = *mem;
        tmp.virt_start = VirtAddr::new(mem.phys_start.into_raw());
        self.arch.unmap_memory_region(reg.root(), &tmp)
    }

    /// Hands the parts of `mem` that the root cell's configuration covers
    /// back to root, inheriting root's virt offset and flags per overlap.
    fn remap_to_root_cell(&self, reg: &CellRegistry, mem: &MemRegion, mode: FailureMode) -> HvResult {
        let root = reg.root();
        let mut result = Ok(());

        for root_mem in root.config().regions() {
            let Some(overlap) = mem.overlap_in_root(root_mem) else {
                continue;
            };

            if let Err(err) = self.arch.map_memory_region(root, &overlap) {
                result = Err(err);
                if mode == FailureMode::AbortOnError {
                    break;
                }
                warn!(
                    "failed to re-assign memory region at {:#x} to the root cell",
                    overlap.phys_start
                );
            }
        }

        result
    }

    /// Pulls a cell's resources back into the root cell: CPUs are parked,
    /// reassigned and wiped, regions unmapped and best-effort remapped to
    /// root. Shared by `cell_destroy` and the create path's rollback.
    fn cell_destroy_internal(&self, reg: &mut CellRegistry, cell: &Cell) {
        for cpu in cell.cpu_set().iter() {
            self.arch.park_cpu(cpu);

            reg.root_mut().cpu_set_mut().set(cpu);
            let percpu = self.percpu(cpu);
            percpu.set_cell(ROOT_CELL_ID);
            percpu.set_failed(false);
            percpu.clear_stats();
        }

        for mem in cell.config().regions() {
            // cannot fail: the region was mapped as a whole, so no huge
            // pages need breaking up to unmap it
            let _ = self.arch.unmap_memory_region(cell, mem);
            if !mem.flags.contains(MemFlags::COMM_REGION) {
                let _ = self.remap_to_root_cell(reg, mem, FailureMode::WarnOnError);
            }
        }

        self.arch.cell_destroy(cell);
        self.arch.config_commit(Some(cell));
    }

    pub fn hypervisor_get_info(&self, info_type: u64) -> HvResult<i64> {
        let info = InfoType::try_from(info_type).map_err(|_| HvError::Inval)?;
        Ok(match info {
            InfoType::MemPoolSize => self.mem_pool.pages() as i64,
            InfoType::MemPoolUsed => self.mem_pool.used_pages() as i64,
            InfoType::RemapPoolSize => self.remap_pool.pages() as i64,
            InfoType::RemapPoolUsed => self.remap_pool.used_pages() as i64,
            InfoType::NumCells => self.state.read().num_cells() as i64,
        })
    }

    /// The guest-reported state of a cell, for the root cell only. Values
    /// outside the four defined states are invalid.
    pub fn cell_get_state(&self, cpu_id: CpuId, id: u64) -> HvResult<i64> {
        if self.percpu(cpu_id).cell_id() != ROOT_CELL_ID {
            return Err(HvError::Perm);
        }

        // no explicit synchronization with create/destroy: they hold the
        // writer side while we hold the reader side
        let reg = self.state.read();
        let cell = CellId::try_from(id)
            .ok()
            .and_then(|id| reg.find(id))
            .ok_or(HvError::NoEnt)?;

        CellState::try_from(cell.comm().cell_state_raw())
            .map(|state| state as i64)
            .map_err(|_| HvError::Inval)
    }

    /// State or statistics of one CPU. Non-root callers may only query CPUs
    /// their own cell owns.
    pub fn cpu_get_info(&self, cpu_id: CpuId, target_cpu: u64, info_type: u64) -> HvResult<i64> {
        if !self.cpu_id_valid(target_cpu) {
            return Err(HvError::Inval);
        }
        let target = target_cpu as CpuId;

        // cell_destroy cannot pull the target out from under us: it holds
        // the writer side of the control lock for its whole critical section
        let caller_cell = self.percpu(cpu_id).cell_id();
        if caller_cell != ROOT_CELL_ID {
            let reg = self.state.read();
            let owns = reg
                .find(caller_cell)
                .is_some_and(|cell| cell.owns_cpu(target));
            if !owns {
                return Err(HvError::Perm);
            }
        }

        if info_type == hc::CPU_INFO_STATE {
            Ok(if self.percpu(target).failed() {
                hc::CPU_FAILED
            } else {
                hc::CPU_RUNNING
            })
        } else if let Some(index) = info_type.checked_sub(hc::CPU_INFO_STAT_BASE) {
            let stat = u32::try_from(index)
                .ok()
                .and_then(|index| CpuStat::try_from(index).ok())
                .ok_or(HvError::Inval)?;
            // the top bit is reserved
            Ok((self.percpu(target).stat(stat) & 0x7fff_ffff) as i64)
        } else {
            Err(HvError::Inval)
        }
    }

    /// Orderly shutdown of the whole hypervisor, entered by every root CPU.
    ///
    /// The first CPU in evaluates consent across all non-root cells and, if
    /// granted, tears the cells and finally the root cell down; it then
    /// stamps every root CPU's rendezvous state. Each root CPU observes its
    /// own stamp, clears it and either releases itself or reports the error
    /// so the operation can be retried.
    pub fn shutdown(&self, cpu_id: CpuId) -> HvResult {
        if self.percpu(cpu_id).cell_id() != ROOT_CELL_ID {
            return Err(HvError::Perm);
        }

        let _serialized = self.shutdown_lock.lock();
        let reg = self.state.read();
        let this_cpu = self.percpu(cpu_id);

        if this_cpu.shutdown_state() == ShutdownState::None {
            let mut state = ShutdownState::Started;
            for cell in reg.non_root_cells() {
                if !self.cell_shutdown_ok(cell) {
                    state = ShutdownState::Failed(HvError::Perm);
                }
            }

            if state == ShutdownState::Started {
                info!("shutting down hypervisor");

                for cell in reg.non_root_cells() {
                    self.cell_suspend(cell, cpu_id);
                    info!("closing cell \"{}\"", cell.name());

                    for cpu in cell.cpu_set().iter() {
                        info!(" releasing CPU {}", cpu);
                        self.arch.shutdown_cpu(cpu);
                    }
                }

                info!("closing root cell \"{}\"", reg.root().name());
                self.arch.shutdown();
            }

            for cpu in reg.root().cpu_set().iter() {
                self.percpu(cpu).set_shutdown_state(state);
            }
        }

        let result = match this_cpu.shutdown_state() {
            ShutdownState::Started => {
                info!(" releasing CPU {}", cpu_id);
                Ok(())
            }
            ShutdownState::Failed(err) => Err(err),
            ShutdownState::None => Ok(()),
        };
        this_cpu.set_shutdown_state(ShutdownState::None);

        result
    }

    /// Marks the panic in progress; the first panicking CPU becomes its
    /// owner.
    fn claim_panic(&self) {
        if self
            .panic_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.panic_cpu
                .store(self.arch.phys_processor_id(), Ordering::Release);
        }
    }

    /// Clears the in-progress marker if the calling CPU started the panic.
    fn finish_panic(&self) {
        if self.arch.phys_processor_id() == self.panic_cpu.load(Ordering::Acquire) {
            self.panic_cpu.store(INVALID_CPU, Ordering::Release);
            self.panic_in_progress.store(false, Ordering::Release);
        }
    }

    /// Unconditional terminal stop of a panicking CPU.
    pub fn panic_stop(&self, cpu_id: CpuId) {
        self.claim_panic();
        error!("stopping CPU {}", cpu_id);

        self.percpu(cpu_id).set_stopped();
        self.finish_panic();
        self.arch.panic_stop(cpu_id);
    }

    /// Parks a panicking CPU and marks it failed. The cell keeps running on
    /// its surviving CPUs; only when the last of them fails does the cell
    /// state flip to FAILED.
    pub fn panic_halt(&self, cpu_id: CpuId) {
        self.claim_panic();
        error!("parking CPU {}", cpu_id);

        let reg = self.state.read();
        self.percpu(cpu_id).set_failed(true);
        if let Some(cell) = reg.find(self.percpu(cpu_id).cell_id()) {
            if cell
                .cpu_set()
                .iter()
                .all(|cpu| self.percpu(cpu).failed())
            {
                cell.comm().set_cell_state(CellState::Failed);
            }
        }
        drop(reg);

        self.arch.panic_halt(cpu_id);
        self.finish_panic();
    }

    fn log_pool_usage(&self, when: &str) {
        debug!(
            "page pools {}: mem {}/{}, remap {}/{}",
            when,
            self.mem_pool.used_pages(),
            self.mem_pool.pages(),
            self.remap_pool.used_pages(),
            self.remap_pool.pages()
        );
    }
}
