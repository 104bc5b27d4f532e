//! The transactional cell lifecycle: create, set-loadable, start, destroy.
//!
//! All four operations may only be invoked from a CPU running in the root
//! cell. Each one quiesces the root cell for its whole critical section and
//! reverses every completed step on its error paths, so a failed operation
//! leaves no side effects beyond log lines.

use corral_abi::comm::CellState;
use corral_abi::config::CellDescRaw;

use crate::cell::{Cell, CellId, CellRegistry, CpuId, CpuSet, ROOT_CELL_ID};
use crate::config::{self, CellConfig};
use crate::memory::region::MemFlags;
use crate::memory::{PhysAddr, page_count};
use crate::{HvError, HvResult, NUM_TEMPORARY_PAGES, info};

use super::{FailureMode, Hypervisor, ManagementTask};

impl Hypervisor {
    fn expect_root_caller(&self, cpu_id: CpuId) -> HvResult {
        if self.percpu(cpu_id).cell_id() != ROOT_CELL_ID {
            return Err(HvError::Perm);
        }
        Ok(())
    }

    /// Carves a new cell out of the root cell, from a guest-physical
    /// configuration descriptor. Returns the new cell's ID.
    pub fn cell_create(&self, cpu_id: CpuId, config_addr: PhysAddr) -> HvResult<CellId> {
        self.expect_root_caller(cpu_id)?;

        let mut reg = self.state.write();
        self.cell_suspend(reg.root(), cpu_id);

        let result = self.create_locked(&mut reg, cpu_id, config_addr);

        self.cell_resume(&reg, cpu_id);
        result
    }

    fn create_locked(
        &self,
        reg: &mut CellRegistry,
        cpu_id: CpuId,
        config_addr: PhysAddr,
    ) -> HvResult<CellId> {
        if !self.cell_reconfig_ok(reg, None) {
            return Err(HvError::Perm);
        }

        let page_offs = config_addr.page_offset();
        let base = config_addr.page_base();

        // map just enough of the descriptor to read its header; the full
        // size is a function of the header
        let header_pages = page_count(size_of::<CellDescRaw>() + page_offs);
        let window = self.remap_pool.alloc(header_pages)?;
        let mapping = self
            .arch
            .get_guest_pages(base, header_pages)
            .ok_or(HvError::NoMem)?;
        let header = config::read_header(&mapping[page_offs..])?;
        let name = config::parse_name(&header)?;

        if reg.find_by_name(&name).is_some() {
            return Err(HvError::Exists);
        }

        let total_size = header.config_size();
        let cfg_pages = page_count(total_size + page_offs);
        if cfg_pages > NUM_TEMPORARY_PAGES {
            return Err(HvError::TooBig);
        }

        drop(window);
        let _window = self.remap_pool.alloc(cfg_pages)?;
        let mapping = self
            .arch
            .get_guest_pages(base, cfg_pages)
            .ok_or(HvError::NoMem)?;
        let cell_config = CellConfig::parse(&mapping[page_offs..page_offs + total_size])?;

        // the cell structure and its config copy share one contiguous run
        // of pool pages
        let cell_pages = page_count(size_of::<Cell>() + total_size);
        let data_charge = self.mem_pool.alloc(cell_pages)?;
        let cpu_set = CpuSet::init(cell_config.cpu_bitmap(), &self.mem_pool)?;
        let cell = Cell::new(reg.free_cell_id(), cell_config, cpu_set, data_charge);

        // never assign away the CPU we are currently running on
        if cell.owns_cpu(cpu_id) {
            return Err(HvError::Busy);
        }
        // the root cell's CPU set must be a super-set of the new cell's
        for cpu in cell.cpu_set().iter() {
            if !reg.root().owns_cpu(cpu) {
                return Err(HvError::Busy);
            }
        }

        self.arch.cell_create(&cell)?;

        for cpu in cell.cpu_set().iter() {
            self.arch.park_cpu(cpu);

            reg.root_mut().cpu_set_mut().clear(cpu);
            let percpu = self.percpu(cpu);
            percpu.set_cell(cell.id());
            percpu.clear_stats();
        }

        // move the cell's regions out of the root cell and into the new one
        for mem in cell.config().regions() {
            // the communication region is not backed by root memory
            let unmapped = if mem.flags.contains(MemFlags::COMM_REGION) {
                Ok(())
            } else {
                self.unmap_from_root_cell(reg, mem)
            };

            if let Err(err) = unmapped.and_then(|_| self.arch.map_memory_region(&cell, mem)) {
                self.cell_destroy_internal(reg, &cell);
                return Err(err);
            }
        }

        self.arch.config_commit(Some(&cell));

        cell.comm().set_cell_state(CellState::ShutDown);

        info!("created cell \"{}\"", cell.name());
        let new_id = cell.id();
        reg.insert(cell);

        self.cell_reconfig_completed(reg);
        self.log_pool_usage("after cell creation");

        Ok(new_id)
    }

    /// Shared entry of start/set-loadable/destroy: permission check, root
    /// quiescence, target lookup and the consent handshake. On success both
    /// the root cell and the target are suspended and the target's registry
    /// index is returned; on failure the root cell is resumed again.
    fn management_prologue(
        &self,
        reg: &CellRegistry,
        task: ManagementTask,
        cpu_id: CpuId,
        id: u64,
    ) -> HvResult<usize> {
        self.cell_suspend(reg.root(), cpu_id);

        match self.management_checks(reg, task, id) {
            Ok(index) => {
                self.cell_suspend(reg.cell_at(index), cpu_id);
                Ok(index)
            }
            Err(err) => {
                self.cell_resume(reg, cpu_id);
                Err(err)
            }
        }
    }

    fn management_checks(&self, reg: &CellRegistry, task: ManagementTask, id: u64) -> HvResult<usize> {
        let index = CellId::try_from(id)
            .ok()
            .and_then(|id| reg.index_of(id))
            .ok_or(HvError::NoEnt)?;
        let cell = reg.cell_at(index);

        // the root cell cannot be managed
        if cell.id() == ROOT_CELL_ID {
            return Err(HvError::Inval);
        }

        if task == ManagementTask::Destroy && !self.cell_reconfig_ok(reg, Some(cell.id())) {
            return Err(HvError::Perm);
        }
        if !self.cell_shutdown_ok(cell) {
            return Err(HvError::Perm);
        }

        Ok(index)
    }

    /// Restarts a stopped cell, reclaiming any loadable regions the root
    /// cell was staging into.
    pub fn cell_start(&self, cpu_id: CpuId, id: u64) -> HvResult {
        self.expect_root_caller(cpu_id)?;

        let mut reg = self.state.write();
        let index = self.management_prologue(&reg, ManagementTask::Start, cpu_id, id)?;

        let result = self.start_locked(&mut reg, index);

        self.cell_resume(&reg, cpu_id);
        result
    }

    fn start_locked(&self, reg: &mut CellRegistry, index: usize) -> HvResult {
        if reg.cell_at(index).loadable() {
            let cell = reg.cell_at(index);
            for mem in cell.config().regions() {
                if mem.flags.contains(MemFlags::LOADABLE) {
                    self.unmap_from_root_cell(reg, mem)?;
                }
            }

            self.arch.config_commit(None);
            reg.cell_at_mut(index).set_loadable(false);
        }

        // present a consistent communication region state to the cell
        let cell = reg.cell_at(index);
        cell.comm().set_cell_state(CellState::Running);
        cell.comm().clear_message();

        for cpu in cell.cpu_set().iter() {
            self.percpu(cpu).set_failed(false);
            self.arch.reset_cpu(cpu);
        }

        info!("started cell \"{}\"", cell.name());
        Ok(())
    }

    /// Parks a cell and maps its loadable regions into the root cell so
    /// root can stage a payload. A no-op if the cell is already loadable.
    pub fn cell_set_loadable(&self, cpu_id: CpuId, id: u64) -> HvResult {
        self.expect_root_caller(cpu_id)?;

        let mut reg = self.state.write();
        let index = self.management_prologue(&reg, ManagementTask::SetLoadable, cpu_id, id)?;

        let result = self.set_loadable_locked(&mut reg, index);

        self.cell_resume(&reg, cpu_id);
        result
    }

    fn set_loadable_locked(&self, reg: &mut CellRegistry, index: usize) -> HvResult {
        {
            let cell = reg.cell_at(index);
            for cpu in cell.cpu_set().iter() {
                self.percpu(cpu).set_failed(false);
                self.arch.park_cpu(cpu);
            }

            if cell.loadable() {
                return Ok(());
            }

            cell.comm().set_cell_state(CellState::ShutDown);
        }
        reg.cell_at_mut(index).set_loadable(true);

        let cell = reg.cell_at(index);
        for mem in cell.config().regions() {
            if mem.flags.contains(MemFlags::LOADABLE) {
                self.remap_to_root_cell(reg, mem, FailureMode::AbortOnError)?;
            }
        }

        self.arch.config_commit(None);

        info!("cell \"{}\" can be loaded", cell.name());
        Ok(())
    }

    /// Tears a cell down and returns every resource it held to the root
    /// cell.
    pub fn cell_destroy(&self, cpu_id: CpuId, id: u64) -> HvResult {
        self.expect_root_caller(cpu_id)?;

        let mut reg = self.state.write();
        let index = self.management_prologue(&reg, ManagementTask::Destroy, cpu_id, id)?;

        info!("closing cell \"{}\"", reg.cell_at(index).name());

        let cell = reg.remove_at(index);
        self.cell_destroy_internal(&mut reg, &cell);
        // returns the bookkeeping pages and any spilled CPU-set page
        drop(cell);

        self.log_pool_usage("after cell destruction");
        self.cell_reconfig_completed(&reg);

        self.cell_resume(&reg, cpu_id);
        Ok(())
    }
}
