//! Representation of virtual machine and its utilization history.

use serde::Serialize;

use crate::core::common::VmUid;
use crate::core::workload::WorkloadModel;

/// Record of VM CPU allocation at some moment of time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VmStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub in_migration: bool,
}

/// Represents virtual machine (VM).
///
/// VM is characterized by its nominal requirements: the number of virtual PEs and MIPS of each of them, RAM,
/// bandwidth and image size. The actual demand at the moment is produced by the workload model and is used once VM
/// is instantiated. The currently allocated amounts are written by provisioners and schedulers of the host manager.
#[derive(Clone)]
pub struct VirtualMachine {
    pub id: u32,
    pub user_id: u32,
    pub mips: f64,
    pub pes_number: u32,
    pub ram: u32,
    pub bw: u64,
    pub size: u64,
    in_migration: bool,
    being_instantiated: bool,
    current_allocated_ram: u32,
    current_allocated_bw: u64,
    current_allocated_mips: Vec<f64>,
    state_history: Vec<VmStateHistoryEntry>,
    workload: Box<dyn WorkloadModel>,
}

impl VirtualMachine {
    /// Creates virtual machine with specified parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        user_id: u32,
        mips: f64,
        pes_number: u32,
        ram: u32,
        bw: u64,
        size: u64,
        workload: Box<dyn WorkloadModel>,
    ) -> Self {
        Self {
            id,
            user_id,
            mips,
            pes_number,
            ram,
            bw,
            size,
            in_migration: false,
            being_instantiated: true,
            current_allocated_ram: 0,
            current_allocated_bw: 0,
            current_allocated_mips: Vec::new(),
            state_history: Vec::new(),
            workload,
        }
    }

    pub fn uid(&self) -> VmUid {
        VmUid::new(self.user_id, self.id)
    }

    pub fn is_in_migration(&self) -> bool {
        self.in_migration
    }

    pub fn set_in_migration(&mut self, in_migration: bool) {
        self.in_migration = in_migration;
    }

    /// Returns true until VM receives its first MIPS allocation in a processing sweep.
    pub fn is_being_instantiated(&self) -> bool {
        self.being_instantiated
    }

    pub fn set_being_instantiated(&mut self, being_instantiated: bool) {
        self.being_instantiated = being_instantiated;
    }

    /// Returns the nominal capacity of all virtual PEs.
    pub fn total_mips(&self) -> f64 {
        self.mips * self.pes_number as f64
    }

    /// Returns the requested MIPS of each virtual PE.
    ///
    /// While VM is being instantiated it requests its nominal MIPS.
    pub fn current_requested_mips(&self) -> Vec<f64> {
        let mips = if self.being_instantiated {
            self.mips
        } else {
            self.mips * self.workload.cpu_load()
        };
        vec![mips; self.pes_number as usize]
    }

    pub fn current_requested_total_mips(&self) -> f64 {
        self.current_requested_mips().iter().sum()
    }

    /// Returns the largest MIPS requested by a single virtual PE.
    pub fn current_requested_max_mips(&self) -> f64 {
        self.current_requested_mips().into_iter().fold(0., f64::max)
    }

    pub fn current_requested_ram(&self) -> u32 {
        if self.being_instantiated {
            return self.ram;
        }
        (self.workload.ram_load() * self.ram as f64) as u32
    }

    pub fn current_requested_bw(&self) -> u64 {
        if self.being_instantiated {
            return self.bw;
        }
        (self.workload.bw_load() * self.bw as f64) as u64
    }

    pub fn current_allocated_ram(&self) -> u32 {
        self.current_allocated_ram
    }

    pub(crate) fn set_current_allocated_ram(&mut self, ram: u32) {
        self.current_allocated_ram = ram;
    }

    pub fn current_allocated_bw(&self) -> u64 {
        self.current_allocated_bw
    }

    pub(crate) fn set_current_allocated_bw(&mut self, bw: u64) {
        self.current_allocated_bw = bw;
    }

    /// Returns MIPS of each virtual PE currently allocated by the host VM scheduler.
    pub fn current_allocated_mips(&self) -> &[f64] {
        &self.current_allocated_mips
    }

    pub(crate) fn set_current_allocated_mips(&mut self, mips: Vec<f64>) {
        self.current_allocated_mips = mips;
    }

    pub fn workload(&self) -> &dyn WorkloadModel {
        self.workload.as_ref()
    }

    /// Passes the allocated MIPS share to the workload, returns the predicted time of the next workload event.
    pub(crate) fn update_processing(&mut self, time: f64, mips_share: &[f64]) -> f64 {
        self.workload.update_processing(time, mips_share)
    }

    /// Returns the current CPU utilization in MIPS as requested by the workload.
    pub fn utilization_of_cpu_mips(&self) -> f64 {
        self.workload.cpu_load() * self.total_mips()
    }

    pub fn state_history(&self) -> &[VmStateHistoryEntry] {
        &self.state_history
    }

    /// Appends new state record, a record with the same time as the last one replaces it.
    pub fn add_state_history_entry(&mut self, time: f64, allocated_mips: f64, requested_mips: f64, in_migration: bool) {
        let entry = VmStateHistoryEntry {
            time,
            allocated_mips,
            requested_mips,
            in_migration,
        };
        match self.state_history.last_mut() {
            Some(last) if last.time == time => *last = entry,
            _ => self.state_history.push(entry),
        }
    }
}
