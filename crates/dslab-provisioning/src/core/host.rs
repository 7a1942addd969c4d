//! Physical host.

use crate::core::common::VmUid;
use crate::core::pe::{self, Pe, PeStatus};

/// Physical host with its capacity and the currently available amount of each resource.
///
/// Host is a plain data record: VMs are referenced by [`VmUid`] only, while the mapping from VM to host lives in the
/// allocation policy. The available counters are changed exclusively by the provisioners of the host manager.
#[derive(Clone, Debug)]
pub struct Host {
    pub id: u32,
    pub storage: u64,
    ram: u32,
    pub(crate) available_ram: u32,
    bw: u64,
    pub(crate) available_bw: u64,
    pub(crate) pes: Vec<Pe>,
    pub(crate) vms: Vec<VmUid>,
    pub(crate) vms_migrating_in: Vec<VmUid>,
    failed: bool,
}

impl Host {
    /// Creates host with the specified storage, PEs, RAM and bandwidth capacity.
    pub fn new(id: u32, storage: u64, pes: Vec<Pe>, ram: u32, bw: u64) -> Self {
        Self {
            id,
            storage,
            ram,
            available_ram: ram,
            bw,
            available_bw: bw,
            pes,
            vms: Vec::new(),
            vms_migrating_in: Vec::new(),
            failed: false,
        }
    }

    /// Creates host with `pes_number` identical PEs.
    pub fn with_identical_pes(id: u32, storage: u64, pes_number: u32, pe_mips: f64, ram: u32, bw: u64) -> Self {
        let pes = (0..pes_number).map(|pe_id| Pe::new(pe_id, pe_mips)).collect();
        Self::new(id, storage, pes, ram, bw)
    }

    pub fn total_ram(&self) -> u32 {
        self.ram
    }

    pub fn available_ram(&self) -> u32 {
        self.available_ram
    }

    pub fn total_bw(&self) -> u64 {
        self.bw
    }

    pub fn available_bw(&self) -> u64 {
        self.available_bw
    }

    pub fn total_mips(&self) -> f64 {
        pe::total_mips(&self.pes)
    }

    pub fn pes(&self) -> &[Pe] {
        &self.pes
    }

    pub fn number_of_pes(&self) -> usize {
        self.pes.len()
    }

    pub fn number_of_free_pes(&self) -> usize {
        self.pes.iter().filter(|pe| pe.is_free()).count()
    }

    /// Returns resident VMs.
    pub fn vms(&self) -> &[VmUid] {
        &self.vms
    }

    /// Returns VMs which are being migrated to this host.
    pub fn vms_migrating_in(&self) -> &[VmUid] {
        &self.vms_migrating_in
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Marks all PEs of the host as failed or brings them back as free.
    pub fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
        let status = if failed { PeStatus::Failed } else { PeStatus::Free };
        for pe in self.pes.iter_mut() {
            pe.set_status(status);
        }
    }
}
