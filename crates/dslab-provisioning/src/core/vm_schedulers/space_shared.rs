//! Space-shared scheduler.

use log::debug;

use crate::core::common::VmUid;
use crate::core::pe::{Pe, PeStatus};
use crate::core::vm::VirtualMachine;
use crate::core::vm_scheduler::{SchedulerState, VmScheduler};

/// Binds each virtual PE of a VM to a whole free physical PE, PEs are never shared between VMs.
#[derive(Clone, Debug, Default)]
pub struct SpaceSharedScheduler {
    state: SchedulerState,
    free_pes: Vec<usize>,
}

impl SpaceSharedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns indices of PEs not bound to any VM.
    pub fn free_pes(&self) -> &[usize] {
        &self.free_pes
    }
}

impl VmScheduler for SpaceSharedScheduler {
    fn manage(&mut self, pes: &[Pe]) {
        self.state = SchedulerState::new(pes);
        self.free_pes = (0..pes.len()).filter(|&idx| pes[idx].is_free()).collect();
    }

    fn allocate_pes_for_vm(&mut self, pes: &mut [Pe], vm: &VirtualMachine, mips_share: &[f64]) -> bool {
        let uid = vm.uid();
        if self.free_pes.len() < mips_share.len() {
            debug!(target: "vm_scheduler", "not enough free PEs for vm {}", uid);
            return false;
        }
        let selected: Vec<usize> = self.free_pes[..mips_share.len()].to_vec();
        if selected.iter().zip(mips_share).any(|(&idx, &mips)| mips > pes[idx].mips) {
            debug!(target: "vm_scheduler", "free PEs can't cover shares of vm {}", uid);
            return false;
        }

        self.free_pes.drain(..mips_share.len());
        for &idx in selected.iter() {
            pes[idx].set_status(PeStatus::Busy);
            pes[idx].available_mips = 0.;
        }
        self.state.pe_map.insert(uid, selected);
        self.state.mips_map.insert(uid, mips_share.to_vec());
        self.state.available_mips -= mips_share.iter().sum::<f64>();
        true
    }

    fn deallocate_pes_for_vm(&mut self, pes: &mut [Pe], uid: VmUid) {
        if let Some(released) = self.state.pe_map.shift_remove(&uid) {
            for idx in released {
                pes[idx].set_status(PeStatus::Free);
                pes[idx].available_mips = pes[idx].mips;
                self.free_pes.push(idx);
            }
            self.free_pes.sort_unstable();
        }
        if let Some(mips_share) = self.state.mips_map.shift_remove(&uid) {
            self.state.available_mips += mips_share.iter().sum::<f64>();
        }
    }

    fn deallocate_pes_for_all_vms(&mut self, pes: &mut [Pe]) {
        for pe in pes.iter_mut().filter(|pe| pe.status == PeStatus::Busy) {
            pe.set_status(PeStatus::Free);
            pe.available_mips = pe.mips;
        }
        self.free_pes = (0..pes.len()).filter(|&idx| pes[idx].is_free()).collect();
        self.state.pe_map.clear();
        self.state.mips_map.clear();
        self.state.available_mips = self.state.total_mips;
    }

    fn state(&self) -> &SchedulerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SchedulerState {
        &mut self.state
    }

    /// A share is always placed on a whole PE, so the largest share is the PE capacity.
    fn max_available_mips(&self, _pes: &[Pe]) -> f64 {
        self.state.pe_capacity
    }
}
