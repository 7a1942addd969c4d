//! Time-shared scheduler.

use std::collections::HashMap;
use std::marker::PhantomData;

use indexmap::IndexMap;
use log::warn;

use crate::core::common::{VmUid, MIGRATING_IN_MIPS_FACTOR, MIN_PROVISIONED_MIPS};
use crate::core::pe::Pe;
use crate::core::provisioner::{PeMips, ResourceProvisioner};
use crate::core::vm::VirtualMachine;
use crate::core::vm_scheduler::{SchedulerState, VmScheduler};

/// State shared by the time-shared schedulers and their admission policies.
#[derive(Clone, Debug, Default)]
pub struct TimeSharedState {
    pub state: SchedulerState,
    /// MIPS shares requested by VMs, in the order of admission.
    pub requested: IndexMap<VmUid, Vec<f64>>,
    pub pes_in_use: usize,
}

impl TimeSharedState {
    /// Remembers the request of admitted VM.
    pub fn record_request(&mut self, uid: VmUid, mips_share: &[f64]) {
        self.requested.insert(uid, mips_share.to_vec());
        self.pes_in_use += mips_share.len();
    }

    /// Returns the capacity the VM takes from the host aggregate.
    pub fn admitted_mips(&self, uid: VmUid, total_requested_mips: f64) -> f64 {
        if self.state.is_migrating_in(uid) {
            total_requested_mips * MIGRATING_IN_MIPS_FACTOR
        } else {
            total_requested_mips
        }
    }

    /// Stores the shares allocated to VM and takes `admitted_mips` from the available capacity.
    pub fn commit(&mut self, uid: VmUid, mips_share: &[f64], admitted_mips: f64) {
        let factor = self.state.migration_factor(uid);
        let allocated = mips_share.iter().map(|mips| mips * factor).collect();
        self.state.mips_map.insert(uid, allocated);
        self.state.available_mips -= admitted_mips;
    }
}

/// Admission control of time-shared scheduler.
pub trait ShareAdmission {
    /// Decides whether VM can get the requested shares and updates the state accordingly.
    fn admit(state: &mut TimeSharedState, uid: VmUid, mips_share: &[f64]) -> bool;

    fn max_available_mips(state: &TimeSharedState) -> f64;
}

/// Rejects requests which exceed the PE capacity or the available host capacity.
#[derive(Clone, Debug, Default)]
pub struct StrictAdmission;

impl ShareAdmission for StrictAdmission {
    fn admit(state: &mut TimeSharedState, uid: VmUid, mips_share: &[f64]) -> bool {
        let pe_capacity = state.state.pe_capacity;
        // virtual PE can't get more than a physical PE delivers
        if mips_share.iter().any(|&mips| mips > pe_capacity) {
            return false;
        }
        let total_requested_mips: f64 = mips_share.iter().sum();
        if state.state.available_mips < total_requested_mips {
            return false;
        }
        state.record_request(uid, mips_share);
        let admitted_mips = state.admitted_mips(uid, total_requested_mips);
        state.commit(uid, mips_share, admitted_mips);
        true
    }

    fn max_available_mips(state: &TimeSharedState) -> f64 {
        state.state.pe_capacity
    }
}

/// Shares the capacity of each PE between several VMs.
///
/// Admitted shares are mapped onto physical PEs by a greedy pass which fills PEs in order, so a virtual PE may be
/// spread over several physical PEs. The mapping is rebuilt from scratch after every allocation and deallocation.
/// The PE capacity granted to each VM is tracked by per-PE provisioners.
pub struct GenericTimeSharedScheduler<A: ShareAdmission> {
    shared: TimeSharedState,
    pe_provisioners: Vec<ResourceProvisioner<PeMips>>,
    mips_caps: HashMap<VmUid, f64>,
    admission: PhantomData<A>,
}

/// Time-shared scheduler without oversubscription.
pub type TimeSharedScheduler = GenericTimeSharedScheduler<StrictAdmission>;

impl<A: ShareAdmission> GenericTimeSharedScheduler<A> {
    pub fn new() -> Self {
        Self {
            shared: TimeSharedState::default(),
            pe_provisioners: Vec::new(),
            mips_caps: HashMap::new(),
            admission: PhantomData,
        }
    }

    /// Returns the shares requested by VM before any capping or migration adjustments.
    pub fn requested_mips_for_vm(&self, uid: VmUid) -> Option<&[f64]> {
        self.shared.requested.get(&uid).map(|mips| mips.as_slice())
    }

    /// Returns the number of virtual PEs of all admitted VMs.
    pub fn pes_in_use(&self) -> usize {
        self.shared.pes_in_use
    }

    /// Returns the PE capacity granted to VM on the specified PE.
    pub fn pe_allocated_mips_for_vm(&self, pe_idx: usize, uid: VmUid) -> f64 {
        self.pe_provisioners
            .get(pe_idx)
            .map_or(0., |provisioner| provisioner.get_allocated(uid))
    }

    fn update_migrating_out(&mut self, vm: &VirtualMachine) {
        let uid = vm.uid();
        let state = &mut self.shared.state;
        if vm.is_in_migration() {
            if !state.is_migrating_in(uid) && !state.is_migrating_out(uid) {
                state.vms_migrating_out.push(uid);
            }
        } else {
            state.vms_migrating_out.retain(|other| *other != uid);
        }
    }

    fn update_pe_provisioning(&mut self, pes: &mut [Pe]) {
        self.shared.state.pe_map.clear();
        for (pe, provisioner) in pes.iter_mut().zip(self.pe_provisioners.iter_mut()) {
            provisioner.deallocate_all(pe);
        }

        let mut pe_idx = 0;
        for (uid, mips_share) in self.shared.state.mips_map.iter() {
            let cap = self.mips_caps.get(uid).copied().unwrap_or(f64::INFINITY);
            let vm_pes = self.shared.state.pe_map.entry(*uid).or_default();
            for &share in mips_share {
                let mut mips = share;
                while mips >= MIN_PROVISIONED_MIPS {
                    if pe_idx >= pes.len() {
                        warn!(
                            target: "vm_scheduler",
                            "there is not enough MIPS ({:.3}) to accommodate vm {}", mips, uid
                        );
                        return;
                    }
                    let pe = &mut pes[pe_idx];
                    let provisioner = &mut self.pe_provisioners[pe_idx];
                    let granted = mips.min(pe.available_mips);
                    if granted > 0. {
                        let allocated = provisioner.get_allocated(*uid);
                        provisioner.allocate(pe, *uid, cap, allocated + granted);
                        if !vm_pes.contains(&pe_idx) {
                            vm_pes.push(pe_idx);
                        }
                    }
                    if granted >= mips {
                        break;
                    }
                    mips -= granted;
                    if mips <= MIN_PROVISIONED_MIPS {
                        break;
                    }
                    pe_idx += 1;
                }
            }
        }
    }
}

impl<A: ShareAdmission> Default for GenericTimeSharedScheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ShareAdmission> VmScheduler for GenericTimeSharedScheduler<A> {
    fn manage(&mut self, pes: &[Pe]) {
        self.shared = TimeSharedState {
            state: SchedulerState::new(pes),
            ..Default::default()
        };
        self.pe_provisioners = pes.iter().map(|_| ResourceProvisioner::new()).collect();
        self.mips_caps.clear();
    }

    fn allocate_pes_for_vm(&mut self, pes: &mut [Pe], vm: &VirtualMachine, mips_share: &[f64]) -> bool {
        self.update_migrating_out(vm);
        self.mips_caps.insert(vm.uid(), vm.total_mips());
        let result = A::admit(&mut self.shared, vm.uid(), mips_share);
        self.update_pe_provisioning(pes);
        result
    }

    fn deallocate_pes_for_vm(&mut self, pes: &mut [Pe], uid: VmUid) {
        self.shared.requested.shift_remove(&uid);
        self.shared.state.vms_migrating_out.retain(|other| *other != uid);
        self.mips_caps.remove(&uid);
        self.shared.pes_in_use = 0;
        self.shared.state.mips_map.clear();
        self.shared.state.available_mips = self.shared.state.total_mips;
        for (pe, provisioner) in pes.iter_mut().zip(self.pe_provisioners.iter_mut()) {
            provisioner.deallocate(pe, uid);
        }

        // the shares of remaining VMs are recomputed from their original requests
        let requested: Vec<(VmUid, Vec<f64>)> = self
            .shared
            .requested
            .iter()
            .map(|(uid, mips_share)| (*uid, mips_share.clone()))
            .collect();
        for (uid, mips_share) in requested {
            if !A::admit(&mut self.shared, uid, &mips_share) {
                warn!(target: "vm_scheduler", "can't readmit vm {} after deallocation", uid);
            }
        }
        self.update_pe_provisioning(pes);
    }

    fn deallocate_pes_for_all_vms(&mut self, pes: &mut [Pe]) {
        self.shared.state.pe_map.clear();
        self.shared.state.mips_map.clear();
        self.shared.state.available_mips = self.shared.state.total_mips;
        for (pe, provisioner) in pes.iter_mut().zip(self.pe_provisioners.iter_mut()) {
            provisioner.deallocate_all(pe);
        }
        self.shared.requested.clear();
        self.shared.pes_in_use = 0;
        self.mips_caps.clear();
    }

    fn state(&self) -> &SchedulerState {
        &self.shared.state
    }

    fn state_mut(&mut self) -> &mut SchedulerState {
        &mut self.shared.state
    }

    fn max_available_mips(&self, _pes: &[Pe]) -> f64 {
        A::max_available_mips(&self.shared)
    }
}
