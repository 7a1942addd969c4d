//! Virtual machine schedulers sharing host processing units between VMs.

use indexmap::IndexMap;

use crate::core::common::{VmUid, MIGRATING_IN_MIPS_FACTOR, MIGRATING_OUT_MIPS_FACTOR};
use crate::core::config::options::parse_config_value;
use crate::core::error::ConfigError;
use crate::core::pe::{self, Pe};
use crate::core::vm::VirtualMachine;
use crate::core::vm_schedulers::space_shared::SpaceSharedScheduler;
use crate::core::vm_schedulers::time_shared::TimeSharedScheduler;
use crate::core::vm_schedulers::time_shared_oversubscription::TimeSharedOverSubscriptionScheduler;

/// Bookkeeping of a single host scheduler.
#[derive(Clone, Debug, Default)]
pub struct SchedulerState {
    /// Indices of host PEs backing each VM.
    pub pe_map: IndexMap<VmUid, Vec<usize>>,
    /// MIPS allocated to each virtual PE of each VM.
    pub mips_map: IndexMap<VmUid, Vec<f64>>,
    /// Aggregate host capacity not yet allocated to VMs.
    pub available_mips: f64,
    pub total_mips: f64,
    /// Capacity of a single PE (the first one), the hosts are assumed to have uniform PEs.
    pub pe_capacity: f64,
    pub vms_migrating_in: Vec<VmUid>,
    pub vms_migrating_out: Vec<VmUid>,
}

impl SchedulerState {
    pub fn new(pes: &[Pe]) -> Self {
        let total_mips = pe::total_mips(pes);
        Self {
            available_mips: total_mips,
            total_mips,
            pe_capacity: pes.first().map_or(0., |pe| pe.mips),
            ..Default::default()
        }
    }

    pub fn is_migrating_in(&self, uid: VmUid) -> bool {
        self.vms_migrating_in.contains(&uid)
    }

    pub fn is_migrating_out(&self, uid: VmUid) -> bool {
        self.vms_migrating_out.contains(&uid)
    }

    /// Returns the multiplier applied to VM shares because of its migration.
    pub fn migration_factor(&self, uid: VmUid) -> f64 {
        if self.is_migrating_out(uid) {
            MIGRATING_OUT_MIPS_FACTOR
        } else if self.is_migrating_in(uid) {
            MIGRATING_IN_MIPS_FACTOR
        } else {
            1.
        }
    }
}

/// Trait for implementation of policies sharing the PEs of a single host between VMs.
///
/// Scheduler belongs to exactly one host and is bound to its PEs with [`manage`](VmScheduler::manage). The PEs stay
/// owned by the host and are passed to the mutating operations, the scheduler refers to them by index. VMs are
/// referenced by uid only.
pub trait VmScheduler {
    /// Binds the scheduler to host PEs and resets its state.
    fn manage(&mut self, pes: &[Pe]);

    /// Allocates PEs for VM according to the requested per-PE MIPS shares.
    fn allocate_pes_for_vm(&mut self, pes: &mut [Pe], vm: &VirtualMachine, mips_share: &[f64]) -> bool;

    fn deallocate_pes_for_vm(&mut self, pes: &mut [Pe], uid: VmUid);

    fn deallocate_pes_for_all_vms(&mut self, pes: &mut [Pe]);

    fn state(&self) -> &SchedulerState;

    fn state_mut(&mut self) -> &mut SchedulerState;

    fn allocated_mips_for_vm(&self, uid: VmUid) -> Option<&[f64]> {
        self.state().mips_map.get(&uid).map(|mips| mips.as_slice())
    }

    fn total_allocated_mips_for_vm(&self, uid: VmUid) -> f64 {
        self.allocated_mips_for_vm(uid).map_or(0., |mips| mips.iter().sum())
    }

    fn available_mips(&self) -> f64 {
        self.state().available_mips
    }

    /// Returns the largest share which can be placed on the host in one piece.
    fn max_available_mips(&self, pes: &[Pe]) -> f64 {
        pes.iter().map(|pe| pe.available_mips).fold(0., f64::max)
    }

    fn pe_capacity(&self) -> f64 {
        self.state().pe_capacity
    }

    fn vms_migrating_in(&self) -> &[VmUid] {
        &self.state().vms_migrating_in
    }

    fn vms_migrating_out(&self) -> &[VmUid] {
        &self.state().vms_migrating_out
    }

    fn add_migrating_in_vm(&mut self, uid: VmUid) {
        if !self.state().is_migrating_in(uid) {
            self.state_mut().vms_migrating_in.push(uid);
        }
    }

    fn remove_migrating_in_vm(&mut self, uid: VmUid) {
        self.state_mut().vms_migrating_in.retain(|other| *other != uid);
    }

    fn pe_map(&self) -> &IndexMap<VmUid, Vec<usize>> {
        &self.state().pe_map
    }

    fn pes_allocated_for_vm(&self, uid: VmUid) -> Option<&[usize]> {
        self.state().pe_map.get(&uid).map(|pes| pes.as_slice())
    }
}

/// Creates scheduler by its name, e.g. `TimeShared`. The scheduler should be bound to host PEs before use.
pub fn vm_scheduler_resolver(config_str: &str) -> Result<Box<dyn VmScheduler>, ConfigError> {
    let (scheduler_name, _options) = parse_config_value(config_str);
    match scheduler_name.as_str() {
        "SpaceShared" => Ok(Box::new(SpaceSharedScheduler::new())),
        "TimeShared" => Ok(Box::new(TimeSharedScheduler::new())),
        "TimeSharedOverSubscription" => Ok(Box::new(TimeSharedOverSubscriptionScheduler::new())),
        _ => Err(ConfigError::UnknownScheduler(config_str.to_string())),
    }
}
