//! Storage of all VMs known to the simulation.

use std::collections::btree_map::{Values, ValuesMut};
use std::collections::BTreeMap;

use crate::core::common::VmUid;
use crate::core::vm::VirtualMachine;

/// Owns VM records and gives access to them by [`VmUid`].
///
/// Host manager operations that touch all VMs of a host (processing sweeps, host teardown) look VMs up here,
/// while hosts and schedulers only store VM identifiers.
#[derive(Clone, Default)]
pub struct VmRegistry {
    vms: BTreeMap<VmUid, VirtualMachine>,
}

impl VmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers VM and returns its identifier. Previously registered VM with the same uid is replaced.
    pub fn register(&mut self, vm: VirtualMachine) -> VmUid {
        let uid = vm.uid();
        self.vms.insert(uid, vm);
        uid
    }

    pub fn remove(&mut self, uid: VmUid) -> Option<VirtualMachine> {
        self.vms.remove(&uid)
    }

    pub fn get(&self, uid: VmUid) -> Option<&VirtualMachine> {
        self.vms.get(&uid)
    }

    pub fn get_mut(&mut self, uid: VmUid) -> Option<&mut VirtualMachine> {
        self.vms.get_mut(&uid)
    }

    pub fn contains(&self, uid: VmUid) -> bool {
        self.vms.contains_key(&uid)
    }

    pub fn uids(&self) -> Vec<VmUid> {
        self.vms.keys().cloned().collect()
    }

    pub fn iter(&self) -> Values<VmUid, VirtualMachine> {
        self.vms.values()
    }

    pub fn iter_mut(&mut self) -> ValuesMut<VmUid, VirtualMachine> {
        self.vms.values_mut()
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }
}
