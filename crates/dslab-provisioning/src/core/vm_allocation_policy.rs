//! VM allocation policies choosing hosts for new VMs.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::common::{HostId, VmUid};
use crate::core::host::Host;
use crate::core::host_manager::HostManager;
use crate::core::vm::VirtualMachine;
use crate::core::vm_registry::VmRegistry;
use crate::core::vm_scheduler::VmScheduler;
use crate::log::LogContext;
use crate::{log_debug, log_info};

/// Planned migration of VM to another host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationMap {
    pub vm: VmUid,
    pub host: HostId,
}

/// Trait for implementation of VM allocation policies.
///
/// The policy keeps the placement table mapping each VM to the host it resides on, so VM is placed on at most one
/// host at a time.
pub trait VmAllocationPolicy {
    /// Chooses a host for VM and creates VM there.
    fn allocate_host_for_vm(&mut self, vm: &mut VirtualMachine) -> bool;

    /// Creates VM on the specified host.
    fn allocate_host_for_vm_on(&mut self, vm: &mut VirtualMachine, host: HostId) -> bool;

    /// Destroys VM on its host and forgets its placement.
    fn deallocate_host_for_vm(&mut self, vm: &mut VirtualMachine);

    fn get_host(&self, uid: VmUid) -> Option<HostId>;

    /// Returns migrations which improve the current placement.
    fn optimize_allocation(&mut self, _vms: &VmRegistry) -> Vec<MigrationMap> {
        Vec::new()
    }
}

/// Greedy policy which places VM on the host with the largest number of free PEs.
///
/// If VM creation fails, the host is excluded and the next host is tried, until every host was tried once.
pub struct SimpleVmAllocationPolicy {
    host_manager: HostManager,
    vm_table: BTreeMap<VmUid, HostId>,
    used_pes: BTreeMap<VmUid, i64>,
    free_pes: Vec<i64>,
    ctx: LogContext,
}

impl SimpleVmAllocationPolicy {
    /// Creates policy over the hosts of the host manager.
    pub fn new(host_manager: HostManager) -> Self {
        let free_pes = host_manager
            .host_ids()
            .map(|id| host_manager.host(id).map_or(0, |host| host.number_of_pes() as i64))
            .collect();
        Self {
            host_manager,
            vm_table: BTreeMap::new(),
            used_pes: BTreeMap::new(),
            free_pes,
            ctx: LogContext::new("vm_allocation_policy"),
        }
    }

    /// Adds host to the underlying host manager and to the pool of this policy.
    pub fn add_host(&mut self, host: Host, scheduler: Box<dyn VmScheduler>) -> HostId {
        let pes = host.number_of_pes() as i64;
        let id = self.host_manager.add_host(host, scheduler);
        self.free_pes.push(pes);
        id
    }

    pub fn host_manager(&self) -> &HostManager {
        &self.host_manager
    }

    pub fn host_manager_mut(&mut self) -> &mut HostManager {
        &mut self.host_manager
    }

    pub fn get_host_by_ids(&self, vm_id: u32, user_id: u32) -> Option<HostId> {
        self.get_host(VmUid::new(user_id, vm_id))
    }

    pub fn host_list(&self) -> Vec<HostId> {
        self.host_manager.host_ids().collect()
    }

    /// Returns the number of PEs not claimed by VMs placed with this policy.
    pub fn free_pes(&self, host: HostId) -> i64 {
        self.free_pes.get(host as usize).copied().unwrap_or(0)
    }

    /// Returns VMs placed on the host.
    pub fn vms_on_host(&self, host: HostId) -> Vec<VmUid> {
        self.vm_table
            .iter()
            .filter(|(_, placed)| **placed == host)
            .map(|(uid, _)| *uid)
            .collect()
    }

    fn set_time(&mut self) {
        self.ctx.set_time(self.host_manager.time());
    }

    fn record_placement(&mut self, vm: &VirtualMachine, host: HostId) {
        let required_pes = vm.pes_number as i64;
        self.vm_table.insert(vm.uid(), host);
        self.used_pes.insert(vm.uid(), required_pes);
        self.free_pes[host as usize] -= required_pes;
    }
}

impl VmAllocationPolicy for SimpleVmAllocationPolicy {
    fn allocate_host_for_vm(&mut self, vm: &mut VirtualMachine) -> bool {
        self.set_time();
        if self.vm_table.contains_key(&vm.uid()) {
            return false;
        }

        let mut free_pes_tmp = self.free_pes.clone();
        for _ in 0..self.free_pes.len() {
            let mut more_free = i64::MIN;
            let mut idx = None;
            for (i, free) in free_pes_tmp.iter().enumerate() {
                if *free > more_free {
                    more_free = *free;
                    idx = Some(i);
                }
            }
            let idx = match idx {
                Some(idx) => idx,
                None => break,
            };

            let host = idx as HostId;
            if self.host_manager.vm_create(host, vm) {
                self.record_placement(vm, host);
                log_debug!(self.ctx, "vm {} is allocated to host #{}", vm.uid(), host);
                return true;
            }
            free_pes_tmp[idx] = i64::MIN;
        }
        log_debug!(self.ctx, "no host can accommodate vm {}", vm.uid());
        false
    }

    fn allocate_host_for_vm_on(&mut self, vm: &mut VirtualMachine, host: HostId) -> bool {
        self.set_time();
        if self.vm_table.contains_key(&vm.uid()) || host as usize >= self.free_pes.len() {
            return false;
        }
        if self.host_manager.vm_create(host, vm) {
            self.record_placement(vm, host);
            log_info!(self.ctx, "vm {} has been allocated to host #{}", vm.uid(), host);
            return true;
        }
        false
    }

    fn deallocate_host_for_vm(&mut self, vm: &mut VirtualMachine) {
        self.set_time();
        let uid = vm.uid();
        let pes = self.used_pes.remove(&uid).unwrap_or(0);
        if let Some(host) = self.vm_table.remove(&uid) {
            self.host_manager.vm_destroy(host, vm);
            self.free_pes[host as usize] += pes;
            log_debug!(self.ctx, "vm {} is deallocated from host #{}", uid, host);
        }
    }

    fn get_host(&self, uid: VmUid) -> Option<HostId> {
        self.vm_table.get(&uid).copied()
    }
}
