//! Host manager coordinating the provisioning of all resources of hosts.

use serde::Serialize;

use crate::core::common::{
    AllocationVerdict, HostId, VmUid, MIGRATING_OUT_MIPS_FACTOR, NO_NEXT_EVENT, UNDER_ALLOCATION_EPSILON,
};
use crate::core::error::MigrationError;
use crate::core::host::Host;
use crate::core::provisioner::{Bandwidth, Ram, ResourceProvisioner};
use crate::core::vm::VirtualMachine;
use crate::core::vm_registry::VmRegistry;
use crate::core::vm_scheduler::VmScheduler;
use crate::log::LogContext;
use crate::{log_debug, log_error, log_trace, log_warn};

/// Record of host CPU utilization at some moment of time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub is_active: bool,
}

/// Host together with the provisioners and scheduler bound to it.
struct ManagedHost {
    host: Host,
    ram: ResourceProvisioner<Ram>,
    bw: ResourceProvisioner<Bandwidth>,
    scheduler: Box<dyn VmScheduler>,
    state_history: Vec<HostStateHistoryEntry>,
    utilization_mips: f64,
    previous_utilization_mips: f64,
}

impl ManagedHost {
    /// Allocates RAM, bandwidth and PEs for VM in this order. On failure the successful steps are rolled back in
    /// reverse order and the failed dimension is returned.
    fn allocate_resources(&mut self, vm: &mut VirtualMachine) -> AllocationVerdict {
        let ram = vm.current_requested_ram();
        if !self.ram.allocate_for_vm(&mut self.host, vm, ram) {
            return AllocationVerdict::NotEnoughRam;
        }
        let bw = vm.current_requested_bw();
        if !self.bw.allocate_for_vm(&mut self.host, vm, bw) {
            self.ram.deallocate_for_vm(&mut self.host, vm);
            return AllocationVerdict::NotEnoughBandwidth;
        }
        let mips_share = vm.current_requested_mips();
        if !self.scheduler.allocate_pes_for_vm(&mut self.host.pes, vm, &mips_share) {
            self.bw.deallocate_for_vm(&mut self.host, vm);
            self.ram.deallocate_for_vm(&mut self.host, vm);
            return AllocationVerdict::NotEnoughMips;
        }
        self.sync_allocated_mips(vm);
        AllocationVerdict::Success
    }

    fn deallocate_resources(&mut self, vm: &mut VirtualMachine) {
        self.ram.deallocate_for_vm(&mut self.host, vm);
        self.bw.deallocate_for_vm(&mut self.host, vm);
        self.scheduler.deallocate_pes_for_vm(&mut self.host.pes, vm.uid());
        vm.set_current_allocated_mips(Vec::new());
    }

    fn sync_allocated_mips(&self, vm: &mut VirtualMachine) {
        let allocated = self
            .scheduler
            .allocated_mips_for_vm(vm.uid())
            .map(|mips| mips.to_vec())
            .unwrap_or_default();
        vm.set_current_allocated_mips(allocated);
    }

    /// Removes VM from resident and migrating-in lists, returns its storage if VM was present.
    fn forget_vm(&mut self, vm: &VirtualMachine) {
        let uid = vm.uid();
        let resident = self.host.vms.contains(&uid);
        let migrating_in = self.host.vms_migrating_in.contains(&uid);
        self.host.vms.retain(|other| *other != uid);
        self.host.vms_migrating_in.retain(|other| *other != uid);
        if resident || migrating_in {
            self.host.storage += vm.size;
        }
    }

    fn add_state_history_entry(&mut self, time: f64, allocated_mips: f64, requested_mips: f64, is_active: bool) {
        let entry = HostStateHistoryEntry {
            time,
            allocated_mips,
            requested_mips,
            is_active,
        };
        match self.state_history.last_mut() {
            Some(last) if last.time == time => *last = entry,
            _ => self.state_history.push(entry),
        }
    }

    fn cpu_utilization(&self, utilization_mips: f64) -> f64 {
        let total_mips = self.host.total_mips();
        if total_mips <= 0. {
            return 0.;
        }
        (utilization_mips / total_mips).min(1.)
    }
}

fn migration_error(verdict: AllocationVerdict, vm: VmUid, host: HostId) -> Option<MigrationError> {
    match verdict {
        AllocationVerdict::Success => None,
        AllocationVerdict::NotEnoughStorage => Some(MigrationError::NotEnoughStorage { vm, host }),
        AllocationVerdict::NotEnoughRam => Some(MigrationError::NotEnoughRam { vm, host }),
        AllocationVerdict::NotEnoughBandwidth => Some(MigrationError::NotEnoughBandwidth { vm, host }),
        AllocationVerdict::NotEnoughMips => Some(MigrationError::NotEnoughMips { vm, host }),
        AllocationVerdict::HostFailed => Some(MigrationError::HostFailed { vm, host }),
        AllocationVerdict::HostNotFound => Some(MigrationError::HostNotFound { vm, host }),
    }
}

/// Manages hosts and VM resources on them.
///
/// Each host gets its own RAM and bandwidth provisioners and VM scheduler. Hosts are addressed by [`HostId`], which
/// is the index assigned by [`add_host`](HostManager::add_host). VM records are owned by the caller and passed to
/// the operations, the host manager keeps only their uids.
///
/// With dynamic load enabled, each processing sweep reallocates PEs of all VMs according to their current demand and
/// records the utilization history of VMs and hosts.
pub struct HostManager {
    hosts: Vec<ManagedHost>,
    dynamic_load: bool,
    ctx: LogContext,
}

impl HostManager {
    pub fn new(dynamic_load: bool) -> Self {
        Self {
            hosts: Vec::new(),
            dynamic_load,
            ctx: LogContext::new("host_manager"),
        }
    }

    /// Adds host served by the given scheduler and returns its id.
    pub fn add_host(&mut self, host: Host, mut scheduler: Box<dyn VmScheduler>) -> HostId {
        let id = self.hosts.len() as HostId;
        scheduler.manage(&host.pes);
        log_debug!(
            self.ctx,
            "added host #{} with {} PEs ({:.0} MIPS), {} RAM, {} BW, {} storage",
            id,
            host.number_of_pes(),
            host.total_mips(),
            host.total_ram(),
            host.total_bw(),
            host.storage
        );
        self.hosts.push(ManagedHost {
            host,
            ram: ResourceProvisioner::new(),
            bw: ResourceProvisioner::new(),
            scheduler,
            state_history: Vec::new(),
            utilization_mips: 0.,
            previous_utilization_mips: 0.,
        });
        id
    }

    pub fn host(&self, host: HostId) -> Option<&Host> {
        self.hosts.get(host as usize).map(|managed| &managed.host)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn host_ids(&self) -> impl Iterator<Item = HostId> {
        0..self.hosts.len() as HostId
    }

    pub fn scheduler(&self, host: HostId) -> Option<&dyn VmScheduler> {
        self.hosts.get(host as usize).map(|managed| managed.scheduler.as_ref())
    }

    pub fn is_dynamic_load(&self) -> bool {
        self.dynamic_load
    }

    pub fn time(&self) -> f64 {
        self.ctx.time()
    }

    /// Updates the simulation time used in log records.
    pub fn set_time(&mut self, time: f64) {
        self.ctx.set_time(time);
    }

    /// Marks the host as failed or recovered and rebinds its scheduler to the updated PEs.
    ///
    /// Only a host without resident and migrating-in VMs can change its status, otherwise `false` is returned and
    /// the host is left intact. Failed host doesn't accept new VMs.
    pub fn set_host_failed(&mut self, host: HostId, failed: bool) -> bool {
        let managed = match self.hosts.get_mut(host as usize) {
            Some(managed) => managed,
            None => return false,
        };
        if !managed.host.vms.is_empty() || !managed.host.vms_migrating_in.is_empty() {
            log_warn!(self.ctx, "can't change status of host #{} with vms", host);
            return false;
        }
        managed.host.set_failed(failed);
        managed.scheduler.manage(&managed.host.pes);
        log_debug!(self.ctx, "host #{} is {}", host, if failed { "failed" } else { "recovered" });
        true
    }

    /// Creates VM on the host, all-or-nothing.
    pub fn vm_create(&mut self, host: HostId, vm: &mut VirtualMachine) -> bool {
        let verdict = match self.hosts.get_mut(host as usize) {
            None => AllocationVerdict::HostNotFound,
            Some(managed) if managed.host.is_failed() => AllocationVerdict::HostFailed,
            Some(managed) if managed.host.storage < vm.size => AllocationVerdict::NotEnoughStorage,
            Some(managed) => {
                let verdict = managed.allocate_resources(vm);
                if verdict == AllocationVerdict::Success {
                    managed.host.storage -= vm.size;
                    managed.host.vms.push(vm.uid());
                }
                verdict
            }
        };
        if verdict == AllocationVerdict::Success {
            log_debug!(self.ctx, "vm {} is created on host #{}", vm.uid(), host);
            true
        } else {
            log_debug!(self.ctx, "allocation of vm {} on host #{} failed: {}", vm.uid(), host, verdict);
            false
        }
    }

    /// Releases all resources of VM on the host and removes it from the host.
    pub fn vm_destroy(&mut self, host: HostId, vm: &mut VirtualMachine) {
        if let Some(managed) = self.hosts.get_mut(host as usize) {
            managed.deallocate_resources(vm);
            managed.forget_vm(vm);
            log_debug!(self.ctx, "vm {} is destroyed on host #{}", vm.uid(), host);
        }
    }

    /// Releases all resources of the host and removes all its resident VMs.
    ///
    /// VMs migrating to the host lose their allocations but keep the reservation: their storage stays taken and they
    /// stay in the migrating-in list, so their resources can be restored with
    /// [`reallocate_migrating_in_vms`](HostManager::reallocate_migrating_in_vms).
    pub fn vm_destroy_all(&mut self, host: HostId, vms: &mut VmRegistry) {
        let managed = match self.hosts.get_mut(host as usize) {
            Some(managed) => managed,
            None => return,
        };
        managed.ram.deallocate_all(&mut managed.host);
        managed.bw.deallocate_all(&mut managed.host);
        managed.scheduler.deallocate_pes_for_all_vms(&mut managed.host.pes);

        let removed: Vec<VmUid> = managed.host.vms.drain(..).collect();
        for uid in removed.iter().chain(managed.host.vms_migrating_in.iter()) {
            if let Some(vm) = vms.get_mut(*uid) {
                if !managed.host.vms_migrating_in.contains(uid) {
                    managed.host.storage += vm.size;
                }
                vm.set_current_allocated_ram(0);
                vm.set_current_allocated_bw(0);
                vm.set_current_allocated_mips(Vec::new());
            }
        }
        log_debug!(self.ctx, "all {} vms are destroyed on host #{}", removed.len(), host);
    }

    /// Reserves resources for VM migrating to the host.
    ///
    /// Failure means that the migration plan doesn't fit the host. In this case the partial allocations are rolled
    /// back and the error is returned to the caller.
    pub fn add_migrating_in_vm(&mut self, host: HostId, vm: &mut VirtualMachine) -> Result<(), MigrationError> {
        let uid = vm.uid();
        let managed = self
            .hosts
            .get_mut(host as usize)
            .ok_or(MigrationError::HostNotFound { vm: uid, host })?;
        let was_in_migration = vm.is_in_migration();
        vm.set_in_migration(true);
        if managed.host.vms_migrating_in.contains(&uid) {
            return Ok(());
        }

        let verdict = if managed.host.is_failed() {
            AllocationVerdict::HostFailed
        } else if managed.host.storage < vm.size {
            AllocationVerdict::NotEnoughStorage
        } else {
            managed.scheduler.add_migrating_in_vm(uid);
            managed.allocate_resources(vm)
        };
        if let Some(error) = migration_error(verdict, uid, host) {
            managed.scheduler.remove_migrating_in_vm(uid);
            vm.set_in_migration(was_in_migration);
            log_error!(self.ctx, "{}", error);
            return Err(error);
        }

        managed.host.storage -= vm.size;
        managed.host.vms_migrating_in.push(uid);
        log_debug!(self.ctx, "vm {} is migrating to host #{}", uid, host);
        Ok(())
    }

    /// Cancels or completes the migration of VM to the host, releasing its resources on the host.
    pub fn remove_migrating_in_vm(&mut self, host: HostId, vm: &mut VirtualMachine) {
        if let Some(managed) = self.hosts.get_mut(host as usize) {
            managed.deallocate_resources(vm);
            managed.forget_vm(vm);
            managed.scheduler.remove_migrating_in_vm(vm.uid());
            vm.set_in_migration(false);
        }
    }

    /// Makes VMs migrating to the host resident and allocates their resources with the current migration status.
    pub fn reallocate_migrating_in_vms(&mut self, host: HostId, vms: &mut VmRegistry) {
        let managed = match self.hosts.get_mut(host as usize) {
            Some(managed) => managed,
            None => return,
        };
        for uid in managed.host.vms_migrating_in.clone() {
            if !managed.host.vms.contains(&uid) {
                managed.host.vms.push(uid);
            }
            managed.scheduler.add_migrating_in_vm(uid);
            let vm = match vms.get_mut(uid) {
                Some(vm) => vm,
                None => continue,
            };
            managed.scheduler.deallocate_pes_for_vm(&mut managed.host.pes, uid);
            let ram = vm.current_requested_ram();
            let ram_allocated = managed.ram.allocate_for_vm(&mut managed.host, vm, ram);
            let bw = vm.current_requested_bw();
            let bw_allocated = managed.bw.allocate_for_vm(&mut managed.host, vm, bw);
            let mips_share = vm.current_requested_mips();
            let pes_allocated = managed.scheduler.allocate_pes_for_vm(&mut managed.host.pes, vm, &mips_share);
            managed.sync_allocated_mips(vm);
            if !(ram_allocated && bw_allocated && pes_allocated) {
                log_warn!(self.ctx, "can't reallocate resources of vm {} migrating to host #{}", uid, host);
            }
        }
    }

    /// Checks whether the host can accommodate VM. Doesn't change the allocations.
    pub fn is_suitable_for_vm(&mut self, host: HostId, vm: &mut VirtualMachine) -> bool {
        let managed = match self.hosts.get_mut(host as usize) {
            Some(managed) => managed,
            None => return false,
        };
        if managed.host.is_failed()
            || managed.scheduler.pe_capacity() < vm.current_requested_max_mips()
            || managed.scheduler.available_mips() < vm.current_requested_total_mips()
        {
            return false;
        }
        let ram = vm.current_requested_ram();
        let bw = vm.current_requested_bw();
        managed.ram.is_suitable_for_vm(&mut managed.host, vm, ram)
            && managed.bw.is_suitable_for_vm(&mut managed.host, vm, bw)
    }

    /// Passes the allocated MIPS to the workloads of host VMs.
    ///
    /// Returns the smallest positive time of the next workload event or [`NO_NEXT_EVENT`].
    pub fn update_vms_processing(&mut self, host: HostId, time: f64, vms: &mut VmRegistry) -> f64 {
        self.ctx.set_time(time);
        let managed = match self.hosts.get_mut(host as usize) {
            Some(managed) => managed,
            None => return NO_NEXT_EVENT,
        };

        let resident = managed.host.vms.clone();
        let mut smallest_time = NO_NEXT_EVENT;
        for uid in resident.iter() {
            if let Some(vm) = vms.get_mut(*uid) {
                let mips_share = managed
                    .scheduler
                    .allocated_mips_for_vm(*uid)
                    .map(|mips| mips.to_vec())
                    .unwrap_or_default();
                let next_time = vm.update_processing(time, &mips_share);
                if !mips_share.is_empty() {
                    vm.set_being_instantiated(false);
                }
                if next_time > 0. && next_time < smallest_time {
                    smallest_time = next_time;
                }
            }
        }
        if !self.dynamic_load {
            return smallest_time;
        }

        managed.previous_utilization_mips = managed.utilization_mips;
        managed.utilization_mips = 0.;
        for uid in resident.iter() {
            managed.scheduler.deallocate_pes_for_vm(&mut managed.host.pes, *uid);
        }
        for uid in resident.iter() {
            if let Some(vm) = vms.get(*uid) {
                let mips_share = vm.current_requested_mips();
                managed.scheduler.allocate_pes_for_vm(&mut managed.host.pes, vm, &mips_share);
            }
        }

        let mut total_requested_mips = 0.;
        for uid in resident.iter() {
            let vm = match vms.get_mut(*uid) {
                Some(vm) => vm,
                None => continue,
            };
            managed.sync_allocated_mips(vm);
            let requested_mips = vm.current_requested_total_mips();
            let mut allocated_mips = managed.scheduler.total_allocated_mips_for_vm(*uid);
            log_trace!(
                self.ctx,
                "total allocated MIPS for vm {} on host #{} is {:.2}, requested {:.2} out of total {:.2} ({:.2}%)",
                uid,
                host,
                allocated_mips,
                requested_mips,
                vm.total_mips(),
                if vm.total_mips() > 0. { requested_mips / vm.total_mips() * 100. } else { 0. }
            );
            if let Some(pes) = managed.scheduler.pes_allocated_for_vm(*uid) {
                log_trace!(
                    self.ctx,
                    "MIPS for vm {} on host #{} are taken from PEs {:?} ({} * {:.2})",
                    uid,
                    host,
                    pes,
                    managed.host.number_of_pes(),
                    managed.scheduler.pe_capacity()
                );
            }

            if managed.host.vms_migrating_in.contains(uid) {
                log_debug!(self.ctx, "vm {} is being migrated to host #{}", uid, host);
            } else {
                if allocated_mips + UNDER_ALLOCATION_EPSILON < requested_mips {
                    log_warn!(
                        self.ctx,
                        "under allocated MIPS for vm {} on host #{}: {:.2}",
                        uid,
                        host,
                        requested_mips - allocated_mips
                    );
                }
                vm.add_state_history_entry(time, allocated_mips, requested_mips, vm.is_in_migration());
                if vm.is_in_migration() {
                    log_debug!(self.ctx, "vm {} is in migration", uid);
                    allocated_mips /= MIGRATING_OUT_MIPS_FACTOR;
                }
            }
            managed.utilization_mips += allocated_mips;
            total_requested_mips += requested_mips;
        }

        let utilization_mips = managed.utilization_mips;
        managed.add_state_history_entry(time, utilization_mips, total_requested_mips, utilization_mips > 0.);
        smallest_time
    }

    /// Appends host state record, a record with the same time as the last one replaces it.
    pub fn add_state_history_entry(
        &mut self,
        host: HostId,
        time: f64,
        allocated_mips: f64,
        requested_mips: f64,
        is_active: bool,
    ) {
        if let Some(managed) = self.hosts.get_mut(host as usize) {
            managed.add_state_history_entry(time, allocated_mips, requested_mips, is_active);
        }
    }

    pub fn host_state_history(&self, host: HostId) -> &[HostStateHistoryEntry] {
        self.hosts
            .get(host as usize)
            .map(|managed| managed.state_history.as_slice())
            .unwrap_or_default()
    }

    /// Returns resident VMs which are not migrating and don't request any MIPS.
    pub fn completed_vms(&self, host: HostId, vms: &VmRegistry) -> Vec<VmUid> {
        let managed = match self.hosts.get(host as usize) {
            Some(managed) => managed,
            None => return Vec::new(),
        };
        managed
            .host
            .vms
            .iter()
            .filter_map(|uid| vms.get(*uid))
            .filter(|vm| !vm.is_in_migration() && vm.current_requested_total_mips() == 0.)
            .map(|vm| vm.uid())
            .collect()
    }

    /// Returns CPU utilization of the host during the last processing sweep, in `[0, 1]`.
    pub fn utilization_of_cpu(&self, host: HostId) -> f64 {
        self.hosts
            .get(host as usize)
            .map_or(0., |managed| managed.cpu_utilization(managed.utilization_mips))
    }

    /// Returns CPU utilization of the host during the sweep before the last one, in `[0, 1]`.
    pub fn previous_utilization_of_cpu(&self, host: HostId) -> f64 {
        self.hosts
            .get(host as usize)
            .map_or(0., |managed| managed.cpu_utilization(managed.previous_utilization_mips))
    }

    /// Returns the sum of MIPS allocated to host VMs during the last processing sweep.
    pub fn utilization_mips(&self, host: HostId) -> f64 {
        self.hosts.get(host as usize).map_or(0., |managed| managed.utilization_mips)
    }

    pub fn allocate_pes_for_vm(&mut self, host: HostId, vm: &VirtualMachine, mips_share: &[f64]) -> bool {
        match self.hosts.get_mut(host as usize) {
            Some(managed) => managed.scheduler.allocate_pes_for_vm(&mut managed.host.pes, vm, mips_share),
            None => false,
        }
    }

    pub fn deallocate_pes_for_vm(&mut self, host: HostId, uid: VmUid) {
        if let Some(managed) = self.hosts.get_mut(host as usize) {
            managed.scheduler.deallocate_pes_for_vm(&mut managed.host.pes, uid);
        }
    }

    pub fn allocated_mips_for_vm(&self, host: HostId, uid: VmUid) -> Option<&[f64]> {
        self.hosts
            .get(host as usize)
            .and_then(|managed| managed.scheduler.allocated_mips_for_vm(uid))
    }

    pub fn total_allocated_mips_for_vm(&self, host: HostId, uid: VmUid) -> f64 {
        self.hosts
            .get(host as usize)
            .map_or(0., |managed| managed.scheduler.total_allocated_mips_for_vm(uid))
    }

    pub fn max_available_mips(&self, host: HostId) -> f64 {
        self.hosts
            .get(host as usize)
            .map_or(0., |managed| managed.scheduler.max_available_mips(&managed.host.pes))
    }

    pub fn available_mips(&self, host: HostId) -> f64 {
        self.hosts
            .get(host as usize)
            .map_or(0., |managed| managed.scheduler.available_mips())
    }

    pub fn allocated_ram_for_vm(&self, host: HostId, uid: VmUid) -> u32 {
        self.hosts
            .get(host as usize)
            .map_or(0, |managed| managed.ram.get_allocated(uid))
    }

    pub fn allocated_bw_for_vm(&self, host: HostId, uid: VmUid) -> u64 {
        self.hosts
            .get(host as usize)
            .map_or(0, |managed| managed.bw.get_allocated(uid))
    }
}
