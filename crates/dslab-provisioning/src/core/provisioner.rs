//! Provisioning of a single resource dimension between VMs and the resource owner.
//!
//! The same algorithm provisions host RAM, host bandwidth and MIPS of a single PE. A resource dimension is described
//! by implementing [`Resource`] (how to read and update the owner's counters) and, for dimensions allocated directly
//! to VMs, [`VmResource`] (the VM's nominal demand and its "currently allocated" attribute).

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::{Add, Sub};

use crate::core::common::VmUid;
use crate::core::host::Host;
use crate::core::pe::Pe;
use crate::core::vm::VirtualMachine;

/// Resource dimension with its owner and numeric type.
pub trait Resource {
    /// Entity owning the resource capacity.
    type Owner;
    /// Numeric type of resource amounts, the default value is zero.
    type Amount: Copy + Debug + Default + PartialOrd + Add<Output = Self::Amount> + Sub<Output = Self::Amount>;

    fn total(owner: &Self::Owner) -> Self::Amount;

    fn available(owner: &Self::Owner) -> Self::Amount;

    fn set_available(owner: &mut Self::Owner, amount: Self::Amount);

    fn add_available(owner: &mut Self::Owner, amount: Self::Amount) {
        Self::set_available(owner, Self::available(owner) + amount);
    }

    fn subtract_available(owner: &mut Self::Owner, amount: Self::Amount) {
        Self::set_available(owner, Self::available(owner) - amount);
    }
}

/// Resource dimension which is directly requested by VMs.
pub trait VmResource: Resource {
    /// Maximum amount VM may ever be granted.
    fn requested(vm: &VirtualMachine) -> Self::Amount;

    /// Updates the VM's view of the amount currently allocated to it.
    fn set_allocated(vm: &mut VirtualMachine, amount: Self::Amount);
}

/// Host RAM.
pub struct Ram;

impl Resource for Ram {
    type Owner = Host;
    type Amount = u32;

    fn total(host: &Host) -> u32 {
        host.total_ram()
    }

    fn available(host: &Host) -> u32 {
        host.available_ram
    }

    fn set_available(host: &mut Host, amount: u32) {
        host.available_ram = amount;
    }
}

impl VmResource for Ram {
    fn requested(vm: &VirtualMachine) -> u32 {
        vm.ram
    }

    fn set_allocated(vm: &mut VirtualMachine, amount: u32) {
        vm.set_current_allocated_ram(amount);
    }
}

/// Host network bandwidth.
pub struct Bandwidth;

impl Resource for Bandwidth {
    type Owner = Host;
    type Amount = u64;

    fn total(host: &Host) -> u64 {
        host.total_bw()
    }

    fn available(host: &Host) -> u64 {
        host.available_bw
    }

    fn set_available(host: &mut Host, amount: u64) {
        host.available_bw = amount;
    }
}

impl VmResource for Bandwidth {
    fn requested(vm: &VirtualMachine) -> u64 {
        vm.bw
    }

    fn set_allocated(vm: &mut VirtualMachine, amount: u64) {
        vm.set_current_allocated_bw(amount);
    }
}

/// MIPS of a single processing unit.
///
/// PE capacity is provisioned by VM schedulers, which keep the per-VM picture themselves, so this dimension is only
/// used through the uid-based part of [`ResourceProvisioner`].
pub struct PeMips;

impl Resource for PeMips {
    type Owner = Pe;
    type Amount = f64;

    fn total(pe: &Pe) -> f64 {
        pe.mips
    }

    fn available(pe: &Pe) -> f64 {
        pe.available_mips
    }

    fn set_available(pe: &mut Pe, amount: f64) {
        pe.available_mips = amount;
    }
}

/// Best-effort provisioner of one resource dimension of one owner.
///
/// Keeps the amounts currently allocated to VMs. An allocation is never incremental: allocating for a VM first
/// releases whatever the VM held before.
pub struct ResourceProvisioner<R: Resource> {
    allocations: BTreeMap<VmUid, R::Amount>,
    _resource: PhantomData<R>,
}

impl<R: Resource> Default for ResourceProvisioner<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> ResourceProvisioner<R> {
    pub fn new() -> Self {
        Self {
            allocations: BTreeMap::new(),
            _resource: PhantomData,
        }
    }

    /// Allocates `amount` (but not more than `limit`) for the VM, replacing its previous allocation.
    pub fn allocate(&mut self, owner: &mut R::Owner, uid: VmUid, limit: R::Amount, amount: R::Amount) -> bool {
        let amount = if limit < amount { limit } else { amount };
        self.deallocate(owner, uid);
        if R::available(owner) >= amount {
            R::subtract_available(owner, amount);
            self.allocations.insert(uid, amount);
            return true;
        }
        false
    }

    /// Returns the amount allocated for the VM, zero if there is no allocation.
    pub fn get_allocated(&self, uid: VmUid) -> R::Amount {
        self.allocations.get(&uid).copied().unwrap_or_default()
    }

    /// Releases the VM allocation and returns the freed amount if there was one.
    pub fn deallocate(&mut self, owner: &mut R::Owner, uid: VmUid) -> Option<R::Amount> {
        let freed = self.allocations.remove(&uid)?;
        R::add_available(owner, freed);
        Some(freed)
    }

    /// Resets the available amount to the owner capacity and forgets all allocations.
    pub fn deallocate_all(&mut self, owner: &mut R::Owner) {
        R::set_available(owner, R::total(owner));
        self.allocations.clear();
    }

    /// Checks whether the allocation would succeed. Leaves the allocations unchanged.
    pub fn is_suitable(&mut self, owner: &mut R::Owner, uid: VmUid, limit: R::Amount, amount: R::Amount) -> bool {
        let allocated = self.get_allocated(uid);
        let result = self.allocate(owner, uid, limit, amount);
        self.deallocate(owner, uid);
        if allocated > R::Amount::default() {
            self.allocate(owner, uid, limit, allocated);
        }
        result
    }

    /// Returns the sum of all current allocations.
    pub fn total_allocated(&self) -> R::Amount {
        self.allocations
            .values()
            .fold(R::Amount::default(), |total, &amount| total + amount)
    }

    pub fn allocations(&self) -> &BTreeMap<VmUid, R::Amount> {
        &self.allocations
    }
}

impl<R: VmResource> ResourceProvisioner<R> {
    /// Allocates resource for the VM, the amount is capped by the VM requirement.
    pub fn allocate_for_vm(&mut self, owner: &mut R::Owner, vm: &mut VirtualMachine, amount: R::Amount) -> bool {
        let uid = vm.uid();
        let result = self.allocate(owner, uid, R::requested(vm), amount);
        R::set_allocated(vm, self.get_allocated(uid));
        result
    }

    pub fn get_allocated_for_vm(&self, vm: &VirtualMachine) -> R::Amount {
        self.get_allocated(vm.uid())
    }

    pub fn deallocate_for_vm(&mut self, owner: &mut R::Owner, vm: &mut VirtualMachine) {
        if self.deallocate(owner, vm.uid()).is_some() {
            R::set_allocated(vm, R::Amount::default());
        }
    }

    /// Checks whether the host has enough resource for the VM. Leaves the allocations and VM unchanged.
    pub fn is_suitable_for_vm(&mut self, owner: &mut R::Owner, vm: &mut VirtualMachine, amount: R::Amount) -> bool {
        let allocated = self.get_allocated_for_vm(vm);
        let result = self.allocate_for_vm(owner, vm, amount);
        self.deallocate_for_vm(owner, vm);
        if allocated > R::Amount::default() {
            self.allocate_for_vm(owner, vm, allocated);
        }
        result
    }
}
