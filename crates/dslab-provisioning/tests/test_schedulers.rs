use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rstest::rstest;
use sugars::boxed;

use dslab_provisioning::core::host::Host;
use dslab_provisioning::core::host_manager::HostManager;
use dslab_provisioning::core::pe::Pe;
use dslab_provisioning::core::vm::VirtualMachine;
use dslab_provisioning::core::vm_scheduler::{vm_scheduler_resolver, VmScheduler};
use dslab_provisioning::core::vm_schedulers::space_shared::SpaceSharedScheduler;
use dslab_provisioning::core::vm_schedulers::time_shared::TimeSharedScheduler;
use dslab_provisioning::core::vm_schedulers::time_shared_oversubscription::TimeSharedOverSubscriptionScheduler;
use dslab_provisioning::core::workload::ConstantWorkload;

fn make_vm(id: u32, pes_number: u32, mips: f64) -> VirtualMachine {
    VirtualMachine::new(id, 0, mips, pes_number, 128, 10, 10, boxed!(ConstantWorkload::full()))
}

fn make_scheduler(name: &str, pes: &[Pe]) -> Box<dyn VmScheduler> {
    let mut scheduler = vm_scheduler_resolver(name).unwrap();
    scheduler.manage(pes);
    scheduler
}

fn make_host_manager(scheduler: &str) -> (HostManager, u32) {
    let mut host_manager = HostManager::new(false);
    let host = host_manager.add_host(
        Host::with_identical_pes(0, 1000, 1, 100., 1024, 1000),
        vm_scheduler_resolver(scheduler).unwrap(),
    );
    (host_manager, host)
}

#[test]
fn test_resolver() {
    assert!(vm_scheduler_resolver("SpaceShared").is_ok());
    assert!(vm_scheduler_resolver("TimeShared").is_ok());
    assert!(vm_scheduler_resolver("TimeSharedOverSubscription").is_ok());
    assert!(vm_scheduler_resolver("Unknown").is_err());
}

#[rstest]
// Host has one PE of 100 MIPS, VM requesting 60 MIPS leaves 40 MIPS available.
fn test_first_vm_fits(#[values("SpaceShared", "TimeShared", "TimeSharedOverSubscription")] scheduler: &str) {
    let (mut host_manager, host) = make_host_manager(scheduler);
    let mut vm = make_vm(1, 1, 60.);

    assert!(host_manager.vm_create(host, &mut vm));
    assert_eq!(host_manager.available_mips(host), 40.);
    assert_eq!(host_manager.allocated_mips_for_vm(host, vm.uid()).unwrap(), &[60.]);
    assert_eq!(vm.current_allocated_mips(), &[60.]);
}

#[rstest]
// The second VM doesn't fit without oversubscription.
fn test_second_vm_rejected(#[values("SpaceShared", "TimeShared")] scheduler: &str) {
    let (mut host_manager, host) = make_host_manager(scheduler);
    let mut vm1 = make_vm(1, 1, 60.);
    let mut vm2 = make_vm(2, 1, 50.);

    assert!(host_manager.vm_create(host, &mut vm1));
    assert!(!host_manager.vm_create(host, &mut vm2));
    assert_eq!(host_manager.available_mips(host), 40.);
    assert_eq!(host_manager.allocated_mips_for_vm(host, vm2.uid()), None);
    assert_eq!(host_manager.host(host).unwrap().vms(), &[vm1.uid()]);
    // resources taken before the PE allocation are rolled back
    assert_eq!(host_manager.host(host).unwrap().available_ram(), 1024 - 128);
    assert_eq!(host_manager.allocated_ram_for_vm(host, vm2.uid()), 0);
    assert_eq!(vm2.current_allocated_ram(), 0);
}

#[test]
// With oversubscription both VMs are admitted and scaled down to fit 100 MIPS.
fn test_second_vm_oversubscribed() {
    let (mut host_manager, host) = make_host_manager("TimeSharedOverSubscription");
    let mut vm1 = make_vm(1, 1, 60.);
    let mut vm2 = make_vm(2, 1, 50.);

    assert!(host_manager.vm_create(host, &mut vm1));
    assert!(host_manager.vm_create(host, &mut vm2));
    let allocated1 = host_manager.total_allocated_mips_for_vm(host, vm1.uid());
    let allocated2 = host_manager.total_allocated_mips_for_vm(host, vm2.uid());
    assert_eq!(allocated1, 54.);
    assert_eq!(allocated2, 45.);
    assert!(allocated1 + allocated2 <= 100.);
    assert_eq!(host_manager.available_mips(host), 0.);
}

#[rstest]
// VM migrating out keeps 90% of its share, migrating in VM gets 10% of it.
fn test_migration_multipliers(#[values("TimeShared", "TimeSharedOverSubscription")] scheduler: &str) {
    let mut pes: Vec<Pe> = (0..4).map(|id| Pe::new(id, 100.)).collect();
    let mut scheduler = make_scheduler(scheduler, &pes);
    let regular = make_vm(1, 2, 100.);
    let mut migrating_out = make_vm(2, 1, 50.);
    migrating_out.set_in_migration(true);
    let migrating_in = make_vm(3, 1, 50.);
    scheduler.add_migrating_in_vm(migrating_in.uid());

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &regular, &[100., 100.]));
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &migrating_out, &[50.]));
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &migrating_in, &[50.]));

    assert_eq!(scheduler.vms_migrating_out(), &[migrating_out.uid()]);
    assert_eq!(scheduler.vms_migrating_in(), &[migrating_in.uid()]);
    assert_abs_diff_eq!(scheduler.total_allocated_mips_for_vm(regular.uid()), 200., epsilon = 1e-9);
    assert_abs_diff_eq!(scheduler.total_allocated_mips_for_vm(migrating_out.uid()), 45., epsilon = 1e-9);
    assert_abs_diff_eq!(scheduler.total_allocated_mips_for_vm(migrating_in.uid()), 5., epsilon = 1e-9);
    // migrating in VM takes only 10% of its request from the host
    assert_abs_diff_eq!(scheduler.available_mips(), 400. - 200. - 50. - 5., epsilon = 1e-9);
}

#[test]
// Oversubscribed host scales all shares, the share of VM migrating out is reduced by 10% on top of it.
fn test_oversubscription_with_migrating_out_vm() {
    let mut pes = vec![Pe::new(0, 100.)];
    let mut scheduler = TimeSharedOverSubscriptionScheduler::new();
    scheduler.manage(&pes);
    let mut migrating_out = make_vm(1, 1, 60.);
    migrating_out.set_in_migration(true);
    let regular = make_vm(2, 1, 60.);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &migrating_out, &[60.]));
    assert_eq!(scheduler.allocated_mips_for_vm(migrating_out.uid()).unwrap(), &[54.]);
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &regular, &[60.]));

    assert_eq!(scheduler.allocated_mips_for_vm(migrating_out.uid()).unwrap(), &[45.]);
    assert_eq!(scheduler.allocated_mips_for_vm(regular.uid()).unwrap(), &[50.]);
    assert_eq!(scheduler.available_mips(), 0.);
}

#[test]
// VM migrating in takes part in the redistribution with 10% of its request.
fn test_oversubscription_with_migrating_in_vm() {
    let mut pes = vec![Pe::new(0, 100.)];
    let mut scheduler = TimeSharedOverSubscriptionScheduler::new();
    scheduler.manage(&pes);
    let regular = make_vm(1, 1, 100.);
    let migrating_in = make_vm(2, 1, 50.);
    scheduler.add_migrating_in_vm(migrating_in.uid());

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &regular, &[100.]));
    assert_eq!(scheduler.available_mips(), 0.);
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &migrating_in, &[50.]));

    // 100 MIPS are shared by 100 + 5 admitted MIPS
    assert_eq!(scheduler.allocated_mips_for_vm(regular.uid()).unwrap(), &[95.]);
    assert_eq!(scheduler.allocated_mips_for_vm(migrating_in.uid()).unwrap(), &[4.]);
    assert_eq!(scheduler.vms_migrating_in(), &[migrating_in.uid()]);
    assert_eq!(scheduler.available_mips(), 0.);
}

#[test]
// VM stops being counted as migrating out once its migration is over.
fn test_migration_out_finished() {
    let mut pes: Vec<Pe> = (0..2).map(|id| Pe::new(id, 100.)).collect();
    let mut scheduler = TimeSharedScheduler::new();
    scheduler.manage(&pes);
    let mut vm = make_vm(1, 1, 100.);
    vm.set_in_migration(true);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm, &[100.]));
    assert_abs_diff_eq!(scheduler.total_allocated_mips_for_vm(vm.uid()), 90., epsilon = 1e-9);

    vm.set_in_migration(false);
    scheduler.deallocate_pes_for_vm(&mut pes, vm.uid());
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm, &[100.]));
    assert!(scheduler.vms_migrating_out().is_empty());
    assert_abs_diff_eq!(scheduler.total_allocated_mips_for_vm(vm.uid()), 100., epsilon = 1e-9);
}

#[test]
// Strict time-shared scheduler fails exactly when the request exceeds the available capacity.
fn test_time_shared_admission_control() {
    let mut pes: Vec<Pe> = (0..4).map(|id| Pe::new(id, 100.)).collect();
    let mut scheduler = TimeSharedScheduler::new();
    scheduler.manage(&pes);
    let mut rand = Pcg64::seed_from_u64(123);

    for id in 0..50 {
        let vm = make_vm(id, 1, 100.);
        let share = rand.gen_range(1..=10) as f64 * 10.;
        let available = scheduler.available_mips();
        let result = scheduler.allocate_pes_for_vm(&mut pes, &vm, &[share]);
        assert_eq!(result, share <= available);
        if result {
            assert_abs_diff_eq!(scheduler.available_mips(), available - share, epsilon = 1e-9);
        } else {
            assert_abs_diff_eq!(scheduler.available_mips(), available, epsilon = 1e-9);
        }
        let allocated: f64 = scheduler.state().mips_map.values().flatten().sum();
        assert_abs_diff_eq!(scheduler.available_mips(), 400. - allocated, epsilon = 1e-9);
    }
}

#[test]
// Space-shared VMs never share a PE, each virtual PE gets its own physical PE.
fn test_space_shared_pes_are_exclusive() {
    let mut pes: Vec<Pe> = (0..16).map(|id| Pe::new(id, 100.)).collect();
    let mut scheduler = SpaceSharedScheduler::new();
    scheduler.manage(&pes);
    let mut rand = Pcg64::seed_from_u64(123);

    let mut allocated = Vec::new();
    for id in 0..30 {
        if !allocated.is_empty() && rand.gen_range(0..3) == 0 {
            let uid = allocated.remove(rand.gen_range(0..allocated.len()));
            scheduler.deallocate_pes_for_vm(&mut pes, uid);
        }
        let pes_number = rand.gen_range(1..=4);
        let vm = make_vm(id, pes_number, 100.);
        let free = scheduler.free_pes().len();
        let result = scheduler.allocate_pes_for_vm(&mut pes, &vm, &vec![100.; pes_number as usize]);
        assert_eq!(result, free >= pes_number as usize);
        if result {
            allocated.push(vm.uid());
        }

        let mut used: Vec<usize> = scheduler.pe_map().values().flatten().cloned().collect();
        let total_shares: usize = scheduler.state().mips_map.values().map(|shares| shares.len()).sum();
        assert_eq!(used.len(), total_shares);
        used.sort_unstable();
        used.dedup();
        assert_eq!(used.len(), total_shares);
        assert_eq!(used.len() + scheduler.free_pes().len(), 16);
    }
}

#[test]
// When demand exceeds capacity, the shares sum up to the host capacity up to the rounding.
fn test_oversubscription_uses_whole_capacity() {
    let mut pes: Vec<Pe> = (0..2).map(|id| Pe::new(id, 100.)).collect();
    let mut scheduler = TimeSharedOverSubscriptionScheduler::new();
    scheduler.manage(&pes);
    let mut rand = Pcg64::seed_from_u64(123);

    let mut requested = 0.;
    for id in 0..20 {
        let vm = make_vm(id, 1, 100.);
        let share = rand.gen_range(3..=10) as f64 * 10.;
        requested += share;
        assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm, &[share]));

        let allocated: f64 = scheduler.state().mips_map.values().flatten().sum();
        if requested > 200. {
            assert_eq!(scheduler.available_mips(), 0.);
            assert!(allocated <= 200.);
            assert!(allocated >= 200. - (id + 1) as f64);
        } else {
            assert_abs_diff_eq!(allocated, requested, epsilon = 1e-9);
            assert_abs_diff_eq!(scheduler.available_mips(), 200. - requested, epsilon = 1e-9);
        }
    }
}
