use approx::assert_abs_diff_eq;

use crate::core::common::VmUid;
use crate::core::host::Host;
use crate::core::pe::{Pe, PeStatus};
use crate::core::provisioner::{PeMips, ResourceProvisioner};
use crate::core::vm::VirtualMachine;
use crate::core::vm_scheduler::VmScheduler;
use crate::core::vm_schedulers::space_shared::SpaceSharedScheduler;
use crate::core::vm_schedulers::time_shared::TimeSharedScheduler;
use crate::core::vm_schedulers::time_shared_oversubscription::TimeSharedOverSubscriptionScheduler;
use crate::core::workload::{ConstantWorkload, TaskWorkload, TraceWorkload, WorkloadModel};

///////////////////////////////////////////////////////////////////////////////

fn make_pes(count: u32, mips: f64) -> Vec<Pe> {
    (0..count).map(|id| Pe::new(id, mips)).collect()
}

fn make_vm(id: u32, pes_number: u32, mips: f64) -> VirtualMachine {
    VirtualMachine::new(id, 0, mips, pes_number, 128, 100, 10, Box::new(ConstantWorkload::full()))
}

///////////////////////////////////////////////////////////////////////////////

#[test]
fn test_pe_provisioner_ledger() {
    let mut pe = Pe::new(0, 100.);
    let mut provisioner = ResourceProvisioner::<PeMips>::new();
    let uid = VmUid::new(0, 1);

    assert!(provisioner.allocate(&mut pe, uid, f64::INFINITY, 60.));
    assert_eq!(pe.available_mips, 40.);
    assert!(!provisioner.allocate(&mut pe, VmUid::new(0, 2), f64::INFINITY, 50.));
    assert_eq!(provisioner.get_allocated(VmUid::new(0, 2)), 0.);

    // limit caps the granted amount
    assert!(provisioner.allocate(&mut pe, uid, 30., 60.));
    assert_eq!(provisioner.get_allocated(uid), 30.);
    assert_eq!(pe.available_mips, 70.);

    provisioner.deallocate_all(&mut pe);
    assert_eq!(pe.available_mips, 100.);
    assert!(provisioner.allocations().is_empty());
}

#[test]
// Shares are mapped onto PEs in order, a share which doesn't fit the rest of PE spills onto the next one.
fn test_time_shared_spills_over_pes() {
    let mut pes = make_pes(2, 100.);
    let mut scheduler = TimeSharedScheduler::new();
    scheduler.manage(&pes);
    let vm1 = make_vm(1, 1, 80.);
    let vm2 = make_vm(2, 1, 50.);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm1, &[80.]));
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm2, &[50.]));

    assert_eq!(scheduler.pes_allocated_for_vm(vm1.uid()).unwrap(), &[0]);
    assert_eq!(scheduler.pes_allocated_for_vm(vm2.uid()).unwrap(), &[0, 1]);
    assert_abs_diff_eq!(scheduler.pe_allocated_mips_for_vm(0, vm2.uid()), 20., epsilon = 1e-9);
    assert_abs_diff_eq!(scheduler.pe_allocated_mips_for_vm(1, vm2.uid()), 30., epsilon = 1e-9);
    assert_abs_diff_eq!(pes[0].available_mips, 0., epsilon = 1e-9);
    assert_abs_diff_eq!(pes[1].available_mips, 70., epsilon = 1e-9);
    assert_eq!(scheduler.pes_in_use(), 2);
    assert_abs_diff_eq!(scheduler.available_mips(), 70., epsilon = 1e-9);
}

#[test]
// Deallocation recomputes the shares of the remaining VMs from their original requests.
fn test_time_shared_deallocation_readmits_vms() {
    let mut pes = make_pes(1, 100.);
    let mut scheduler = TimeSharedScheduler::new();
    scheduler.manage(&pes);
    let vm1 = make_vm(1, 1, 60.);
    let vm2 = make_vm(2, 1, 30.);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm1, &[60.]));
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm2, &[30.]));
    assert_abs_diff_eq!(scheduler.available_mips(), 10., epsilon = 1e-9);

    scheduler.deallocate_pes_for_vm(&mut pes, vm1.uid());
    assert_abs_diff_eq!(scheduler.available_mips(), 70., epsilon = 1e-9);
    assert_eq!(scheduler.allocated_mips_for_vm(vm1.uid()), None);
    assert_eq!(scheduler.allocated_mips_for_vm(vm2.uid()).unwrap(), &[30.]);
    assert_eq!(scheduler.requested_mips_for_vm(vm1.uid()), None);
    assert_eq!(scheduler.pe_map().len(), 1);
    assert_abs_diff_eq!(pes[0].available_mips, 70., epsilon = 1e-9);

    scheduler.deallocate_pes_for_all_vms(&mut pes);
    assert_eq!(scheduler.available_mips(), 100.);
    assert_eq!(scheduler.pes_in_use(), 0);
    assert_eq!(pes[0].available_mips, 100.);
}

#[test]
// Shares of all VMs are scaled by 100 / 110 and floored: 60 -> 54, 50 -> 45.
fn test_oversubscription_rebalancing() {
    let mut pes = make_pes(1, 100.);
    let mut scheduler = TimeSharedOverSubscriptionScheduler::new();
    scheduler.manage(&pes);
    let vm1 = make_vm(1, 1, 60.);
    let vm2 = make_vm(2, 1, 50.);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm1, &[60.]));
    assert_eq!(scheduler.max_available_mips(&pes), 40.);
    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm2, &[50.]));

    assert_eq!(scheduler.allocated_mips_for_vm(vm1.uid()).unwrap(), &[54.]);
    assert_eq!(scheduler.allocated_mips_for_vm(vm2.uid()).unwrap(), &[45.]);
    assert_eq!(scheduler.available_mips(), 0.);
    assert_eq!(scheduler.max_available_mips(&pes), 0.);
    assert_abs_diff_eq!(pes[0].available_mips, 1., epsilon = 1e-9);
    assert_eq!(scheduler.requested_mips_for_vm(vm2.uid()).unwrap(), &[50.]);
}

#[test]
// Shares larger than PE capacity are capped instead of being rejected.
fn test_oversubscription_caps_shares() {
    let mut pes = make_pes(2, 100.);
    let mut scheduler = TimeSharedOverSubscriptionScheduler::new();
    scheduler.manage(&pes);
    let vm = make_vm(1, 1, 150.);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm, &[150.]));
    assert_eq!(scheduler.allocated_mips_for_vm(vm.uid()).unwrap(), &[100.]);
    assert_eq!(scheduler.requested_mips_for_vm(vm.uid()).unwrap(), &[150.]);
    assert_eq!(scheduler.available_mips(), 100.);
}

#[test]
fn test_space_shared_binds_whole_pes() {
    let mut pes = make_pes(2, 100.);
    let mut scheduler = SpaceSharedScheduler::new();
    scheduler.manage(&pes);
    let vm1 = make_vm(1, 1, 100.);
    let vm2 = make_vm(2, 2, 50.);
    let vm3 = make_vm(3, 1, 50.);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm1, &[100.]));
    assert_eq!(pes[0].status, PeStatus::Busy);
    assert_eq!(scheduler.free_pes(), &[1]);

    // only one PE is free
    assert!(!scheduler.allocate_pes_for_vm(&mut pes, &vm2, &[50., 50.]));
    assert_eq!(scheduler.free_pes(), &[1]);

    assert!(scheduler.allocate_pes_for_vm(&mut pes, &vm3, &[50.]));
    assert_eq!(scheduler.pes_allocated_for_vm(vm3.uid()).unwrap(), &[1]);
    assert_eq!(scheduler.available_mips(), 50.);
    // all PEs are busy, but the largest share is still bounded by a whole PE
    assert_eq!(pes[1].available_mips, 0.);
    assert_eq!(scheduler.max_available_mips(&pes), 100.);

    scheduler.deallocate_pes_for_vm(&mut pes, vm1.uid());
    assert_eq!(pes[0].status, PeStatus::Free);
    assert_eq!(scheduler.free_pes(), &[0]);
    assert_eq!(scheduler.available_mips(), 150.);
    assert_eq!(scheduler.max_available_mips(&pes), 100.);
}

#[test]
fn test_space_shared_rejects_share_above_pe_capacity() {
    let mut pes = make_pes(2, 100.);
    let mut scheduler = SpaceSharedScheduler::new();
    scheduler.manage(&pes);
    let vm = make_vm(1, 1, 150.);

    assert!(!scheduler.allocate_pes_for_vm(&mut pes, &vm, &[150.]));
    assert_eq!(scheduler.free_pes(), &[0, 1]);
    assert_eq!(scheduler.available_mips(), 200.);
    assert!(pes.iter().all(|pe| pe.is_free()));
}

#[test]
fn test_vm_history_collapses_equal_times() {
    let mut vm = make_vm(1, 1, 100.);
    vm.add_state_history_entry(10., 50., 60., false);
    vm.add_state_history_entry(10., 70., 80., true);
    vm.add_state_history_entry(20., 90., 100., false);

    let history = vm.state_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].time, 10.);
    assert_eq!(history[0].allocated_mips, 70.);
    assert_eq!(history[0].requested_mips, 80.);
    assert!(history[0].in_migration);
    assert_eq!(history[1].time, 20.);
}

#[test]
// Instantiating VM requests its nominal capacity, afterwards the demand follows the workload.
fn test_vm_requested_amounts() {
    let mut vm = VirtualMachine::new(1, 0, 100., 2, 1000, 500, 10, Box::new(ConstantWorkload::new(0.5, 0.25, 0.5)));
    assert_eq!(vm.current_requested_mips(), vec![100., 100.]);
    assert_eq!(vm.current_requested_ram(), 1000);
    assert_eq!(vm.current_requested_bw(), 500);

    vm.set_being_instantiated(false);
    assert_eq!(vm.current_requested_mips(), vec![50., 50.]);
    assert_eq!(vm.current_requested_total_mips(), 100.);
    assert_eq!(vm.current_requested_max_mips(), 50.);
    assert_eq!(vm.current_requested_ram(), 250);
    assert_eq!(vm.current_requested_bw(), 250);
}

#[test]
fn test_task_workload_completion_time() {
    let mut workload = TaskWorkload::new(1000.);
    assert_eq!(workload.update_processing(0., &[50., 50.]), 10.);
    // the share is applied to the time passed since the previous update: 750 MI are left
    assert_eq!(workload.update_processing(5., &[50.]), 20.);
    assert_eq!(workload.update_processing(20., &[50.]), 0.);
    assert!(workload.is_finished());
    assert_eq!(workload.cpu_load(), 0.);
}

#[test]
fn test_trace_workload_interpolation() {
    let mut workload = TraceWorkload::new(vec![0.2, 0.6, 1.0], 300.);
    assert_abs_diff_eq!(workload.utilization(150.), 0.4, epsilon = 1e-9);
    assert_abs_diff_eq!(workload.utilization(900.), 1.0, epsilon = 1e-9);

    assert_eq!(workload.update_processing(450., &[]), 600.);
    assert_abs_diff_eq!(workload.cpu_load(), 0.8, epsilon = 1e-9);
    assert_eq!(workload.update_processing(600., &[]), 0.);
}

#[test]
// Trace without a positive sampling interval stays at its last sample and schedules no events.
fn test_trace_workload_without_interval() {
    for interval in [0., -300., f64::NAN] {
        let mut workload = TraceWorkload::new(vec![0.2, 0.6], interval);
        assert_eq!(workload.update_processing(300., &[]), 0.);
        assert_eq!(workload.cpu_load(), 0.6);
        assert_eq!(workload.utilization(0.), 0.6);
    }
}

#[test]
// PEs of failed host are excluded from space-shared scheduling until the host is restored.
fn test_host_failure() {
    let mut host = Host::with_identical_pes(0, 100, 2, 100., 1024, 1000);
    assert_eq!(host.number_of_free_pes(), 2);

    host.set_failed(true);
    assert!(host.is_failed());
    assert_eq!(host.number_of_free_pes(), 0);
    assert!(host.pes().iter().all(|pe| pe.status == PeStatus::Failed));
    let mut scheduler = SpaceSharedScheduler::new();
    scheduler.manage(host.pes());
    assert!(scheduler.free_pes().is_empty());

    host.set_failed(false);
    assert_eq!(host.number_of_free_pes(), 2);
    scheduler.manage(host.pes());
    assert_eq!(scheduler.free_pes(), &[0, 1]);
}
