//! Export of VM and host utilization histories to CSV.

use std::fs::File;
use std::io::Write;

use serde::Serialize;

use crate::core::common::HostId;
use crate::core::host_manager::HostManager;
use crate::core::vm_registry::VmRegistry;

#[derive(Serialize)]
struct VmHistoryRecord {
    vm: String,
    time: f64,
    allocated_mips: f64,
    requested_mips: f64,
    in_migration: bool,
}

#[derive(Serialize)]
struct HostHistoryRecord {
    host: HostId,
    time: f64,
    allocated_mips: f64,
    requested_mips: f64,
    is_active: bool,
}

/// Writes state histories of all VMs, ordered by VM uid and time.
pub fn write_vm_history<W: Write>(writer: W, vms: &VmRegistry) -> Result<(), std::io::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for vm in vms.iter() {
        for entry in vm.state_history() {
            wtr.serialize(VmHistoryRecord {
                vm: vm.uid().to_string(),
                time: entry.time,
                allocated_mips: entry.allocated_mips,
                requested_mips: entry.requested_mips,
                in_migration: entry.in_migration,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Writes state histories of all hosts, ordered by host id and time.
pub fn write_host_history<W: Write>(writer: W, host_manager: &HostManager) -> Result<(), std::io::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for host in host_manager.host_ids() {
        for entry in host_manager.host_state_history(host) {
            wtr.serialize(HostHistoryRecord {
                host,
                time: entry.time,
                allocated_mips: entry.allocated_mips,
                requested_mips: entry.requested_mips,
                is_active: entry.is_active,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_vm_history(path: &str, vms: &VmRegistry) -> Result<(), std::io::Error> {
    write_vm_history(File::create(path)?, vms)
}

pub fn save_host_history(path: &str, host_manager: &HostManager) -> Result<(), std::io::Error> {
    write_host_history(File::create(path)?, host_manager)
}
