//! Resource provisioning model: hosts, VMs, provisioners, VM schedulers, host manager and allocation policy.

pub mod common;
pub mod config;
pub mod error;
pub mod host;
pub mod host_manager;
pub mod pe;
pub mod provisioner;
pub mod vm;
pub mod vm_allocation_policy;
pub mod vm_registry;
pub mod vm_scheduler;
pub mod vm_schedulers;
pub mod workload;
