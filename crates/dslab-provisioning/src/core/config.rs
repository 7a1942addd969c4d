//! Provisioning model configuration.

pub mod options;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;
use crate::core::host::Host;
use crate::core::host_manager::HostManager;
use crate::core::vm::VirtualMachine;
use crate::core::vm_allocation_policy::SimpleVmAllocationPolicy;
use crate::core::vm_scheduler::vm_scheduler_resolver;
use crate::core::workload::workload_resolver;

/// Holds raw config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawProvisioningConfig {
    pub vm_scheduler: Option<String>,
    pub dynamic_load: Option<bool>,
    pub sweep_interval: Option<f64>,
    pub simulation_length: Option<f64>,
    pub hosts: Option<Vec<HostConfig>>,
    pub vms: Option<Vec<VmConfig>>,
}

/// Holds configuration of a single host or a set of identical hosts.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    /// Host name.
    /// Should be set if count = 1.
    pub name: Option<String>,
    /// Host name prefix.
    /// Full name is produced by appending host instance number to the prefix.
    /// Should be set if count > 1.
    pub name_prefix: Option<String>,
    /// Number of PEs.
    pub pes: u32,
    /// Capacity of each PE in MIPS.
    pub pe_mips: f64,
    pub ram: u32,
    pub bw: u64,
    pub storage: u64,
    /// Number of such hosts.
    pub count: Option<u32>,
}

impl HostConfig {
    /// Returns the names of all hosts described by this config.
    pub fn names(&self) -> Vec<String> {
        let count = self.count.unwrap_or(1);
        if count == 1 {
            if let Some(name) = &self.name {
                return vec![name.clone()];
            }
        }
        let prefix = self.name_prefix.clone().unwrap_or_else(|| "host".to_string());
        (1..=count).map(|i| format!("{}{}", prefix, i)).collect()
    }
}

/// Holds configuration of a single VM or a set of identical VMs of the same user.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct VmConfig {
    pub user_id: u32,
    /// Number of virtual PEs.
    pub pes: u32,
    /// Capacity of each virtual PE in MIPS.
    pub mips: f64,
    pub ram: u32,
    pub bw: u64,
    /// Image size, taken from host storage.
    pub size: u64,
    /// Workload model, e.g. `Constant[cpu=0.5]`, `Task[length=36000]` or `Random[seed=1]`.
    pub workload: Option<String>,
    /// Number of such VMs.
    pub count: Option<u32>,
}

/// Represents provisioning model configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ProvisioningConfig {
    /// VM scheduler used on all hosts: `SpaceShared`, `TimeShared` or `TimeSharedOverSubscription`.
    pub vm_scheduler: String,
    /// Whether VM MIPS are reallocated according to the current demand on each processing sweep.
    pub dynamic_load: bool,
    /// Duration in seconds between processing sweeps.
    pub sweep_interval: f64,
    /// Length of simulation in seconds.
    pub simulation_length: f64,
    /// Configurations of hosts.
    pub hosts: Vec<HostConfig>,
    /// Configurations of VMs.
    pub vms: Vec<VmConfig>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            vm_scheduler: "TimeShared".to_string(),
            dynamic_load: true,
            sweep_interval: 300.,
            simulation_length: 3600.,
            hosts: Vec::new(),
            vms: Vec::new(),
        }
    }
}

impl ProvisioningConfig {
    /// Creates config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_str(&data)
    }

    /// Creates config from YAML string. Sweep interval should be positive and simulation length non-negative.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self, ConfigError> {
        let raw: RawProvisioningConfig = serde_yaml::from_str(data)?;
        let default = Self::default();
        let sweep_interval = raw.sweep_interval.unwrap_or(default.sweep_interval);
        if !(sweep_interval.is_finite() && sweep_interval > 0.) {
            return Err(ConfigError::BadOption {
                option: "sweep_interval".to_string(),
                raw: sweep_interval.to_string(),
            });
        }
        let simulation_length = raw.simulation_length.unwrap_or(default.simulation_length);
        if !(simulation_length.is_finite() && simulation_length >= 0.) {
            return Err(ConfigError::BadOption {
                option: "simulation_length".to_string(),
                raw: simulation_length.to_string(),
            });
        }
        Ok(Self {
            vm_scheduler: raw.vm_scheduler.unwrap_or(default.vm_scheduler),
            dynamic_load: raw.dynamic_load.unwrap_or(default.dynamic_load),
            sweep_interval,
            simulation_length,
            hosts: raw.hosts.unwrap_or_default(),
            vms: raw.vms.unwrap_or_default(),
        })
    }

    /// Returns the names of all configured hosts in the order of their ids.
    pub fn host_names(&self) -> Vec<String> {
        self.hosts.iter().flat_map(|host| host.names()).collect()
    }

    /// Creates host manager with all configured hosts.
    pub fn build_host_manager(&self) -> Result<HostManager, ConfigError> {
        let mut host_manager = HostManager::new(self.dynamic_load);
        let mut host_id = 0;
        for host_config in self.hosts.iter() {
            for _ in 0..host_config.count.unwrap_or(1) {
                let host = Host::with_identical_pes(
                    host_id,
                    host_config.storage,
                    host_config.pes,
                    host_config.pe_mips,
                    host_config.ram,
                    host_config.bw,
                );
                host_manager.add_host(host, vm_scheduler_resolver(&self.vm_scheduler)?);
                host_id += 1;
            }
        }
        Ok(host_manager)
    }

    /// Creates greedy allocation policy over all configured hosts.
    pub fn build_allocation_policy(&self) -> Result<SimpleVmAllocationPolicy, ConfigError> {
        Ok(SimpleVmAllocationPolicy::new(self.build_host_manager()?))
    }

    /// Creates all configured VMs. VM ids are assigned sequentially for each user.
    pub fn build_vms(&self) -> Result<Vec<VirtualMachine>, ConfigError> {
        let mut next_ids: BTreeMap<u32, u32> = BTreeMap::new();
        let mut vms = Vec::new();
        for vm_config in self.vms.iter() {
            let workload = vm_config.workload.as_deref().unwrap_or("Constant");
            for _ in 0..vm_config.count.unwrap_or(1) {
                let next_id = next_ids.entry(vm_config.user_id).or_insert(0);
                vms.push(VirtualMachine::new(
                    *next_id,
                    vm_config.user_id,
                    vm_config.mips,
                    vm_config.pes,
                    vm_config.ram,
                    vm_config.bw,
                    vm_config.size,
                    workload_resolver(workload)?,
                ));
                *next_id += 1;
            }
        }
        Ok(vms)
    }
}
