//! Error types.

use thiserror::Error;

use crate::core::common::{HostId, VmUid};

/// Failure to allocate resources for a VM migrating into a host.
///
/// Unlike ordinary placement failures, this means the capacity plan that triggered the migration is inconsistent,
/// so it is reported to the simulation driver, which decides whether to abort.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MigrationError {
    #[error("allocation of vm {vm} on host #{host} failed by storage")]
    NotEnoughStorage { vm: VmUid, host: HostId },
    #[error("allocation of vm {vm} on host #{host} failed by RAM")]
    NotEnoughRam { vm: VmUid, host: HostId },
    #[error("allocation of vm {vm} on host #{host} failed by BW")]
    NotEnoughBandwidth { vm: VmUid, host: HostId },
    #[error("allocation of vm {vm} on host #{host} failed by MIPS")]
    NotEnoughMips { vm: VmUid, host: HostId },
    #[error("can't migrate vm {vm} to failed host #{host}")]
    HostFailed { vm: VmUid, host: HostId },
    #[error("can't migrate vm {vm} to unknown host #{host}")]
    HostNotFound { vm: VmUid, host: HostId },
}

/// Problems with reading or interpreting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("can't parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("can't read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("can't resolve vm scheduler: {0}")]
    UnknownScheduler(String),
    #[error("can't resolve workload: {0}")]
    UnknownWorkload(String),
    #[error("option {option} is missing in {value}")]
    MissingOption { value: String, option: String },
    #[error("bad value {raw} of option {option}")]
    BadOption { option: String, raw: String },
}
