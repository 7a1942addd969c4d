use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Index of a host inside the host manager.
pub type HostId = u32;

/// Unique VM identifier composed of the owning user ID and the VM ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VmUid {
    pub user_id: u32,
    pub vm_id: u32,
}

impl VmUid {
    pub fn new(user_id: u32, vm_id: u32) -> Self {
        Self { user_id, vm_id }
    }
}

impl Display for VmUid {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.user_id, self.vm_id)
    }
}

/// Outcome of an attempt to place VM on a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationVerdict {
    Success,
    NotEnoughStorage,
    NotEnoughRam,
    NotEnoughBandwidth,
    NotEnoughMips,
    HostFailed,
    HostNotFound,
}

impl Display for AllocationVerdict {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AllocationVerdict::Success => write!(f, "success"),
            AllocationVerdict::NotEnoughStorage => write!(f, "not enough storage"),
            AllocationVerdict::NotEnoughRam => write!(f, "not enough RAM"),
            AllocationVerdict::NotEnoughBandwidth => write!(f, "not enough bandwidth"),
            AllocationVerdict::NotEnoughMips => write!(f, "not enough MIPS"),
            AllocationVerdict::HostFailed => write!(f, "host is failed"),
            AllocationVerdict::HostNotFound => write!(f, "host not found"),
        }
    }
}

/// Throughput share left to a VM on its source host while it is migrating out.
pub const MIGRATING_OUT_MIPS_FACTOR: f64 = 0.9;

/// Throughput share of a migrating VM experienced by its destination host during the transfer.
pub const MIGRATING_IN_MIPS_FACTOR: f64 = 0.1;

/// Shares below this amount of MIPS are not placed on processing units.
pub const MIN_PROVISIONED_MIPS: f64 = 0.1;

/// Tolerance used when comparing allocated and requested MIPS.
pub const UNDER_ALLOCATION_EPSILON: f64 = 0.1;

/// Returned by processing sweeps when no VM reported a pending event.
pub const NO_NEXT_EVENT: f64 = f64::MAX;
