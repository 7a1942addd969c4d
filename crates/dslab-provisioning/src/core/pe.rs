//! Processing unit of a host.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Status of processing unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PeStatus {
    Free,
    Busy,
    Failed,
}

impl Display for PeStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PeStatus::Free => write!(f, "free"),
            PeStatus::Busy => write!(f, "busy"),
            PeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Processing unit (PE) with a fixed capacity in MIPS.
///
/// `available_mips` is the part of capacity not yet provisioned to VMs. It is maintained by the MIPS provisioners
/// of time-shared schedulers, space-shared scheduling tracks whole PEs via `status` instead.
#[derive(Clone, Debug, Serialize)]
pub struct Pe {
    pub id: u32,
    pub mips: f64,
    pub available_mips: f64,
    pub status: PeStatus,
}

impl Pe {
    /// Creates free PE with the specified capacity.
    pub fn new(id: u32, mips: f64) -> Self {
        Self {
            id,
            mips,
            available_mips: mips,
            status: PeStatus::Free,
        }
    }

    pub fn is_free(&self) -> bool {
        self.status == PeStatus::Free
    }

    pub fn set_status(&mut self, status: PeStatus) {
        self.status = status;
    }
}

/// Returns the summary capacity of PEs.
pub fn total_mips(pes: &[Pe]) -> f64 {
    pes.iter().map(|pe| pe.mips).sum()
}
