//! Time-shared scheduler with oversubscription.

use indexmap::IndexMap;

use crate::core::common::{VmUid, MIGRATING_IN_MIPS_FACTOR, MIGRATING_OUT_MIPS_FACTOR};
use crate::core::vm_schedulers::time_shared::{GenericTimeSharedScheduler, ShareAdmission, TimeSharedState};

/// Admits every request. When the demand exceeds the available capacity, the shares of all VMs are scaled down
/// proportionally so that together they fit the host capacity.
#[derive(Clone, Debug, Default)]
pub struct OverSubscriptionAdmission;

/// Time-shared scheduler which allows oversubscription of host PEs.
pub type TimeSharedOverSubscriptionScheduler = GenericTimeSharedScheduler<OverSubscriptionAdmission>;

fn cap_shares(mips_share: &[f64], pe_capacity: f64) -> Vec<f64> {
    mips_share.iter().map(|&mips| mips.min(pe_capacity)).collect()
}

impl OverSubscriptionAdmission {
    fn redistribute_mips(state: &mut TimeSharedState) {
        let pe_capacity = state.state.pe_capacity;
        let mut capped_shares = IndexMap::new();
        let mut total_required_mips = 0.;
        for (uid, mips_share) in state.requested.iter() {
            let capped = cap_shares(mips_share, pe_capacity);
            total_required_mips += state.admitted_mips(*uid, capped.iter().sum());
            capped_shares.insert(*uid, capped);
        }

        let scaling_factor = if total_required_mips > 0. {
            state.state.total_mips / total_required_mips
        } else {
            0.
        };

        state.state.mips_map.clear();
        for (uid, capped) in capped_shares {
            let allocated = capped
                .iter()
                .map(|&mips| {
                    let mips = if state.state.is_migrating_out(uid) {
                        mips * scaling_factor * MIGRATING_OUT_MIPS_FACTOR
                    } else if state.state.is_migrating_in(uid) {
                        mips * MIGRATING_IN_MIPS_FACTOR * scaling_factor
                    } else {
                        mips * scaling_factor
                    };
                    mips.floor()
                })
                .collect();
            state.state.mips_map.insert(uid, allocated);
        }
        // the host is oversubscribed, so everything is given away
        state.state.available_mips = 0.;
    }
}

impl ShareAdmission for OverSubscriptionAdmission {
    fn admit(state: &mut TimeSharedState, uid: VmUid, mips_share: &[f64]) -> bool {
        let capped = cap_shares(mips_share, state.state.pe_capacity);
        state.record_request(uid, mips_share);
        let admitted_mips = state.admitted_mips(uid, capped.iter().sum());
        if state.state.available_mips >= admitted_mips {
            state.commit(uid, &capped, admitted_mips);
        } else {
            Self::redistribute_mips(state);
        }
        true
    }

    fn max_available_mips(state: &TimeSharedState) -> f64 {
        state.state.available_mips
    }
}
