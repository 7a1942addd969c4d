//! Implementations of VM schedulers.

pub mod space_shared;
pub mod time_shared;
pub mod time_shared_oversubscription;
