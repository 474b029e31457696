//! Vehicle selection and validation for tasks

pub mod distributor;
pub mod mode;

pub use distributor::{progress_consistent, StateHandler, TaskDistributor};
pub use mode::{
    build_strategy, parse_origin_key, AllocationMode, AllocationStrategy, Customize,
    DistancePriority, OriginSpecify, PowerPriority, RecentPark, SelectionContext,
};
