//! Composition wrappers.
//!
//! Each wrapper implements the same [`Pipeline`](crate::pipeline::Pipeline)
//! contract as its inner pipeline and threads the context and cancellation
//! through unchanged unless noted otherwise.

mod branch;
mod cached;
mod dataflow;
mod filter;
mod map;
mod parallel;
mod resilient;
mod then;

pub use branch::{
    AnyInput, BranchPipeline, BranchPredicate, MultiBranchPipeline, TypeSwitchPipeline,
};
pub use cached::CachingPipeline;
pub use dataflow::DataflowParallelPipeline;
pub use filter::FilterPipeline;
pub use map::MapPipeline;
pub use parallel::ParallelPipeline;
pub use resilient::{WithRetryPipeline, WithTimeoutPipeline};
pub use then::ThenPipeline;
