//! Command implementations for gems-caller.

pub mod call;
pub mod joint;

pub use call::{load_sample_list, CallCommand, RunSummary};
pub use joint::{JointCommand, JointSummary};
