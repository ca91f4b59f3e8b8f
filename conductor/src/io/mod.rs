//! Side-effecting collaborators: filesystem, configuration, and processes.

pub mod config;
pub mod ledger;
pub mod paths;
pub mod plan_store;
pub mod process;
pub mod worker;
