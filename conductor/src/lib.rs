//! Dependency-ordered automation pipeline engine.
//!
//! Drives an external coding-agent CLI (the worker) through a fixed
//! workflow: produce a spec, derive a phase/task plan, then execute the plan
//! unit by unit. Every unit of work runs through the same stage state
//! machine with durable retry accounting, so a run can stop on an exhausted
//! unit and be resumed exactly where it paused. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (types, ordering, errors).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, ledger, plan store,
//!   process execution). Isolated to enable scripting in tests.
//!
//! Orchestration modules ([`stage`], [`loops`], [`workflow`]) coordinate
//! core logic with I/O to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod loops;
pub mod payload;
pub mod stage;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
