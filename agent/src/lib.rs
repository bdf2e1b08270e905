//! Autonomous, quota-bounded engagement loop.
//!
//! Each cycle collects candidate posts from a content platform, asks a
//! reasoning oracle what to do with them, clamps the answer against per-cycle
//! quotas and cooldowns, and applies what survives. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (dedup, merging, reply validation,
//!   policy, phase transitions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, HTTP gateways, prompt rendering).
//!   Behind traits so tests can script them.
//!
//! Orchestration modules ([`collect`], [`decide`], [`execute`], [`cycle`],
//! [`scheduler`], [`start`]) coordinate core logic with I/O.

pub mod collect;
pub mod core;
pub mod cycle;
pub mod decide;
pub mod error;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod scheduler;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
