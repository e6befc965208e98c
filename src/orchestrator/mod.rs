//! Session orchestration modules.
//!
//! Covers client process spawning and termination, the login → session
//! registry, exit detection, and bulk operations over many accounts.

pub mod bulk;
pub mod host;
pub mod launcher;
pub mod monitor;
pub mod registry;
