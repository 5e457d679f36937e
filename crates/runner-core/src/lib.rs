#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared vocabulary for `taskforge`: runnable descriptions, task
//! identifiers, the status wire codec, the status reporter client, and the
//! task payload executor used by both the `task-run` subcommand and the
//! in-process spawner.

pub mod endpoint;
pub mod id;
pub mod message;
pub mod reporter;
pub mod run;
pub mod runnable;
