//! # gs-dispatch
//!
//! The change dispatcher ([`dispatcher::ChangeDispatcher`], with its
//! `pick_one` single-variable adaptor) and the scheduler
//! ([`scheduler::spawn_periodic`] / [`scheduler::spawn_crontab`]), both
//! feeding returned commits through the same `gs-broker::commit` pipeline.

pub mod dispatcher;
pub mod error;
pub mod scheduler;

pub use dispatcher::{pick_one, ChangeDispatcher, Handler, PendingCommit};
pub use error::DispatchError;
