#![doc = include_str!("../README.md")]

//! # Architecture
//!
//! The crate is layered bottom-up:
//!
//! - [`Outcome`]: the value-or-error channel a task's completion travels in
//! - [`Executor`]: deferred-work scheduling, with context tokens for
//!   resumption affinity; [`ThreadPool`] and [`ExecutorPool`] implement it
//! - [`Lazy`] / [`RescheduleLazy`]: suspended computations, inert until
//!   driven; binding an executor routes every resumption through it
//! - [`sync_await`]: block a plain thread on a task's completion
//! - [`net`]: the mio-backed reactor and socket types
//! - [`awaitable`]: accept/connect/read/write adapters tasks suspend on
//! - [`http`] and [`Connection`]: the incremental request parser and the
//!   per-socket serve loop consuming all of the above
//! - [`Server`]: the accept loop handing each connection an executor

pub use crate::bridge::{sync_await, BlockingTask, Condition};
pub use crate::config::ServerConfig;
pub use crate::connection::Connection;
pub use crate::error::{ExecutorError, ReactorError};
pub use crate::executor::{
    schedule_after, ContextGuard, ContextToken, Executor, ExecutorPool, ScheduleOptions,
    ThreadPool, Work,
};
pub use crate::lazy::{current_executor, yield_now, Lazy, RescheduleLazy};
pub use crate::outcome::{describe_failure, Failure, Outcome};
pub use crate::server::Server;

pub mod awaitable;
mod bridge;
mod config;
mod connection;
mod error;
mod executor;
pub mod http;
mod lazy;
pub mod net;
mod outcome;
mod server;
