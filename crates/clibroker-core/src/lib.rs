//! `CliBroker` Core Library
//!
//! Coordinates many concurrent tasks sharing stdout, stderr and stdin:
//! - Bare operations: one write or read, queued fairly behind other holders
//! - Sessions: exclusive access across many operations, reentrant for their
//!   owner, released on every exit path
//! - Stream adapters, configuration and tracing setup

pub mod adapter;
pub mod broker;
pub mod config;
pub mod error;
pub mod global;
mod queue;
pub mod session;
pub mod task;
pub mod token;
pub mod tracing_init;

pub use adapter::{
    InputAdapter, OutputAdapter, SecretInput, SharedBuffer, Surfaces, Target, WriteOptions,
};
pub use broker::{Broker, BrokerStats};
pub use config::Config;
pub use error::{Error, Result};
pub use session::{Session, SessionOptions};
pub use task::{TaskId, TaskScope};
pub use token::{AccessKind, HolderInfo};
