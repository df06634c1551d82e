//! phobos: a hierarchical object store for tape and directory media.
//!
//! A client library ([`store`]) drives allocation through a [`scheduler`]
//! that owns a set of [`device_agent`] state machines, one per drive,
//! talking to the outside world only through the four [`adapters`] trait
//! families. Objects are split into extents by the [`layout`] engine and
//! tracked in an in-memory [`index`]. The [`daemon`] binary-facing module
//! exposes this over a Unix socket using the [`codec`] wire protocol.

#![warn(rust_2018_idioms)]

pub mod adapters;
pub mod codec;
pub mod config;
pub mod daemon;
pub mod device_agent;
pub mod error;
pub mod index;
pub mod layout;
pub mod model;
pub mod name_mapper;
pub mod scheduler;
pub mod store;

use crate::adapters::AdapterRegistry;
use crate::config::Config;

/// Process-wide state threaded explicitly through the daemon binary
/// instead of living behind hidden globals: configuration plus the
/// adapter registry it was started with. Constructed once in
/// `phobosd.rs`'s `main` and handed to the [`scheduler::Scheduler`] that
/// outlives it for the rest of the process.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub registry: AdapterRegistry,
}

impl Context {
    pub fn new(config: Config, registry: AdapterRegistry) -> Self {
        Context { config, registry }
    }
}
