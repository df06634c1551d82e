//! End-to-end harness for phobos.
//!
//! Drives the scheduler and layout engine against in-memory fake
//! adapters; everything here runs in-process, so no container or root
//! privileges are required.

mod failover;
mod fixture;
mod put_get;
mod sync_threshold;

use clap::{Parser, Subcommand};

/// Run end-to-end scenarios against phobos's in-memory fake adapters.
#[derive(Parser)]
struct PhobosTests {
    #[command(subcommand)]
    command: Option<PhobosCommand>,
}

#[derive(Subcommand)]
enum PhobosCommand {
    /// Round-trip an object through put and get.
    PutGet,
    /// Check that a 2-replica object survives one drive going offline.
    Failover,
    /// Check that release batching flips a medium's status once the
    /// request-count threshold is crossed.
    SyncThreshold,
    /// Run every scenario.
    All,
}

fn main() -> anyhow::Result<()> {
    let command = PhobosTests::parse().command.unwrap_or(PhobosCommand::All);
    match command {
        PhobosCommand::PutGet => put_get::run(),
        PhobosCommand::Failover => failover::run(),
        PhobosCommand::SyncThreshold => sync_threshold::run(),
        PhobosCommand::All => {
            put_get::run()?;
            failover::run()?;
            sync_threshold::run()?;
            Ok(())
        }
    }
}
