//! In-memory message store for local development.
//! Run with: cargo run --bin postpilot-store

use std::process::ExitCode;

use postpilot::start;

fn main() -> ExitCode {
    start::run_server()
}
