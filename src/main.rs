//! Terminal client for the posting assistant conversation.

use std::process::ExitCode;

use postpilot::start;

/// Connect to the message store and relay stdin lines into the conversation.
fn main() -> ExitCode {
    start::run_client()
}
