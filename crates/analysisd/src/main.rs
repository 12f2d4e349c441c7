//! Entry point of the analysis server.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match analysisd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr().lock(), "analysisd: {error}"));
            ExitCode::FAILURE
        }
    }
}
