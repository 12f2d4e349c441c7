//! Line-oriented operator console.
//!
//! Commands are case-insensitive: `stop`, `clients`, `properties`, `help`,
//! `temporary files` and `statistics`. Questions are answered with yes, no
//! or cancel.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use analysis_config::is_secret_key;
use analysis_protocol::StatisticSample;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::server::{Server, ServerState};

const CONSOLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::console");

const HELP: &str = "\
Available commands:
  stop             stop the server
  clients          list connected clients
  properties       list configuration properties
  temporary files  toggle deletion of temporary files
  statistics       print recorded statistics
  help             show this list";

/// Failures of the operator console.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Reading commands or writing answers failed.
    #[error("console I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The configuration could not be listed.
    #[error("failed to list configuration: {0}")]
    Properties(#[from] serde_json::Error),
}

/// Why [`Console::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator confirmed `stop`.
    StopRequested,
    /// The input reached end of file.
    InputClosed,
    /// The server stopped for another reason.
    ServerStopped,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Stop,
    Clients,
    Properties,
    Help,
    TemporaryFiles,
    Statistics,
    Blank,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let normalised = line
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        match normalised.as_str() {
            "stop" => Self::Stop,
            "clients" => Self::Clients,
            "properties" => Self::Properties,
            "help" => Self::Help,
            "temporary files" => Self::TemporaryFiles,
            "statistics" => Self::Statistics,
            "" => Self::Blank,
            _ => Self::Unknown(line.trim().to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Yes,
    No,
    Cancel,
}

/// Operator console bound to a running server.
pub struct Console<R, W> {
    server: Arc<Server>,
    input: R,
    output: W,
}

impl<R, W> Console<R, W>
where
    R: BufRead,
    W: Write,
{
    /// Builds a console reading commands from `input`.
    pub const fn new(server: Arc<Server>, input: R, output: W) -> Self {
        Self {
            server,
            input,
            output,
        }
    }

    /// Serves commands until `stop` is confirmed, the input closes or the
    /// server stops.
    pub fn run(&mut self) -> Result<ConsoleExit, ConsoleError> {
        writeln!(self.output, "Type 'help' for the list of commands.")?;
        loop {
            if self.server.state() != ServerState::Running {
                return Ok(ConsoleExit::ServerStopped);
            }
            write!(self.output, "> ")?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                return Ok(ConsoleExit::InputClosed);
            };
            match Command::parse(&line) {
                Command::Stop => {
                    if self.stop()? {
                        return Ok(ConsoleExit::StopRequested);
                    }
                }
                Command::Clients => self.clients()?,
                Command::Properties => self.properties()?,
                Command::Help => writeln!(self.output, "{HELP}")?,
                Command::TemporaryFiles => self.temporary_files()?,
                Command::Statistics => self.statistics()?,
                Command::Blank => {}
                Command::Unknown(command) => writeln!(
                    self.output,
                    "Unknown command '{command}'. Type 'help' for the list of commands."
                )?,
            }
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        match self.input.read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    }

    fn ask(&mut self, question: &str) -> Result<Option<Answer>, ConsoleError> {
        loop {
            write!(self.output, "{question} (yes/no/cancel) ")?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            match line.trim().to_lowercase().as_str() {
                "yes" | "y" => return Ok(Some(Answer::Yes)),
                "no" | "n" => return Ok(Some(Answer::No)),
                "cancel" | "c" => return Ok(Some(Answer::Cancel)),
                _ => writeln!(self.output, "Please answer yes, no or cancel.")?,
            }
        }
    }

    fn stop(&mut self) -> Result<bool, ConsoleError> {
        if self.ask("Stop the server?")? == Some(Answer::Yes) {
            info!(target: CONSOLE_TARGET, "stop confirmed at the console");
            return Ok(true);
        }
        writeln!(self.output, "Stop cancelled.")?;
        Ok(false)
    }

    fn clients(&mut self) -> Result<(), ConsoleError> {
        let clients = self.server.clients();
        if clients.is_empty() {
            writeln!(self.output, "No clients connected.")?;
            return Ok(());
        }
        writeln!(self.output, "{} client(s) connected:", clients.len())?;
        for alias in &clients {
            writeln!(self.output, "  {alias}")?;
        }
        Ok(())
    }

    fn properties(&mut self) -> Result<(), ConsoleError> {
        let Value::Object(properties) = serde_json::to_value(self.server.config())? else {
            return Ok(());
        };
        for (key, value) in properties.iter().filter(|(name, _)| !is_secret_key(name)) {
            match value {
                Value::String(text) => writeln!(self.output, "{key} = {text}")?,
                other => writeln!(self.output, "{key} = {other}")?,
            }
        }
        Ok(())
    }

    fn temporary_files(&mut self) -> Result<(), ConsoleError> {
        let current = if self.server.delete_temporary_files() {
            "deleted"
        } else {
            "kept"
        };
        writeln!(
            self.output,
            "Temporary files are currently {current} after each task."
        )?;
        match self.ask("Delete temporary files after each task?")? {
            Some(Answer::Yes) => self.server.set_delete_temporary_files(true),
            Some(Answer::No) => self.server.set_delete_temporary_files(false),
            Some(Answer::Cancel) | None => writeln!(self.output, "Setting unchanged.")?,
        }
        Ok(())
    }

    fn statistics(&mut self) -> Result<(), ConsoleError> {
        let samples = self.server.statistics_snapshot();
        if samples.is_empty() {
            writeln!(self.output, "No statistics recorded.")?;
            return Ok(());
        }
        for sample in &samples {
            writeln!(self.output, "{}", describe(sample))?;
        }
        Ok(())
    }
}

fn describe(sample: &StatisticSample) -> String {
    let recorded = i128::from(sample.recorded_ms)
        .checked_mul(1_000_000)
        .and_then(|nanos| OffsetDateTime::from_unix_timestamp_nanos(nanos).ok())
        .and_then(|moment| moment.format(&Rfc3339).ok())
        .unwrap_or_else(|| sample.recorded_ms.to_string());
    format!(
        "{recorded} requests={} failures={} pool_size={} active={}",
        sample.analysis_requests, sample.failed_analyses, sample.pool_size, sample.active_tasks
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerBuilder;
    use analysis_config::Config;
    use rstest::rstest;
    use std::io::Cursor;

    fn console_session(script: &str) -> (Arc<Server>, ConsoleExit, String) {
        let server = ServerBuilder::new(Config {
            stop_password: "hunter2".to_owned(),
            ..Config::default()
        })
        .build();
        let mut output = Vec::new();
        let exit = Console::new(Arc::clone(&server), Cursor::new(script.to_owned()), &mut output)
            .run()
            .expect("console run");
        (server, exit, String::from_utf8(output).expect("utf8 output"))
    }

    #[rstest]
    #[case("stop\n", Command::Stop)]
    #[case("  TEMPORARY   Files ", Command::TemporaryFiles)]
    #[case("Statistics", Command::Statistics)]
    #[case("", Command::Blank)]
    #[case("reboot", Command::Unknown("reboot".to_owned()))]
    fn commands_are_case_insensitive(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(Command::parse(line), expected);
    }

    #[test]
    fn confirmed_stop_ends_the_loop() {
        let (_, exit, _) = console_session("stop\nmaybe\nyes\n");
        assert_eq!(exit, ConsoleExit::StopRequested);
    }

    #[test]
    fn cancelled_stop_keeps_serving() {
        let (_, exit, output) = console_session("stop\ncancel\n");
        assert_eq!(exit, ConsoleExit::InputClosed);
        assert!(output.contains("Stop cancelled."));
    }

    #[test]
    fn properties_hide_secrets() {
        let (_, _, output) = console_session("properties\n");
        assert!(output.contains("listen_socket = "));
        assert!(output.contains("work_root = "));
        assert!(!output.contains("stop_password"));
        assert!(!output.contains("hunter2"));
        assert!(!output.contains("admin_cipher_key"));
    }

    #[rstest]
    #[case("no\n", false)]
    #[case("yes\n", true)]
    #[case("cancel\n", true)]
    fn temporary_files_toggle(#[case] answer: &str, #[case] expected: bool) {
        let (server, _, _) = console_session(&format!("temporary files\n{answer}"));
        assert_eq!(server.delete_temporary_files(), expected);
    }

    #[test]
    fn statistics_are_listed() {
        let server = ServerBuilder::new(Config::default()).build();
        server.sample();
        let mut output = Vec::new();
        Console::new(Arc::clone(&server), Cursor::new("statistics\n"), &mut output)
            .run()
            .expect("console run");
        let text = String::from_utf8(output).expect("utf8 output");
        assert!(text.contains("requests=0 failures=0"));
    }

    #[test]
    fn empty_client_list_is_reported() {
        let (_, _, output) = console_session("clients\nhelp\n");
        assert!(output.contains("No clients connected."));
        assert!(output.contains("temporary files"));
    }
}
