//! Decode → transform → encode chains over external processes.
//!
//! The decoding process writes to a pipe read by the transform, which runs on the
//! calling thread and writes to a pipe feeding the encoding process. The chain is
//! only successful when every stage is: the exit status of each process is checked,
//! not just the one of the last stage.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::err::{BamSieveError, Result, StageFailure};

/// An external process taking part in a chain, with the name used in diagnostics.
#[derive(Debug)]
pub struct Stage {
    name: String,
    command: Command,
}

impl Stage {
    pub fn new(name: impl Into<String>, command: Command) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    fn spawn(mut self, configure: impl FnOnce(&mut Command)) -> Result<(String, Child)> {
        configure(&mut self.command);
        match self.command.spawn() {
            Ok(child) => Ok((self.name, child)),
            Err(e) => {
                let program = self.command.get_program().to_string_lossy().into_owned();
                Err(BamSieveError::Pipeline(vec![StageFailure::new(
                    self.name,
                    format!("could not start {program}: {e}"),
                )]))
            }
        }
    }

    /// Runs a single process to completion and returns its standard output.
    pub fn output(mut self) -> Result<Vec<u8>> {
        let name = self.name.clone();
        let output = self
            .command
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| BamSieveError::Pipeline(vec![StageFailure::new(&name, e.to_string())]))?;
        if !output.status.success() {
            return Err(BamSieveError::Pipeline(vec![StageFailure::new(
                name,
                output.status.to_string(),
            )]));
        }
        Ok(output.stdout)
    }

    /// Runs a single process to completion.
    pub fn run(self) -> Result<()> {
        let (name, mut child) = self.spawn(|_| {})?;
        let status = child
            .wait()
            .map_err(|e| BamSieveError::Pipeline(vec![StageFailure::new(&name, e.to_string())]))?;
        if !status.success() {
            return Err(BamSieveError::Pipeline(vec![StageFailure::new(
                name,
                status.to_string(),
            )]));
        }
        Ok(())
    }
}

fn record_status(name: &str, status: io::Result<ExitStatus>, failures: &mut Vec<StageFailure>) {
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => failures.push(StageFailure::new(name, status.to_string())),
        Err(e) => failures.push(StageFailure::new(name, format!("could not wait: {e}"))),
    }
}

/// Streams the output of `decode` through `transform` into `encode`.
///
/// `transform_name` names the in-process stage in diagnostics. Failed stages are
/// reported together, in chain order.
pub fn run_chain<T, F>(decode: Stage, transform_name: &str, encode: Stage, transform: F) -> Result<T>
where
    F: FnOnce(&mut dyn BufRead, &mut dyn Write) -> Result<T>,
{
    let (decode_name, mut upstream) = decode.spawn(|command| {
        command.stdin(Stdio::null()).stdout(Stdio::piped());
    })?;

    let (encode_name, mut downstream) = match encode.spawn(|command| {
        command.stdin(Stdio::piped());
    }) {
        Ok(spawned) => spawned,
        Err(e) => {
            let _ = upstream.kill();
            let _ = upstream.wait();
            return Err(e);
        }
    };

    let (Some(stdout), Some(stdin)) = (upstream.stdout.take(), downstream.stdin.take()) else {
        let _ = upstream.kill();
        let _ = downstream.kill();
        let _ = upstream.wait();
        let _ = downstream.wait();
        return Err(BamSieveError::Pipeline(vec![StageFailure::new(
            transform_name,
            "stage pipes were not opened",
        )]));
    };

    let mut reader = BufReader::new(stdout);
    let mut writer = BufWriter::new(stdin);
    let outcome = transform(&mut reader, &mut writer).and_then(|value| {
        writer.flush()?;
        Ok(value)
    });
    // Closing stdin sends EOF to the encoder.
    drop(writer);

    // The transform gave up early: only report the decoder if it had already failed
    // on its own, otherwise stop it.
    let upstream_status = if outcome.is_err() {
        match upstream.try_wait() {
            Ok(Some(status)) => Some(Ok(status)),
            _ => {
                let _ = upstream.kill();
                let _ = upstream.wait();
                None
            }
        }
    } else {
        None
    };
    drop(reader);

    let downstream_status = downstream.wait();
    let upstream_status = match upstream_status {
        Some(status) => Some(status),
        None if outcome.is_err() => None,
        None => Some(upstream.wait()),
    };

    let mut failures = Vec::new();
    if let Some(status) = upstream_status {
        record_status(&decode_name, status, &mut failures);
    }
    if let Err(e) = &outcome {
        failures.push(StageFailure::new(transform_name, e.to_string()));
    }
    record_status(&encode_name, downstream_status, &mut failures);

    match outcome {
        Ok(value) if failures.is_empty() => Ok(value),
        _ => Err(BamSieveError::Pipeline(failures)),
    }
}
