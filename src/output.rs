use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    ExportResult, ImportRunsResult, ImportSraResult, ProgressEvent, ProgressSink, ProjectResult, ScanResult,
    StageResult, SyncResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

impl OutputMode {
    pub fn sink(self) -> Box<dyn ProgressSink> {
        match self {
            OutputMode::Interactive => Box::new(StderrProgress),
            OutputMode::NonInteractive => Box::new(JsonOutput),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_scan(result: &ScanResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stage(result: &StageResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_import_runs(result: &ImportRunsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_project(result: &ProjectResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_import_sra(result: &ImportSraResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_sync(result: &SyncResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// One line per progress event on stderr, stdout stays JSON only.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => event.message,
        };
        let _ = writeln!(io::stderr(), "{line}");
    }
}
