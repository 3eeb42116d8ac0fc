use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DownloadReport, ProgressEvent, ProgressSink, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &DownloadReport) -> io::Result<()> {
        Self::print_json(report)
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

pub struct StderrProgress;

impl StderrProgress {
    pub fn print_summary(report: &DownloadReport) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        for task in &report.tasks {
            let target = task.url.as_deref().unwrap_or(task.reference.as_str());
            match task.status {
                TaskStatus::Downloaded => writeln!(
                    stderr,
                    "ok      {target} -> {}",
                    task.destination
                        .as_ref()
                        .map(|path| path.as_str())
                        .unwrap_or("-")
                )?,
                TaskStatus::Failed => writeln!(
                    stderr,
                    "failed  {target}: {}",
                    task.error.as_deref().unwrap_or("unknown error")
                )?,
            }
        }
        writeln!(
            stderr,
            "{} downloaded, {} failed",
            report.downloaded(),
            report.failed()
        )
    }
}

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} [{:.1}s]", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
