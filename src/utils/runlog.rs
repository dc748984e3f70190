//! Per-tool run logs: a human-readable `<tool>_log.txt` with parameters
//! and per-stage timings, and the `success.txt` marker dropped when a run
//! completes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;

use crate::constants::SUCCESS_FILENAME;
use crate::utils::helpers::pretty_elapsed;
use crate::{Error, Result};

/// Collects the log of one tool run and writes it line by line, so a
/// killed run still leaves the lines completed so far.
pub struct RunLog {
    path: PathBuf,
    file: fs::File,
    start: Instant,
    stage: Option<(String, Instant)>,
}

impl RunLog {
    /// Opens `<out_dir>/<tool>_log.txt` and records the start time.
    pub fn create(out_dir: &Path, tool: &str) -> Result<RunLog> {
        fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;
        let path = out_dir.join(format!("{tool}_log.txt"));
        let file = fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut log = RunLog { path, file, start: Instant::now(), stage: None };
        log.line(&format!("Start time:\t{}", Local::now().format("%Y-%m-%d %H:%M:%S")))?;
        Ok(log)
    }

    /// Appends one line.
    pub fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.file, "{text}").map_err(|e| Error::io(&self.path, e))
    }

    /// Appends a `name:\tvalue` parameter line.
    pub fn param(&mut self, name: &str, value: impl std::fmt::Display) -> Result<()> {
        self.line(&format!("{name}:\t{value}"))
    }

    /// Starts a named stage; the previous stage's timing is flushed first.
    pub fn stage(&mut self, name: &str) -> Result<()> {
        self.finish_stage()?;
        self.stage = Some((name.to_string(), Instant::now()));
        log::info!("stage: {name}");
        Ok(())
    }

    fn finish_stage(&mut self) -> Result<()> {
        if let Some((name, begun)) = self.stage.take() {
            let elapsed = pretty_elapsed(begun.elapsed().as_secs());
            self.line(&format!("Stage '{name}' time:\t{elapsed}"))?;
        }
        Ok(())
    }

    /// Writes the final elapsed time and the success marker.
    pub fn finish(mut self, out_dir: &Path) -> Result<()> {
        self.finish_stage()?;
        self.line("-------------")?;
        self.line(&format!("Finish time:\t{}", Local::now().format("%Y-%m-%d %H:%M:%S")))?;
        self.line(&format!("Elapsed time:\t{}", pretty_elapsed(self.start.elapsed().as_secs())))?;
        let marker = out_dir.join(SUCCESS_FILENAME);
        fs::write(&marker, b"").map_err(|e| Error::io(&marker, e))
    }

    /// Appends a failure notice (mirrors what is printed on stderr).
    pub fn error(&mut self, message: &str) -> Result<()> {
        self.line(&format!("ERROR:\t{message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::create(dir.path(), "testtool").unwrap();
        log.param("Tree file", "some/tree.txt").unwrap();
        log.stage("load").unwrap();
        log.stage("compute").unwrap();
        log.finish(dir.path()).unwrap();

        let content = fs::read_to_string(dir.path().join("testtool_log.txt")).unwrap();
        assert!(content.contains("Start time:"));
        assert!(content.contains("Tree file:\tsome/tree.txt"));
        assert!(content.contains("Stage 'load' time:"));
        assert!(content.contains("Elapsed time:"));
        assert!(dir.path().join(SUCCESS_FILENAME).is_file());
    }
}
