//! Line-oriented text files with framed sections.
//!
//! A section is delimited by `#tag` and `#endtag` lines; everything in
//! between belongs to the section. Section order is free and unknown tags
//! are ignored, so formats can grow without breaking old readers.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A text file split into its framed sections.
#[derive(Debug)]
pub struct SectionFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl SectionFile {
    /// Reads and splits a file.
    pub fn read(path: &Path) -> Result<SectionFile> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let lines = content
            .lines()
            .map(|line| line.trim().to_string())
            .collect();
        Ok(SectionFile { path: path.to_path_buf(), lines })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The non-empty lines of the `#tag`…`#endtag` section, or None when
    /// the section is absent.
    pub fn section(&self, tag: &str) -> Result<Option<Vec<&str>>> {
        let open = format!("#{tag}");
        let close = format!("#end{tag}");
        let start = match self.lines.iter().position(|l| l == &open) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let mut collected = Vec::new();
        for line in &self.lines[start + 1..] {
            if line == &close {
                return Ok(Some(collected));
            }
            if line == &open {
                return Err(Error::format(&self.path, format!("section {open} opened twice")));
            }
            if !line.is_empty() {
                collected.push(line.as_str());
            }
        }
        Err(Error::format(&self.path, format!("section {open} is never closed")))
    }

    /// The section's lines, failing when the section is missing.
    pub fn required(&self, tag: &str) -> Result<Vec<&str>> {
        self.section(tag)?
            .ok_or_else(|| Error::format(&self.path, format!("missing #{tag} section")))
    }

    /// A section expected to hold exactly one line.
    pub fn single_line(&self, tag: &str) -> Result<&str> {
        let lines = self.required(tag)?;
        if lines.len() != 1 {
            return Err(Error::format(
                &self.path,
                format!("section #{tag} must hold one line, has {}", lines.len()),
            ));
        }
        Ok(lines[0])
    }

    /// Like [`SectionFile::single_line`] but None when the section is absent.
    pub fn optional_line(&self, tag: &str) -> Result<Option<&str>> {
        match self.section(tag)? {
            None => Ok(None),
            Some(lines) if lines.len() == 1 => Ok(Some(lines[0])),
            Some(lines) => Err(Error::format(
                &self.path,
                format!("section #{tag} must hold one line, has {}", lines.len()),
            )),
        }
    }
}

/// Parses one whitespace-separated value, reporting the offending token.
pub fn parse_token<T: std::str::FromStr>(token: &str, what: &str, path: &Path) -> Result<T> {
    token
        .parse::<T>()
        .map_err(|_| Error::format(path, format!("bad {what}: {token:?}")))
}
