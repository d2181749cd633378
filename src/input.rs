//! Wordlist and combo file readers.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// One value per line, trimmed, blank lines skipped.
pub fn read_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    Ok(read_lines(path.as_ref())?
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Raw combo lines with line endings and blank lines dropped. Splitting and
/// trimming happen in the task builder.
pub fn read_combo_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    Ok(read_lines(path.as_ref())?
        .into_iter()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.trim().is_empty())
        .collect())
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .map_err(|e| Error::data(format!("Cannot read '{}': {}", path.display(), e)))?;
    BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::data(format!("Cannot read '{}': {}", path.display(), e)))
}
