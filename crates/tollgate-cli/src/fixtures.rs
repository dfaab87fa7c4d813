use std::path::Path;

use tollgate_core::tuple::{Tuple, TupleParseError, TupleWrite};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("failed to read '{path}': {message}")]
    ReadFile { path: String, message: String },

    #[error("line {line}: {source}")]
    InvalidLine {
        line: usize,
        #[source]
        source: TupleParseError,
    },
}

/// Parses one `entity#relation@subject` tuple per line. Blank lines and `//`
/// comments are skipped.
pub fn parse_relationships(text: &str) -> Result<Vec<TupleWrite>, FixtureError> {
    let mut writes = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let tuple: Tuple = line.parse().map_err(|source| FixtureError::InvalidLine {
            line: index + 1,
            source,
        })?;
        writes.push(tuple.into());
    }
    Ok(writes)
}

pub fn read_relationships(path: &Path) -> Result<Vec<TupleWrite>, FixtureError> {
    parse_relationships(&read_file(path)?)
}

pub fn read_schema_text(path: &Path) -> Result<String, FixtureError> {
    read_file(path)
}

fn read_file(path: &Path) -> Result<String, FixtureError> {
    std::fs::read_to_string(path).map_err(|e| FixtureError::ReadFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
