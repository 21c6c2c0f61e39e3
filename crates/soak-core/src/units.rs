//! Test-unit parsing.
//!
//! A test unit is one external test executable plus its literal
//! arguments. The CLI passes a flat argument list; `split_units`
//! partitions it into units at `--` boundaries, or falls back to the
//! legacy one-test-per-argument form when no separator is present.

use std::fmt;
use std::path::PathBuf;

/// Token separating test units on the command line.
pub const UNIT_SEPARATOR: &str = "--";

/// One independently invocable test executable plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUnit {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl TestUnit {
    fn from_parts(parts: &[String]) -> Option<Self> {
        let (path, args) = parts.split_first()?;
        Some(Self {
            path: PathBuf::from(path),
            args: args.to_vec(),
        })
    }

    /// Logical name of the unit: the executable's file stem.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Partitions a flat argument list into test units.
///
/// With at least one `--` separator, everything between separators is
/// one unit; empty partitions (leading, trailing, or adjacent
/// separators) are dropped. Without a separator, every argument is an
/// independent single-argument unit. Empty input yields an empty vec;
/// the caller treats that as a usage error.
pub fn split_units(args: &[String]) -> Vec<TestUnit> {
    if args.iter().any(|arg| arg == UNIT_SEPARATOR) {
        args.split(|arg| arg == UNIT_SEPARATOR)
            .filter_map(TestUnit::from_parts)
            .collect()
    } else {
        args.iter()
            .filter_map(|arg| TestUnit::from_parts(std::slice::from_ref(arg)))
            .collect()
    }
}
