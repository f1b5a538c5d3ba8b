//! Destinations for batch likelihoods.
//!
//! Rows are written in input order, one value per line with five decimals.
//! Failed samples are written as `nan` so that the destination always holds
//! one row per sample. Writing appends: a second run against the same
//! destination adds another block.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nimbus_core::Result;

use crate::batch::{BatchResult, SampleOutcome};

/// Text row of one outcome.
pub fn format_outcome(outcome: &SampleOutcome) -> String {
    match outcome {
        SampleOutcome::Value(l) => format!("{:.5}", l.value),
        SampleOutcome::Failed(_) => "nan".to_string(),
    }
}

/// Receiver of a finished batch.
pub trait LikelihoodSink {
    /// Append every outcome of `batch`, in order.
    fn write_batch(&mut self, batch: &BatchResult) -> Result<()>;
}

/// Appends rows to a text file, creating it if needed.
#[derive(Debug, Clone)]
pub struct AppendFileSink {
    path: PathBuf,
}

impl AppendFileSink {
    /// Sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination of a field: `<prefix><field>.txt`.
    pub fn for_field(prefix: &str, field: i64) -> Self {
        Self::new(format!("{prefix}{field}.txt"))
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LikelihoodSink for AppendFileSink {
    fn write_batch(&mut self, batch: &BatchResult) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut w = BufWriter::new(file);
        for outcome in batch.outcomes() {
            writeln!(w, "{}", format_outcome(outcome))?;
        }
        w.flush()?;
        Ok(())
    }
}

impl LikelihoodSink for Vec<String> {
    fn write_batch(&mut self, batch: &BatchResult) -> Result<()> {
        self.extend(batch.outcomes().iter().map(format_outcome));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::JointLikelihood;

    fn batch() -> BatchResult {
        BatchResult::new(vec![
            SampleOutcome::Value(JointLikelihood {
                value: 0.0156251,
                ln_value: 0.0156251f64.ln(),
                n_epochs: 2,
            }),
            SampleOutcome::Failed("sample 1: quadrature did not converge".into()),
            SampleOutcome::Value(JointLikelihood { value: 1.0, ln_value: 0.0, n_epochs: 0 }),
        ])
    }

    #[test]
    fn test_format() {
        let mut rows: Vec<String> = Vec::new();
        rows.write_batch(&batch()).unwrap();
        assert_eq!(rows, vec!["0.01563", "nan", "1.00000"]);
    }

    #[test]
    fn test_append_accumulates() {
        let path = std::env::temp_dir().join(format!("nimbus_sink_{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut sink = AppendFileSink::new(&path);
        sink.write_batch(&batch()).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first.lines().count(), 3);

        sink.write_batch(&batch()).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(second.lines().count(), 6);
        assert!(second.starts_with(&first));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_field_destination() {
        let sink = AppendFileSink::for_field("out/lik_field", 612);
        assert_eq!(sink.path(), Path::new("out/lik_field612.txt"));
    }
}
