//! Columnar storage for sampling chains.
//!
//! A [`Chain`] records one `(negative log likelihood, parameter vector)`
//! row per sampler trial. The column schema is fixed by the kernel family
//! of the first appended row; appending a row with a different parameter
//! set fails instead of silently reshaping the table. Chains persist as
//! whitespace-separated text with a `# lnlikely ...` header line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::kernel::{KernelFamily, Params};
use crate::math::percentile;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("parameter set changed mid-chain: chain has columns {expected:?}, append has {got:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },
    #[error("no column named '{0}' in this chain")]
    UnknownColumn(String),
    #[error("not a chain file (header must begin with '# lnlikely')")]
    NotAChainFile,
    #[error("malformed chain row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
    #[error("chain is empty")]
    Empty,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Ordered record of sampler states with a fixed column schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chain {
    names: Vec<String>,
    lnlikely: Vec<f64>,
    /// Row-major parameter values, `names.len()` per row.
    draws: Vec<f64>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lnlikely.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lnlikely.is_empty()
    }

    /// Column names in storage order. Empty until the first append.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Column index of a parameter name.
    pub fn index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Append one sampler state. The first append fixes the schema from
    /// the family's parameter set; later appends must match it.
    pub fn append(
        &mut self,
        lnlikely: f64,
        family: KernelFamily,
        params: &Params,
    ) -> Result<(), ChainError> {
        let incoming: Vec<String> = family
            .param_names()
            .iter()
            .map(|n| n.as_str().to_string())
            .collect();
        if self.names.is_empty() {
            self.names = incoming;
        } else if self.names != incoming {
            return Err(ChainError::SchemaMismatch {
                expected: self.names.clone(),
                got: incoming,
            });
        }
        self.lnlikely.push(lnlikely);
        self.draws.extend(params.values(family));
        Ok(())
    }

    /// One stored row: the negative log likelihood and the parameter
    /// values in column order.
    pub fn row(&self, i: usize) -> (f64, &[f64]) {
        let ncols = self.names.len();
        (self.lnlikely[i], &self.draws[i * ncols..(i + 1) * ncols])
    }

    /// The row with the smallest negative log likelihood.
    pub fn best(&self) -> Option<(f64, &[f64])> {
        let (i, _) = self
            .lnlikely
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))?;
        Some(self.row(i))
    }

    /// All stored values of one parameter.
    pub fn column(&self, name: &str) -> Result<Vec<f64>, ChainError> {
        let col = self
            .index(name)
            .ok_or_else(|| ChainError::UnknownColumn(name.to_string()))?;
        let ncols = self.names.len();
        Ok(self
            .draws
            .chunks_exact(ncols)
            .map(|row| row[col])
            .collect())
    }

    /// One parameter's marginal after discarding the first `burn` fraction
    /// of the chain.
    pub fn column_after_burn(&self, name: &str, burn: f64) -> Result<Vec<f64>, ChainError> {
        assert!((0.0..1.0).contains(&burn), "burn fraction must be in [0, 1)");
        let mut col = self.column(name)?;
        if col.is_empty() {
            return Err(ChainError::Empty);
        }
        let cut = (burn * col.len() as f64) as usize;
        Ok(col.split_off(cut))
    }

    /// Marginal percentiles (in percent) of one parameter after burn-in.
    pub fn percentiles(
        &self,
        name: &str,
        burn: f64,
        qs: &[f64],
    ) -> Result<Vec<f64>, ChainError> {
        let marginal = self.column_after_burn(name, burn)?;
        Ok(qs.iter().map(|&q| percentile(&marginal, q)).collect())
    }

    /// Drop the first `frac` of the stored rows in place.
    pub fn burn(&mut self, frac: f64) {
        assert!((0.0..1.0).contains(&frac), "burn fraction must be in [0, 1)");
        let cut = (frac * self.len() as f64) as usize;
        self.lnlikely.drain(..cut);
        self.draws.drain(..cut * self.names.len());
    }

    /// Write the chain as whitespace-separated text with a header naming
    /// the columns.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ChainError> {
        let mut out = BufWriter::new(File::create(path)?);
        write!(out, "# lnlikely")?;
        for name in &self.names {
            write!(out, "   {name}")?;
        }
        writeln!(out)?;
        let ncols = self.names.len();
        for (lnl, row) in self.lnlikely.iter().zip(self.draws.chunks_exact(ncols)) {
            write!(out, "{lnl:.17e}")?;
            for v in row {
                write!(out, " {v:.17e}")?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Read a chain written by [`Chain::save`]. Files that do not start
    /// with the `# lnlikely` marker are rejected.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let mut lines = BufReader::new(File::open(path)?).lines();
        let header = lines.next().ok_or(ChainError::NotAChainFile)??;
        let mut fields = header.split_whitespace();
        if (fields.next(), fields.next()) != (Some("#"), Some("lnlikely")) {
            return Err(ChainError::NotAChainFile);
        }
        let names: Vec<String> = fields.map(|s| s.to_string()).collect();

        let mut chain = Chain {
            names,
            lnlikely: Vec::new(),
            draws: Vec::new(),
        };
        let ncols = chain.names.len();
        for (lineno, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let values: Vec<f64> = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|e| ChainError::MalformedRow {
                        row: lineno,
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
            if values.len() != ncols + 1 {
                return Err(ChainError::MalformedRow {
                    row: lineno,
                    reason: format!("expected {} fields, found {}", ncols + 1, values.len()),
                });
            }
            chain.lnlikely.push(values[0]);
            chain.draws.extend_from_slice(&values[1..]);
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelFamily;
    use pretty_assertions::assert_eq;

    fn params(shift: f64, scale: f64) -> Params {
        Params {
            shift,
            scale,
            width: 1.2,
            h3: 0.0,
            h4: 0.0,
        }
    }

    #[test]
    fn schema_is_fixed_by_first_append() {
        let mut chain = Chain::new();
        chain
            .append(10.0, KernelFamily::Gauss, &params(0.1, 1.0))
            .unwrap();
        assert_eq!(chain.names(), &["shift", "scale", "width"]);
        assert_eq!(chain.index("width"), Some(2));

        let err = chain
            .append(9.0, KernelFamily::Delta, &params(0.1, 1.0))
            .unwrap_err();
        assert!(matches!(err, ChainError::SchemaMismatch { .. }));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn best_row_has_minimum_lnlikely() {
        let mut chain = Chain::new();
        for (chi2, shift) in [(12.0, 0.5), (4.0, 1.9), (8.0, 1.2)] {
            chain
                .append(chi2, KernelFamily::Delta, &params(shift, 1.0))
                .unwrap();
        }
        let (chi2, row) = chain.best().unwrap();
        assert_eq!(chi2, 4.0);
        assert_eq!(row, &[1.9, 1.0]);
    }

    #[test]
    fn burn_discards_leading_rows() {
        let mut chain = Chain::new();
        for i in 0..10 {
            chain
                .append(i as f64, KernelFamily::Delta, &params(i as f64, 1.0))
                .unwrap();
        }
        chain.burn(0.5);
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.row(0).0, 5.0);
        assert_eq!(chain.column("shift").unwrap(), vec![5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn save_read_round_trip_is_exact() {
        let mut chain = Chain::new();
        for i in 0..20 {
            let p = params(0.05 * i as f64 - 1.0, 1.0 + 0.01 * i as f64);
            chain
                .append(100.0 / (1.0 + i as f64), KernelFamily::Hermite, &p)
                .unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.chain");
        chain.save(&path).unwrap();
        let back = Chain::read(&path).unwrap();
        assert_eq!(back, chain);
    }

    #[test]
    fn read_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_chain.txt");
        std::fs::write(&path, "# wavelength flux\n1.0 2.0\n").unwrap();
        assert!(matches!(Chain::read(&path), Err(ChainError::NotAChainFile)));
    }

    #[test]
    fn percentiles_summarize_the_marginal() {
        let mut chain = Chain::new();
        for i in 0..100 {
            chain
                .append(1.0, KernelFamily::Delta, &params(i as f64, 1.0))
                .unwrap();
        }
        let q = chain.percentiles("shift", 0.0, &[50.0]).unwrap();
        assert!((q[0] - 49.5).abs() < 1e-9);
    }
}
