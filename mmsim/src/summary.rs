use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use itertools::Itertools;
use serde::Serialize;

/// Per-replication summary statistics of the station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicationRow {
    /// Zero-based replication index.
    pub replication: usize,
    /// Customers that completed service.
    pub served: usize,
    /// Mean time spent waiting for a server, in seconds.
    pub mean_wait: f64,
    /// Median time spent waiting for a server, in seconds.
    pub median_wait: f64,
    /// Mean time from arrival to departure, in seconds.
    pub mean_flow: f64,
    /// Fraction of server capacity in use over the observed period.
    pub utilization: f64,
}

/// Collects one [`ReplicationRow`] per replication.
#[derive(Debug, Default)]
pub struct SummaryLog {
    rows: Vec<ReplicationRow>,
}

/// A summary log shared between the station and the application.
pub type SharedSummary = Rc<RefCell<SummaryLog>>;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted: Vec<f64> = values
        .iter()
        .copied()
        .sorted_by(|a, b| a.partial_cmp(b).expect("observations are finite"))
        .collect();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

impl SummaryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty log behind a shared handle.
    #[must_use]
    pub fn shared() -> SharedSummary {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Appends a replication's observations as a summary row.
    pub fn push_replication(&mut self, waits: &[f64], flows: &[f64], utilization: f64) {
        let row = ReplicationRow {
            replication: self.rows.len(),
            served: flows.len(),
            mean_wait: mean(waits),
            median_wait: median(waits),
            mean_flow: mean(flows),
            utilization,
        };
        self.rows.push(row);
    }

    /// The rows collected so far.
    #[must_use]
    pub fn rows(&self) -> &[ReplicationRow] {
        &self.rows
    }

    /// Mean of the per-replication mean waits.
    #[must_use]
    pub fn grand_mean_wait(&self) -> f64 {
        mean(&self.rows.iter().map(|r| r.mean_wait).collect::<Vec<_>>())
    }

    /// Writes all rows as CSV, headers included.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying writer fails.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> eyre::Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_row_statistics() {
        let mut log = SummaryLog::new();
        log.push_replication(&[1.0, 3.0, 2.0], &[4.0, 6.0], 0.5);
        let row = &log.rows()[0];
        assert_eq!(row.replication, 0);
        assert_eq!(row.served, 2);
        assert!(approx_eq!(f64, row.mean_wait, 2.0, ulps = 2));
        assert!(approx_eq!(f64, row.median_wait, 2.0, ulps = 2));
        assert!(approx_eq!(f64, row.mean_flow, 5.0, ulps = 2));
    }

    #[test]
    fn test_median_of_even_count_averages_the_middle_pair() {
        let mut log = SummaryLog::new();
        log.push_replication(&[4.0, 1.0, 3.0, 2.0], &[], 0.0);
        assert!(approx_eq!(f64, log.rows()[0].median_wait, 2.5, ulps = 2));
    }

    #[test]
    fn test_empty_observations_produce_zero_row() {
        let mut log = SummaryLog::new();
        log.push_replication(&[], &[], 0.0);
        let row = &log.rows()[0];
        assert_eq!(row.served, 0);
        assert_eq!(row.mean_wait, 0.0);
    }

    #[test]
    fn test_csv_output_has_headers_and_rows() {
        let mut log = SummaryLog::new();
        log.push_replication(&[1.0], &[2.0], 0.25);
        let mut buffer = Vec::new();
        log.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("replication,served,mean_wait"));
        assert_eq!(text.lines().count(), 2);
    }
}
