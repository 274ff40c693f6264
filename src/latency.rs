//! Latency summaries of `id -> [start, end]` timestamp logs.

use std::collections::BTreeMap;

/// Errors encountered while analyzing a latency log.
#[derive(Debug, thiserror::Error)]
pub enum LatencyError {
    /// The log isn't a JSON object of `[start, end]` pairs.
    #[error("malformed latency log: {0}")]
    Json(#[from] serde_json::Error),
    /// The log has no entries.
    #[error("latency log has no entries")]
    Empty,
}

/// Summary of the latencies in a log, in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencyReport {
    /// Number of entries.
    pub count: usize,
    /// Smallest latency.
    pub min: f64,
    /// Upper median: the element at index `count / 2` once sorted.
    pub median: f64,
    /// Largest latency.
    pub max: f64,
}

impl LatencyReport {
    /// Analyzes a JSON object mapping ids to `[start, end]` timestamps.
    ///
    /// ```
    /// use resolver_testbed::latency::LatencyReport;
    /// let report = LatencyReport::from_json(r#"{"a": [0, 10], "b": [5, 35], "c": [1, 21]}"#)?;
    /// assert_eq!(report.median, 20.0);
    /// # Ok::<(), resolver_testbed::latency::LatencyError>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self, LatencyError> {
        let log: BTreeMap<String, (f64, f64)> = serde_json::from_str(json)?;
        let mut diffs: Vec<f64> = log.values().map(|(start, end)| end - start).collect();
        diffs.sort_by(f64::total_cmp);

        let (Some(&min), Some(&max)) = (diffs.first(), diffs.last()) else {
            return Err(LatencyError::Empty);
        };
        let report = Self {
            count: diffs.len(),
            min,
            median: diffs[diffs.len() / 2],
            max,
        };
        #[cfg(feature = "log")]
        tracing::debug!(count = report.count, median = report.median, "analyzed latencies");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_count_is_upper() {
        let report =
            LatencyReport::from_json(r#"{"1": [0, 4], "2": [0, 1], "3": [0, 3], "4": [0, 2]}"#)
                .unwrap();
        assert_eq!(
            report,
            LatencyReport {
                count: 4,
                min: 1.0,
                median: 3.0,
                max: 4.0,
            }
        );
    }

    #[test]
    fn rejects_empty_and_malformed_logs() {
        assert!(matches!(LatencyReport::from_json("{}"), Err(LatencyError::Empty)));
        assert!(matches!(
            LatencyReport::from_json(r#"{"1": [0]}"#),
            Err(LatencyError::Json(_))
        ));
        assert!(LatencyReport::from_json("[]").is_err());
    }
}
