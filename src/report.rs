/**
 * Turns the per-request results into the summary printed at the end of a run
 */
use std::{collections::BTreeMap, fmt};

use crate::{measure::AmplificationResult, stun::error_code::ERROR_CODE_UNAUTHORIZED};

/// Printed instead of a summary when no request was answered
pub(crate) const NOTHING_TO_ANALYZE: &str = "No successful results to analyze.";

/**
 * Averages over the successful exchanges of a run
 */
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Summary {
    pub attempted: u32,
    pub successful: usize,
    pub avg_request_size: f64,
    pub avg_response_size: f64,
    pub avg_amplification: f64,
    pub max_amplification: f64,
    pub with_nonce: usize,
    /// averaged over the responses that had a NONCE
    pub avg_nonce_size: f64,
    pub response_types: BTreeMap<String, usize>,
    /// answers that were not the expected 401 challenge
    pub not_unauthorized: usize,
    pub fingerprint_mismatches: usize,
}

impl Summary {
    /**
     * Aggregate a run.
     *
     * @param results The successful exchanges
     * @param attempted How many requests were sent
     * @return None when `results` is empty, there is nothing to average
     */
    pub fn from_results(results: &[AmplificationResult], attempted: u32) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let n = results.len() as f64;

        let mut response_types = BTreeMap::new();
        for r in results {
            *response_types.entry(r.response_type.clone()).or_insert(0) += 1;
        }

        let nonces: Vec<usize> = results
            .iter()
            .filter(|r| r.has_nonce)
            .map(|r| r.nonce_size)
            .collect();
        let avg_nonce_size = if nonces.is_empty() {
            0.0
        } else {
            nonces.iter().sum::<usize>() as f64 / nonces.len() as f64
        };

        Some(Summary {
            attempted,
            successful: results.len(),
            avg_request_size: results.iter().map(|r| r.request_size).sum::<usize>() as f64 / n,
            avg_response_size: results.iter().map(|r| r.response_size).sum::<usize>() as f64 / n,
            avg_amplification: results.iter().map(|r| r.amplification_factor).sum::<f64>() / n,
            max_amplification: results
                .iter()
                .map(|r| r.amplification_factor)
                .fold(0.0, f64::max),
            with_nonce: nonces.len(),
            avg_nonce_size,
            response_types,
            not_unauthorized: results
                .iter()
                .filter(|r| r.error_code != Some(ERROR_CODE_UNAUTHORIZED))
                .count(),
            fingerprint_mismatches: results
                .iter()
                .filter(|r| r.fingerprint_valid == Some(false))
                .count(),
        })
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Results Summary")?;
        writeln!(f, "===============")?;
        writeln!(
            f,
            "Successful requests: {} of {}",
            self.successful, self.attempted
        )?;
        writeln!(f)?;

        writeln!(f, "Response Types:")?;
        writeln!(f, "===============")?;
        for (response_type, count) in &self.response_types {
            writeln!(f, "{:<25} {}", format!("{}:", response_type), count)?;
        }
        writeln!(f)?;

        writeln!(f, "Overall Statistics:")?;
        writeln!(f, "===================")?;
        writeln!(f, "Average Request Size:     {:.1} bytes", self.avg_request_size)?;
        writeln!(f, "Average Response Size:    {:.1} bytes", self.avg_response_size)?;
        writeln!(f, "Overall Amplification:    {:.2}x", self.avg_amplification)?;
        writeln!(f, "Maximum Amplification:    {:.2}x", self.max_amplification)?;
        if self.with_nonce > 0 {
            writeln!(
                f,
                "Responses with NONCE:     {} (average {:.1} bytes)",
                self.with_nonce, self.avg_nonce_size
            )?;
        } else {
            writeln!(f, "Responses with NONCE:     0")?;
        }
        writeln!(f, "Responses other than 401: {}", self.not_unauthorized)?;
        writeln!(f, "FINGERPRINT mismatches:   {}", self.fingerprint_mismatches)?;
        Ok(())
    }
}

/**
 * The text printed at the end of a run
 */
pub(crate) fn render(results: &[AmplificationResult], attempted: u32) -> String {
    match Summary::from_results(results, attempted) {
        Some(summary) => summary.to_string(),
        None => format!("{}\n", NOTHING_TO_ANALYZE),
    }
}
