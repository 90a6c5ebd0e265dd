// Online insert-size discovery.
//
// When discovery is requested the run is single-threaded and early batches
// feed mate-separation samples into a shared estimator. Once enough samples
// accumulate the estimator computes robust bounds (median with IQR outlier
// rejection) that retune the pairing window of later batches.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

// IQR multiplier for outlier rejection
const OUTLIER_BOUND: f64 = 2.0;
// IQR multiplier for the learned fuzz window
const FUZZ_BOUND: f64 = 3.0;

pub struct InsertSizeEstimator {
    samples: Vec<u32>,
    target: usize,
    learned: Option<(u32, u32)>,
    hist_fname: Option<PathBuf>,
}

impl InsertSizeEstimator {
    pub fn new(target: usize, hist_fname: Option<PathBuf>) -> Self {
        Self {
            samples: Vec::new(),
            target,
            learned: None,
            hist_fname,
        }
    }

    /// Record the separation of one uniquely-placed concordant pair.
    pub fn record(&mut self, dist: u32) {
        if self.learned.is_none() && dist > 0 {
            self.samples.push(dist);
        }
    }

    /// True once enough samples accumulated (or the estimate is final).
    pub fn ready(&self) -> bool {
        self.learned.is_some() || self.samples.len() >= self.target
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Learned `(distance, fuzz)` bounds, if finalized.
    pub fn bounds(&self) -> Option<(u32, u32)> {
        self.learned
    }

    /// Compute the estimate from the collected samples and write the
    /// histogram if one was requested. Needs at least a handful of samples;
    /// returns the learned bounds.
    pub fn finalize(&mut self) -> io::Result<Option<(u32, u32)>> {
        if self.learned.is_some() {
            return Ok(self.learned);
        }
        if self.samples.len() < 8 {
            log::warn!(
                "insert size discovery: only {} samples, keeping configured bounds",
                self.samples.len()
            );
            return Ok(None);
        }

        self.samples.sort_unstable();
        let pct = |f: f64| -> u32 {
            let idx = (f * self.samples.len() as f64 + 0.499) as usize;
            self.samples[idx.min(self.samples.len() - 1)]
        };
        let p25 = pct(0.25);
        let p50 = pct(0.50);
        let p75 = pct(0.75);
        let iqr = (p75 - p25) as f64;

        let lo = (p25 as f64 - OUTLIER_BOUND * iqr).max(1.0) as u32;
        let hi = (p75 as f64 + OUTLIER_BOUND * iqr) as u32;
        let kept: Vec<u32> = self
            .samples
            .iter()
            .copied()
            .filter(|&d| d >= lo && d <= hi)
            .collect();

        let distance = p50;
        let fuzz = ((FUZZ_BOUND * iqr) as u32).clamp(1, distance);
        self.learned = Some((distance, fuzz));

        log::info!(
            "insert size discovery: {} samples ({} kept), median {}, fuzz {}",
            self.samples.len(),
            kept.len(),
            distance,
            fuzz
        );

        if let Some(path) = &self.hist_fname {
            let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
            for &d in &kept {
                *counts.entry(d).or_insert(0) += 1;
            }
            let mut w = BufWriter::new(File::create(path)?);
            for (d, c) in counts {
                writeln!(w, "{}\t{}", d, c)?;
            }
            w.flush()?;
            log::info!("insert size histogram written to {}", path.display());
        }

        Ok(self.learned)
    }
}
