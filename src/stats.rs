//! Run-wide search statistics.
//!
//! One aggregator is shared by the driver and every batch; batches bump
//! counters concurrently, so all updates are relaxed atomic increments.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SearchStats {
    /// Input read columns consumed.
    pub n_reads: AtomicU64,
    /// Reads with at least one reported alignment.
    pub n_aligned: AtomicU64,
    /// Pairs reported as properly paired.
    pub n_pairs: AtomicU64,
    /// Seed candidates examined by the kernel.
    pub n_candidates: AtomicU64,
    /// Seeds skipped for exceeding the repeat threshold.
    pub n_filtered: AtomicU64,
    /// Alignment records emitted.
    pub n_results: AtomicU64,
}

impl SearchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Log the final counter values.
    pub fn report(&self) {
        log::info!("reads:          {}", Self::get(&self.n_reads));
        log::info!("aligned reads:  {}", Self::get(&self.n_aligned));
        log::info!("paired reads:   {}", Self::get(&self.n_pairs));
        log::info!("candidates:     {}", Self::get(&self.n_candidates));
        log::info!("filtered seeds: {}", Self::get(&self.n_filtered));
        log::info!("results:        {}", Self::get(&self.n_results));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = SearchStats::new();
        assert_eq!(SearchStats::get(&stats.n_reads), 0);
        assert_eq!(SearchStats::get(&stats.n_results), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(SearchStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        SearchStats::add(&s.n_candidates, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(SearchStats::get(&stats.n_candidates), 4000);
    }
}
