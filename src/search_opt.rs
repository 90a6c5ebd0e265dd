//! Run configuration for the search driver.
//!
//! One field per command-line flag; the driver validates the whole
//! structure before any work starts.

use std::path::PathBuf;
use std::str::FromStr;

/// How hits are ranked and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Report minimum-error hits only.
    Default,
    /// Rank paired combinations by the sum of the mates' error counts.
    SumErr,
    /// Fall back to the best prefix alignment when no full-length hit
    /// exists.
    Partial,
    /// Report every hit within the error budget.
    BoundErr,
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(SearchMode::Default),
            "sum-err" => Ok(SearchMode::SumErr),
            "partial" => Ok(SearchMode::Partial),
            "bound-err" => Ok(SearchMode::BoundErr),
            other => Err(format!("unknown search mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOpt {
    /// Input read files: one for unpaired, two for paired.
    pub input: Vec<PathBuf>,
    /// Final alignment output; `None` writes to stdout.
    pub output: Option<PathBuf>,
    /// Base path of the pre-built index.
    pub index_basename: PathBuf,
    /// Directory for per-batch temporary files.
    pub tmpdir: PathBuf,
    /// Memory cap in megabytes.
    pub mem_limit: usize,
    /// Batch size limit in reads (input columns).
    pub batch_limit: usize,
    /// First batch to execute, 1-based.
    pub start_batch: u32,
    /// Last batch to execute, 1-based, inclusive.
    pub end_batch: u32,
    /// Count only exactly-full batches toward the batch number.
    pub strict_batch: bool,
    /// Worker budget; 1 selects the single-threaded path.
    pub n_threads: usize,
    /// Per-read error budget (substitutions and indels).
    pub n_err: u32,
    /// Longest accepted query.
    pub max_qlen: usize,
    pub force_paired: bool,
    pub force_unpaired: bool,
    /// Expected mate separation.
    pub pair_distance: u32,
    /// Tolerated deviation from `pair_distance`.
    pub pair_fuzz: u32,
    /// Result-configuration string or alias.
    pub resconf_str: String,
    pub search_mode: SearchMode,
    /// Subject-area window start, 1-based; negative requests reverse-strand
    /// scanning.
    pub sa_start: i64,
    /// Subject-area window end.
    pub sa_end: i64,
    /// Break over-limit hit ties randomly (seeded).
    pub randomize: bool,
    pub random_seed: u64,
    /// Suppress unmapped records in the output.
    pub skip_unmapped: bool,
    /// Keep query names from the input instead of ordinal ids.
    pub use_qids: bool,
    /// Report subject names from the id map instead of ordinals.
    pub use_sids: bool,
    /// Skip seeds occurring more often than this.
    pub repeat_threshold: u32,
    /// Most results reported per read.
    pub res_limit: u32,
    /// Learn the mate separation online (forces one worker).
    pub discover_sep: bool,
    /// Stop the run once the separation estimate is final.
    pub discover_sep_stop: bool,
    /// Optional insert-size histogram output.
    pub hist_fname: Option<PathBuf>,
    /// Emit optional SAM tags (NM).
    pub extra_tags: bool,
    /// Command line recorded in the output header.
    pub cmdline: String,
}

impl Default for SearchOpt {
    fn default() -> Self {
        SearchOpt {
            input: Vec::new(),
            output: None,
            index_basename: PathBuf::new(),
            tmpdir: std::env::temp_dir(),
            mem_limit: 2048,
            batch_limit: 10_000_000,
            start_batch: 1,
            end_batch: u32::MAX,
            strict_batch: false,
            n_threads: 1,
            n_err: 2,
            max_qlen: 512,
            force_paired: false,
            force_unpaired: false,
            pair_distance: 500,
            pair_fuzz: 100,
            resconf_str: "1111".to_string(),
            search_mode: SearchMode::Default,
            sa_start: 1,
            sa_end: i64::MAX,
            randomize: false,
            random_seed: 0,
            skip_unmapped: false,
            use_qids: false,
            use_sids: false,
            repeat_threshold: 4096,
            res_limit: 10,
            discover_sep: false,
            discover_sep_stop: false,
            hist_fname: None,
            extra_tags: false,
            cmdline: String::new(),
        }
    }
}
