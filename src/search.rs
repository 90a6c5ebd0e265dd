// The batched search driver.
//
// Run() partitions the input read stream into batches, executes them under
// a bounded worker budget and appends every batch's output file to the
// final output in strict batch order, whatever order the workers finish
// in. A worker count of 1 selects a distinct inline path: insert-size
// discovery is stateful across batches and must not race, and the inline
// path reuses two pre-allocated scratch buffers.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::batch::{Batch, BatchInitData};
use crate::defaults::{
    DISCOVER_TARGET, MAX_N_ERR, MAX_PAIR_FUZZ, MAX_QLEN, MAX_RES_LIMIT, MEGABYTE, MIN_QLEN,
    MIN_RES_LIMIT, TMP_RES_BUF_SIZE,
};
use crate::align::KernelCfg;
use crate::index::SeqStore;
use crate::insert_size::InsertSizeEstimator;
use crate::io::sam_output::{OutSam, SamCollator};
use crate::io::seq_input::SeqInput;
use crate::mem_arena::{AllocError, MemArena};
use crate::resconf::{any_admissible, parse_resconf, swap_resconf};
use crate::search_opt::SearchOpt;
use crate::sid_map::SidMap;
use crate::stats::SearchStats;
use crate::tmp_store::TmpStore;
use crate::utils::{cputime, realtime};

const OUT_FNAME_PFX: &str = "outsam-";
// coarse admission poll while every worker slot is busy
const POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SearchError {
    /// Bad configuration value; raised before any work.
    Validate(String),
    /// Mismatched pairing, missing columns, malformed input.
    Input(String),
    /// The memory arena refused an allocation.
    ResourceExhausted { requested: usize, free: usize },
    /// A batch failed inside a worker.
    Worker(String),
    Io(io::Error),
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Validate(msg) => write!(f, "invalid configuration: {}", msg),
            SearchError::Input(msg) => write!(f, "input error: {}", msg),
            SearchError::ResourceExhausted { requested, free } => write!(
                f,
                "memory limit exceeded: requested {} bytes, {} bytes free",
                requested, free
            ),
            SearchError::Worker(msg) => write!(f, "worker failed: {}", msg),
            SearchError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for SearchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SearchError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SearchError {
    fn from(err: io::Error) -> Self {
        SearchError::Io(err)
    }
}

impl From<AllocError> for SearchError {
    fn from(err: AllocError) -> Self {
        SearchError::ResourceExhausted {
            requested: err.requested,
            free: err.free,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct ThreadSlot {
    /// Single-writer (worker) single-reader (driver) completion flag.
    done: Arc<AtomicBool>,
    handle: JoinHandle<Result<bool, SearchError>>,
}

pub struct Search {
    input_paths: Vec<PathBuf>,
    n_threads: usize,
    /// In input columns; doubled under force-paired.
    batch_limit: usize,
    /// 0-based, inclusive.
    start_batch: u32,
    end_batch: u32,
    strict_batch: bool,
    force_paired: bool,
    force_unpaired: bool,
    arena: Arc<MemArena>,
    stats: Arc<SearchStats>,
    tmp_store: TmpStore,
    collator: SamCollator,
    init: BatchInitData,
}

impl Search {
    /// Validate the configuration and set up every shared resource; no
    /// input is consumed yet.
    pub fn new(opt: &SearchOpt) -> Result<Self, SearchError> {
        Self::validate(opt)?;

        let stats = Arc::new(SearchStats::new());
        let arena = Arc::new(MemArena::new(opt.mem_limit * MEGABYTE));

        // reverse-strand subject scanning re-maps the orientation policy
        let resconf_str = if opt.sa_start < 0 {
            swap_resconf(&opt.resconf_str)
        } else {
            opt.resconf_str.clone()
        };
        let ipam_vec = parse_resconf(&resconf_str);
        if !any_admissible(&ipam_vec) {
            return Err(SearchError::Validate("wrong strand configuration".to_string()));
        }

        let mut batch_limit = opt.batch_limit;
        if opt.force_paired {
            batch_limit *= 2;
        }

        let mut n_threads = opt.n_threads.max(1);
        if opt.discover_sep && n_threads != 1 {
            log::warn!("insert size discovery forces single-threaded execution");
            n_threads = 1;
        }

        // scratch buffers are pre-allocated only on the inline path;
        // workers allocate their own per batch
        let (u_tmp_res_buf, p_tmp_res_buf) = if n_threads == 1 {
            (
                Some(Arc::new(Mutex::new(MemArena::alloc(&arena, TMP_RES_BUF_SIZE)?))),
                Some(Arc::new(Mutex::new(MemArena::alloc(&arena, TMP_RES_BUF_SIZE)?))),
            )
        } else {
            (None, None)
        };

        let store = Arc::new(SeqStore::load(&opt.index_basename, &arena)?);
        let sidmap = if opt.use_sids {
            Some(Arc::new(SidMap::load(&opt.index_basename, &arena)?))
        } else {
            None
        };

        let tmp_store = TmpStore::new(&opt.tmpdir)?;
        let collator = SamCollator::create(
            opt.output.as_deref(),
            &opt.cmdline,
            &store,
            sidmap.as_deref(),
        )?;

        let separation = if opt.discover_sep {
            Some(Arc::new(Mutex::new(InsertSizeEstimator::new(
                DISCOVER_TARGET,
                opt.hist_fname.clone(),
            ))))
        } else {
            None
        };

        let (a, b) = (opt.sa_start.unsigned_abs(), opt.sa_end.unsigned_abs());
        let kernel = KernelCfg {
            n_err: opt.n_err,
            res_limit: opt.res_limit,
            repeat_threshold: opt.repeat_threshold,
            mode: opt.search_mode,
            sa_lo: a.min(b).saturating_sub(1),
            sa_hi: a.max(b),
            randomize: opt.randomize,
            random_seed: opt.random_seed,
        };

        let init = BatchInitData {
            ipam_vec,
            resconf_str,
            arena: Arc::clone(&arena),
            store,
            sidmap,
            stats: Arc::clone(&stats),
            paired: false,
            n_threads,
            max_qlen: opt.max_qlen,
            kernel,
            pair_distance: opt.pair_distance,
            pair_fuzz: opt.pair_fuzz,
            search_mode: opt.search_mode,
            skip_unmapped: opt.skip_unmapped,
            use_qids: opt.use_qids,
            extra_tags: opt.extra_tags,
            discover_sep_stop: opt.discover_sep_stop,
            separation,
            u_tmp_res_buf,
            p_tmp_res_buf,
        };

        Ok(Self {
            input_paths: opt.input.clone(),
            n_threads,
            batch_limit,
            start_batch: opt.start_batch - 1,
            end_batch: opt.end_batch - 1,
            strict_batch: opt.strict_batch,
            force_paired: opt.force_paired,
            force_unpaired: opt.force_unpaired,
            arena,
            stats,
            tmp_store,
            collator,
            init,
        })
    }

    fn validate(opt: &SearchOpt) -> Result<(), SearchError> {
        let fail = |msg: String| Err(SearchError::Validate(msg));

        if opt.mem_limit < 1 {
            return fail(format!(
                "the value of memory limit must be positive (given {})",
                opt.mem_limit
            ));
        }
        if opt.batch_limit < 1 {
            return fail(format!(
                "the value of batch size limit must be positive (given {})",
                opt.batch_limit
            ));
        }
        if opt.start_batch < 1 {
            return fail(format!(
                "the value of start batch must be positive (given {})",
                opt.start_batch
            ));
        }
        if opt.end_batch < opt.start_batch {
            return fail(format!(
                "the value of end batch must be greater or equal to start batch \
                 (given start batch {}, end batch {})",
                opt.start_batch, opt.end_batch
            ));
        }
        if opt.res_limit < MIN_RES_LIMIT || opt.res_limit > MAX_RES_LIMIT {
            return fail(format!(
                "invalid value of max number of results reported: {}; \
                 value must be between {} and {}",
                opt.res_limit, MIN_RES_LIMIT, MAX_RES_LIMIT
            ));
        }
        if opt.pair_distance == 0 {
            return fail(format!(
                "the value of pair distance must be positive (given {})",
                opt.pair_distance
            ));
        }
        if opt.pair_distance < opt.pair_fuzz {
            return fail(format!(
                "the value of pair distance fuzz (given {}) must be at most \
                 the value of pair distance (given {})",
                opt.pair_fuzz, opt.pair_distance
            ));
        }
        if opt.pair_fuzz > MAX_PAIR_FUZZ {
            return fail(format!(
                "the value of pair distance fuzz (given {}) must be at most {}",
                opt.pair_fuzz, MAX_PAIR_FUZZ
            ));
        }
        if opt.max_qlen < MIN_QLEN {
            return fail(format!(
                "the value of max query length (given {}) must be at least {}",
                opt.max_qlen, MIN_QLEN
            ));
        }
        if opt.max_qlen > MAX_QLEN {
            return fail(format!(
                "the value of max query length (given {}) must be at most {}",
                opt.max_qlen, MAX_QLEN
            ));
        }
        if opt.n_err > MAX_N_ERR {
            return fail(format!(
                "invalid requested number of errors {}; the value must be at most {}",
                opt.n_err, MAX_N_ERR
            ));
        }
        if opt.force_paired && opt.force_unpaired {
            return fail("both forced paired and unpaired search requested".to_string());
        }
        if opt.sa_start == 0 {
            return fail("sa-start value can not have value 0".to_string());
        }
        if opt.sa_start > 0 && opt.sa_end < opt.sa_start {
            return fail(format!(
                "sa-start value must be less or equal to sa-end value; \
                 given sa-start: {}; given sa-end: {}",
                opt.sa_start, opt.sa_end
            ));
        }
        if opt.sa_start < 0 && opt.sa_end > opt.sa_start {
            return fail(format!(
                "sa-start value must be greater or equal to sa-end value; \
                 given sa-start: {}; given sa-end: {}",
                opt.sa_start, opt.sa_end
            ));
        }
        Ok(())
    }

    fn make_batch_output(&mut self, batch_oid: u32) -> Result<OutSam, SearchError> {
        let path = self
            .tmp_store
            .register(&format!("{}{}", OUT_FNAME_PFX, batch_oid));
        Ok(OutSam::create(
            &path,
            Arc::clone(&self.init.store),
            self.init.sidmap.clone(),
            self.init.skip_unmapped,
            self.init.use_qids,
            self.init.extra_tags,
        )?)
    }

    fn append_batch(&mut self, batch_oid: u32) -> Result<(), SearchError> {
        let path = self
            .tmp_store
            .register(&format!("{}{}", OUT_FNAME_PFX, batch_oid));
        self.collator.append(&path)?;
        Ok(())
    }

    /// Join every slot whose worker signalled completion. The first
    /// failure is kept; later ones are logged.
    fn reap(threads: &mut BTreeMap<u32, ThreadSlot>, first_err: &mut Option<SearchError>) {
        let ready: Vec<u32> = threads
            .iter()
            .filter(|(_, slot)| slot.done.load(Ordering::Acquire))
            .map(|(&oid, _)| oid)
            .collect();
        for oid in ready {
            if let Some(slot) = threads.remove(&oid) {
                Self::join_slot(oid, slot, first_err);
            }
        }
    }

    fn join_slot(oid: u32, slot: ThreadSlot, first_err: &mut Option<SearchError>) {
        match slot.handle.join() {
            Ok(Ok(_cont)) => {}
            Ok(Err(e)) => {
                log::error!("batch {} failed: {}", oid, e);
                if first_err.is_none() {
                    *first_err = Some(e);
                }
            }
            Err(_) => {
                log::error!("batch {} worker panicked", oid);
                if first_err.is_none() {
                    *first_err = Some(SearchError::Worker(format!(
                        "batch {} worker panicked",
                        oid
                    )));
                }
            }
        }
    }

    /// Consume the input to completion (or to the end batch), write the
    /// final ordered output and report statistics.
    pub fn run(&mut self) -> Result<(), SearchError> {
        let t_wall = realtime();
        let t_cpu = cputime();

        let request_cols = match (self.force_unpaired, self.force_paired) {
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => {
                return Err(SearchError::Input(
                    "neither paired nor unpaired search is requested".to_string(),
                ));
            }
            (true, true) => unreachable!("rejected by validation"),
        };

        let mut input = SeqInput::open(&self.input_paths)?;
        if self.force_paired && input.ncols() != 2 {
            return Err(SearchError::Input(
                "paired search is requested but input is not paired".to_string(),
            ));
        }
        if self.force_unpaired && input.ncols() != 1 {
            return Err(SearchError::Input(
                "unpaired search is requested but input is not unpaired".to_string(),
            ));
        }
        debug_assert_eq!(input.ncols(), request_cols);

        self.init.paired = input.ncols() == 2;
        let init = Arc::new(self.init.clone());

        let mut start_qid: u64 = 0;
        let mut batch_start_qid: u64 = 0;
        let mut batch_num: u32 = 0;
        let mut batch_oid: u32 = 0;
        let mut batch_out: u32 = 0;
        let mut threads: BTreeMap<u32, ThreadSlot> = BTreeMap::new();
        let mut first_err: Option<SearchError> = None;

        'main: while !input.done() && batch_num <= self.end_batch {
            let limit = self.batch_limit - (start_qid - batch_start_qid) as usize;
            // any failure from here on still joins outstanding workers
            let mut batch =
                match Batch::from_input(Arc::clone(&init), &mut input, start_qid, batch_oid, limit)
                {
                    Ok(batch) => batch,
                    Err(e) => {
                        first_err = Some(e);
                        break 'main;
                    }
                };
            let end_qid = batch.end_qid();
            match self.make_batch_output(batch_oid) {
                Ok(out) => batch.set_output(out),
                Err(e) => {
                    first_err = Some(e);
                    break 'main;
                }
            }

            if batch_num >= self.start_batch && batch_num <= self.end_batch {
                if self.n_threads == 1 {
                    // cont can be false only during insert-size discovery,
                    // which forces this path; no workers exist to join here
                    let cont = if init.paired {
                        batch.run_paired()?
                    } else {
                        batch.run_unpaired()?
                    };
                    self.append_batch(batch_oid)?;
                    batch_out = batch_oid + 1;
                    if !cont {
                        break 'main;
                    }
                } else {
                    // poll until a worker slot is free
                    loop {
                        Self::reap(&mut threads, &mut first_err);
                        if first_err.is_some() {
                            break 'main;
                        }
                        if threads.len() < self.n_threads {
                            break;
                        }
                        thread::sleep(POLL_INTERVAL);
                    }

                    let done = Arc::new(AtomicBool::new(false));
                    let done_w = Arc::clone(&done);
                    let paired = init.paired;
                    let spawned = thread::Builder::new()
                        .name(format!("batch-{}", batch_oid))
                        .spawn(move || {
                            let res = if paired {
                                batch.run_paired()
                            } else {
                                batch.run_unpaired()
                            };
                            done_w.store(true, Ordering::Release);
                            res
                        });
                    match spawned {
                        Ok(handle) => {
                            threads.insert(batch_oid, ThreadSlot { done, handle });
                        }
                        Err(e) => {
                            first_err = Some(SearchError::Io(e));
                            break 'main;
                        }
                    }

                    // report whatever output is already safe to report
                    while batch_out < batch_oid && !threads.contains_key(&batch_out) {
                        if let Err(e) = self.append_batch(batch_out) {
                            first_err = Some(e);
                            break 'main;
                        }
                        batch_out += 1;
                    }
                }
            } else {
                log::info!("skipping batch {}", batch_num + 1);
                if self.n_threads == 1 {
                    batch_out = batch_oid + 1;
                }
            }

            batch_oid += 1;
            start_qid = end_qid;

            if !self.strict_batch || start_qid - batch_start_qid == self.batch_limit as u64 {
                batch_start_qid = start_qid;
                batch_num += 1;
            }
        }

        // drain: join in ascending oid order, appending as soon as every
        // earlier ordinal is out of the slot map
        while let Some((oid, slot)) = threads.pop_first() {
            Self::join_slot(oid, slot, &mut first_err);
            if first_err.is_none() {
                while batch_out < batch_oid && !threads.contains_key(&batch_out) {
                    if let Err(e) = self.append_batch(batch_out) {
                        first_err = Some(e);
                        break;
                    }
                    batch_out += 1;
                }
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        // report the rest of the output
        while batch_out < batch_oid {
            self.append_batch(batch_out)?;
            batch_out += 1;
        }
        self.collator.finish()?;

        self.stats.report();
        log::info!(
            "peak arena use {:.1} MB of {:.1} MB",
            self.arena.used() as f64 / MEGABYTE as f64,
            self.arena.cap() as f64 / MEGABYTE as f64
        );
        log::info!(
            "search finished in {:.2}s wall, {:.2}s cpu",
            realtime() - t_wall,
            cputime() - t_cpu
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index;
    use crate::search_opt::SearchMode;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn base_opt(dir: &Path) -> SearchOpt {
        let fa = dir.join("ref.fa");
        fs::write(&fa, ">s1\nGATTACAGATTACAGGCGCTTAACGTTCGATCGATTTACGCTAGCATG\n").unwrap();
        let base = dir.join("ref");
        build_index(&fa, &base).unwrap();

        let reads = dir.join("r.fq");
        fs::write(&reads, "@a\nGGCGCTTAACGTTCGATCGA\n+\nIIIIIIIIIIIIIIIIIIII\n").unwrap();

        let mut opt = SearchOpt::default();
        opt.index_basename = base;
        opt.input = vec![reads];
        opt.output = Some(dir.join("out.sam"));
        opt.tmpdir = dir.to_path_buf();
        opt.mem_limit = 64;
        opt.force_unpaired = true;
        opt.use_qids = true;
        opt
    }

    fn expect_validate_err(opt: &SearchOpt, needle: &str) {
        match Search::new(opt) {
            Err(SearchError::Validate(msg)) => {
                assert!(msg.contains(needle), "message {:?} lacks {:?}", msg, needle)
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_validate_mem_limit() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.mem_limit = 0;
        expect_validate_err(&opt, "memory limit");
    }

    #[test]
    fn test_validate_batch_limit() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.batch_limit = 0;
        expect_validate_err(&opt, "batch size limit");
    }

    #[test]
    fn test_validate_batch_range() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.start_batch = 0;
        expect_validate_err(&opt, "start batch");

        let mut opt = base_opt(dir.path());
        opt.start_batch = 5;
        opt.end_batch = 4;
        expect_validate_err(&opt, "end batch");
    }

    #[test]
    fn test_validate_res_limit() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.res_limit = 0;
        expect_validate_err(&opt, "max number of results");

        opt.res_limit = MAX_RES_LIMIT + 1;
        expect_validate_err(&opt, "max number of results");
    }

    #[test]
    fn test_validate_pair_params() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.pair_distance = 0;
        expect_validate_err(&opt, "pair distance");

        let mut opt = base_opt(dir.path());
        opt.pair_distance = 10;
        opt.pair_fuzz = 11;
        expect_validate_err(&opt, "fuzz");

        let mut opt = base_opt(dir.path());
        opt.pair_distance = MAX_PAIR_FUZZ * 2;
        opt.pair_fuzz = MAX_PAIR_FUZZ + 1;
        expect_validate_err(&opt, "fuzz");
    }

    #[test]
    fn test_validate_qlen_and_nerr() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.max_qlen = MIN_QLEN - 1;
        expect_validate_err(&opt, "max query length");

        let mut opt = base_opt(dir.path());
        opt.max_qlen = MAX_QLEN + 1;
        expect_validate_err(&opt, "max query length");

        let mut opt = base_opt(dir.path());
        opt.n_err = MAX_N_ERR + 1;
        expect_validate_err(&opt, "number of errors");
    }

    #[test]
    fn test_validate_both_force_flags() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.force_paired = true;
        opt.force_unpaired = true;
        expect_validate_err(&opt, "both forced");
    }

    #[test]
    fn test_validate_sa_window() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.sa_start = 0;
        expect_validate_err(&opt, "sa-start");

        let mut opt = base_opt(dir.path());
        opt.sa_start = 10;
        opt.sa_end = 5;
        expect_validate_err(&opt, "sa-start");

        let mut opt = base_opt(dir.path());
        opt.sa_start = -5;
        opt.sa_end = -1;
        expect_validate_err(&opt, "sa-start");
    }

    #[test]
    fn test_wrong_strand_configuration() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.resconf_str = "0000".to_string();
        expect_validate_err(&opt, "strand configuration");
    }

    #[test]
    fn test_negative_sa_start_swaps_resconf() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.sa_start = -1;
        opt.sa_end = -100;
        opt.resconf_str = "0100".to_string();
        let search = Search::new(&opt).unwrap();
        assert_eq!(search.init.resconf_str, "0001");
        assert!(any_admissible(&search.init.ipam_vec));
    }

    #[test]
    fn test_scratch_buffers_only_single_threaded() {
        let dir = TempDir::new().unwrap();
        let opt = base_opt(dir.path());
        let search = Search::new(&opt).unwrap();
        assert!(search.init.u_tmp_res_buf.is_some());
        assert!(search.init.p_tmp_res_buf.is_some());

        let mut opt = base_opt(dir.path());
        opt.n_threads = 4;
        let search = Search::new(&opt).unwrap();
        assert!(search.init.u_tmp_res_buf.is_none());
        assert!(search.init.p_tmp_res_buf.is_none());
    }

    #[test]
    fn test_mem_cap_too_small_for_scratch() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.mem_limit = 1;
        match Search::new(&opt) {
            Err(SearchError::ResourceExhausted { .. }) => {}
            other => panic!("expected ResourceExhausted, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_discovery_clamps_worker_count() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.n_threads = 8;
        opt.discover_sep = true;
        let search = Search::new(&opt).unwrap();
        assert_eq!(search.n_threads, 1);
        assert!(search.init.separation.is_some());
    }

    #[test]
    fn test_neither_mode_requested_fails_at_run() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.force_unpaired = false;
        let mut search = Search::new(&opt).unwrap();
        match search.run() {
            Err(SearchError::Input(msg)) => {
                assert!(msg.contains("neither paired nor unpaired"))
            }
            other => panic!("expected input error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_paired_with_one_column_fails() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.force_unpaired = false;
        opt.force_paired = true;
        let mut search = Search::new(&opt).unwrap();
        match search.run() {
            Err(SearchError::Input(msg)) => {
                assert!(msg.contains("paired search is requested but input is not paired"))
            }
            other => panic!("expected input error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_search_mode_is_threaded_through() {
        let dir = TempDir::new().unwrap();
        let mut opt = base_opt(dir.path());
        opt.search_mode = SearchMode::BoundErr;
        let search = Search::new(&opt).unwrap();
        assert_eq!(search.init.kernel.mode, SearchMode::BoundErr);
    }
}
