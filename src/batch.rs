// Batch construction and execution.
//
// A batch is a contiguous slice of the input stream, alignment-complete on
// its own reads: it consumes rows at construction time, runs the kernel
// over them, and writes its records to its own output file. The paired and
// unpaired runs are separate paths so the per-read loop carries no pairing
// branch.

use std::sync::{Arc, Mutex};

use crate::align::{self, KernelCfg, PairCfg};
use crate::defaults::TMP_RES_BUF_SIZE;
use crate::index::SeqStore;
use crate::insert_size::InsertSizeEstimator;
use crate::io::sam_output::{OutSam, ReadCtx};
use crate::io::seq_input::{SeqInput, SeqRecord};
use crate::mem_arena::{ArenaBuf, MemArena};
use crate::resconf::IpamVec;
use crate::search::SearchError;
use crate::search_opt::SearchMode;
use crate::sid_map::SidMap;
use crate::stats::SearchStats;

/// Immutable per-run state shared by every batch.
#[derive(Clone)]
pub struct BatchInitData {
    pub ipam_vec: IpamVec,
    /// Canonical (possibly swapped) result-configuration string.
    pub resconf_str: String,
    pub arena: Arc<MemArena>,
    pub store: Arc<SeqStore>,
    pub sidmap: Option<Arc<SidMap>>,
    pub stats: Arc<SearchStats>,
    /// Set by the driver once the input's column count is known.
    pub paired: bool,
    pub n_threads: usize,
    pub max_qlen: usize,
    pub kernel: KernelCfg,
    pub pair_distance: u32,
    pub pair_fuzz: u32,
    pub search_mode: SearchMode,
    pub skip_unmapped: bool,
    pub use_qids: bool,
    pub extra_tags: bool,
    pub discover_sep_stop: bool,
    /// Present only when insert-size discovery is on (single-threaded).
    pub separation: Option<Arc<Mutex<InsertSizeEstimator>>>,
    /// Pre-allocated scratch buffers, single-threaded path only.
    pub u_tmp_res_buf: Option<Arc<Mutex<ArenaBuf>>>,
    pub p_tmp_res_buf: Option<Arc<Mutex<ArenaBuf>>>,
}

pub struct Batch {
    init: Arc<BatchInitData>,
    oid: u32,
    start_qid: u64,
    end_qid: u64,
    rows: Vec<Vec<SeqRecord>>,
    out: Option<OutSam>,
}

impl Batch {
    /// Construct the next batch by consuming up to `limit` read columns
    /// from the input. The input position advances even for batches the
    /// driver later skips.
    pub fn from_input(
        init: Arc<BatchInitData>,
        input: &mut SeqInput,
        start_qid: u64,
        oid: u32,
        limit: usize,
    ) -> Result<Self, SearchError> {
        let ncols = input.ncols();
        let mut rows = Vec::new();
        let mut consumed = 0usize;
        while consumed + ncols <= limit && !input.done() {
            match input.next_row()? {
                Some(row) => {
                    consumed += row.len();
                    rows.push(row);
                }
                None => break,
            }
        }
        log::debug!(
            "batch {}: {} rows, qids [{}, {})",
            oid,
            rows.len(),
            start_qid,
            start_qid + consumed as u64
        );
        Ok(Self {
            init,
            oid,
            start_qid,
            end_qid: start_qid + consumed as u64,
            rows,
            out: None,
        })
    }

    pub fn oid(&self) -> u32 {
        self.oid
    }

    /// First query ordinal past this batch.
    pub fn end_qid(&self) -> u64 {
        self.end_qid
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn set_output(&mut self, out: OutSam) {
        self.out = Some(out);
    }

    fn take_output(&mut self) -> Result<OutSam, SearchError> {
        self.out
            .take()
            .ok_or_else(|| SearchError::Worker("batch executed without an output file".to_string()))
    }

    /// Run the unpaired path. Returns false only when the run should stop
    /// (never happens here; the signal exists for the paired path).
    pub fn run_unpaired(&mut self) -> Result<bool, SearchError> {
        match self.init.u_tmp_res_buf.clone() {
            Some(shared) => {
                let mut guard = shared
                    .lock()
                    .map_err(|_| SearchError::Worker("scratch buffer poisoned".to_string()))?;
                guard.clear();
                self.exec_unpaired(&mut guard)
            }
            None => {
                let mut buf = MemArena::alloc(&self.init.arena, TMP_RES_BUF_SIZE)?;
                self.exec_unpaired(&mut buf)
            }
        }
    }

    /// Run the paired path. Returns false when insert-size discovery has
    /// finished and the run was asked to stop there.
    pub fn run_paired(&mut self) -> Result<bool, SearchError> {
        match self.init.p_tmp_res_buf.clone() {
            Some(shared) => {
                let mut guard = shared
                    .lock()
                    .map_err(|_| SearchError::Worker("scratch buffer poisoned".to_string()))?;
                guard.clear();
                self.exec_paired(&mut guard)
            }
            None => {
                let mut buf = MemArena::alloc(&self.init.arena, TMP_RES_BUF_SIZE)?;
                self.exec_paired(&mut buf)
            }
        }
    }

    fn exec_unpaired(&mut self, buf: &mut ArenaBuf) -> Result<bool, SearchError> {
        let mut out = self.take_output()?;
        let init = Arc::clone(&self.init);
        let stats = &init.stats;

        for (ri, row) in self.rows.iter().enumerate() {
            let rec = &row[0];
            let qid = self.start_qid + ri as u64;
            SearchStats::add(&stats.n_reads, 1);

            if rec.seq.len() > init.max_qlen {
                log::warn!(
                    "query {} is longer than {} bases, skipped",
                    rec.name,
                    init.max_qlen
                );
                continue;
            }

            let codes = align::encode_query(&rec.seq);
            let hits = align::align_read(&init.store, stats, &codes, qid, &init.kernel);
            if !hits.is_empty() {
                SearchStats::add(&stats.n_aligned, 1);
            }
            let ctx = ReadCtx {
                qid,
                name: &rec.name,
                seq: &rec.seq,
                qual: rec.qual.as_deref(),
            };
            let n = out.write_unpaired(buf, &ctx, &hits)?;
            SearchStats::add(&stats.n_results, n as u64);
        }

        out.finish(buf)?;
        Ok(true)
    }

    fn exec_paired(&mut self, buf: &mut ArenaBuf) -> Result<bool, SearchError> {
        let mut out = self.take_output()?;
        let init = Arc::clone(&self.init);
        let stats = &init.stats;

        // the pairing window may have been retuned by discovery
        let (pair_distance, pair_fuzz) = match &init.separation {
            Some(est) => est
                .lock()
                .map_err(|_| SearchError::Worker("separation estimator poisoned".to_string()))?
                .bounds()
                .unwrap_or((init.pair_distance, init.pair_fuzz)),
            None => (init.pair_distance, init.pair_fuzz),
        };
        let pcfg = PairCfg {
            pair_distance,
            pair_fuzz,
            ipam: init.ipam_vec,
            mode: init.search_mode,
        };

        for (ri, row) in self.rows.iter().enumerate() {
            let (rec1, rec2) = (&row[0], &row[1]);
            let qid1 = self.start_qid + 2 * ri as u64;
            let qid2 = qid1 + 1;
            SearchStats::add(&stats.n_reads, 2);

            if rec1.seq.len() > init.max_qlen || rec2.seq.len() > init.max_qlen {
                log::warn!(
                    "pair {} has a mate longer than {} bases, skipped",
                    rec1.name,
                    init.max_qlen
                );
                continue;
            }

            let codes1 = align::encode_query(&rec1.seq);
            let codes2 = align::encode_query(&rec2.seq);
            let h1 = align::align_read(&init.store, stats, &codes1, qid1, &init.kernel);
            let h2 = align::align_read(&init.store, stats, &codes2, qid2, &init.kernel);
            let mapped = (!h1.is_empty() as u64) + (!h2.is_empty() as u64);
            SearchStats::add(&stats.n_aligned, mapped);

            let chosen = align::pair_hits(&init.store, &h1, &h2, &pcfg);
            if let Some((i, j)) = chosen {
                SearchStats::add(&stats.n_pairs, 2);
                if let Some(est) = &init.separation {
                    // only unambiguous placements feed the estimator
                    if h1.len() == 1 && h2.len() == 1 {
                        let d = h1[i].gpos.abs_diff(h2[j].gpos);
                        est.lock()
                            .map_err(|_| {
                                SearchError::Worker("separation estimator poisoned".to_string())
                            })?
                            .record(d as u32);
                    }
                }
            }

            let ctx1 = ReadCtx {
                qid: qid1,
                name: &rec1.name,
                seq: &rec1.seq,
                qual: rec1.qual.as_deref(),
            };
            let ctx2 = ReadCtx {
                qid: qid2,
                name: &rec2.name,
                seq: &rec2.seq,
                qual: rec2.qual.as_deref(),
            };
            let n = out.write_pair(buf, &ctx1, &h1, &ctx2, &h2, chosen)?;
            SearchStats::add(&stats.n_results, n as u64);
        }

        out.finish(buf)?;

        if let Some(est) = &init.separation {
            let mut est = est
                .lock()
                .map_err(|_| SearchError::Worker("separation estimator poisoned".to_string()))?;
            if est.ready() && est.bounds().is_none() {
                est.finalize()?;
                if init.discover_sep_stop {
                    log::info!("insert size discovery complete, stopping as requested");
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::MEGABYTE;
    use crate::index::build_index;
    use crate::resconf::parse_resconf;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn init_for(dir: &Path, fasta: &str, paired: bool) -> Arc<BatchInitData> {
        let fa = dir.join("ref.fa");
        fs::write(&fa, fasta).unwrap();
        let base = dir.join("ref");
        build_index(&fa, &base).unwrap();
        let arena = Arc::new(MemArena::new(64 * MEGABYTE));
        let store = Arc::new(SeqStore::load(&base, &arena).unwrap());
        Arc::new(BatchInitData {
            ipam_vec: parse_resconf("1111"),
            resconf_str: "1111".to_string(),
            arena,
            store,
            sidmap: None,
            stats: Arc::new(SearchStats::new()),
            paired,
            n_threads: 1,
            max_qlen: 512,
            kernel: KernelCfg {
                n_err: 1,
                res_limit: 10,
                repeat_threshold: 4096,
                mode: SearchMode::Default,
                sa_lo: 0,
                sa_hi: u64::MAX,
                randomize: false,
                random_seed: 0,
            },
            pair_distance: 500,
            pair_fuzz: 100,
            search_mode: SearchMode::Default,
            skip_unmapped: false,
            use_qids: true,
            extra_tags: false,
            discover_sep_stop: false,
            separation: None,
            u_tmp_res_buf: None,
            p_tmp_res_buf: None,
        })
    }

    fn fastq(dir: &Path, name: &str, reads: &[(&str, &str)]) -> PathBuf {
        let mut s = String::new();
        for (id, seq) in reads {
            s.push_str(&format!("@{}\n{}\n+\n{}\n", id, seq, "I".repeat(seq.len())));
        }
        let p = dir.join(name);
        fs::write(&p, s).unwrap();
        p
    }

    const REF: &str = ">s1\nGATTACAGATTACAGGCGCTTAACGTTCGATCGATTTACGCTAGCATG\n";

    #[test]
    fn test_from_input_respects_limit() {
        let dir = TempDir::new().unwrap();
        let init = init_for(dir.path(), REF, false);
        let p = fastq(
            dir.path(),
            "r.fq",
            &[("a", "ACGT"), ("b", "ACGT"), ("c", "ACGT")],
        );
        let mut input = SeqInput::open(&[p]).unwrap();

        let b0 = Batch::from_input(Arc::clone(&init), &mut input, 0, 0, 2).unwrap();
        assert_eq!(b0.n_rows(), 2);
        assert_eq!(b0.end_qid(), 2);
        assert!(!input.done());

        let b1 = Batch::from_input(Arc::clone(&init), &mut input, 2, 1, 2).unwrap();
        assert_eq!(b1.n_rows(), 1);
        assert_eq!(b1.end_qid(), 3);
        assert!(input.done());
    }

    #[test]
    fn test_paired_rows_count_columns() {
        let dir = TempDir::new().unwrap();
        let init = init_for(dir.path(), REF, true);
        let p1 = fastq(dir.path(), "r1.fq", &[("a/1", "ACGT"), ("b/1", "ACGT")]);
        let p2 = fastq(dir.path(), "r2.fq", &[("a/2", "ACGT"), ("b/2", "ACGT")]);
        let mut input = SeqInput::open(&[p1, p2]).unwrap();

        // a limit of 2 columns admits exactly one pair
        let b0 = Batch::from_input(Arc::clone(&init), &mut input, 0, 0, 2).unwrap();
        assert_eq!(b0.n_rows(), 1);
        assert_eq!(b0.end_qid(), 2);
    }

    #[test]
    fn test_run_unpaired_writes_records() {
        let dir = TempDir::new().unwrap();
        let init = init_for(dir.path(), REF, false);
        let p = fastq(
            dir.path(),
            "r.fq",
            &[("hit", "GGCGCTTAACGTTCGATCGA"), ("miss", "CCCCCCCCCCCCCCCCCCCC")],
        );
        let mut input = SeqInput::open(&[p]).unwrap();
        let mut batch = Batch::from_input(Arc::clone(&init), &mut input, 0, 0, 100).unwrap();

        let out_path = dir.path().join("outsam-0");
        batch.set_output(
            OutSam::create(
                &out_path,
                Arc::clone(&init.store),
                None,
                false,
                true,
                false,
            )
            .unwrap(),
        );
        assert!(batch.run_unpaired().unwrap());

        let text = fs::read_to_string(&out_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("hit\t0\ts1\t15\t"));
        // the second read is unmapped
        assert!(lines[1].starts_with("miss\t4\t*\t0\t"));
        assert_eq!(SearchStats::get(&init.stats.n_reads), 2);
        assert_eq!(SearchStats::get(&init.stats.n_aligned), 1);
        assert_eq!(SearchStats::get(&init.stats.n_results), 1);
    }

    #[test]
    fn test_run_without_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let init = init_for(dir.path(), REF, false);
        let p = fastq(dir.path(), "r.fq", &[("a", "ACGT")]);
        let mut input = SeqInput::open(&[p]).unwrap();
        let mut batch = Batch::from_input(init, &mut input, 0, 0, 100).unwrap();
        assert!(batch.run_unpaired().is_err());
    }

    #[test]
    fn test_overlong_query_skipped_with_warning() {
        let dir = TempDir::new().unwrap();
        let init = init_for(dir.path(), REF, false);
        let long_seq = "A".repeat(600);
        let p = fastq(dir.path(), "r.fq", &[("long", &long_seq)]);
        let mut input = SeqInput::open(&[p]).unwrap();
        let mut batch = Batch::from_input(Arc::clone(&init), &mut input, 0, 0, 100).unwrap();

        let out_path = dir.path().join("outsam-0");
        batch.set_output(
            OutSam::create(
                &out_path,
                Arc::clone(&init.store),
                None,
                false,
                true,
                false,
            )
            .unwrap(),
        );
        batch.run_unpaired().unwrap();
        assert_eq!(fs::read_to_string(&out_path).unwrap(), "");
    }
}
