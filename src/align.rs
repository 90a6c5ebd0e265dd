// Bounded-error alignment kernel.
//
// Seed-and-extend: pigeonhole k-mer seeds propose diagonals, a banded
// edit-distance DP verifies each candidate under the per-read error budget.
// Both strands are searched; pairing admissibility is decided here as well.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::defaults::SEED_LEN;
use crate::index::{pack_kmer, SeqStore};
use crate::resconf::IpamVec;
use crate::search_opt::SearchMode;
use crate::stats::SearchStats;

pub const OP_M: u8 = b'M';
pub const OP_I: u8 = b'I';
pub const OP_D: u8 = b'D';
pub const OP_S: u8 = b'S';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strand {
    Fwd,
    Rev,
}

/// One verified placement of a query on the subject strip.
#[derive(Debug, Clone)]
pub struct Hit {
    /// Alignment start on the concatenated strip.
    pub gpos: u64,
    pub strand: Strand,
    pub n_err: u32,
    pub cigar: Vec<(u8, u32)>,
    /// Strip bases consumed by the alignment.
    pub ref_span: u64,
    /// Query bases aligned (less than the query length only for partial
    /// hits).
    pub q_aligned: usize,
}

/// Per-run kernel parameters, fixed at driver construction.
#[derive(Debug, Clone)]
pub struct KernelCfg {
    pub n_err: u32,
    pub res_limit: u32,
    pub repeat_threshold: u32,
    pub mode: SearchMode,
    /// Subject-area window on the strip, 0-based half-open.
    pub sa_lo: u64,
    pub sa_hi: u64,
    pub randomize: bool,
    pub random_seed: u64,
}

/// Encode raw bases to codes.
pub fn encode_query(seq: &[u8]) -> Vec<u8> {
    seq.iter().map(|&b| crate::index::encode_base(b)).collect()
}

/// Reverse complement of a code sequence; ambiguous codes stay ambiguous.
pub fn revcomp(codes: &[u8]) -> Vec<u8> {
    codes
        .iter()
        .rev()
        .map(|&c| if c < 4 { 3 - c } else { 4 })
        .collect()
}

pub fn cigar_string(cigar: &[(u8, u32)]) -> String {
    let mut s = String::new();
    for &(op, len) in cigar {
        s.push_str(&len.to_string());
        s.push(op as char);
    }
    s
}

// ---------------------------------------------------------------------------
// Banded edit-distance DP
// ---------------------------------------------------------------------------

const DIR_DIAG: u8 = 0;
const DIR_UP: u8 = 1;
const DIR_LEFT: u8 = 2;

struct BandDp {
    k: usize,
    width: usize,
    s_len: usize,
    dp: Vec<u8>,
    dir: Vec<u8>,
    /// Deepest row whose band still holds a value within budget.
    last_row: usize,
}

impl BandDp {
    /// Fill the band for query `q` anchored at `s[0]`. Costs saturate at
    /// `k + 1`, which doubles as the "unreachable" marker.
    fn fill(q: &[u8], s: &[u8], k: usize) -> Self {
        let n = q.len();
        let width = 2 * k + 1;
        let inf = (k + 1) as u8;
        let mut dp = vec![inf; (n + 1) * width];
        let mut dir = vec![DIR_DIAG; (n + 1) * width];

        for j in 0..=k.min(s.len()) {
            dp[j + k] = j as u8;
            if j > 0 {
                dir[j + k] = DIR_LEFT;
            }
        }

        let mut last_row = 0;
        for i in 1..=n {
            let lo_j = i.saturating_sub(k);
            let hi_j = (i + k).min(s.len());
            if lo_j > hi_j {
                break;
            }
            let mut row_min = inf;
            for j in lo_j..=hi_j {
                let jj = j + k - i;
                let mut best = inf;
                let mut d = DIR_DIAG;
                if j >= 1 {
                    let sub = (q[i - 1] >= 4 || s[j - 1] >= 4 || q[i - 1] != s[j - 1]) as u8;
                    let v = dp[(i - 1) * width + jj].saturating_add(sub).min(inf);
                    if v < best {
                        best = v;
                        d = DIR_DIAG;
                    }
                }
                if jj + 1 < width {
                    let v = dp[(i - 1) * width + jj + 1].saturating_add(1).min(inf);
                    if v < best {
                        best = v;
                        d = DIR_UP;
                    }
                }
                if jj >= 1 && j >= 1 {
                    let v = dp[i * width + jj - 1].saturating_add(1).min(inf);
                    if v < best {
                        best = v;
                        d = DIR_LEFT;
                    }
                }
                dp[i * width + jj] = best;
                dir[i * width + jj] = d;
                row_min = row_min.min(best);
            }
            if row_min >= inf {
                break;
            }
            last_row = i;
        }

        Self {
            k,
            width,
            s_len: s.len(),
            dp,
            dir,
            last_row,
        }
    }

    /// Best cell of `row`: (errors, subject consumed), if within budget.
    fn row_best(&self, row: usize) -> Option<(u32, usize)> {
        let inf = (self.k + 1) as u8;
        let lo_j = row.saturating_sub(self.k);
        let hi_j = (row + self.k).min(self.s_len);
        if lo_j > hi_j {
            return None;
        }
        let mut best: Option<(u8, usize)> = None;
        for j in lo_j..=hi_j {
            let v = self.dp[row * self.width + (j + self.k - row)];
            if v >= inf {
                continue;
            }
            // fewest errors first, then the diagonal-closest end
            let better = match best {
                None => true,
                Some((bv, bj)) => (v, j.abs_diff(row)) < (bv, bj.abs_diff(row)),
            };
            if better {
                best = Some((v, j));
            }
        }
        best.map(|(v, j)| (v as u32, j))
    }

    fn traceback(&self, mut i: usize, mut j: usize) -> Vec<(u8, u32)> {
        let mut ops: Vec<u8> = Vec::with_capacity(i + self.k);
        while i > 0 || j > 0 {
            let d = if i == 0 {
                DIR_LEFT
            } else {
                self.dir[i * self.width + (j + self.k - i)]
            };
            match d {
                DIR_DIAG => {
                    ops.push(OP_M);
                    i -= 1;
                    j -= 1;
                }
                DIR_UP => {
                    ops.push(OP_I);
                    i -= 1;
                }
                _ => {
                    ops.push(OP_D);
                    j -= 1;
                }
            }
        }
        let mut cigar: Vec<(u8, u32)> = Vec::new();
        for &op in ops.iter().rev() {
            match cigar.last_mut() {
                Some((last, len)) if *last == op => *len += 1,
                _ => cigar.push((op, 1)),
            }
        }
        cigar
    }
}

// ---------------------------------------------------------------------------
// Read-level search
// ---------------------------------------------------------------------------

/// Align one query (given as forward-strand codes) against the store.
/// Returns hits ordered by (errors, position), truncated to the result
/// limit.
pub fn align_read(
    store: &SeqStore,
    stats: &SearchStats,
    codes_fwd: &[u8],
    qid: u64,
    cfg: &KernelCfg,
) -> Vec<Hit> {
    let n = codes_fwd.len();
    if n < SEED_LEN {
        return Vec::new();
    }
    let k = cfg.n_err as usize;
    let codes_rev = revcomp(codes_fwd);

    let mut candidates: Vec<(Strand, u64)> = Vec::new();
    let mut seen: HashSet<(Strand, u64)> = HashSet::new();

    for (strand, codes) in [(Strand::Fwd, codes_fwd), (Strand::Rev, &codes_rev[..])] {
        let max_seeds = (n / SEED_LEN).min(k + 1).max(1);
        for si in 0..max_seeds {
            let qoff = si * SEED_LEN;
            let kmer = match pack_kmer(&codes[qoff..qoff + SEED_LEN]) {
                Some(kmer) => kmer,
                None => continue,
            };
            let occs = store.lookup(kmer);
            if occs.len() > cfg.repeat_threshold as usize {
                SearchStats::add(&stats.n_filtered, 1);
                continue;
            }
            for &occ in occs {
                SearchStats::add(&stats.n_candidates, 1);
                let occ = occ as u64;
                if occ < qoff as u64 {
                    continue;
                }
                let cand = occ - qoff as u64;
                if seen.insert((strand, cand)) {
                    candidates.push((strand, cand));
                }
            }
        }
    }

    let mut hits: Vec<Hit> = Vec::new();
    for &(strand, cand) in &candidates {
        let codes = match strand {
            Strand::Fwd => codes_fwd,
            Strand::Rev => &codes_rev[..],
        };
        if let Some(hit) = verify_candidate(store, codes, strand, cand, k, false) {
            if in_window(cfg, &hit) {
                hits.push(hit);
            }
        }
    }

    // partial fallback: best prefix alignment when nothing matched in full
    if hits.is_empty() && cfg.mode == SearchMode::Partial {
        for &(strand, cand) in &candidates {
            let codes = match strand {
                Strand::Fwd => codes_fwd,
                Strand::Rev => &codes_rev[..],
            };
            if let Some(hit) = verify_candidate(store, codes, strand, cand, k, true) {
                if in_window(cfg, &hit) {
                    hits.push(hit);
                }
            }
        }
        hits.sort_by_key(|h| (h.n_err, std::cmp::Reverse(h.q_aligned), h.gpos));
        hits.truncate(1);
        return hits;
    }

    hits.sort_by_key(|h| (h.n_err, h.gpos, h.strand));

    match cfg.mode {
        SearchMode::BoundErr => {}
        _ => {
            if let Some(best) = hits.first().map(|h| h.n_err) {
                hits.retain(|h| h.n_err == best);
            }
        }
    }

    truncate_hits(&mut hits, cfg, qid);
    hits
}

fn in_window(cfg: &KernelCfg, hit: &Hit) -> bool {
    hit.gpos >= cfg.sa_lo && hit.gpos + hit.ref_span <= cfg.sa_hi
}

fn verify_candidate(
    store: &SeqStore,
    codes: &[u8],
    strand: Strand,
    cand: u64,
    k: usize,
    partial: bool,
) -> Option<Hit> {
    let (ord, _) = store.resolve(cand);
    let subj = store.subject(ord);
    if cand < subj.offset {
        return None;
    }
    let subj_end = subj.offset + subj.len;
    let want = codes.len() + k;
    let avail = (subj_end - cand) as usize;
    if avail == 0 {
        return None;
    }
    let window = store.window(cand, want.min(avail));

    let bd = BandDp::fill(codes, window, k);

    if !partial {
        let (n_err, j) = bd.row_best(codes.len())?;
        let cigar = bd.traceback(codes.len(), j);
        return Some(Hit {
            gpos: cand,
            strand,
            n_err,
            cigar,
            ref_span: j as u64,
            q_aligned: codes.len(),
        });
    }

    // deepest prefix still within budget; too-short prefixes are noise
    let row = bd.last_row;
    if row < SEED_LEN || row == codes.len() {
        return None;
    }
    let (n_err, j) = bd.row_best(row)?;
    let mut cigar = bd.traceback(row, j);
    cigar.push((OP_S, (codes.len() - row) as u32));
    Some(Hit {
        gpos: cand,
        strand,
        n_err,
        cigar,
        ref_span: j as u64,
        q_aligned: row,
    })
}

/// Keep at most `res_limit` hits. With randomization enabled, the tie group
/// straddling the cut is shuffled first (seeded per query, so a fixed seed
/// reproduces).
fn truncate_hits(hits: &mut Vec<Hit>, cfg: &KernelCfg, qid: u64) {
    let limit = cfg.res_limit as usize;
    if hits.len() <= limit {
        return;
    }
    if cfg.randomize {
        let cut_err = hits[limit - 1].n_err;
        let lo = hits.partition_point(|h| h.n_err < cut_err);
        let hi = hits.partition_point(|h| h.n_err <= cut_err);
        let mut rng = StdRng::seed_from_u64(cfg.random_seed ^ qid);
        hits[lo..hi].shuffle(&mut rng);
    }
    hits.truncate(limit);
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

/// Strand-combination index into the admissibility vector.
pub fn combo_idx(s1: Strand, s2: Strand) -> usize {
    ((matches!(s1, Strand::Rev) as usize) << 1) | matches!(s2, Strand::Rev) as usize
}

#[derive(Debug, Clone)]
pub struct PairCfg {
    pub pair_distance: u32,
    pub pair_fuzz: u32,
    pub ipam: IpamVec,
    pub mode: SearchMode,
}

/// Choose the best admissible mate combination: same subject, start
/// separation within `pair_distance ± pair_fuzz`, strand combination
/// admitted by the configuration. Ranked by total errors, then leftmost
/// position.
pub fn pair_hits(
    store: &SeqStore,
    h1: &[Hit],
    h2: &[Hit],
    cfg: &PairCfg,
) -> Option<(usize, usize)> {
    let lo = cfg.pair_distance.saturating_sub(cfg.pair_fuzz) as u64;
    let hi = (cfg.pair_distance + cfg.pair_fuzz) as u64;
    let mut best: Option<(u32, u64, usize, usize)> = None;
    for (i, a) in h1.iter().enumerate() {
        for (j, b) in h2.iter().enumerate() {
            if cfg.ipam[combo_idx(a.strand, b.strand)] == 0 {
                continue;
            }
            if store.resolve(a.gpos).0 != store.resolve(b.gpos).0 {
                continue;
            }
            let d = a.gpos.abs_diff(b.gpos);
            if d < lo || d > hi {
                continue;
            }
            let score = a.n_err + b.n_err;
            let leftmost = a.gpos.min(b.gpos);
            if best.map_or(true, |(s, g, _, _)| (score, leftmost) < (s, g)) {
                best = Some((score, leftmost, i, j));
            }
        }
    }
    best.map(|(_, _, i, j)| (i, j))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::MEGABYTE;
    use crate::index::build_index;
    use crate::mem_arena::MemArena;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_for(dir: &Path, fasta: &str) -> SeqStore {
        let fa = dir.join("ref.fa");
        fs::write(&fa, fasta).unwrap();
        let base = dir.join("ref");
        build_index(&fa, &base).unwrap();
        let arena = Arc::new(MemArena::new(64 * MEGABYTE));
        SeqStore::load(&base, &arena).unwrap()
    }

    fn cfg(n_err: u32) -> KernelCfg {
        KernelCfg {
            n_err,
            res_limit: 10,
            repeat_threshold: 4096,
            mode: SearchMode::Default,
            sa_lo: 0,
            sa_hi: u64::MAX,
            randomize: false,
            random_seed: 0,
        }
    }

    const REF: &str = ">s1\nGATTACAGATTACAGGCGCTTAACGTTCGATCGATTTACGCTAGCATG\n";

    #[test]
    fn test_exact_hit() {
        let dir = TempDir::new().unwrap();
        let store = store_for(dir.path(), REF);
        let stats = SearchStats::new();
        // bases 14..34 of the reference
        let q = encode_query(b"GGCGCTTAACGTTCGATCGA");
        let hits = align_read(&store, &stats, &q, 0, &cfg(1));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].gpos, 14);
        assert_eq!(hits[0].n_err, 0);
        assert_eq!(hits[0].strand, Strand::Fwd);
        assert_eq!(cigar_string(&hits[0].cigar), "20M");
    }

    #[test]
    fn test_substitution_within_budget() {
        let dir = TempDir::new().unwrap();
        let store = store_for(dir.path(), REF);
        let stats = SearchStats::new();
        // same window with one mismatch in the tail
        let q = encode_query(b"GGCGCTTAACGTTCGATCGT");
        let hits = align_read(&store, &stats, &q, 0, &cfg(1));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].gpos, 14);
        assert_eq!(hits[0].n_err, 1);
    }

    #[test]
    fn test_budget_zero_rejects_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = store_for(dir.path(), REF);
        let stats = SearchStats::new();
        let q = encode_query(b"GGCGCTTAACGTTCGATCGT");
        let hits = align_read(&store, &stats, &q, 0, &cfg(0));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_reverse_strand_hit() {
        let dir = TempDir::new().unwrap();
        let store = store_for(dir.path(), REF);
        let stats = SearchStats::new();
        // reverse complement of bases 14..34
        let q = encode_query(b"TCGATCGAACGTTAAGCGCC");
        let hits = align_read(&store, &stats, &q, 0, &cfg(0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].gpos, 14);
        assert_eq!(hits[0].strand, Strand::Rev);
    }

    #[test]
    fn test_deletion_within_budget() {
        let dir = TempDir::new().unwrap();
        let store = store_for(dir.path(), REF);
        let stats = SearchStats::new();
        // query carries an extra run relative to bases 14..39
        let q_del = encode_query(b"GGCGCTTAACGTTCGATCGATACGC");
        let hits = align_read(&store, &stats, &q_del, 0, &cfg(2));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].gpos, 14);
        assert!(hits[0].n_err >= 1);
    }

    #[test]
    fn test_partial_mode_soft_clips() {
        let dir = TempDir::new().unwrap();
        let store = store_for(dir.path(), REF);
        let stats = SearchStats::new();
        // 20 matching bases followed by 8 of junk
        let q = encode_query(b"GGCGCTTAACGTTCGATCGACCCCCCCC");
        let mut c = cfg(1);
        assert!(align_read(&store, &stats, &q, 0, &c).is_empty());
        c.mode = SearchMode::Partial;
        let hits = align_read(&store, &stats, &q, 0, &c);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].q_aligned < q.len());
        assert_eq!(hits[0].cigar.last().map(|&(op, _)| op), Some(OP_S));
    }

    #[test]
    fn test_window_filter() {
        let dir = TempDir::new().unwrap();
        let store = store_for(dir.path(), REF);
        let stats = SearchStats::new();
        let q = encode_query(b"GGCGCTTAACGTTCGATCGA");
        let mut c = cfg(0);
        c.sa_lo = 0;
        c.sa_hi = 10;
        assert!(align_read(&store, &stats, &q, 0, &c).is_empty());
        c.sa_hi = 40;
        assert_eq!(align_read(&store, &stats, &q, 0, &c).len(), 1);
    }

    #[test]
    fn test_repeat_threshold_filters_seeds() {
        let dir = TempDir::new().unwrap();
        // the poly-A seed occurs at every offset
        let store = store_for(dir.path(), ">s1\nAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\n");
        let stats = SearchStats::new();
        let q = encode_query(b"AAAAAAAAAAAAAAAA");
        let mut c = cfg(0);
        c.repeat_threshold = 2;
        assert!(align_read(&store, &stats, &q, 0, &c).is_empty());
        assert!(SearchStats::get(&stats.n_filtered) > 0);
    }

    #[test]
    fn test_res_limit_truncates() {
        let dir = TempDir::new().unwrap();
        let unit = "GATTACAGATTACAGG";
        let fasta = format!(">s1\n{}\n", unit.repeat(8));
        let store = store_for(dir.path(), &fasta);
        let stats = SearchStats::new();
        let q = encode_query(unit.as_bytes());
        let mut c = cfg(0);
        c.res_limit = 3;
        let hits = align_read(&store, &stats, &q, 0, &c);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_randomized_truncation_is_seeded() {
        let dir = TempDir::new().unwrap();
        let unit = "GATTACAGATTACAGG";
        let fasta = format!(">s1\n{}\n", unit.repeat(8));
        let store = store_for(dir.path(), &fasta);
        let stats = SearchStats::new();
        let q = encode_query(unit.as_bytes());
        let mut c = cfg(0);
        c.res_limit = 3;
        c.randomize = true;
        c.random_seed = 7;
        let a = align_read(&store, &stats, &q, 42, &c);
        let b = align_read(&store, &stats, &q, 42, &c);
        let pa: Vec<u64> = a.iter().map(|h| h.gpos).collect();
        let pb: Vec<u64> = b.iter().map(|h| h.gpos).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_combo_idx() {
        assert_eq!(combo_idx(Strand::Fwd, Strand::Fwd), 0);
        assert_eq!(combo_idx(Strand::Fwd, Strand::Rev), 1);
        assert_eq!(combo_idx(Strand::Rev, Strand::Fwd), 2);
        assert_eq!(combo_idx(Strand::Rev, Strand::Rev), 3);
    }

    fn mk_hit(gpos: u64, strand: Strand, n_err: u32) -> Hit {
        Hit {
            gpos,
            strand,
            n_err,
            cigar: vec![(OP_M, 20)],
            ref_span: 20,
            q_aligned: 20,
        }
    }

    #[test]
    fn test_pair_hits_distance_and_ipam() {
        let dir = TempDir::new().unwrap();
        let fasta = format!(">s1\n{}\n", "ACGT".repeat(200));
        let store = store_for(dir.path(), &fasta);

        let pcfg = PairCfg {
            pair_distance: 100,
            pair_fuzz: 20,
            ipam: crate::resconf::parse_resconf("1111"),
            mode: SearchMode::Default,
        };
        let h1 = vec![mk_hit(10, Strand::Fwd, 0)];
        let h2 = vec![mk_hit(500, Strand::Rev, 0), mk_hit(105, Strand::Rev, 1)];
        // only the second combination is within distance
        assert_eq!(pair_hits(&store, &h1, &h2, &pcfg), Some((0, 1)));

        // forbid every strand combination
        let mut strict = pcfg.clone();
        strict.ipam = crate::resconf::parse_resconf("0000");
        assert_eq!(pair_hits(&store, &h1, &h2, &strict), None);
    }

    #[test]
    fn test_pair_hits_prefers_fewest_errors() {
        let dir = TempDir::new().unwrap();
        let fasta = format!(">s1\n{}\n", "ACGT".repeat(200));
        let store = store_for(dir.path(), &fasta);
        let pcfg = PairCfg {
            pair_distance: 100,
            pair_fuzz: 50,
            ipam: crate::resconf::parse_resconf("1111"),
            mode: SearchMode::SumErr,
        };
        let h1 = vec![mk_hit(10, Strand::Fwd, 2), mk_hit(300, Strand::Fwd, 0)];
        let h2 = vec![mk_hit(100, Strand::Rev, 0), mk_hit(390, Strand::Rev, 0)];
        assert_eq!(pair_hits(&store, &h1, &h2, &pcfg), Some((1, 1)));
    }
}
