// Reference index: packed subject store and k-mer seed table.
//
// The index lives in three files at a common base path:
//   <base>.seq  packed reference (subject table + one code byte per base)
//   <base>.kix  k-mer seed table (sorted directory + flat position array)
//   <base>.sid  subject-id map (see sid_map.rs)
//
// The .seq payload is memory-mapped read-only; the .kix arrays are loaded
// into memory. Both are charged against the run's memory arena.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::defaults::SEED_LEN;
use crate::mem_arena::{ArenaLease, MemArena};
use crate::search::SearchError;

const SEQ_MAGIC: &[u8; 4] = b"PSQ1";
const KIX_MAGIC: &[u8; 4] = b"PKX1";

/// Base codes: A=0, C=1, G=2, T=3, anything else 4.
pub fn encode_base(b: u8) -> u8 {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 4,
    }
}

/// Pack `SEED_LEN` codes into a 2-bit k-mer. `None` if any code is
/// ambiguous.
pub fn pack_kmer(codes: &[u8]) -> Option<u64> {
    debug_assert_eq!(codes.len(), SEED_LEN);
    let mut k = 0u64;
    for &c in codes {
        if c >= 4 {
            return None;
        }
        k = (k << 2) | c as u64;
    }
    Some(k)
}

#[derive(Debug, Clone, Copy)]
pub struct SubjectRec {
    /// Start of the subject on the concatenated strip.
    pub offset: u64,
    pub len: u64,
}

/// Read-only reference store shared by all batches.
pub struct SeqStore {
    subjects: Vec<SubjectRec>,
    total_len: u64,
    map: Mmap,
    seq_off: usize,
    kmers: Vec<u64>,
    starts: Vec<u32>,
    positions: Vec<u32>,
    _leases: Vec<ArenaLease>,
}

fn get_bytes<'a>(buf: &'a [u8], off: usize, len: usize) -> io::Result<&'a [u8]> {
    buf.get(off..off + len)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated index file"))
}

fn get_u32(buf: &[u8], off: usize) -> io::Result<u32> {
    let mut b = [0u8; 4];
    b.copy_from_slice(get_bytes(buf, off, 4)?);
    Ok(u32::from_le_bytes(b))
}

fn get_u64(buf: &[u8], off: usize) -> io::Result<u64> {
    let mut b = [0u8; 8];
    b.copy_from_slice(get_bytes(buf, off, 8)?);
    Ok(u64::from_le_bytes(b))
}

impl SeqStore {
    /// Load the index at `basename`, charging the arena for resident and
    /// mapped bytes.
    pub fn load(basename: &Path, arena: &Arc<MemArena>) -> Result<Self, SearchError> {
        let seq_path = PathBuf::from(format!("{}.seq", basename.display()));
        let file = File::open(&seq_path).map_err(|e| {
            SearchError::Input(format!("cannot open index {}: {}", seq_path.display(), e))
        })?;
        let map = unsafe { Mmap::map(&file)? };
        let map_lease = MemArena::charge(arena, map.len())?;

        log::debug!(
            "mapped {}: {} bytes ({:.1} MB)",
            seq_path.display(),
            map.len(),
            map.len() as f64 / 1024.0 / 1024.0
        );

        if get_bytes(&map, 0, 4)? != SEQ_MAGIC {
            return Err(SearchError::Input(format!(
                "{} is not a reference store",
                seq_path.display()
            )));
        }

        let n_subjects = get_u32(&map, 4)? as usize;
        if n_subjects == 0 {
            return Err(SearchError::Input(format!(
                "{} contains no subjects",
                seq_path.display()
            )));
        }
        let mut subjects = Vec::with_capacity(n_subjects);
        let mut off = 8usize;
        for _ in 0..n_subjects {
            let offset = get_u64(&map, off)?;
            let len = get_u64(&map, off + 8)?;
            subjects.push(SubjectRec { offset, len });
            off += 16;
        }
        let total_len = get_u64(&map, off)?;
        let seq_off = off + 8;

        if map.len() < seq_off + total_len as usize {
            return Err(SearchError::Input(format!(
                "{} is truncated",
                seq_path.display()
            )));
        }

        let (kmers, starts, positions) = Self::load_kix(basename)?;
        let table_bytes = kmers.len() * 8 + starts.len() * 4 + positions.len() * 4;
        let table_lease = MemArena::charge(arena, table_bytes)?;

        Ok(Self {
            subjects,
            total_len,
            map,
            seq_off,
            kmers,
            starts,
            positions,
            _leases: vec![map_lease, table_lease],
        })
    }

    fn load_kix(basename: &Path) -> Result<(Vec<u64>, Vec<u32>, Vec<u32>), SearchError> {
        let kix_path = PathBuf::from(format!("{}.kix", basename.display()));
        let file = File::open(&kix_path).map_err(|e| {
            SearchError::Input(format!("cannot open index {}: {}", kix_path.display(), e))
        })?;
        let mut rd = BufReader::new(file);

        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        rd.read_exact(&mut buf4)?;
        if &buf4 != KIX_MAGIC {
            return Err(SearchError::Input(format!(
                "{} is not a seed table",
                kix_path.display()
            )));
        }
        rd.read_exact(&mut buf4)?;
        let k = u32::from_le_bytes(buf4) as usize;
        if k != SEED_LEN {
            return Err(SearchError::Input(format!(
                "seed table was built with k={}, expected k={}",
                k, SEED_LEN
            )));
        }

        rd.read_exact(&mut buf8)?;
        let n_kmers = u64::from_le_bytes(buf8) as usize;
        rd.read_exact(&mut buf8)?;
        let n_pos = u64::from_le_bytes(buf8) as usize;

        let mut kmers = Vec::with_capacity(n_kmers);
        let mut counts = Vec::with_capacity(n_kmers);
        for _ in 0..n_kmers {
            rd.read_exact(&mut buf8)?;
            kmers.push(u64::from_le_bytes(buf8));
            rd.read_exact(&mut buf4)?;
            counts.push(u32::from_le_bytes(buf4));
        }

        let mut starts = Vec::with_capacity(n_kmers + 1);
        let mut acc = 0u32;
        starts.push(0);
        for &c in &counts {
            acc += c;
            starts.push(acc);
        }
        if acc as usize != n_pos {
            return Err(SearchError::Input(format!(
                "{} is inconsistent: {} positions declared, {} counted",
                kix_path.display(),
                n_pos,
                acc
            )));
        }

        let mut positions = Vec::with_capacity(n_pos);
        for _ in 0..n_pos {
            rd.read_exact(&mut buf4)?;
            positions.push(u32::from_le_bytes(buf4));
        }

        Ok((kmers, starts, positions))
    }

    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn subject(&self, ord: usize) -> SubjectRec {
        self.subjects[ord]
    }

    /// Map a strip offset to (subject ordinal, 0-based local position).
    pub fn resolve(&self, gpos: u64) -> (usize, u64) {
        let ord = self
            .subjects
            .partition_point(|s| s.offset + s.len <= gpos)
            .min(self.subjects.len() - 1);
        (ord, gpos - self.subjects[ord].offset)
    }

    pub fn base(&self, gpos: u64) -> u8 {
        self.map[self.seq_off + gpos as usize]
    }

    /// A window of the strip as code bytes.
    pub fn window(&self, start: u64, len: usize) -> &[u8] {
        let a = self.seq_off + start as usize;
        &self.map[a..a + len]
    }

    /// Positions of a seed on the strip, empty if absent.
    pub fn lookup(&self, kmer: u64) -> &[u32] {
        match self.kmers.binary_search(&kmer) {
            Ok(i) => {
                let a = self.starts[i] as usize;
                let b = self.starts[i + 1] as usize;
                &self.positions[a..b]
            }
            Err(_) => &[],
        }
    }
}

/// Build the three index files from a FASTA reference. Deterministic: the
/// same input always produces byte-identical files.
pub fn build_index(fasta: &Path, basename: &Path) -> Result<(), SearchError> {
    use bio::io::fasta;
    use flate2::read::GzDecoder;

    let file = File::open(fasta)
        .map_err(|e| SearchError::Input(format!("cannot open {}: {}", fasta.display(), e)))?;
    let reader: Box<dyn Read> = if fasta.extension().and_then(|s| s.to_str()) == Some("gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut subjects: Vec<SubjectRec> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut strip: Vec<u8> = Vec::new();

    for rec in fasta::Reader::new(reader).records() {
        let rec = rec.map_err(|e| SearchError::Input(format!("bad FASTA record: {}", e)))?;
        let offset = strip.len() as u64;
        strip.extend(rec.seq().iter().map(|&b| encode_base(b)));
        subjects.push(SubjectRec {
            offset,
            len: strip.len() as u64 - offset,
        });
        names.push(rec.id().to_string());
    }

    if subjects.is_empty() {
        return Err(SearchError::Input(format!(
            "{} contains no sequences",
            fasta.display()
        )));
    }
    if strip.len() > u32::MAX as usize {
        return Err(SearchError::Input(
            "reference longer than 4 Gbases is not supported".to_string(),
        ));
    }

    // Seed directory: every unambiguous k-mer fully inside one subject.
    let mut table: std::collections::BTreeMap<u64, Vec<u32>> = std::collections::BTreeMap::new();
    for s in &subjects {
        if (s.len as usize) < SEED_LEN {
            continue;
        }
        for i in 0..=(s.len as usize - SEED_LEN) {
            let at = s.offset as usize + i;
            if let Some(k) = pack_kmer(&strip[at..at + SEED_LEN]) {
                table.entry(k).or_default().push(at as u32);
            }
        }
    }

    let seq_path = PathBuf::from(format!("{}.seq", basename.display()));
    let mut w = BufWriter::new(File::create(&seq_path)?);
    w.write_all(SEQ_MAGIC)?;
    w.write_all(&(subjects.len() as u32).to_le_bytes())?;
    for s in &subjects {
        w.write_all(&s.offset.to_le_bytes())?;
        w.write_all(&s.len.to_le_bytes())?;
    }
    w.write_all(&(strip.len() as u64).to_le_bytes())?;
    w.write_all(&strip)?;
    w.flush()?;

    let kix_path = PathBuf::from(format!("{}.kix", basename.display()));
    let mut w = BufWriter::new(File::create(&kix_path)?);
    w.write_all(KIX_MAGIC)?;
    w.write_all(&(SEED_LEN as u32).to_le_bytes())?;
    w.write_all(&(table.len() as u64).to_le_bytes())?;
    let n_pos: usize = table.values().map(|v| v.len()).sum();
    w.write_all(&(n_pos as u64).to_le_bytes())?;
    for (k, v) in &table {
        w.write_all(&k.to_le_bytes())?;
        w.write_all(&(v.len() as u32).to_le_bytes())?;
    }
    for v in table.values() {
        for p in v {
            w.write_all(&p.to_le_bytes())?;
        }
    }
    w.flush()?;

    let sid_path = PathBuf::from(format!("{}.sid", basename.display()));
    let mut w = BufWriter::new(File::create(&sid_path)?);
    for (name, s) in names.iter().zip(&subjects) {
        writeln!(w, "{}\t{}\t{}", name, s.offset, s.len)?;
    }
    w.flush()?;

    log::info!(
        "indexed {} subjects, {} bases, {} distinct seeds",
        subjects.len(),
        strip.len(),
        table.len()
    );

    Ok(())
}
