// SAM output: per-batch record writer and the final-output collator.
//
// Each batch writes its records to its own temp file through an OutSam;
// the driver appends those files to the final output in batch order
// through the SamCollator, which owns the header.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::align::{cigar_string, Hit, Strand};
use crate::index::SeqStore;
use crate::mem_arena::ArenaBuf;
use crate::sid_map::SidMap;

pub mod sam_flags {
    pub const PAIRED: u16 = 0x1;
    pub const PROPER_PAIR: u16 = 0x2;
    pub const UNMAPPED: u16 = 0x4;
    pub const MATE_UNMAPPED: u16 = 0x8;
    pub const REVERSE: u16 = 0x10;
    pub const MATE_REVERSE: u16 = 0x20;
    pub const FIRST_IN_PAIR: u16 = 0x40;
    pub const LAST_IN_PAIR: u16 = 0x80;
    pub const SECONDARY: u16 = 0x100;
}

/// RNAME/@SQ name for a subject: id-map name when available, ordinal
/// otherwise. The collator and the per-batch writers must agree on this.
pub fn subject_name(sidmap: Option<&SidMap>, ord: usize) -> String {
    match sidmap.and_then(|m| m.name(ord)) {
        Some(n) => n.to_string(),
        None => format!("s{}", ord + 1),
    }
}

fn comp_base(b: u8) -> u8 {
    match b {
        b'A' | b'a' => b'T',
        b'C' | b'c' => b'G',
        b'G' | b'g' => b'C',
        b'T' | b't' => b'A',
        _ => b'N',
    }
}

fn revcomp_ascii(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| comp_base(b)).collect()
}

/// Identity of one read being reported.
pub struct ReadCtx<'a> {
    pub qid: u64,
    pub name: &'a str,
    pub seq: &'a [u8],
    pub qual: Option<&'a str>,
}

/// Mate columns of a paired record.
struct MateInfo {
    rnext: String,
    pnext: u64,
    tlen: i64,
}

/// Per-batch SAM record writer. Records are staged through an arena
/// scratch buffer and flushed to the file as the buffer fills.
pub struct OutSam {
    file: File,
    store: Arc<SeqStore>,
    sidmap: Option<Arc<SidMap>>,
    skip_unmapped: bool,
    use_qids: bool,
    extra_tags: bool,
}

impl OutSam {
    pub fn create(
        path: &Path,
        store: Arc<SeqStore>,
        sidmap: Option<Arc<SidMap>>,
        skip_unmapped: bool,
        use_qids: bool,
        extra_tags: bool,
    ) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            store,
            sidmap,
            skip_unmapped,
            use_qids,
            extra_tags,
        })
    }

    fn qname(&self, ctx: &ReadCtx) -> String {
        if self.use_qids {
            ctx.name
                .split_whitespace()
                .next()
                .unwrap_or(ctx.name)
                .to_string()
        } else {
            format!("q{}", ctx.qid)
        }
    }

    /// SEQ/QUAL in alignment orientation.
    fn oriented(&self, ctx: &ReadCtx, strand: Strand) -> (Vec<u8>, Option<String>) {
        match strand {
            Strand::Fwd => (ctx.seq.to_vec(), ctx.qual.map(|q| q.to_string())),
            Strand::Rev => (
                revcomp_ascii(ctx.seq),
                ctx.qual.map(|q| q.chars().rev().collect()),
            ),
        }
    }

    fn stage(&mut self, buf: &mut ArenaBuf, line: &[u8]) -> io::Result<()> {
        if line.len() > buf.remaining() {
            self.flush(buf)?;
        }
        if line.len() > buf.capacity() {
            self.file.write_all(line)
        } else {
            buf.push_bytes(line);
            Ok(())
        }
    }

    /// Flush staged records to the batch file.
    pub fn flush(&mut self, buf: &mut ArenaBuf) -> io::Result<()> {
        if !buf.is_empty() {
            self.file.write_all(buf.as_slice())?;
            buf.clear();
        }
        Ok(())
    }

    fn write_rec(
        &mut self,
        buf: &mut ArenaBuf,
        ctx: &ReadCtx,
        hit: &Hit,
        flag: u16,
        mapq: u8,
        mate: Option<&MateInfo>,
    ) -> io::Result<()> {
        let (ord, lpos) = self.store.resolve(hit.gpos);
        let rname = subject_name(self.sidmap.as_deref(), ord);
        let (seq_out, qual_out) = self.oriented(ctx, hit.strand);

        let mut line: Vec<u8> = Vec::with_capacity(seq_out.len() * 2 + 96);
        write!(
            line,
            "{}\t{}\t{}\t{}\t{}\t{}\t",
            self.qname(ctx),
            flag,
            rname,
            lpos + 1,
            mapq,
            cigar_string(&hit.cigar)
        )?;
        match mate {
            Some(m) => write!(line, "{}\t{}\t{}\t", m.rnext, m.pnext, m.tlen)?,
            None => line.extend_from_slice(b"*\t0\t0\t"),
        }
        line.extend_from_slice(&seq_out);
        line.push(b'\t');
        match &qual_out {
            Some(q) => line.extend_from_slice(q.as_bytes()),
            None => line.push(b'*'),
        }
        if self.extra_tags {
            write!(line, "\tNM:i:{}", hit.n_err)?;
        }
        line.push(b'\n');
        self.stage(buf, &line)
    }

    fn write_unmapped(
        &mut self,
        buf: &mut ArenaBuf,
        ctx: &ReadCtx,
        flag: u16,
        mate: Option<&MateInfo>,
    ) -> io::Result<()> {
        let mut line: Vec<u8> = Vec::with_capacity(ctx.seq.len() * 2 + 64);
        write!(
            line,
            "{}\t{}\t*\t0\t0\t*\t",
            self.qname(ctx),
            flag | sam_flags::UNMAPPED
        )?;
        match mate {
            Some(m) => write!(line, "{}\t{}\t0\t", m.rnext, m.pnext)?,
            None => line.extend_from_slice(b"*\t0\t0\t"),
        }
        line.extend_from_slice(ctx.seq);
        line.push(b'\t');
        match ctx.qual {
            Some(q) => line.extend_from_slice(q.as_bytes()),
            None => line.push(b'*'),
        }
        line.push(b'\n');
        self.stage(buf, &line)
    }

    /// Report an unpaired read: primary first, remaining hits as secondary.
    pub fn write_unpaired(
        &mut self,
        buf: &mut ArenaBuf,
        ctx: &ReadCtx,
        hits: &[Hit],
    ) -> io::Result<usize> {
        if hits.is_empty() {
            if !self.skip_unmapped {
                self.write_unmapped(buf, ctx, 0, None)?;
            }
            return Ok(0);
        }
        let mapq = if hits.len() == 1 { 60 } else { 3 };
        for (i, hit) in hits.iter().enumerate() {
            let mut flag = 0u16;
            if i > 0 {
                flag |= sam_flags::SECONDARY;
            }
            if hit.strand == Strand::Rev {
                flag |= sam_flags::REVERSE;
            }
            self.write_rec(buf, ctx, hit, flag, if i > 0 { 0 } else { mapq }, None)?;
        }
        Ok(hits.len())
    }

    /// Report a read pair. `chosen` selects the admissible combination, if
    /// any; without one each mate is reported on its own.
    pub fn write_pair(
        &mut self,
        buf: &mut ArenaBuf,
        ctx1: &ReadCtx,
        h1: &[Hit],
        ctx2: &ReadCtx,
        h2: &[Hit],
        chosen: Option<(usize, usize)>,
    ) -> io::Result<usize> {
        if let Some((i, j)) = chosen {
            let a = &h1[i];
            let b = &h2[j];
            let (_, lp_a) = self.store.resolve(a.gpos);
            let (_, lp_b) = self.store.resolve(b.gpos);
            let lo = lp_a.min(lp_b);
            let hi = (lp_a + a.ref_span).max(lp_b + b.ref_span);
            let span = (hi - lo) as i64;

            let mut flag_a = sam_flags::PAIRED | sam_flags::PROPER_PAIR | sam_flags::FIRST_IN_PAIR;
            let mut flag_b = sam_flags::PAIRED | sam_flags::PROPER_PAIR | sam_flags::LAST_IN_PAIR;
            if a.strand == Strand::Rev {
                flag_a |= sam_flags::REVERSE;
                flag_b |= sam_flags::MATE_REVERSE;
            }
            if b.strand == Strand::Rev {
                flag_b |= sam_flags::REVERSE;
                flag_a |= sam_flags::MATE_REVERSE;
            }

            let mate_a = MateInfo {
                rnext: "=".to_string(),
                pnext: lp_b + 1,
                tlen: if lp_a <= lp_b { span } else { -span },
            };
            let mate_b = MateInfo {
                rnext: "=".to_string(),
                pnext: lp_a + 1,
                tlen: if lp_b < lp_a { span } else { -span },
            };
            self.write_rec(buf, ctx1, a, flag_a, 60, Some(&mate_a))?;
            self.write_rec(buf, ctx2, b, flag_b, 60, Some(&mate_b))?;
            return Ok(2);
        }

        // no admissible combination: report each mate independently
        let mut written = 0;
        let sides = [
            (ctx1, h1.first(), h2.first(), sam_flags::FIRST_IN_PAIR),
            (ctx2, h2.first(), h1.first(), sam_flags::LAST_IN_PAIR),
        ];
        for (ctx, own, other, side_flag) in sides {
            let mut flag = sam_flags::PAIRED | side_flag;
            let mate = other.map(|o| {
                let (oord, olp) = self.store.resolve(o.gpos);
                MateInfo {
                    rnext: subject_name(self.sidmap.as_deref(), oord),
                    pnext: olp + 1,
                    tlen: 0,
                }
            });
            match other {
                Some(o) if o.strand == Strand::Rev => flag |= sam_flags::MATE_REVERSE,
                Some(_) => {}
                None => flag |= sam_flags::MATE_UNMAPPED,
            }
            match own {
                Some(hit) => {
                    if hit.strand == Strand::Rev {
                        flag |= sam_flags::REVERSE;
                    }
                    self.write_rec(buf, ctx, hit, flag, 30, mate.as_ref())?;
                    written += 1;
                }
                None => {
                    if !self.skip_unmapped {
                        self.write_unmapped(buf, ctx, flag, mate.as_ref())?;
                    }
                }
            }
        }
        Ok(written)
    }

    /// Flush staged data and the file itself.
    pub fn finish(&mut self, buf: &mut ArenaBuf) -> io::Result<()> {
        self.flush(buf)?;
        self.file.flush()
    }
}

/// Final-output collator: writes the header once and appends per-batch
/// files verbatim, strictly in the order the driver hands them over.
pub struct SamCollator {
    out: Box<dyn Write + Send>,
}

impl SamCollator {
    pub fn create(
        output: Option<&Path>,
        cmdline: &str,
        store: &SeqStore,
        sidmap: Option<&SidMap>,
    ) -> io::Result<Self> {
        let mut out: Box<dyn Write + Send> = match output {
            Some(p) => Box::new(BufWriter::new(File::create(p)?)),
            None => Box::new(BufWriter::new(io::stdout())),
        };
        writeln!(out, "@HD\tVN:1.6\tSO:unsorted")?;
        for ord in 0..store.n_subjects() {
            writeln!(
                out,
                "@SQ\tSN:{}\tLN:{}",
                subject_name(sidmap, ord),
                store.subject(ord).len
            )?;
        }
        writeln!(
            out,
            "@PG\tID:prism-align\tPN:prism-align\tVN:{}\tCL:{}",
            env!("CARGO_PKG_VERSION"),
            cmdline
        )?;
        Ok(Self { out })
    }

    /// Append one per-batch file.
    pub fn append(&mut self, path: &Path) -> io::Result<()> {
        let mut f = File::open(path)?;
        io::copy(&mut f, &mut self.out)?;
        Ok(())
    }

    pub fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
