// Sequence input source.
//
// A SeqInput is a 1- or 2-column stream of reads: one file for unpaired
// searches, two files read in lockstep for paired searches. FASTA and FASTQ
// are auto-detected from the file name; gzipped inputs probe for BGZF and
// use multithreaded block decompression when detected, falling back to
// plain gzip otherwise.

use bio::io::{fasta, fastq};
use flate2::read::GzDecoder;
use noodles_bgzf as bgzf;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::search::SearchError;

const BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// One read column: name, raw bases, optional quality string.
#[derive(Debug, Clone)]
pub struct SeqRecord {
    pub name: String,
    pub seq: Vec<u8>,
    pub qual: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Fasta,
    Fastq,
}

fn detect_format(path: &Path) -> Result<Format, SearchError> {
    let name = path.to_string_lossy().to_ascii_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    if name.ends_with(".fa") || name.ends_with(".fasta") || name.ends_with(".fna") {
        Ok(Format::Fasta)
    } else if name.ends_with(".fq") || name.ends_with(".fastq") {
        Ok(Format::Fastq)
    } else {
        Err(SearchError::Input(format!(
            "cannot determine input format of {}",
            path.display()
        )))
    }
}

/// BGZF carries the gzip FEXTRA flag with a 'BC' subfield.
fn is_bgzf(path: &Path) -> std::io::Result<bool> {
    let mut hdr = [0u8; 18];
    let n = File::open(path)?.read(&mut hdr)?;
    Ok(n == 18
        && hdr[0] == 0x1f
        && hdr[1] == 0x8b
        && hdr[3] & 0x04 != 0
        && hdr[12] == b'B'
        && hdr[13] == b'C')
}

fn open_reader(path: &Path) -> Result<Box<dyn Read>, SearchError> {
    let file = File::open(path).map_err(|e| {
        SearchError::Input(format!("cannot open input {}: {}", path.display(), e))
    })?;
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        if is_bgzf(path)? {
            log::debug!("{}: BGZF input", path.display());
            Ok(Box::new(bgzf::MultithreadedReader::new(file)))
        } else {
            log::debug!("{}: gzip input", path.display());
            Ok(Box::new(GzDecoder::new(std::io::BufReader::with_capacity(
                BUFFER_SIZE,
                file,
            ))))
        }
    } else {
        Ok(Box::new(std::io::BufReader::with_capacity(
            BUFFER_SIZE,
            file,
        )))
    }
}

enum RecordReader {
    Fasta(fasta::Records<std::io::BufReader<Box<dyn Read>>>),
    Fastq(fastq::Records<std::io::BufReader<Box<dyn Read>>>),
}

impl RecordReader {
    fn open(path: &Path) -> Result<Self, SearchError> {
        let reader = open_reader(path)?;
        match detect_format(path)? {
            Format::Fasta => Ok(RecordReader::Fasta(fasta::Reader::new(reader).records())),
            Format::Fastq => Ok(RecordReader::Fastq(fastq::Reader::new(reader).records())),
        }
    }

    fn next_rec(&mut self) -> Result<Option<SeqRecord>, SearchError> {
        match self {
            RecordReader::Fasta(records) => match records.next() {
                Some(Ok(rec)) => Ok(Some(SeqRecord {
                    name: rec.id().to_string(),
                    seq: rec.seq().to_vec(),
                    qual: None,
                })),
                Some(Err(e)) => Err(SearchError::Input(format!("bad FASTA record: {}", e))),
                None => Ok(None),
            },
            RecordReader::Fastq(records) => match records.next() {
                Some(Ok(rec)) => Ok(Some(SeqRecord {
                    name: rec.id().to_string(),
                    seq: rec.seq().to_vec(),
                    qual: Some(String::from_utf8_lossy(rec.qual()).into_owned()),
                })),
                Some(Err(e)) => Err(SearchError::Input(format!("bad FASTQ record: {}", e))),
                None => Ok(None),
            },
        }
    }
}

/// Lockstep reader over 1 or 2 read columns.
pub struct SeqInput {
    cols: Vec<RecordReader>,
    pending: Option<Vec<SeqRecord>>,
    done: bool,
}

impl SeqInput {
    pub fn open(paths: &[PathBuf]) -> Result<Self, SearchError> {
        if paths.is_empty() || paths.len() > 2 {
            return Err(SearchError::Input(format!(
                "expected one or two read files, got {}",
                paths.len()
            )));
        }
        let mut cols = Vec::with_capacity(paths.len());
        for p in paths {
            cols.push(RecordReader::open(p)?);
        }
        let mut input = Self {
            cols,
            pending: None,
            done: false,
        };
        input.refill()?;
        Ok(input)
    }

    pub fn ncols(&self) -> usize {
        self.cols.len()
    }

    /// True when the stream is exhausted.
    pub fn done(&self) -> bool {
        self.done
    }

    /// The next row: one record per column.
    pub fn next_row(&mut self) -> Result<Option<Vec<SeqRecord>>, SearchError> {
        if self.done {
            return Ok(None);
        }
        let row = self.pending.take();
        self.refill()?;
        Ok(row)
    }

    fn refill(&mut self) -> Result<(), SearchError> {
        let mut row = Vec::with_capacity(self.cols.len());
        let mut eof = 0usize;
        for col in &mut self.cols {
            match col.next_rec()? {
                Some(rec) => row.push(rec),
                None => eof += 1,
            }
        }
        if eof == self.cols.len() {
            self.pending = None;
            self.done = true;
        } else if eof > 0 {
            return Err(SearchError::Input(
                "unbalanced paired input: one mate file ended early".to_string(),
            ));
        } else {
            self.pending = Some(row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a.fa")).unwrap(), Format::Fasta);
        assert_eq!(
            detect_format(Path::new("a.fastq.gz")).unwrap(),
            Format::Fastq
        );
        assert_eq!(detect_format(Path::new("a.fq")).unwrap(), Format::Fastq);
        assert!(detect_format(Path::new("a.sam")).is_err());
    }

    #[test]
    fn test_single_column_fastq() {
        let dir = TempDir::new().unwrap();
        let p = write_file(
            dir.path(),
            "r.fq",
            "@r1\nACGT\n+\nIIII\n@r2\nTTTT\n+\nIIII\n",
        );
        let mut input = SeqInput::open(&[p]).unwrap();
        assert_eq!(input.ncols(), 1);
        assert!(!input.done());

        let row = input.next_row().unwrap().unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0].name, "r1");
        assert_eq!(row[0].seq, b"ACGT");
        assert_eq!(row[0].qual.as_deref(), Some("IIII"));

        let row = input.next_row().unwrap().unwrap();
        assert_eq!(row[0].name, "r2");
        assert!(input.done());
        assert!(input.next_row().unwrap().is_none());
    }

    #[test]
    fn test_two_column_lockstep() {
        let dir = TempDir::new().unwrap();
        let p1 = write_file(dir.path(), "r1.fa", ">a/1\nACGT\n>b/1\nGGGG\n");
        let p2 = write_file(dir.path(), "r2.fa", ">a/2\nTTTT\n>b/2\nCCCC\n");
        let mut input = SeqInput::open(&[p1, p2]).unwrap();
        assert_eq!(input.ncols(), 2);

        let row = input.next_row().unwrap().unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].name, "a/1");
        assert_eq!(row[1].name, "a/2");
        assert!(row[0].qual.is_none());

        input.next_row().unwrap().unwrap();
        assert!(input.done());
    }

    #[test]
    fn test_ragged_columns_fail() {
        let dir = TempDir::new().unwrap();
        let p1 = write_file(dir.path(), "r1.fa", ">a/1\nACGT\n>b/1\nGGGG\n");
        let p2 = write_file(dir.path(), "r2.fa", ">a/2\nTTTT\n");
        let mut input = SeqInput::open(&[p1, p2]).unwrap();
        input.next_row().unwrap().unwrap();
        assert!(input.next_row().is_err());
    }

    #[test]
    fn test_empty_input_is_done_immediately() {
        let dir = TempDir::new().unwrap();
        let p = write_file(dir.path(), "r.fa", "");
        let input = SeqInput::open(&[p]).unwrap();
        assert!(input.done());
    }

    #[test]
    fn test_gzip_input() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("r.fq.gz");
        let f = fs::File::create(&p).unwrap();
        let mut gz = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        gz.write_all(b"@r1\nACGT\n+\nIIII\n").unwrap();
        gz.finish().unwrap();

        let mut input = SeqInput::open(&[p]).unwrap();
        let row = input.next_row().unwrap().unwrap();
        assert_eq!(row[0].seq, b"ACGT");
        assert!(input.done());
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(SeqInput::open(&[PathBuf::from("/nonexistent/r.fq")]).is_err());
    }
}
