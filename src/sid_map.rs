//! Optional subject-id map.
//!
//! The `<base>.sid` file carries one line per subject: name, strip offset
//! and length, tab-separated. Only the names are needed at search time;
//! the offsets double as a consistency check against the packed store.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::mem_arena::{ArenaLease, MemArena};
use crate::search::SearchError;

pub struct SidMap {
    names: Vec<String>,
    _lease: ArenaLease,
}

impl SidMap {
    pub fn load(basename: &Path, arena: &Arc<MemArena>) -> Result<Self, SearchError> {
        let path = PathBuf::from(format!("{}.sid", basename.display()));
        let file = File::open(&path).map_err(|e| {
            SearchError::Input(format!(
                "cannot open subject-id map {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut names = Vec::new();
        let mut nbytes = 0usize;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let name = line.split('\t').next().unwrap_or("");
            if name.is_empty() {
                return Err(SearchError::Input(format!(
                    "malformed subject-id map {} at line {}",
                    path.display(),
                    lineno + 1
                )));
            }
            nbytes += name.len() + std::mem::size_of::<String>();
            names.push(name.to_string());
        }

        let lease = MemArena::charge(arena, nbytes)?;
        log::debug!("loaded {} subject ids from {}", names.len(), path.display());

        Ok(Self {
            names,
            _lease: lease,
        })
    }

    pub fn name(&self, ord: usize) -> Option<&str> {
        self.names.get(ord).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
