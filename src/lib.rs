//! prism-align: a short-read aligner with bounded-error search and a
//! batched, order-preserving search driver.
//!
//! The driver (`search::Search`) partitions a read stream into batches,
//! runs them under a bounded worker budget and appends per-batch outputs
//! to the final alignment file in strict batch order.

pub mod align;
pub mod batch;
pub mod defaults;
pub mod index;
pub mod insert_size;
pub mod io;
pub mod mem_arena;
pub mod resconf;
pub mod search;
pub mod search_opt;
pub mod sid_map;
pub mod stats;
pub mod tmp_store;
pub mod utils;
