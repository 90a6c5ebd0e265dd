// Central limits and sizing constants.

/// Bytes per megabyte; the memory cap option is expressed in megabytes.
pub const MEGABYTE: usize = 1024 * 1024;

/// Inclusive bounds for the per-read result limit.
pub const MIN_RES_LIMIT: u32 = 1;
pub const MAX_RES_LIMIT: u32 = 255;

/// Largest per-read error budget the kernel accepts.
pub const MAX_N_ERR: u32 = 15;

/// Bounds on the maximum query length option.
pub const MIN_QLEN: usize = 16;
pub const MAX_QLEN: usize = 8192;

/// Largest allowed insert-size fuzz window.
pub const MAX_PAIR_FUZZ: u32 = 1 << 20;

/// Seed length used by the k-mer index and the alignment kernel.
pub const SEED_LEN: usize = 16;

/// Size of one scratch result buffer handed to a batch.
pub const TMP_RES_BUF_SIZE: usize = MEGABYTE;

/// Number of concordant pairs collected before insert-size discovery
/// finalizes its estimate.
pub const DISCOVER_TARGET: usize = 4096;
