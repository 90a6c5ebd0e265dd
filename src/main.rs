use clap::{Parser, Subcommand};
use std::path::PathBuf;

use prism_align::index::build_index;
use prism_align::search::Search;
use prism_align::search_opt::{SearchMode, SearchOpt};

#[derive(Parser)]
#[command(name = "prism-align")]
#[command(about = "prism-align - bounded-error short-read aligner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the reference index
    Index {
        /// Input FASTA file
        #[arg(value_name = "REF.FA")]
        fasta: PathBuf,

        /// Prefix for index files (default: same as FASTA)
        #[arg(short = 'p', long, value_name = "PREFIX")]
        prefix: Option<PathBuf>,
    },

    /// Search reads against a pre-built index
    Search {
        /// Index base path (built with 'index')
        #[arg(value_name = "INDEX")]
        index: PathBuf,

        /// Input read file(s): one for unpaired, two for paired
        #[arg(value_name = "READS", required = true)]
        reads: Vec<PathBuf>,

        /// Output SAM file (default: stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Unpaired search
        #[arg(short = 'U', long)]
        unpaired: bool,

        /// Paired search
        #[arg(short = 'P', long)]
        paired: bool,

        /// Memory limit in megabytes
        #[arg(short = 'M', long, value_name = "MB", default_value = "2048")]
        mem_limit: usize,

        /// Batch size limit in reads
        #[arg(short = 'b', long, value_name = "INT", default_value = "10000000")]
        batch_limit: usize,

        /// First batch to execute (1-based)
        #[arg(long, value_name = "INT", default_value = "1")]
        start_batch: u32,

        /// Last batch to execute (1-based, inclusive)
        #[arg(long, value_name = "INT")]
        end_batch: Option<u32>,

        /// Count only exactly-full batches toward the batch number
        #[arg(long)]
        strict_batch: bool,

        /// Worker count (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,

        /// Per-read error budget (substitutions and indels)
        #[arg(short = 'n', long, value_name = "INT", default_value = "2")]
        n_err: u32,

        /// Longest accepted query
        #[arg(long, value_name = "INT", default_value = "512")]
        max_qlen: usize,

        /// Expected mate separation
        #[arg(long, value_name = "INT", default_value = "500")]
        pair_distance: u32,

        /// Tolerated deviation from the pair distance
        #[arg(long, value_name = "INT", default_value = "100")]
        pair_fuzz: u32,

        /// Result configuration: 4 characters of 0/1, or illumina, 454, solid
        #[arg(short = 'r', long, value_name = "STR", default_value = "1111")]
        resconf: String,

        /// Search mode: default, sum-err, partial, bound-err
        #[arg(short = 'm', long, value_name = "MODE", default_value = "default")]
        mode: String,

        /// Subject-area window start (1-based; negative requests
        /// reverse-strand scanning)
        #[arg(long, value_name = "INT", default_value = "1", allow_hyphen_values = true)]
        sa_start: i64,

        /// Subject-area window end (default: the whole reference)
        #[arg(long, value_name = "INT", allow_hyphen_values = true)]
        sa_end: Option<i64>,

        /// Break over-limit result ties randomly
        #[arg(long)]
        randomize: bool,

        /// Seed for randomized tie-breaking
        #[arg(long, value_name = "INT", default_value = "0")]
        seed: u64,

        /// Temp directory for per-batch files (default: system temp)
        #[arg(long, value_name = "DIR")]
        tmpdir: Option<PathBuf>,

        /// Do not report unmapped reads
        #[arg(long)]
        skip_unmapped: bool,

        /// Keep query names from the input instead of ordinal ids
        #[arg(long)]
        use_qids: bool,

        /// Report subject names from the id map instead of ordinals
        #[arg(long)]
        use_sids: bool,

        /// Skip seeds occurring more often than INT
        #[arg(long, value_name = "INT", default_value = "4096")]
        repeat_threshold: u32,

        /// Most results reported per read
        #[arg(long, value_name = "INT", default_value = "10")]
        res_limit: u32,

        /// Learn the mate separation online (forces one worker)
        #[arg(long)]
        discover_sep: bool,

        /// Stop the run once the separation estimate is final
        #[arg(long)]
        discover_sep_stop: bool,

        /// Insert-size histogram output
        #[arg(long, value_name = "FILE")]
        hist: Option<PathBuf>,

        /// Emit optional SAM tags (NM)
        #[arg(long)]
        extra_tags: bool,

        /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
        #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
        verbosity: i32,
    },
}

fn init_logger(verbosity: i32) {
    let log_level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() {
    let cmdline = std::env::args().collect::<Vec<_>>().join(" ");
    let cli = Cli::parse();

    match cli.command {
        Commands::Index { fasta, prefix } => {
            init_logger(3);

            let idx_prefix = prefix.unwrap_or_else(|| fasta.clone());
            log::info!("building index for reference: {}", fasta.display());
            log::info!("index prefix: {}", idx_prefix.display());

            if let Err(e) = build_index(&fasta, &idx_prefix) {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }

        Commands::Search {
            index,
            reads,
            output,
            unpaired,
            paired,
            mem_limit,
            batch_limit,
            start_batch,
            end_batch,
            strict_batch,
            threads,
            n_err,
            max_qlen,
            pair_distance,
            pair_fuzz,
            resconf,
            mode,
            sa_start,
            sa_end,
            randomize,
            seed,
            tmpdir,
            skip_unmapped,
            use_qids,
            use_sids,
            repeat_threshold,
            res_limit,
            discover_sep,
            discover_sep_stop,
            hist,
            extra_tags,
            verbosity,
        } => {
            init_logger(verbosity);

            let search_mode: SearchMode = match mode.parse() {
                Ok(m) => m,
                Err(e) => {
                    log::error!("{}", e);
                    std::process::exit(1);
                }
            };

            let mut opt = SearchOpt::default();
            opt.index_basename = index;
            opt.input = reads;
            opt.output = output;
            opt.force_unpaired = unpaired;
            opt.force_paired = paired;
            opt.mem_limit = mem_limit;
            opt.batch_limit = batch_limit;
            opt.start_batch = start_batch;
            opt.end_batch = end_batch.unwrap_or(u32::MAX);
            opt.strict_batch = strict_batch;
            opt.n_threads = threads.unwrap_or_else(num_cpus::get).max(1);
            opt.n_err = n_err;
            opt.max_qlen = max_qlen;
            opt.pair_distance = pair_distance;
            opt.pair_fuzz = pair_fuzz;
            opt.resconf_str = resconf;
            opt.search_mode = search_mode;
            opt.sa_start = sa_start;
            opt.sa_end = sa_end.unwrap_or(if sa_start >= 0 { i64::MAX } else { sa_start });
            opt.randomize = randomize;
            opt.random_seed = seed;
            if let Some(dir) = tmpdir {
                opt.tmpdir = dir;
            }
            opt.skip_unmapped = skip_unmapped;
            opt.use_qids = use_qids;
            opt.use_sids = use_sids;
            opt.repeat_threshold = repeat_threshold;
            opt.res_limit = res_limit;
            opt.discover_sep = discover_sep;
            opt.discover_sep_stop = discover_sep_stop;
            opt.hist_fname = hist;
            opt.extra_tags = extra_tags;
            opt.cmdline = cmdline;

            log::info!("searching {} with {} workers", opt.index_basename.display(), opt.n_threads);

            let mut search = match Search::new(&opt) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("{}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = search.run() {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }
    }
}
