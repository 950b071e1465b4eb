//! matmul-harness: concurrent correctness harness for offloaded matrix multiply.

use std::process;

use clap::Parser;

use offload_harness::cli::{self, OutputFormat};
use offload_harness::config::{DEFAULT_COLS, DEFAULT_INNER, DEFAULT_ROWS, DEFAULT_TRIALS};
use offload_harness::matrix::DEFAULT_VALUE_BOUND;
use offload_harness::{Console, Harness, HarnessConfig, MatMulDims};

#[derive(Parser)]
#[command(
    name = "matmul-harness",
    about = "Run concurrent matrix-multiply trials on an accelerator and verify them on the host"
)]
struct Args {
    /// Rows of A and C
    #[arg(long, default_value_t = DEFAULT_ROWS)]
    rows: usize,

    /// Columns of A, rows of B
    #[arg(long, default_value_t = DEFAULT_INNER)]
    inner: usize,

    /// Columns of B and C
    #[arg(long, default_value_t = DEFAULT_COLS)]
    cols: usize,

    /// Number of concurrent explicit-dispatch trials
    #[arg(short = 'z', long, default_value_t = DEFAULT_TRIALS)]
    trials: usize,

    /// Worker threads (default: available parallelism)
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Base RNG seed; trial i uses seed + i (default: random)
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// Generated elements are drawn from [0, value-bound)
    #[arg(long, default_value_t = DEFAULT_VALUE_BOUND)]
    value_bound: i32,

    /// Leak device buffers instead of freeing them after each trial
    #[arg(long)]
    no_release: bool,

    /// Accelerator backend: auto, sim, cuda
    #[arg(long, default_value = "auto")]
    backend: String,

    /// Summary format printed after the console lines
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output_format: OutputFormat,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

impl Args {
    fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default()
            .with_dims(MatMulDims::new(self.rows, self.inner, self.cols))
            .with_trials(self.trials)
            .with_value_bound(self.value_bound)
            .with_release_device_memory(!self.no_release);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version are not failures
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(cli::USAGE_ERROR_EXIT_CODE);
        }
    };
    cli::init_logging(args.log_disable);

    match run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(cli::USAGE_ERROR_EXIT_CODE);
        }
    }
}

fn run(args: Args) -> Result<i32, Box<dyn std::error::Error>> {
    let config = args.config();
    config.validate()?;

    let accel = cli::backend::resolve_backend(Some(&args.backend))?;
    let summary = Harness::new(accel, config, Console::stdout()).run()?;

    if let Some(rendered) = cli::render_summary(&summary, args.output_format)? {
        println!("{}", rendered);
    }
    Ok(summary.exit_code())
}
