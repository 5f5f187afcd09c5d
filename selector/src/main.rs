use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pmi_core::{IndexMode, SelectorConfig, Shard};
use pmi_select::{load_config, run_merge, run_select, Granularity, SelectOptions};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pmi-select")]
#[command(about = "Select top-K features per label by discounted PMI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream instances and write PMI checkpoints
    Select(SelectArgs),
    /// Concatenate shard outputs and re-truncate to the top-K per label
    Merge {
        /// Shard checkpoint files
        #[arg(long, num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        /// 0 keeps every row
        #[arg(long, default_value_t = 300)]
        top_k: usize,
    },
}

#[derive(Args)]
struct SelectArgs {
    /// Files or directories with positive instances, read first
    #[arg(long, num_args = 1..)]
    positives: Vec<PathBuf>,
    /// Files or directories with negative instances
    #[arg(long, num_args = 1..)]
    negatives: Vec<PathBuf>,
    /// Checkpoint directory
    #[arg(long)]
    output: PathBuf,
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Shard as index/count, e.g. 2/8
    #[arg(long, default_value = "0/1")]
    shard: String,
    #[arg(long, value_enum, default_value_t = Granularity::Line)]
    granularity: Granularity,
    #[arg(long)]
    top_k: Option<usize>,
    /// Discount lambda
    #[arg(long)]
    discount: Option<f64>,
    /// exact, approx or both
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    approx_k: Option<usize>,
    #[arg(long)]
    approx_buffer: Option<usize>,
    #[arg(long)]
    bloom_capacity: Option<usize>,
    #[arg(long)]
    bloom_max_fpp: Option<f64>,
    #[arg(long)]
    min_negative_checkpoint: Option<u64>,
    /// Labels counted but never written; repeatable
    #[arg(long = "skip-label")]
    skip_labels: Vec<String>,
    /// Keep only features with one of these prefixes; repeatable
    #[arg(long = "feature-prefix")]
    feature_prefixes: Vec<String>,
    #[arg(long, default_value_t = 100_000)]
    progress_every: u64,
    /// Write state.bin next to every checkpoint
    #[arg(long, default_value_t = false)]
    save_state: bool,
    /// Continue from a saved state.bin
    #[arg(long)]
    resume: Option<PathBuf>,
}

impl SelectArgs {
    fn selector_config(&self) -> Result<SelectorConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(v) = self.top_k {
            config.top_k = v;
        }
        if let Some(v) = self.discount {
            config.discount = v;
        }
        if let Some(v) = &self.mode {
            config.mode = v.parse::<IndexMode>()?;
        }
        if let Some(v) = self.approx_k {
            config.approx_k = v;
        }
        if let Some(v) = self.approx_buffer {
            config.approx_buffer = v;
        }
        if let Some(v) = self.bloom_capacity {
            config.bloom_capacity = v;
        }
        if let Some(v) = self.bloom_max_fpp {
            config.bloom_max_fpp = v;
        }
        if let Some(v) = self.min_negative_checkpoint {
            config.min_negative_checkpoint = v;
        }
        config.skip_labels.extend(self.skip_labels.iter().cloned());
        config.feature_prefixes.extend(self.feature_prefixes.iter().cloned());
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Select(args) => {
            let opts = SelectOptions {
                config: args.selector_config()?,
                shard: args.shard.parse::<Shard>()?,
                positives: args.positives,
                negatives: args.negatives,
                output: args.output,
                granularity: args.granularity,
                progress_every: args.progress_every,
                save_state: args.save_state,
                resume: args.resume,
            };
            run_select(&opts)?;
            Ok(())
        }
        Commands::Merge { inputs, output, top_k } => {
            run_merge(&inputs, &output, top_k)?;
            Ok(())
        }
    }
}
