//! The streaming batch job behind `pmi-select`: reads instance files, feeds a
//! [`PmiSelector`], and writes checkpoints when the scheduler asks for them.

pub mod source;

use anyhow::{bail, Context, Result};
use pmi_core::persist::{load_state, read_rows, save_meta, save_state, write_rows, CheckpointPaths, MetaFile, FORMAT_VERSION};
use pmi_core::rank::merge_top_k;
use pmi_core::{CheckpointKind, CheckpointScheduler, InstanceClass, PmiSelector, SelectorConfig, Shard};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use source::{collect_inputs, Granularity, InstanceReader};

pub struct SelectOptions {
    pub positives: Vec<PathBuf>,
    pub negatives: Vec<PathBuf>,
    pub output: PathBuf,
    pub config: SelectorConfig,
    pub shard: Shard,
    pub granularity: Granularity,
    /// Log index statistics every this many instances; 0 turns it off.
    pub progress_every: u64,
    pub save_state: bool,
    pub resume: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub positives: u64,
    pub negatives: u64,
    pub checkpoints: Vec<PathBuf>,
}

/// Everything needed to pick a run up where it stopped.
#[derive(Serialize, Deserialize)]
struct RunState {
    selector: PmiSelector,
    scheduler: CheckpointScheduler,
    consumed: u64,
    granularity: Granularity,
    /// Input files in reading order; a resumed run must read these first.
    inputs: Vec<PathBuf>,
}

pub fn load_config(path: Option<&Path>) -> Result<SelectorConfig> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: SelectorConfig = serde_json::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
            Ok(config)
        }
        None => Ok(SelectorConfig::default()),
    }
}

pub fn run_select(opts: &SelectOptions) -> Result<RunSummary> {
    let paths = CheckpointPaths::new(&opts.output, &opts.shard);
    fs::create_dir_all(&paths.root).with_context(|| format!("creating {}", paths.root.display()))?;

    let mut files = collect_inputs(&opts.positives)?;
    files.extend(collect_inputs(&opts.negatives)?);
    if files.is_empty() {
        bail!("no input files");
    }

    let mut run = match &opts.resume {
        Some(state_path) => resume(state_path, opts, &files)?,
        None => RunState {
            selector: PmiSelector::new(opts.config.clone(), opts.shard)?,
            scheduler: CheckpointScheduler::new(opts.config.min_negative_checkpoint),
            consumed: 0,
            granularity: opts.granularity,
            inputs: Vec::new(),
        },
    };
    run.inputs = files.clone();

    tracing::info!(
        files = files.len(),
        shard = %opts.shard,
        mode = %run.selector.config().mode,
        skip = run.consumed,
        "starting selection"
    );

    let mut writer = CheckpointWriter { paths, save_state: opts.save_state, written: Vec::new() };
    let skip = usize::try_from(run.consumed).context("consumed count overflows usize")?;
    for instance in InstanceReader::new(files, opts.granularity).skip(skip) {
        let instance = instance?;
        if instance.class() == InstanceClass::Negative {
            if let Some(kind) = run.scheduler.before_negative() {
                writer.write(kind, &run)?;
            }
        }
        let class = run.selector.add(&instance)?;
        run.consumed += 1;
        let due = match class {
            InstanceClass::Positive => {
                run.scheduler.record_positive();
                None
            }
            InstanceClass::Negative => run.scheduler.record_negative(),
        };
        if let Some(kind) = due {
            writer.write(kind, &run)?;
        }
        if opts.progress_every > 0 && run.consumed % opts.progress_every == 0 {
            run.selector.stats().log("ingest");
        }
    }
    for kind in run.scheduler.finish() {
        writer.write(kind, &run)?;
    }

    tracing::info!(
        positives = run.selector.positives(),
        negatives = run.selector.negatives(),
        checkpoints = writer.written.len(),
        "selection complete"
    );
    Ok(RunSummary {
        positives: run.selector.positives(),
        negatives: run.selector.negatives(),
        checkpoints: writer.written,
    })
}

/// Loads a saved run. The current inputs may append files to the saved list but must
/// otherwise match it, since the consumed instances are skipped by position.
fn resume(state_path: &Path, opts: &SelectOptions, files: &[PathBuf]) -> Result<RunState> {
    let state: RunState = load_state(state_path)?;
    if state.selector.shard() != opts.shard {
        bail!("state in {} was written by shard {}, not {}", state_path.display(), state.selector.shard(), opts.shard);
    }
    if state.granularity != opts.granularity {
        bail!("state in {} was read with {:?} granularity", state_path.display(), state.granularity);
    }
    if !files.starts_with(&state.inputs) {
        bail!(
            "inputs differ from the {} files recorded in {}; resume needs the same files in the same order",
            state.inputs.len(),
            state_path.display()
        );
    }
    if *state.selector.config() != opts.config {
        tracing::warn!(path = %state_path.display(), "resuming with the saved configuration, ignoring the current one");
    }
    tracing::info!(path = %state_path.display(), consumed = state.consumed, "resuming");
    Ok(state)
}

struct CheckpointWriter {
    paths: CheckpointPaths,
    save_state: bool,
    written: Vec<PathBuf>,
}

impl CheckpointWriter {
    /// Only a failed final checkpoint stops the run.
    fn write(&mut self, kind: CheckpointKind, run: &RunState) -> Result<()> {
        match self.try_write(kind, run) {
            Ok(path) => {
                self.written.push(path);
                Ok(())
            }
            Err(e) if kind.is_final() => Err(e),
            Err(e) => {
                tracing::warn!(checkpoint = %kind, error = %format!("{e:#}"), "checkpoint write failed, continuing");
                Ok(())
            }
        }
    }

    fn try_write(&self, kind: CheckpointKind, run: &RunState) -> Result<PathBuf> {
        let (rows, approx_rows) = run.selector.checkpoint_rows()?;
        let path = self.paths.checkpoint(kind);
        write_rows(&path, &rows)?;
        if let Some(extra) = approx_rows {
            write_rows(&self.paths.approx_checkpoint(kind), &extra)?;
        }
        let meta = MetaFile {
            checkpoint: kind.to_string(),
            positives: run.selector.positives(),
            negatives: run.selector.negatives(),
            instances: run.selector.instances(),
            rows: rows.len(),
            shard: run.selector.shard().to_string(),
            created_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            version: FORMAT_VERSION,
        };
        save_meta(&self.paths.meta(kind), &meta)?;
        if self.save_state {
            save_state(&self.paths.state(), run)?;
        }
        tracing::info!(checkpoint = %kind, path = %path.display(), rows = rows.len(), "wrote checkpoint");
        run.selector.stats().log("checkpoint");
        Ok(path)
    }
}

/// Concatenates shard outputs and keeps the best `top_k` rows per label; returns the row count.
pub fn run_merge(inputs: &[PathBuf], output: &Path, top_k: usize) -> Result<usize> {
    let mut rows = Vec::new();
    for input in inputs {
        rows.extend(read_rows(input)?);
    }
    let merged = merge_top_k(rows, top_k);
    write_rows(output, &merged)?;
    tracing::info!(inputs = inputs.len(), rows = merged.len(), output = %output.display(), "merged shard outputs");
    Ok(merged.len())
}
