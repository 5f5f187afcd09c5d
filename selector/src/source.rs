//! Turns input paths into a stream of instances.

use anyhow::{bail, Context, Result};
use pmi_core::Instance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What one instance is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Every record line is an instance.
    #[default]
    Line,
    /// All records of one file are unioned into a single instance.
    File,
}

/// Expands files and directories into `.jsonl` files, directories walked in sorted order.
pub fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.with_context(|| format!("walking {}", path.display()))?;
                let p = entry.path();
                if p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                    files.push(p.to_path_buf());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("input {} does not exist", path.display());
        }
    }
    Ok(files)
}

struct OpenFile {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

/// Reads instances from a list of files, one file after another.
pub struct InstanceReader {
    files: std::vec::IntoIter<PathBuf>,
    granularity: Granularity,
    current: Option<OpenFile>,
}

impl InstanceReader {
    pub fn new(files: Vec<PathBuf>, granularity: Granularity) -> Self {
        Self { files: files.into_iter(), granularity, current: None }
    }

    fn next_line(&mut self) -> Option<Result<Instance>> {
        loop {
            if self.current.is_none() {
                let path = self.files.next()?;
                match File::open(&path) {
                    Ok(f) => self.current = Some(OpenFile { lines: BufReader::new(f).lines(), path, line: 0 }),
                    Err(e) => return Some(Err(anyhow::Error::new(e).context(format!("reading {}", path.display())))),
                }
            }
            let file = self.current.as_mut()?;
            let line = match file.lines.next() {
                Some(line) => line,
                None => {
                    self.current = None;
                    continue;
                }
            };
            file.line += 1;
            let at = || format!("{}:{}", file.path.display(), file.line);
            let parsed = line
                .map_err(anyhow::Error::new)
                .and_then(|l| Instance::parse_line(&l))
                .with_context(at);
            match parsed {
                Ok(Some(instance)) => return Some(Ok(instance)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn next_file(&mut self) -> Option<Result<Instance>> {
        loop {
            let path = self.files.next()?;
            match read_file_instance(&path) {
                Ok(Some(instance)) => return Some(Ok(instance)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Iterator for InstanceReader {
    type Item = Result<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.granularity {
            Granularity::Line => self.next_line(),
            Granularity::File => self.next_file(),
        }
    }
}

/// Unions every record in `path`; `None` for a file without records.
fn read_file_instance(path: &Path) -> Result<Option<Instance>> {
    let f = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let mut label: Option<String> = None;
    let mut features = BTreeSet::new();
    let mut records = 0usize;
    for (i, line) in BufReader::new(f).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        let instance = match Instance::parse_line(&line).with_context(|| format!("{}:{}", path.display(), i + 1))? {
            Some(instance) => instance,
            None => continue,
        };
        records += 1;
        match (&label, instance.label) {
            (Some(seen), Some(l)) if *seen != l => {
                bail!("{}: records carry different labels {seen:?} and {l:?}", path.display());
            }
            (None, Some(l)) => label = Some(l),
            _ => {}
        }
        features.extend(instance.features);
    }
    if records == 0 {
        return Ok(None);
    }
    Ok(Some(Instance { label, features: features.into_iter().collect() }))
}
