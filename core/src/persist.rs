use crate::checkpoint::CheckpointKind;
use crate::rank::PmiRow;
use crate::Shard;
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{create_dir_all, remove_file, rename, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

/// Sidecar describing one checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub checkpoint: String,
    pub positives: u64,
    pub negatives: u64,
    pub instances: u64,
    pub rows: usize,
    pub shard: String,
    pub created_at: String,
    pub version: u32,
}

pub struct CheckpointPaths {
    pub root: PathBuf,
    prefix: String,
}

impl CheckpointPaths {
    pub fn new<P: AsRef<Path>>(root: P, shard: &Shard) -> Self {
        Self { root: root.as_ref().to_path_buf(), prefix: shard.file_prefix() }
    }
    pub fn checkpoint(&self, kind: CheckpointKind) -> PathBuf {
        self.root.join(format!("{}{}.pmi", self.prefix, kind.file_stem()))
    }
    pub fn approx_checkpoint(&self, kind: CheckpointKind) -> PathBuf {
        self.root.join(format!("{}{}.approx.pmi", self.prefix, kind.file_stem()))
    }
    pub fn meta(&self, kind: CheckpointKind) -> PathBuf {
        self.root.join(format!("{}{}.meta.json", self.prefix, kind.file_stem()))
    }
    pub fn state(&self) -> PathBuf {
        self.root.join(format!("{}state.bin", self.prefix))
    }
}

/// `path` with `.partial` appended; nothing at the final name is ever half written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(dir) = path.parent() {
        create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = partial_path(path);
    let result = (|| -> Result<()> {
        let f = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        let mut w = BufWriter::new(f);
        write(&mut w)?;
        let f = w.into_inner().map_err(|e| e.into_error()).with_context(|| format!("flushing {}", tmp.display()))?;
        f.sync_all()?;
        rename(&tmp, path).with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))
    })();
    if result.is_err() {
        // the write error is the one to report
        let _ = remove_file(&tmp);
    }
    result
}

pub fn format_row(row: &PmiRow) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        row.label, row.feature, row.pmi, row.discounted_pmi, row.co_occurrence, row.instances
    )
}

pub fn parse_row(line: &str) -> Result<PmiRow> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 6 {
        bail!("expected 6 tab-separated fields, found {}: {line:?}", fields.len());
    }
    Ok(PmiRow {
        label: fields[0].to_string(),
        feature: fields[1].to_string(),
        pmi: fields[2].parse().with_context(|| format!("bad pmi in {line:?}"))?,
        discounted_pmi: fields[3].parse().with_context(|| format!("bad discounted pmi in {line:?}"))?,
        co_occurrence: fields[4].parse().with_context(|| format!("bad co-occurrence in {line:?}"))?,
        instances: fields[5].parse().with_context(|| format!("bad instance count in {line:?}"))?,
    })
}

pub fn write_rows(path: &Path, rows: &[PmiRow]) -> Result<()> {
    write_atomically(path, |w| {
        for row in rows {
            writeln!(w, "{}", format_row(row))?;
        }
        Ok(())
    })
    .with_context(|| format!("writing checkpoint {}", path.display()))
}

pub fn read_rows(path: &Path) -> Result<Vec<PmiRow>> {
    let f = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let mut rows = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        rows.push(parse_row(&line)?);
    }
    Ok(rows)
}

pub fn save_meta(path: &Path, meta: &MetaFile) -> Result<()> {
    write_atomically(path, |w| {
        let json = serde_json::to_string_pretty(meta)?;
        w.write_all(json.as_bytes())?;
        Ok(())
    })
}

pub fn load_meta(path: &Path) -> Result<MetaFile> {
    let mut f = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

pub fn save_state<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    write_atomically(path, |w| {
        bincode::serialize_into(w, state)?;
        Ok(())
    })
    .with_context(|| format!("writing state {}", path.display()))
}

pub fn load_state<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let state = bincode::deserialize_from(BufReader::new(f)).with_context(|| format!("decoding {}", path.display()))?;
    Ok(state)
}
