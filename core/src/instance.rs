use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// One observation from the instance stream: `{"label": "...", "features": [...]}` for a
/// positive, `{"features": [...]}` for a negative. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceClass {
    Positive,
    Negative,
}

impl Instance {
    pub fn positive(label: impl Into<String>, features: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { label: Some(label.into()), features: features.into_iter().map(Into::into).collect() }
    }

    pub fn negative(features: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { label: None, features: features.into_iter().map(Into::into).collect() }
    }

    pub fn class(&self) -> InstanceClass {
        if self.label.is_some() { InstanceClass::Positive } else { InstanceClass::Negative }
    }

    /// Parses one JSON line; blank lines yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<Instance>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let instance: Instance = serde_json::from_str(line).context("malformed instance record")?;
        instance.validate()?;
        Ok(Some(instance))
    }

    /// Names end up in tab-separated output, one row per line.
    pub fn validate(&self) -> Result<()> {
        if let Some(label) = &self.label {
            if label.is_empty() {
                bail!("instance label is empty");
            }
            check_name(label, "label")?;
        }
        for f in &self.features {
            check_name(f, "feature")?;
        }
        Ok(())
    }
}

fn check_name(name: &str, what: &str) -> Result<()> {
    if name.contains(&['\t', '\n', '\r'][..]) {
        bail!("{what} {name:?} contains a tab or line break");
    }
    Ok(())
}
