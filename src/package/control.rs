//! Debian control file parsing.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata read from a package's `control` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub architecture: String,
    /// `Installed-Size` in KiB, when declared.
    pub installed_size_kib: Option<u64>,
    pub depends: Vec<String>,
    pub conflicts: Vec<String>,
    pub description: Option<String>,
    pub maintainer: Option<String>,
    pub multi_arch: Option<String>,
    pub essential: bool,
}

impl PackageMetadata {
    /// Parse the text of a control file.
    ///
    /// `Package`, `Version` and `Architecture` are required; everything else
    /// is optional.
    pub fn parse(text: &str) -> Result<Self> {
        let fields = parse_fields(text);

        let required = |key: &str| -> Result<String> {
            match fields.get(key) {
                Some(value) if !value.is_empty() => Ok(value.clone()),
                _ => bail!("Control file is missing the {} field", key),
            }
        };

        let name = required("package")?;
        let version = required("version")?;
        let architecture = required("architecture")?;

        let installed_size_kib = match fields.get("installed-size") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("Invalid Installed-Size '{}'", raw))?,
            ),
            None => None,
        };

        Ok(PackageMetadata {
            name,
            version,
            architecture,
            installed_size_kib,
            depends: fields.get("depends").map(|d| split_relations(d)).unwrap_or_default(),
            conflicts: fields
                .get("conflicts")
                .map(|d| split_relations(d))
                .unwrap_or_default(),
            description: fields
                .get("description")
                .and_then(|d| d.lines().next())
                .map(|s| s.trim().to_string()),
            maintainer: fields.get("maintainer").cloned(),
            multi_arch: fields.get("multi-arch").cloned(),
            essential: fields
                .get("essential")
                .map(|e| e.eq_ignore_ascii_case("yes"))
                .unwrap_or(false),
        })
    }

    /// Bytes the package is expected to occupy once unpacked.
    pub fn installed_size_bytes(&self) -> u64 {
        self.installed_size_kib.unwrap_or(0).saturating_mul(1024)
    }

    /// `name:arch`, the form dpkg uses to address one architecture of a package.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.name, self.architecture)
    }
}

/// Split a control file into lower-cased field names and values, folding
/// continuation lines into the previous field.
fn parse_fields(text: &str) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            // A control file may hold more than one paragraph; only the first matters.
            if current.is_some() {
                break;
            }
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(key) = &current
                && let Some(value) = fields.get_mut(key)
            {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            fields.insert(key.clone(), value.trim().to_string());
            current = Some(key);
        }
    }

    fields
}

/// Split a relationship field into its comma-separated clauses, keeping
/// alternatives (`a | b`) and version constraints intact.
fn split_relations(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|clause| clause.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|clause| !clause.is_empty())
        .collect()
}
