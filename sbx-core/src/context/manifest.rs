/*
 * sbx-core
 *
 * Copyright (C) 2023-2024 Xavier R.M. <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This library is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! A minimal key-file reader/writer for the `[Section]` / `key = value` manifest format
//! metadata and `.flatpak-info` both use. This is intentionally not `serde_yaml` — the wire
//! format here is key-file, not YAML — but keeps the same "parse once, own the result" shape.

use std::fmt::{Display, Formatter, Result as FmtResult};

use indexmap::IndexMap;

use crate::impl_error;

#[derive(Debug)]
pub enum ManifestError {
    MalformedSection(String),
    MalformedEntry(String),
    EntryOutsideSection(String),
}

impl Display for ManifestError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::MalformedSection(line) => write!(fmter, "Malformed section header: '{line}'"),
            Self::MalformedEntry(line) => write!(fmter, "Malformed key-value entry: '{line}'"),
            Self::EntryOutsideSection(line) => write!(fmter, "Entry '{line}' precedes any section header."),
        }
    }
}

impl_error!(ManifestError);

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let mut manifest = Self::new();
        let mut current: Option<String> = None;

        for raw_line in input.lines() {
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                if !line.ends_with(']') || line.len() < 3 {
                    return Err(ManifestError::MalformedSection(line.to_string()));
                }

                let name = line[1 .. line.len() - 1].to_string();
                manifest.sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let Some(section) = current.as_ref() else {
                return Err(ManifestError::EntryOutsideSection(line.to_string()));
            };

            let Some((key, value)) = line.split_once('=') else {
                return Err(ManifestError::MalformedEntry(line.to_string()));
            };

            manifest
                .sections
                .get_mut(section)
                .expect("section was just inserted")
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(manifest)
    }

    pub fn section(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.sections.get(name)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections.entry(section.to_string()).or_default().insert(key.to_string(), value.into());
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &IndexMap<String, String>)> {
        self.sections.iter()
    }
}

impl Display for Manifest {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        for (i, (section, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(fmter)?;
            }

            writeln!(fmter, "[{section}]")?;

            for (key, value) in entries {
                writeln!(fmter, "{key}={value}")?;
            }
        }

        Ok(())
    }
}

/// Splits a comma-separated manifest list value into its entries, trimming whitespace
/// and dropping empty entries (e.g. produced by a trailing comma).
pub fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Splits a semicolon-separated generic-policy value list.
pub fn split_policy_list(value: &str) -> Vec<String> {
    value.split(';').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

pub fn join_list(values: &[String]) -> String {
    values.join(",")
}

pub fn join_policy_list(values: &[String]) -> String {
    values.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_entries() {
        let manifest = Manifest::parse("[Context]\nshared=network,ipc\n\n[Environment]\nFOO=bar\n").unwrap();
        assert_eq!(manifest.section("Context").unwrap().get("shared").unwrap(), "network,ipc");
        assert_eq!(manifest.section("Environment").unwrap().get("FOO").unwrap(), "bar");
    }

    #[test]
    fn rejects_entries_before_any_section() {
        assert!(Manifest::parse("shared=network").is_err());
    }

    #[test]
    fn round_trips_through_display() {
        let mut manifest = Manifest::new();
        manifest.set("Context", "shared", "network");
        let rendered = manifest.to_string();
        let reparsed = Manifest::parse(&rendered).unwrap();
        assert_eq!(reparsed.section("Context").unwrap().get("shared").unwrap(), "network");
    }

    #[test]
    fn list_helpers_round_trip() {
        let values = split_list("network, ipc,");
        assert_eq!(values, vec!["network".to_string(), "ipc".to_string()]);
        assert_eq!(join_list(&values), "network,ipc");
    }
}
