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

//! Filesystem expression parsing: `--filesystem=home:ro` and friends normalize to a
//! canonical key (the path expression, stripped of its mode suffix) plus a [`FilesystemMode`].

use std::fmt::{Display, Formatter, Result as FmtResult};

const XDG_PREFIXES: &[&str] = &[
    "xdg-data",
    "xdg-cache",
    "xdg-config",
    "xdg-desktop",
    "xdg-documents",
    "xdg-download",
    "xdg-music",
    "xdg-pictures",
    "xdg-public-share",
    "xdg-templates",
    "xdg-videos",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemMode {
    ReadOnly,
    ReadWrite,
    Create,
    Denied,
}

impl Display for FilesystemMode {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::ReadOnly => write!(fmter, "read-only"),
            Self::ReadWrite => write!(fmter, "read-write"),
            Self::Create => write!(fmter, "create"),
            Self::Denied => write!(fmter, "denied"),
        }
    }
}

/// Splits a raw filesystem token such as `home:ro` or `~/Downloads:create` into its
/// canonical path expression and mode, validating the expression against the recognized
/// symbolic forms (`host`, `home`, `xdg-*[/suffix]`, `xdg-run/suffix`, `~/suffix`, or an
/// absolute path).
pub fn parse_token(token: &str, deny: bool) -> Result<(String, FilesystemMode), String> {
    let (expr, mode) = match token.rsplit_once(':') {
        Some((expr, "ro")) => (expr, FilesystemMode::ReadOnly),
        Some((expr, "rw")) => (expr, FilesystemMode::ReadWrite),
        Some((expr, "create")) => (expr, FilesystemMode::Create),
        _ => (token, FilesystemMode::ReadWrite),
    };

    if !is_canonical(expr) {
        return Err(expr.to_string());
    }

    let mode = if deny { FilesystemMode::Denied } else { mode };
    Ok((expr.to_string(), mode))
}

pub fn is_canonical(expr: &str) -> bool {
    if expr == "host" || expr == "home" {
        return true;
    }

    if let Some(suffix) = expr.strip_prefix("xdg-run") {
        return suffix.starts_with('/') && suffix.len() > 1;
    }

    for prefix in XDG_PREFIXES {
        if expr == *prefix {
            return true;
        }

        if let Some(suffix) = expr.strip_prefix(prefix) {
            if suffix.starts_with('/') {
                return true;
            }
        }
    }

    if let Some(suffix) = expr.strip_prefix("~/") {
        return !suffix.is_empty();
    }

    expr.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ro_suffix() {
        let (expr, mode) = parse_token("home:ro", false).unwrap();
        assert_eq!(expr, "home");
        assert_eq!(mode, FilesystemMode::ReadOnly);
    }

    #[test]
    fn create_mode_is_recognized() {
        let (expr, mode) = parse_token("xdg-download/incoming:create", false).unwrap();
        assert_eq!(expr, "xdg-download/incoming");
        assert_eq!(mode, FilesystemMode::Create);
    }

    #[test]
    fn deny_flag_overrides_suffix_mode() {
        let (_, mode) = parse_token("home:rw", true).unwrap();
        assert_eq!(mode, FilesystemMode::Denied);
    }

    #[test]
    fn rejects_unrecognized_expression() {
        assert!(parse_token("bogus-prefix", false).is_err());
    }

    #[test]
    fn accepts_absolute_and_tilde_paths() {
        assert!(is_canonical("/opt/app"));
        assert!(is_canonical("~/Projects"));
        assert!(!is_canonical("~/"));
    }

    #[test]
    fn xdg_run_requires_nonempty_suffix() {
        assert!(is_canonical("xdg-run/app-socket"));
        assert!(!is_canonical("xdg-run"));
        assert!(!is_canonical("xdg-run/"));
    }
}
