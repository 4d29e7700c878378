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

//! Rewrites `@@`-delimited command-line arguments into document portal handles and,
//! when the portal is reachable, mounts the per-app document directory into the sandbox.
//!
//! The portal is a D-Bus service; like every other external peer in this crate it is
//! reached through a subprocess (`busctl`) rather than a linked client library.

use std::{path::Path, process::Command};

use crate::{constants::BUSCTL_EXECUTABLE, err, exec::args::ExecutionArgs, export::ExportPlanner, impl_error, Result};

const PORTAL_DEST: &str = "org.freedesktop.portal.Documents";
const PORTAL_PATH: &str = "/org/freedesktop/portal/documents";
const PORTAL_IFACE: &str = "org.freedesktop.portal.Documents";

#[derive(Debug)]
pub enum DocPortalError {
    Unreachable,
    AddFailed(String),
}

impl std::fmt::Display for DocPortalError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable => write!(fmter, "Document portal is unreachable."),
            Self::AddFailed(detail) => write!(fmter, "Document portal refused to add a file: {detail}"),
        }
    }
}

impl_error!(DocPortalError);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    None,
    Path,
    Uri,
}

pub struct DocPortalForwarder {
    app_id: String,
    mount_point: Option<String>,
}

impl DocPortalForwarder {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            mount_point: None,
        }
    }

    /// Queries `GetMountPoint`; a reachable portal caches its answer for [`Self::bind`].
    pub fn probe(&mut self) -> bool {
        let output = Command::new(*BUSCTL_EXECUTABLE)
            .args(["--user", "call", PORTAL_DEST, PORTAL_PATH, PORTAL_IFACE, "GetMountPoint"])
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                self.mount_point = parse_ay_string(&text);
                self.mount_point.is_some()
            }
            _ => false,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.mount_point.is_some()
    }

    /// Binds `<mount>/by-app/<app-id>` at `/run/user/<uid>/doc` per spec step 9.
    pub fn bind(&self, uid: u32, out: &mut ExecutionArgs) {
        let Some(mount) = &self.mount_point else { return };
        out.robind(&format!("{mount}/by-app/{}", self.app_id), &format!("/run/user/{uid}/doc"));
    }

    /// Rewrites `@@`/`@@u` spans in `argv`, forwarding any argument not already visible
    /// through `planner` to the portal and substituting the document handle in place.
    pub fn rewrite_arguments(&self, argv: &[String], planner: &ExportPlanner) -> Result<Vec<String>> {
        let Some(mount) = &self.mount_point else { return Ok(argv.to_vec()) };

        let mut out = Vec::with_capacity(argv.len());
        let mut span = Span::None;

        for arg in argv {
            match arg.as_str() {
                "@@" if span == Span::None => {
                    span = Span::Path;
                    continue;
                }
                "@@u" if span == Span::None => {
                    span = Span::Uri;
                    continue;
                }
                "@@" => {
                    span = Span::None;
                    continue;
                }
                _ => {}
            }

            if span == Span::None || !arg.starts_with('/') {
                out.push(arg.clone());
                continue;
            }

            let path = Path::new(arg);

            if planner.is_visible(path) {
                out.push(arg.clone());
                continue;
            }

            let basename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| arg.clone());
            let doc_id = self.add_and_grant(path)?;

            out.push(match span {
                Span::Uri => format!("file://{mount}/{doc_id}/{basename}"),
                _ => format!("{mount}/{doc_id}/{basename}"),
            });
        }

        Ok(out)
    }

    fn add_and_grant(&self, path: &Path) -> Result<String> {
        let add = Command::new(*BUSCTL_EXECUTABLE)
            .args(["--user", "call", PORTAL_DEST, PORTAL_PATH, PORTAL_IFACE, "Add", "hbb", "3", "false", "false"])
            .arg(path)
            .output()
            .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::ProcessInitFailure(*BUSCTL_EXECUTABLE, e.kind()))))?;

        if !add.status.success() {
            return err!(DocPortalError::AddFailed(String::from_utf8_lossy(&add.stderr).into_owned()));
        }

        let doc_id = parse_s_string(&String::from_utf8_lossy(&add.stdout)).ok_or_else(|| crate::error!(DocPortalError::AddFailed("no document id returned".into())))?;

        let grant = Command::new(*BUSCTL_EXECUTABLE)
            .args(["--user", "call", PORTAL_DEST, PORTAL_PATH, PORTAL_IFACE, "GrantPermissions", "ssas", &doc_id, &self.app_id, "2", "read", "write"])
            .output()
            .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::ProcessInitFailure(*BUSCTL_EXECUTABLE, e.kind()))))?;

        if !grant.status.success() {
            return err!(DocPortalError::AddFailed(String::from_utf8_lossy(&grant.stderr).into_owned()));
        }

        Ok(doc_id)
    }
}

fn parse_ay_string(text: &str) -> Option<String> {
    text.split('"').nth(1).map(|s| s.strip_suffix("\\0").unwrap_or(s).to_string())
}

fn parse_s_string(text: &str) -> Option<String> {
    text.split('"').nth(1).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_portal_leaves_argv_untouched() {
        let forwarder = DocPortalForwarder::new("org.example.App");
        let planner = ExportPlanner::new();
        let argv = vec!["@@".to_string(), "/outside/path".to_string(), "@@".to_string()];
        assert_eq!(forwarder.rewrite_arguments(&argv, &planner).unwrap(), argv);
    }

    #[test]
    fn non_absolute_argument_inside_span_is_not_rewritten() {
        let mut forwarder = DocPortalForwarder::new("org.example.App");
        forwarder.mount_point = Some("/run/flatpak/doc".to_string());
        let planner = ExportPlanner::new();
        let argv = vec!["@@".to_string(), "other.txt".to_string(), "@@".to_string()];
        let rewritten = forwarder.rewrite_arguments(&argv, &planner).unwrap();
        assert_eq!(rewritten, vec!["other.txt".to_string()]);
    }

    #[test]
    fn parse_ay_string_extracts_quoted_path() {
        assert_eq!(parse_ay_string("ay 13 \"/run/flatpak/doc\\0\""), Some("/run/flatpak/doc".to_string()));
    }
}
