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

//! The interface this crate expects from the deployment store: the component, external
//! to this crate, that resolves a [`Ref`] to file trees, metadata manifests, and
//! extensions. Nothing here is implemented against a real store; these are the seams
//! `LaunchOrchestrator` is written against.

use std::path::{Path, PathBuf};

use crate::{context::manifest::Manifest, extension::Extension};

/// A canonical identifier of an app or runtime: `kind/id/arch/branch`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ref {
    pub kind: RefKind,
    pub id: String,
    pub arch: String,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    App,
    Runtime,
}

impl Ref {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.splitn(4, '/');
        let kind = match parts.next()? {
            "app" => RefKind::App,
            "runtime" => RefKind::Runtime,
            _ => return None,
        };

        Some(Self {
            kind,
            id: parts.next()?.to_string(),
            arch: parts.next()?.to_string(),
            branch: parts.next()?.to_string(),
        })
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            RefKind::App => "app",
            RefKind::Runtime => "runtime",
        };
        write!(fmter, "{kind}/{}/{}/{}", self.id, self.arch, self.branch)
    }
}

/// A resolved deployment: a file tree on disk plus the commit it was deployed at.
pub trait Deployment {
    fn files(&self) -> &Path;
    fn commit(&self) -> &str;
    fn metadata(&self) -> &Manifest;
}

/// Resolves an application deployment, its declared runtime ref, and its extensions.
pub trait AppMetadata: Deployment {
    fn app_id(&self) -> &str;
    fn runtime_ref(&self) -> &Ref;
    fn command(&self) -> &str;
    fn extensions(&self) -> Vec<Box<dyn Extension>>;
    fn data_dir(&self) -> PathBuf;
}

/// Resolves a runtime deployment and its extensions.
pub trait RuntimeMetadata: Deployment {
    fn extensions(&self) -> Vec<Box<dyn Extension>>;
    fn ld_so_conf(&self) -> Option<PathBuf>;
}

/// The external store collaborator: given a [`Ref`], produce the matching metadata.
/// Implemented outside this crate against whatever deployment backend is in use;
/// `LaunchOrchestrator` only ever depends on these trait objects.
pub trait DeploymentStore {
    fn app(&self, app_ref: &Ref) -> crate::Result<Box<dyn AppMetadata>>;
    fn runtime(&self, runtime_ref: &Ref) -> crate::Result<Box<dyn RuntimeMetadata>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_app_ref() {
        let parsed = Ref::parse("app/org.example.App/x86_64/stable").unwrap();
        assert_eq!(parsed.kind, RefKind::App);
        assert_eq!(parsed.id, "org.example.App");
        assert_eq!(parsed.arch, "x86_64");
        assert_eq!(parsed.branch, "stable");
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Ref::parse("bundle/org.example.App/x86_64/stable").is_none());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let original = "runtime/org.example.Platform/x86_64/23.08";
        let parsed = Ref::parse(original).unwrap();
        assert_eq!(parsed.to_string(), original);
    }
}
