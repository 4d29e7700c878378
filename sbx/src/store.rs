/*
 * sbx
 *
 * Copyright (C) 2023-2024 Xavier R.M. <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify
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

//! A conventional on-disk [`DeploymentStore`]: deployments live under
//! `<data-dir>/deployments/<kind>/<id>/<arch>/<branch>/`, each holding a `files/` tree, a
//! `metadata` key-file, and a `commit` file. This is sbx-core's one external collaborator;
//! nothing in sbx-core depends on this layout, it just happens to be what the `sbx` binary
//! ships so `run`/`info`/`doctor` have something real to resolve against.

use std::{fs, path::PathBuf};

use sbx_core::{
    constants::DATA_DIR,
    context::manifest::Manifest,
    err,
    extension::Extension,
    impl_error,
    metadata::{AppMetadata, Deployment, DeploymentStore, Ref, RefKind, RuntimeMetadata},
    Result,
};

#[derive(Debug)]
pub enum StoreError {
    NotDeployed(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDeployed(reference) => write!(fmter, "'{reference}' is not deployed."),
        }
    }
}

impl_error!(StoreError);

struct OnDiskDeployment {
    files: PathBuf,
    commit: String,
    metadata: Manifest,
}

impl Deployment for OnDiskDeployment {
    fn files(&self) -> &std::path::Path {
        &self.files
    }

    fn commit(&self) -> &str {
        &self.commit
    }

    fn metadata(&self) -> &Manifest {
        &self.metadata
    }
}

struct OnDiskApp {
    inner: OnDiskDeployment,
    app_id: String,
    runtime_ref: Ref,
    command: String,
    data_dir: PathBuf,
}

impl Deployment for OnDiskApp {
    fn files(&self) -> &std::path::Path {
        self.inner.files()
    }

    fn commit(&self) -> &str {
        self.inner.commit()
    }

    fn metadata(&self) -> &Manifest {
        self.inner.metadata()
    }
}

impl AppMetadata for OnDiskApp {
    fn app_id(&self) -> &str {
        &self.app_id
    }

    fn runtime_ref(&self) -> &Ref {
        &self.runtime_ref
    }

    fn command(&self) -> &str {
        &self.command
    }

    fn extensions(&self) -> Vec<Box<dyn Extension>> {
        Vec::new()
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}

struct OnDiskRuntime {
    inner: OnDiskDeployment,
    ld_so_conf: Option<PathBuf>,
}

impl Deployment for OnDiskRuntime {
    fn files(&self) -> &std::path::Path {
        self.inner.files()
    }

    fn commit(&self) -> &str {
        self.inner.commit()
    }

    fn metadata(&self) -> &Manifest {
        self.inner.metadata()
    }
}

impl RuntimeMetadata for OnDiskRuntime {
    fn extensions(&self) -> Vec<Box<dyn Extension>> {
        Vec::new()
    }

    fn ld_so_conf(&self) -> Option<PathBuf> {
        self.ld_so_conf.clone()
    }
}

pub struct FileDeploymentStore {
    root: PathBuf,
}

impl Default for FileDeploymentStore {
    fn default() -> Self {
        Self {
            root: PathBuf::from(format!("{}/deployments", *DATA_DIR)),
        }
    }
}

impl FileDeploymentStore {
    fn deployment_dir(&self, reference: &Ref) -> PathBuf {
        let kind = match reference.kind {
            RefKind::App => "app",
            RefKind::Runtime => "runtime",
        };

        self.root.join(kind).join(&reference.id).join(&reference.arch).join(&reference.branch)
    }

    fn read_deployment(&self, reference: &Ref) -> Result<OnDiskDeployment> {
        let dir = self.deployment_dir(reference);

        if !dir.join("files").is_dir() {
            return err!(StoreError::NotDeployed(reference.to_string()));
        }

        let commit = fs::read_to_string(dir.join("commit")).map(|s| s.trim().to_string()).unwrap_or_else(|_| "unknown".into());
        let metadata = fs::read_to_string(dir.join("metadata"))
            .ok()
            .and_then(|text| Manifest::parse(&text).ok())
            .unwrap_or_default();

        Ok(OnDiskDeployment {
            files: dir.join("files"),
            commit,
            metadata,
        })
    }
}

impl DeploymentStore for FileDeploymentStore {
    fn app(&self, app_ref: &Ref) -> Result<Box<dyn AppMetadata>> {
        let inner = self.read_deployment(app_ref)?;
        let runtime_ref = inner
            .metadata
            .section("Application")
            .and_then(|section| section.get("runtime"))
            .and_then(|value| Ref::parse(value))
            .unwrap_or_else(|| Ref {
                kind: RefKind::Runtime,
                id: app_ref.id.clone(),
                arch: app_ref.arch.clone(),
                branch: app_ref.branch.clone(),
            });

        let command = inner
            .metadata
            .section("Application")
            .and_then(|section| section.get("command"))
            .cloned()
            .unwrap_or_else(|| app_ref.id.clone());

        let data_dir = PathBuf::from(format!("{}/app/{}", *DATA_DIR, app_ref.id));

        Ok(Box::new(OnDiskApp {
            inner,
            app_id: app_ref.id.clone(),
            runtime_ref,
            command,
            data_dir,
        }))
    }

    fn runtime(&self, runtime_ref: &Ref) -> Result<Box<dyn RuntimeMetadata>> {
        let inner = self.read_deployment(runtime_ref)?;
        let ld_so_conf = {
            let candidate = self.deployment_dir(runtime_ref).join("ld.so.conf");
            candidate.is_file().then_some(candidate)
        };

        Ok(Box::new(OnDiskRuntime { inner, ld_so_conf }))
    }
}
