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

//! Extension mounts: runtime/app deployments may ship extensions (debug symbols, locale
//! data, GStreamer plugins, ...) that get bound into `/app` or `/usr` alongside the main
//! deployment. `Extension` is `typetag`-serializable so app and runtime variants round-trip
//! through the same manifest field without a tagged enum.

use std::{collections::BTreeMap, fmt::Write as _, path::PathBuf};

use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

use crate::exec::args::ExecutionArgs;

#[typetag::serde(tag = "kind")]
pub trait Extension: DynClone + std::fmt::Debug + Send + Sync {
    fn files_path(&self) -> &str;
    fn directory(&self) -> &str;
    fn subdir_suffix(&self) -> Option<&str>;
    fn has_ref(&self) -> bool;
    fn add_ld_path(&self) -> Option<&str>;
    fn merge_dirs(&self) -> &[String];
    fn priority(&self) -> i32;
    fn installed_id(&self) -> &str;
    fn commit(&self) -> Option<&str>;
    fn needs_tmpfs(&self) -> bool;
    fn mount_path(&self) -> String {
        match self.subdir_suffix() {
            Some(suffix) => format!("{}/{suffix}", self.directory()),
            None => self.directory().to_string(),
        }
    }
}

dyn_clone::clone_trait_object!(Extension);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[typetag::serde(name = "app")]
pub struct AppExtension {
    pub files_path: String,
    pub directory: String,
    pub subdir_suffix: Option<String>,
    pub has_ref: bool,
    pub add_ld_path: Option<String>,
    pub merge_dirs: Vec<String>,
    pub priority: i32,
    pub installed_id: String,
    pub commit: Option<String>,
    pub needs_tmpfs: bool,
}

impl Extension for AppExtension {
    fn files_path(&self) -> &str {
        &self.files_path
    }

    fn directory(&self) -> &str {
        &self.directory
    }

    fn subdir_suffix(&self) -> Option<&str> {
        self.subdir_suffix.as_deref()
    }

    fn has_ref(&self) -> bool {
        self.has_ref
    }

    fn add_ld_path(&self) -> Option<&str> {
        self.add_ld_path.as_deref()
    }

    fn merge_dirs(&self) -> &[String] {
        &self.merge_dirs
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn installed_id(&self) -> &str {
        &self.installed_id
    }

    fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    fn needs_tmpfs(&self) -> bool {
        self.needs_tmpfs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[typetag::serde(name = "runtime")]
pub struct RuntimeExtension {
    pub files_path: String,
    pub directory: String,
    pub subdir_suffix: Option<String>,
    pub has_ref: bool,
    pub add_ld_path: Option<String>,
    pub merge_dirs: Vec<String>,
    pub priority: i32,
    pub installed_id: String,
    pub commit: Option<String>,
    pub needs_tmpfs: bool,
}

impl Extension for RuntimeExtension {
    fn files_path(&self) -> &str {
        &self.files_path
    }

    fn directory(&self) -> &str {
        &self.directory
    }

    fn subdir_suffix(&self) -> Option<&str> {
        self.subdir_suffix.as_deref()
    }

    fn has_ref(&self) -> bool {
        self.has_ref
    }

    fn add_ld_path(&self) -> Option<&str> {
        self.add_ld_path.as_deref()
    }

    fn merge_dirs(&self) -> &[String] {
        &self.merge_dirs
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn installed_id(&self) -> &str {
        &self.installed_id
    }

    fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    fn needs_tmpfs(&self) -> bool {
        self.needs_tmpfs
    }
}

pub struct ExtensionMounter {
    ld_library_path: Vec<String>,
    ld_conf_fragments: Vec<(String, String)>,
    use_ld_cache: bool,
    summary: Vec<String>,
}

impl ExtensionMounter {
    pub fn new(use_ld_cache: bool) -> Self {
        Self {
            ld_library_path: Vec::new(),
            ld_conf_fragments: Vec::new(),
            use_ld_cache,
            summary: Vec::new(),
        }
    }

    /// `extensions` is `(extension, is_runtime)`; apps mount at `/app/<path>`, runtimes
    /// at `/usr/<path>`. Sorted by mount path first so a shared parent tmpfs is only ever
    /// requested once; LD entries are then emitted in a second pass ordered by priority.
    pub fn mount(&mut self, out: &mut ExecutionArgs, extensions: &[(Box<dyn Extension>, bool)]) {
        let mut by_path: Vec<&(Box<dyn Extension>, bool)> = extensions.iter().collect();
        by_path.sort_by(|a, b| a.0.mount_path().cmp(&b.0.mount_path()));

        let mut tmpfs_done = std::collections::HashSet::new();
        for (ext, is_runtime) in &by_path {
            let root = if *is_runtime { "usr" } else { "app" };
            let mount_path = ext.mount_path();
            let dest = format!("/{root}/{mount_path}");

            if ext.needs_tmpfs() {
                let parent = format!("/{root}/{}", ext.directory());
                if tmpfs_done.insert(parent.clone()) {
                    out.tmpfs(&parent);
                }
            }

            out.robind(ext.files_path(), &dest);

            if ext.has_ref() {
                out.lock_file(&format!("{dest}/.ref"));
            }
        }

        let mut by_priority: Vec<&(Box<dyn Extension>, bool)> = extensions.iter().collect();
        by_priority.sort_by_key(|(ext, _)| ext.priority());

        for (ext, is_runtime) in &by_priority {
            let Some(path) = ext.add_ld_path() else { continue };
            let root = if *is_runtime { "usr" } else { "app" };
            let full = format!("/{root}/{}/{path}", ext.directory());

            if self.use_ld_cache {
                let role = if *is_runtime { "runtime" } else { "app" };
                let name = format!("{role}-{:03}-{}.conf", self.ld_conf_fragments.len(), ext.installed_id());
                self.ld_conf_fragments.push((name, full));
            } else if *is_runtime {
                self.ld_library_path.insert(0, full);
            } else {
                self.ld_library_path.push(full);
            }
        }

        let mut merged_targets: BTreeMap<String, String> = BTreeMap::new();
        for (ext, is_runtime) in &by_path {
            let root = if *is_runtime { "usr" } else { "app" };

            for merge_dir in ext.merge_dirs() {
                let parent = format!("/{root}/{merge_dir}");
                let source_dir = PathBuf::from(ext.files_path()).join(merge_dir);

                let Ok(entries) = std::fs::read_dir(&source_dir) else { continue };
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let target_link = format!("{parent}/{name}");

                    merged_targets.entry(target_link.clone()).or_insert_with(|| entry.path().to_string_lossy().to_string());
                }
            }
        }

        for (link, target) in &merged_targets {
            out.symlink(target, link);
        }

        self.summary = by_path
            .iter()
            .map(|(ext, _)| format!("{}={}", ext.installed_id(), ext.commit().unwrap_or("local")))
            .collect();
    }

    pub fn apply_ld_library_path(&self, out: &mut ExecutionArgs) {
        if self.use_ld_cache || self.ld_library_path.is_empty() {
            return;
        }

        out.env("LD_LIBRARY_PATH", &self.ld_library_path.join(":"));
    }

    pub fn ld_conf_fragments(&self) -> &[(String, String)] {
        &self.ld_conf_fragments
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (i, entry) in self.summary.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, ";");
            }
            let _ = write!(out, "{entry}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_ext(id: &str, priority: i32, ld_path: Option<&str>) -> Box<dyn Extension> {
        Box::new(AppExtension {
            files_path: format!("/deploy/{id}"),
            directory: "extensions".into(),
            subdir_suffix: Some(id.to_string()),
            has_ref: false,
            add_ld_path: ld_path.map(String::from),
            merge_dirs: Vec::new(),
            priority,
            installed_id: id.to_string(),
            commit: Some("abc123".into()),
            needs_tmpfs: true,
        })
    }

    #[test]
    fn summary_lists_installed_extensions_with_commit() {
        let mut mounter = ExtensionMounter::new(false);
        let mut args = ExecutionArgs::new();
        mounter.mount(&mut args, &[(app_ext("org.example.Ext", 0, None), false)]);
        assert_eq!(mounter.summary(), "org.example.Ext=abc123");
    }

    #[test]
    fn tmpfs_parent_emitted_once_per_directory() {
        let mut mounter = ExtensionMounter::new(false);
        let mut args = ExecutionArgs::new();
        mounter.mount(&mut args, &[(app_ext("a", 0, None), false), (app_ext("b", 1, None), false)]);
        let rendered = args.arguments_owned();
        assert_eq!(rendered.iter().filter(|a| a.as_str() == "/app/extensions").count(), 1);
    }

    #[test]
    fn runtime_ld_path_prepended_app_appended() {
        let mut mounter = ExtensionMounter::new(false);
        let mut args = ExecutionArgs::new();
        mounter.mount(&mut args, &[(app_ext("app-ext", 0, Some("lib")), false), (app_ext("rt-ext", 1, Some("lib")), true)]);
        assert_eq!(mounter.ld_library_path[0], "/usr/extensions/lib");
    }

    #[test]
    fn ld_cache_mode_produces_fragments_not_env_var() {
        let mut mounter = ExtensionMounter::new(true);
        let mut args = ExecutionArgs::new();
        mounter.mount(&mut args, &[(app_ext("a", 0, Some("lib")), false)]);
        assert!(!mounter.ld_conf_fragments().is_empty());
        assert!(mounter.ld_library_path.is_empty());
    }
}
