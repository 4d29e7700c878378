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

//! Plans the set of host paths exposed into the sandbox and renders them into
//! [`ExecutionArgs`] directives: binds, tmpfs overlays, directory creations, and symlinks.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};

use crate::{err, exec::args::ExecutionArgs, impl_error, Result};

const OPAQUE_PREFIXES: &[&str] = &["/lib", "/lib32", "/lib64", "/bin", "/sbin", "/usr", "/etc", "/app", "/dev"];

pub const HOST_EXCLUDE: &[&str] =
    &[".", "..", "lib", "lib32", "lib64", "bin", "sbin", "usr", "boot", "root", "tmp", "etc", "app", "run", "proc", "sys", "dev", "var"];

const MAX_SYMLINK_DEPTH: u32 = 40;

#[derive(Debug)]
pub enum ExportError {
    NotAbsolute(String),
    NotFound(String),
    Unsupported(String),
    Opaque(String),
    SymlinkDepthExceeded(String),
}

impl Display for ExportError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NotAbsolute(path) => write!(fmter, "'{path}': export path must be absolute."),
            Self::NotFound(path) => write!(fmter, "'{path}': does not exist."),
            Self::Unsupported(path) => write!(fmter, "'{path}': not a file, directory, symlink, or socket."),
            Self::Opaque(path) => write!(fmter, "'{path}': falls beneath an opaque runtime prefix."),
            Self::SymlinkDepthExceeded(path) => write!(fmter, "'{path}': symlink resolution exceeded depth {MAX_SYMLINK_DEPTH}."),
        }
    }
}

impl_error!(ExportError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExportMode {
    ReadOnly,
    ReadWrite,
    Create,
    DirOnly,
    TmpFs,
    Symlink,
}

impl ExportMode {
    /// Permission ordering used when the same path is exposed twice: the stronger mode wins.
    /// `DirOnly`/`TmpFs`/`Symlink` are distinct sentinels, never compared against the
    /// permission modes they might coexist with in practice.
    fn rank(self) -> u8 {
        match self {
            Self::ReadOnly => 0,
            Self::ReadWrite => 1,
            Self::Create => 2,
            Self::DirOnly => 3,
            Self::TmpFs => 4,
            Self::Symlink => 5,
        }
    }
}

#[derive(Debug, Clone)]
struct Export {
    mode: ExportMode,
    symlink_target: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportPlanner {
    exports: BTreeMap<PathBuf, Export>,
}

impl ExportPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expose(&mut self, path: &Path, mode: ExportMode) -> Result<()> {
        if !path.is_absolute() {
            return err!(ExportError::NotAbsolute(path.display().to_string()));
        }

        for prefix in OPAQUE_PREFIXES {
            if path.starts_with(prefix) {
                return err!(ExportError::Opaque(path.display().to_string()));
            }
        }

        self.walk_and_record(path, mode, 0)
    }

    pub fn tmpfs(&mut self, path: &Path) {
        self.record(path, ExportMode::TmpFs, None);
    }

    pub fn dir(&mut self, path: &Path) {
        self.record(path, ExportMode::DirOnly, None);
    }

    fn walk_and_record(&mut self, path: &Path, mode: ExportMode, depth: u32) -> Result<()> {
        if depth > MAX_SYMLINK_DEPTH {
            return err!(ExportError::SymlinkDepthExceeded(path.display().to_string()));
        }

        let mut walked = PathBuf::from("/");
        for component in path.components().skip(1) {
            walked.push(component);

            if walked == path {
                break;
            }

            if walked == Path::new("/tmp") {
                continue;
            }

            let meta = match fs::symlink_metadata(&walked) {
                Ok(meta) => meta,
                Err(_) => return err!(ExportError::NotFound(walked.display().to_string())),
            };

            if meta.file_type().is_symlink() {
                let target = resolve_symlink(&walked)?;
                self.record(&walked, ExportMode::Symlink, Some(target.clone()));
                self.walk_and_record(&target, ExportMode::ReadOnly, depth + 1)?;
            }
        }

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(_) if mode == ExportMode::Create => {
                self.record(path, mode, None);
                return Ok(());
            }
            Err(_) => return err!(ExportError::NotFound(path.display().to_string())),
        };

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = resolve_symlink(path)?;
            self.record(path, ExportMode::Symlink, Some(target.clone()));
            return self.walk_and_record(&target, mode, depth + 1);
        }

        if !(file_type.is_file() || file_type.is_dir() || file_type.is_socket()) {
            return err!(ExportError::Unsupported(path.display().to_string()));
        }

        self.record(path, mode, None);
        Ok(())
    }

    fn record(&mut self, path: &Path, mode: ExportMode, symlink_target: Option<PathBuf>) {
        match self.exports.get(path) {
            Some(existing) if existing.mode.rank() >= mode.rank() => {}
            _ => {
                self.exports.insert(path.to_path_buf(), Export { mode, symlink_target });
            }
        }
    }

    /// A path is visible iff every non-tmpfs export prefix along it survives any tmpfs
    /// ancestor and the terminal component itself resolves to a non-tmpfs export.
    pub fn is_visible(&self, path: &Path) -> bool {
        let mut walked = PathBuf::from("/");
        let mut last_tmpfs_ancestor: Option<PathBuf> = None;

        for component in path.components().skip(1) {
            walked.push(component);

            if let Some(export) = self.exports.get(&walked) {
                match export.mode {
                    ExportMode::TmpFs => last_tmpfs_ancestor = Some(walked.clone()),
                    ExportMode::Symlink => {
                        if let Some(target) = &export.symlink_target {
                            if walked == path {
                                return self.is_visible(target);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let Some(export) = self.exports.get(path) else { return false };

        if export.mode == ExportMode::TmpFs {
            return false;
        }

        match &last_tmpfs_ancestor {
            Some(ancestor) => path == ancestor,
            None => true,
        }
    }

    /// Renders the accumulated exports into `out`, sorted shortest-path-first so parent
    /// directives always precede their children.
    pub fn emit(&self, out: &mut ExecutionArgs) {
        let mut ordered: Vec<(&PathBuf, &Export)> = self.exports.iter().collect();
        ordered.sort_by_key(|(path, _)| path.as_os_str().len());

        for (path, export) in ordered {
            let dest = path.to_string_lossy();

            match export.mode {
                ExportMode::Symlink => {
                    if self.has_non_tmpfs_ancestor(path) {
                        continue;
                    }

                    if let Some(target) = &export.symlink_target {
                        let rel = relative_from_parent(path, target);
                        out.symlink(&rel, &dest);
                    }
                }
                ExportMode::TmpFs => {
                    if path.is_dir() && !self.has_tmpfs_ancestor(path) {
                        out.dir(&dest);
                    } else {
                        out.tmpfs(&dest);
                    }
                }
                ExportMode::DirOnly => {
                    if path.is_dir() {
                        out.dir(&dest);
                    }
                }
                ExportMode::ReadOnly => out.robind(&dest, &dest),
                ExportMode::ReadWrite | ExportMode::Create => out.bind(&dest, &dest),
            }
        }
    }

    fn has_non_tmpfs_ancestor(&self, path: &Path) -> bool {
        path.ancestors().skip(1).any(|ancestor| {
            matches!(self.exports.get(ancestor), Some(export) if export.mode != ExportMode::TmpFs)
        })
    }

    fn has_tmpfs_ancestor(&self, path: &Path) -> bool {
        path.ancestors().skip(1).any(|ancestor| matches!(self.exports.get(ancestor), Some(export) if export.mode == ExportMode::TmpFs))
    }
}

fn resolve_symlink(path: &Path) -> Result<PathBuf> {
    match fs::read_link(path) {
        Ok(target) if target.is_absolute() => Ok(target),
        Ok(target) => Ok(path.parent().unwrap_or(Path::new("/")).join(target)),
        Err(_) => err!(ExportError::NotFound(path.display().to_string())),
    }
}

fn relative_from_parent(path: &Path, target: &Path) -> String {
    let parent = path.parent().unwrap_or(Path::new("/"));
    pathdiff(parent, target)
}

fn pathdiff(from: &Path, to: &Path) -> String {
    let from_components: Vec<_> = from.components().collect();
    let to_components: Vec<_> = to.components().collect();

    let common = from_components.iter().zip(to_components.iter()).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in common .. from_components.len() {
        rel.push("..");
    }
    for component in &to_components[common ..] {
        rel.push(component);
    }

    rel.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stronger_mode_wins_on_re_expose() {
        let mut planner = ExportPlanner::new();
        planner.record(Path::new("/tmp/foo"), ExportMode::ReadOnly, None);
        planner.record(Path::new("/tmp/foo"), ExportMode::ReadWrite, None);
        assert_eq!(planner.exports.get(Path::new("/tmp/foo")).unwrap().mode, ExportMode::ReadWrite);

        planner.record(Path::new("/tmp/foo"), ExportMode::ReadOnly, None);
        assert_eq!(planner.exports.get(Path::new("/tmp/foo")).unwrap().mode, ExportMode::ReadWrite);
    }

    #[test]
    fn visible_when_no_tmpfs_ancestor() {
        let mut planner = ExportPlanner::new();
        planner.record(Path::new("/home"), ExportMode::ReadWrite, None);
        assert!(planner.is_visible(Path::new("/home")));
    }

    #[test]
    fn hidden_behind_tmpfs_ancestor() {
        let mut planner = ExportPlanner::new();
        planner.record(Path::new("/home/user/.var/app"), ExportMode::TmpFs, None);
        assert!(!planner.is_visible(Path::new("/home/user/.var/app/other-app")));
    }

    #[test]
    fn reexposed_subdir_under_tmpfs_parent_is_visible() {
        let mut planner = ExportPlanner::new();
        planner.record(Path::new("/home/user/.var/app"), ExportMode::TmpFs, None);
        planner.record(Path::new("/home/user/.var/app/my-app"), ExportMode::ReadWrite, None);
        assert!(planner.is_visible(Path::new("/home/user/.var/app/my-app")));
    }

    #[test]
    fn relative_symlink_target_is_computed_from_parent() {
        let rel = pathdiff(Path::new("/usr/lib"), Path::new("/usr/lib64"));
        assert_eq!(rel, "../lib64");
    }

    #[test]
    fn relative_symlink_target_within_same_parent() {
        let rel = pathdiff(Path::new("/var"), Path::new("/run"));
        assert_eq!(rel, "../run");
    }

    #[test]
    fn unrelated_path_not_visible() {
        let planner = ExportPlanner::new();
        assert!(!planner.is_visible(Path::new("/opt/nonexistent")));
    }
}
