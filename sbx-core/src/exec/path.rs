/*
 * sbx-core
 *
 * Copyright (C) 2023-2024 Xavier Moffett <sapphirus@azorium.net>
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

use std::path::{Path, PathBuf};

use crate::{constants::DEFAULT_PATH, err, exec::ExecutionError, Error, ErrorKind, Result};

/// Resolves `args[0]` against `PATH`-style directories rooted at `app_root`/`runtime_root`,
/// mirroring how the sandbox helper itself would resolve the command once namespaced.
/// `app_root` is checked first (it shadows the runtime at `/app`), then `runtime_root` (`/usr`).
pub fn check_path(app_root: Option<&str>, runtime_root: &str, args: &[&str]) -> Result<()> {
    if args.is_empty() {
        err!(ExecutionError::RuntimeArguments)?
    }

    if args[0].starts_with('/') {
        if dest_exists(app_root.unwrap_or(""), "", args[0])? || dest_exists(runtime_root, "", args[0])? {
            return Ok(());
        }

        err!(ExecutionError::ExecutableUnavailable(args[0].into()))?
    }

    for dir in DEFAULT_PATH.split(':').filter(|d| !d.is_empty()) {
        if let Some(root) = app_root {
            if dest_exists(root, dir, args[0])? {
                return Ok(());
            }
        }

        if dest_exists(runtime_root, dir, args[0])? {
            return Ok(());
        }
    }

    err!(ExecutionError::ExecutableUnavailable(args[0].into()))?
}

fn dest_exists(root: &str, dir: &str, exec: &str) -> Result<bool> {
    if exec.contains("..") {
        err!(ExecutionError::UnabsoluteExec(exec.into()))?
    } else if dir.contains("..") {
        err!(ExecutionError::UnabsolutePath(exec.into()))?
    }

    let path = format!("{}{}/{}", root, dir, exec.trim_start_matches('/'));
    let path = obtain_path(Path::new(&path), exec)?;
    let path_direct = format!("{}/{}", root, exec.trim_start_matches('/'));
    let path_direct = obtain_path(Path::new(&path_direct), exec)?;

    if path.is_dir() | path_direct.is_dir() {
        err!(ExecutionError::DirectoryNotExecutable(exec.into()))?
    } else if let Ok(path) = path.read_link() {
        if let Some(path) = path.as_os_str().to_str() {
            return dest_exists(root, dir, path);
        }
    } else if let Ok(path) = path_direct.read_link() {
        if let Some(path) = path.as_os_str().to_str() {
            return dest_exists(root, dir, path);
        }
    }

    Ok(path.exists() | path_direct.exists())
}

fn obtain_path(path: &Path, exec: &str) -> Result<PathBuf> {
    match Path::canonicalize(path) {
        Ok(path) => Ok(path),
        Err(err) => match err.kind() {
            std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
            _ => err!(ErrorKind::IOError(exec.into(), err.kind())),
        },
    }
}
