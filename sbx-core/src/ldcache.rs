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

//! Produces a ready-to-bind `ld.so.cache` keyed on the exact (app commit, runtime commit,
//! app extensions, runtime extensions) tuple, generated once inside a throwaway nested
//! sandbox invocation of `ldconfig` and cached under the app's data directory (or the
//! user cache directory for apps with no persistent data dir).

use std::{
    fs::{self, File},
    os::{fd::IntoRawFd, fd::RawFd, unix::fs::symlink},
    path::{Path, PathBuf},
    process::Command,
};

use sha2::{Digest, Sha256};

use crate::{
    constants::{CACHE_DIR, LDCONFIG_EXECUTABLE, SBX_EXECUTABLE},
    err,
    exec::{args::ExecutionArgs, ExecutionError},
    utils::sealed_tmpfile_str,
    Error,
    ErrorKind,
    Result,
};

pub const GENERATED_LD_SO_CONF: &str = "\
include /run/flatpak/ld.so.conf.d/app-*.conf
include /app/etc/ld.so.conf
/app/lib64
/app/lib
include /run/flatpak/ld.so.conf.d/runtime-*.conf
/usr/lib64/pipewire-0.3/jack/
";

pub struct LdCacheRequest<'a> {
    pub app_commit: &'a str,
    pub runtime_commit: &'a str,
    pub app_extensions_summary: &'a str,
    pub runtime_extensions_summary: &'a str,
    pub runtime_files: &'a Path,
    pub app_files: Option<&'a Path>,
    pub app_data_dir: Option<&'a Path>,
    pub extension_mounts: ExecutionArgs,
    pub runtime_ld_so_conf: Option<&'a Path>,
}

pub fn cache_key(request: &LdCacheRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.app_commit.as_bytes());
    hasher.update(request.runtime_commit.as_bytes());
    hasher.update(request.app_extensions_summary.as_bytes());
    hasher.update(request.runtime_extensions_summary.as_bytes());

    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn cache_dir(app_data_dir: Option<&Path>) -> PathBuf {
    match app_data_dir {
        Some(dir) => dir.join(".ld.so"),
        None => PathBuf::from(format!("{}/ld.so", *CACHE_DIR)),
    }
}

fn io_err(path: &Path, e: std::io::Error) -> Error {
    Error::new(Box::new(ErrorKind::IOError(path.display().to_string(), e.kind())))
}

/// Opens the cache entry for `request`, building it via a nested `ldconfig` sandbox run
/// if it does not already exist, and returns a raw fd suitable for `--ro-bind-data`.
pub fn open(request: LdCacheRequest) -> Result<RawFd> {
    let key = cache_key(&request);
    let dir = cache_dir(request.app_data_dir);
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let entry = dir.join(&key);

    if !entry.exists() {
        build(&request, &dir, &key)?;
    }

    let file = File::open(&entry).map_err(|e| io_err(&entry, e))?;

    if request.app_data_dir.is_some() {
        update_active_symlink(&dir, &key)?;
    } else {
        let _ = fs::remove_file(&entry);
    }

    Ok(file.into_raw_fd())
}

fn build(request: &LdCacheRequest, dir: &Path, key: &str) -> Result<()> {
    let mut args = ExecutionArgs::new();
    args.robind(&request.runtime_files.to_string_lossy(), "/usr");

    if let Some(app_files) = request.app_files {
        args.robind(&app_files.to_string_lossy(), "/app");
    }

    install_ld_so_conf(&mut args, request.runtime_ld_so_conf)?;

    args.dir("/run/ld-so-cache-dir");
    args.bind(&dir.to_string_lossy(), "/run/ld-so-cache-dir");

    let mut argv = args.arguments_owned();
    argv.extend(request.extension_mounts.arguments_owned());

    let target = format!("/run/ld-so-cache-dir/{key}");

    let status = Command::new(*SBX_EXECUTABLE)
        .args(&argv)
        .arg("--")
        .arg(*LDCONFIG_EXECUTABLE)
        .arg("-X")
        .arg("-C")
        .arg(&target)
        .status()
        .map_err(|e| Error::new(Box::new(ErrorKind::ProcessInitFailure(*SBX_EXECUTABLE, e.kind()))))?;

    if !status.success() {
        return err!(ExecutionError::Sandbox(status.code().unwrap_or(1)));
    }

    Ok(())
}

/// Mirrors the runtime's own `etc/ld.so.conf` unless it's missing or empty, in which case
/// a generated fixed-content file with the Flatpak-style include chain is sealed into a
/// `memfd` and bound in its place.
fn install_ld_so_conf(args: &mut ExecutionArgs, runtime_ld_so_conf: Option<&Path>) -> Result<()> {
    let use_symlink = runtime_ld_so_conf.is_some_and(|p| fs::metadata(p).map(|m| m.is_file() && m.len() > 0).unwrap_or(false));

    if use_symlink {
        args.symlink("../usr/etc/ld.so.conf", "/etc/ld.so.conf");
    } else {
        let fd = sealed_tmpfile_str("ld.so.conf", GENERATED_LD_SO_CONF)?;
        args.push_fd_arg(fd, crate::exec::args::Argument::FileFd(fd, "/etc/ld.so.conf".into()));
    }

    Ok(())
}

fn update_active_symlink(dir: &Path, key: &str) -> Result<()> {
    let active = dir.join("active");
    let staging = dir.join(format!(".active-{key}"));

    let _ = fs::remove_file(&staging);
    symlink(key, &staging).map_err(|e| io_err(&staging, e))?;
    fs::rename(&staging, &active).map_err(|e| io_err(&active, e))?;

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name != key && name != "active" && !name.starts_with('.') {
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> LdCacheRequest<'static> {
        LdCacheRequest {
            app_commit: "app-commit",
            runtime_commit: "runtime-commit",
            app_extensions_summary: "",
            runtime_extensions_summary: "",
            runtime_files: Path::new("/deploy/runtime/files"),
            app_files: None,
            app_data_dir: None,
            extension_mounts: ExecutionArgs::new(),
            runtime_ld_so_conf: None,
        }
    }

    #[test]
    fn key_is_deterministic_for_identical_inputs() {
        assert_eq!(cache_key(&sample_request()), cache_key(&sample_request()));
    }

    #[test]
    fn key_changes_with_app_commit() {
        let mut other = sample_request();
        other.app_commit = "different-commit";
        assert_ne!(cache_key(&sample_request()), cache_key(&other));
    }

    #[test]
    fn cache_dir_prefers_app_data_dir() {
        let app_dir = Path::new("/home/user/.var/app/org.example.App");
        assert_eq!(cache_dir(Some(app_dir)), app_dir.join(".ld.so"));
    }
}
