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

use std::{
    env::var,
    os::{fd::RawFd, unix::net::UnixStream},
    path::Path,
};

use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::write as nix_write,
};

use crate::{
    constants::{BOLD_RED, BOLD_YELLOW, GID, RESET, UID},
    err,
    Error,
    ErrorKind,
    Result,
};

pub use ansi::{is_color_terminal, is_truecolor_terminal};
pub use arguments::Arguments;
pub use termcontrol::TermControl;

pub mod ansi;
pub mod arguments;
pub mod termcontrol;

pub fn print_warning(message: &str) {
    eprintln!("{}warning:{} {}", *BOLD_YELLOW, *RESET, message);
}

pub fn print_error(message: &str) {
    eprintln!("{}error:{} {}", *BOLD_RED, *RESET, message);
}

pub fn check_socket(socket: &str) -> bool {
    UnixStream::connect(Path::new(socket)).is_ok()
}

pub fn env_var(env: &'static str) -> Result<String> {
    match var(env) {
        Ok(var) => Ok(var),
        Err(_) => err!(ErrorKind::EnvVarUnset(env)),
    }
}

pub fn env_var_opt(env: &str) -> Option<String> {
    var(env).ok()
}

pub fn check_root() -> Result<()> {
    if *UID == 0 || *GID == 0 {
        err!(ErrorKind::ElevatedPrivileges)?
    }

    Ok(())
}

/// Writes `contents` into an anonymous, unlinked-by-construction `memfd`, returning the
/// descriptor. Used anywhere a generated buffer (passwd/group lines, `.flatpak-info`,
/// `ld.so.conf`, the serialized argument vector) needs to look like a real file to a
/// bind mount without ever touching the filesystem.
pub fn sealed_tmpfile(name: &str, contents: &[u8]) -> Result<RawFd> {
    let cname = std::ffi::CString::new(name).unwrap_or_else(|_| std::ffi::CString::new("sbx").unwrap());
    let fd = memfd_create(cname.as_c_str(), MemFdCreateFlag::empty())
        .map_err(|errno| Error::new(Box::new(ErrorKind::IOError(name.to_string(), std::io::Error::from_raw_os_error(errno as i32).kind()))))?;

    let mut remaining = contents;
    while !remaining.is_empty() {
        let written = nix_write(fd, remaining)
            .map_err(|errno| Error::new(Box::new(ErrorKind::IOError(name.to_string(), std::io::Error::from_raw_os_error(errno as i32).kind()))))?;
        remaining = &remaining[written ..];
    }

    Ok(fd)
}

/// Convenience wrapper over [`sealed_tmpfile`] for text content.
pub fn sealed_tmpfile_str(name: &str, contents: &str) -> Result<RawFd> {
    sealed_tmpfile(name, contents.as_bytes())
}
