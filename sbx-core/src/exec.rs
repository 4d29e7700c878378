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

use std::{
    fmt::{Display, Error as FmtError, Formatter},
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    result::Result as StdResult,
};

use crate::constants::{BOLD, RESET};

pub mod args;
pub mod path;
pub mod utils;

/// Failures arising from composing or handing off the final argument vector to `SBX`.
#[derive(Debug, Clone)]
pub enum ExecutionError {
    InvalidPathVar(String, std::io::ErrorKind),
    ExecutableUnavailable(String),
    RuntimeArguments,
    UnabsolutePath(String),
    UnabsoluteExec(String),
    DirectoryNotExecutable(String),
    SocketTimeout(String),
    Sandbox(i32),
    Helper(ExitStatus),
}

impl Display for ExecutionError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> StdResult<(), FmtError> {
        match self {
            Self::InvalidPathVar(dir, err) => write!(fmter, "Invalid {}PATH{} variable '{dir}': {err}", *BOLD, *RESET),
            Self::ExecutableUnavailable(exec) => write!(fmter, "'{}': Not available in sandbox {}PATH{}.", exec, *BOLD, *RESET),
            Self::UnabsolutePath(path) => write!(fmter, "'{}': {}PATH{} variable must be absolute", path, *BOLD, *RESET),
            Self::UnabsoluteExec(path) => write!(fmter, "'{}': Executable path must be absolute.", path),
            Self::DirectoryNotExecutable(path) => write!(fmter, "'{}': Directories are not executables.", path),
            Self::SocketTimeout(socket) => write!(fmter, "Socket '{socket}': timed out."),
            Self::Sandbox(status) => write!(fmter, "Sandboxed process exited with code: {}", status),
            Self::Helper(status) => write!(fmter, "{} exited with {}", *crate::constants::SBX_EXECUTABLE, status),
            Self::RuntimeArguments => write!(fmter, "Invalid runtime arguments."),
        }
    }
}

impl crate::ErrorTrait for ExecutionError {
    fn code(&self) -> i32 {
        match self {
            Self::Sandbox(status) => *status,
            Self::Helper(status) => 128 + status.signal().unwrap_or(0),
            _ => 1,
        }
    }
}
