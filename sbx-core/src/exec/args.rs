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

use std::fmt::{Debug, Formatter};

/// A single `SBX` argument. `to_vec()` expands each variant into the flag/value
/// pairs the namespace helper expects on its own argv.
#[derive(Debug, Clone)]
pub enum Argument {
    Directory(String),
    Bind(String, String),
    BindTry(String, String),
    RoBind(String, String),
    RoBindTry(String, String),
    EnvVar(String, String),
    UnsetEnvVar(String),
    SymbolicLink(String, String),
    Device(String),
    DevFs,
    TmpFsAt(String),
    LockFile(String),
    FileFd(i32, String),
    RoBindDataFd(i32, String),
    SeccompFd(i32),
    SyncFd(i32),
    InfoFd(i32),
    ArgsFd(i32),
    Hostname(String),
    DieWithParent,
    DisableNamespaces,
    HostNetworking,
    UnshareIpc,
    UnshareNet,
    UnsharePid,
    ProcFs,
    NewSession,
    TmpFs,
    UnshareAll,
}

pub struct ExecutionArgs {
    dbus: Vec<String>,
    bind: Vec<Argument>,
    env: Vec<Argument>,
    sys: Vec<Argument>,
    fds: Vec<i32>,
}

impl Argument {
    fn to_vec(&self) -> Vec<&str> {
        match self {
            Self::Directory(val) => vec!["--dir", val],
            Self::Bind(src, dest) => vec!["--bind", src, dest],
            Self::BindTry(src, dest) => vec!["--bind-try", src, dest],
            Self::RoBind(src, dest) => vec!["--ro-bind", src, dest],
            Self::RoBindTry(src, dest) => vec!["--ro-bind-try", src, dest],
            Self::SymbolicLink(src, dest) => vec!["--symlink", src, dest],
            Self::EnvVar(val, set) => vec!["--setenv", val, set],
            Self::UnsetEnvVar(val) => vec!["--unsetenv", val],
            Self::Device(val) => vec!["--dev-bind-try", val, val],
            Self::DevFs => vec!["--dev", "/dev"],
            Self::TmpFsAt(path) => vec!["--tmpfs", path],
            Self::LockFile(path) => vec!["--lock-file", path],
            Self::Hostname(name) => vec!["--hostname", name],
            Self::DieWithParent => vec!["--die-with-parent"],
            Self::DisableNamespaces => vec!["--unshare-user", "--disable-userns"],
            Self::HostNetworking => vec!["--share-net"],
            Self::UnshareIpc => vec!["--unshare-ipc"],
            Self::UnshareNet => vec!["--unshare-net"],
            Self::UnsharePid => vec!["--unshare-pid"],
            Self::ProcFs => vec!["--proc", "/proc"],
            Self::NewSession => vec!["--new-session"],
            Self::TmpFs => vec!["--tmpfs", "/tmp"],
            Self::UnshareAll => vec!["--unshare-all"],
            // fd-bearing variants are serialized via fd_vec(), never via arguments()
            Self::FileFd(..) | Self::RoBindDataFd(..) | Self::SeccompFd(..) | Self::SyncFd(..) | Self::InfoFd(..) | Self::ArgsFd(..) =>
                unreachable!("fd-bearing argument must be rendered through fd_vec()"),
        }
    }

    fn fd_vec(&self, buf: &mut String) -> Option<Vec<&str>> {
        match self {
            Self::FileFd(fd, dest) => {
                *buf = fd.to_string();
                Some(vec!["--file", buf.as_str(), dest])
            }
            Self::RoBindDataFd(fd, dest) => {
                *buf = fd.to_string();
                Some(vec!["--ro-bind-data", buf.as_str(), dest])
            }
            Self::SeccompFd(fd) => {
                *buf = fd.to_string();
                Some(vec!["--seccomp", buf.as_str()])
            }
            Self::SyncFd(fd) => {
                *buf = fd.to_string();
                Some(vec!["--sync-fd", buf.as_str()])
            }
            Self::InfoFd(fd) => {
                *buf = fd.to_string();
                Some(vec!["--info-fd", buf.as_str()])
            }
            Self::ArgsFd(fd) => {
                *buf = fd.to_string();
                Some(vec!["--args", buf.as_str()])
            }
            _ => None,
        }
    }
}

impl ExecutionArgs {
    pub fn new() -> Self {
        Self {
            dbus: Vec::new(),
            bind: vec![Argument::TmpFs],
            sys: vec![Argument::DevFs, Argument::ProcFs, Argument::UnsharePid],
            env: vec![Argument::UnshareAll],
            fds: Vec::new(),
        }
    }

    pub fn dir(&mut self, dest: &str) {
        self.bind.push(Argument::Directory(dest.into()));
    }

    pub fn bind(&mut self, src: &str, dest: &str) {
        self.bind.push(Argument::Bind(src.into(), dest.into()));
    }

    pub fn bind_try(&mut self, src: &str, dest: &str) {
        self.bind.push(Argument::BindTry(src.into(), dest.into()));
    }

    pub fn robind(&mut self, src: &str, dest: &str) {
        self.bind.push(Argument::RoBind(src.into(), dest.into()));
    }

    pub fn robind_try(&mut self, src: &str, dest: &str) {
        self.bind.push(Argument::RoBindTry(src.into(), dest.into()));
    }

    pub fn symlink(&mut self, src: &str, dest: &str) {
        self.bind.push(Argument::SymbolicLink(src.into(), dest.into()));
    }

    pub fn tmpfs(&mut self, dest: &str) {
        self.bind.push(Argument::TmpFsAt(dest.into()));
    }

    pub fn lock_file(&mut self, dest: &str) {
        self.bind.push(Argument::LockFile(dest.into()));
    }

    pub fn env(&mut self, src: &str, dest: &str) {
        self.env.push(Argument::EnvVar(src.into(), dest.into()));
    }

    pub fn unset_env(&mut self, src: &str) {
        self.env.push(Argument::UnsetEnvVar(src.into()));
    }

    pub fn dev(&mut self, src: &str) {
        self.sys.push(Argument::Device(src.into()));
    }

    pub fn hostname(&mut self, name: &str) {
        self.sys.push(Argument::Hostname(name.into()));
    }

    pub fn dbus(&mut self, per: &str, socket: &str) {
        self.dbus.push(format!("--{}={}", per, socket));
    }

    pub fn push_env(&mut self, arg: Argument) {
        self.env.push(arg);
    }

    pub fn push_sys(&mut self, arg: Argument) {
        self.sys.push(arg);
    }

    /// Registers a fd-bearing argument, additionally tracking its descriptor so the
    /// launcher can clear `CLOEXEC` on it right before spawn.
    pub fn push_fd_arg(&mut self, fd: i32, arg: Argument) {
        self.fds.push(fd);
        self.sys.push(arg);
    }

    pub fn get_dbus(&self) -> Vec<&str> {
        self.dbus.iter().map(|a| a.as_str()).collect()
    }

    pub fn fds(&self) -> &[i32] {
        &self.fds
    }

    pub fn obtain_env(&self, env: &str) -> Option<&str> {
        self.env.iter().find_map(|a| match a {
            Argument::EnvVar(target, var) => match target == env {
                true => Some(var.as_str()),
                false => None,
            },
            _ => None,
        })
    }

    /// Flattens bind, sys, and env directives in that order into bwrap-style argv.
    /// fd-bearing arguments are rendered through per-call string buffers since `Argument::to_vec`
    /// borrows; callers needing the final owned argv should use `arguments_owned()`.
    pub fn arguments(&self) -> Vec<&str> {
        let mut vec = Vec::new();

        vec.reserve((self.sys.len() + self.bind.len() + self.env.len()) * 4);

        for values in self.bind.iter().chain(self.sys.iter()).chain(self.env.iter()) {
            match values {
                Argument::FileFd(..) | Argument::RoBindDataFd(..) | Argument::SeccompFd(..) | Argument::SyncFd(..) | Argument::InfoFd(..) | Argument::ArgsFd(..) => {}
                _ => vec.extend(values.to_vec()),
            }
        }

        vec
    }

    /// Owned equivalent of `arguments()` which also renders fd-bearing directives;
    /// required wherever the final argv is serialized or handed to `Command::args`.
    pub fn arguments_owned(&self) -> Vec<String> {
        let mut vec = Vec::new();
        let mut buf = String::new();

        for values in self.bind.iter().chain(self.sys.iter()).chain(self.env.iter()) {
            if let Some(fd_args) = values.fd_vec(&mut buf) {
                vec.extend(fd_args.into_iter().map(String::from));
            } else {
                vec.extend(values.to_vec().into_iter().map(String::from));
            }
        }

        vec
    }
}

impl Debug for ExecutionArgs {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        writeln!(fmter, "bind: {:?}", self.bind)?;
        writeln!(fmter, "env:  {:?}", self.env)?;

        if self.sys.len() > 2 {
            writeln!(fmter, "sys:  {:?}", self.sys)?;
        }

        if self.dbus.len() > 0 {
            writeln!(fmter, "dbus: {:?}", self.dbus)?;
        }

        Ok(())
    }
}
