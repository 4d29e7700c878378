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

//! Spawns the D-Bus filtering proxy (an `xdg-dbus-proxy`-style helper) when any bus
//! policy is non-empty, wraps it in a nested sandbox sharing the same `.flatpak-info`,
//! and blocks on a one-byte readiness handshake before handing control back.

use std::{io::Read, os::fd::AsRawFd, process::{Child, Command, Stdio}};

use command_fds::{CommandFdExt, FdMapping};
use indexmap::IndexMap;
use os_pipe::{pipe, PipeReader};

use crate::{
    constants::{DBUS_PROXY_EXECUTABLE, UID},
    context::dbus::BusPolicy,
    err,
    exec::args::ExecutionArgs,
    impl_error,
    utils::env_var,
    Result,
};

#[derive(Debug)]
pub enum DBusProxyError {
    NoSessionBusAddress,
    HandshakeFailed,
}

impl std::fmt::Display for DBusProxyError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSessionBusAddress => write!(fmter, "DBUS_SESSION_BUS_ADDRESS is unset; declining to proxy the session bus."),
            Self::HandshakeFailed => write!(fmter, "Timed out waiting on the D-Bus proxy readiness handshake."),
        }
    }
}

impl_error!(DBusProxyError);

pub struct DBusProxyOrchestrator {
    child: Option<Child>,
    ready_pipe: Option<PipeReader>,
}

impl DBusProxyOrchestrator {
    pub fn new() -> Self {
        Self {
            child: None,
            ready_pipe: None,
        }
    }

    pub fn is_needed(session: &IndexMap<String, BusPolicy>, system: &IndexMap<String, BusPolicy>, a11y: &IndexMap<String, BusPolicy>) -> bool {
        !session.is_empty() || !system.is_empty() || !a11y.is_empty()
    }

    /// Spawns the proxy helper and binds its socket into `out`, leaving the handshake
    /// pending; call [`Self::wait_ready`] once the sandbox process has been decided.
    pub fn spawn(
        &mut self,
        app_id: &str,
        session: &IndexMap<String, BusPolicy>,
        system: &IndexMap<String, BusPolicy>,
        runtime_dir: &str,
        out: &mut ExecutionArgs,
    ) -> Result<()> {
        let dbus_session_address = env_var("DBUS_SESSION_BUS_ADDRESS").map_err(|_| crate::error!(DBusProxyError::NoSessionBusAddress))?;

        let proxy_socket_path = unique_socket_path(runtime_dir)?;
        let sandbox_socket_path = format!("/run/user/{}/bus", *UID);

        let mut argv: Vec<String> = vec![dbus_session_address.clone(), proxy_socket_path.clone(), "--filter".into()];
        argv.push(format!("--own={app_id}"));
        argv.push(format!("--own={app_id}.*"));

        for (name, policy) in session {
            if *policy != BusPolicy::None {
                argv.push(format!("--{}={name}", policy.token()));
            }
        }

        for (name, policy) in system {
            if *policy != BusPolicy::None {
                argv.push(format!("--{}={name}", policy.token()));
            }
        }

        let (read_end, write_end) = pipe().map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::IOError("dbus-proxy sync pipe".into(), e.kind()))))?;

        let mut command = Command::new(*DBUS_PROXY_EXECUTABLE);
        command.args(&argv).arg(format!("--fd={}", write_end.as_raw_fd()));
        command
            .fd_mappings(vec![FdMapping {
                parent_fd: write_end.as_raw_fd(),
                child_fd: write_end.as_raw_fd(),
            }])
            .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::ProcessInitFailure(*DBUS_PROXY_EXECUTABLE, e.kind()))))?;

        let child = command
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::ProcessInitFailure(*DBUS_PROXY_EXECUTABLE, e.kind()))))?;

        drop(write_end);
        self.child = Some(child);
        self.ready_pipe = Some(read_end);

        out.bind(&proxy_socket_path, &sandbox_socket_path);
        out.env("DBUS_SESSION_BUS_ADDRESS", &format!("unix:path={sandbox_socket_path}"));

        Ok(())
    }

    /// Blocks reading exactly one byte from the sync pipe; failure is fatal per spec.
    pub fn wait_ready(&mut self) -> Result<()> {
        let Some(mut pipe) = self.ready_pipe.take() else { return Ok(()) };
        let mut byte = [0u8; 1];

        match pipe.read(&mut byte) {
            Ok(1) => Ok(()),
            _ => err!(DBusProxyError::HandshakeFailed),
        }
    }

    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }
}

fn unique_socket_path(runtime_dir: &str) -> Result<String> {
    let dir = format!("{runtime_dir}/.dbus-proxy");
    std::fs::create_dir_all(&dir).map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::IOError(dir.clone(), e.kind()))))?;

    let path = format!("{dir}/sbx-dbus-proxy-{}-{}", std::process::id(), *UID);
    let _ = std::fs::remove_file(&path);

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_needed_false_when_all_policies_empty() {
        assert!(!DBusProxyOrchestrator::is_needed(&IndexMap::new(), &IndexMap::new(), &IndexMap::new()));
    }

    #[test]
    fn is_needed_true_when_session_policy_present() {
        let mut session = IndexMap::new();
        session.insert("org.example.App".to_string(), BusPolicy::Own);
        assert!(DBusProxyOrchestrator::is_needed(&session, &IndexMap::new(), &IndexMap::new()));
    }

    #[test]
    fn wait_ready_is_a_no_op_without_a_pending_handshake() {
        let mut orchestrator = DBusProxyOrchestrator::new();
        assert!(orchestrator.wait_ready().is_ok());
    }
}
