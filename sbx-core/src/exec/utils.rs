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
    io::Read,
    path::Path,
    process::{exit, Child},
    thread,
};

use os_pipe::{PipeReader, PipeWriter};
use serde_yaml::Value;

use crate::{constants::{PROCESS_SLEEP_DURATION, SBX_EXECUTABLE}, err, error::*, exec::ExecutionError, utils::TermControl, ErrorKind};

/// Waits on the spawned `SBX` process, blocking (if requested) until its child pid
/// has fully exited, then runs the job-cleanup and terminal-restore callbacks before
/// translating the exit status into this process's own exit code.
pub fn wait_on_sandbox(
    mut process: Child,
    term: TermControl,
    sandbox_pid: i32,
    block: bool,
    jobs: Option<Vec<Child>>,
    trap_cb: fn(i32),
    exit_cb: fn() -> Result<()>,
) -> Result<()> {
    trap_cb(sandbox_pid);

    match process.wait() {
        Ok(status) => {
            if block {
                let proc: &str = &format!("/proc/{}/", sandbox_pid);
                let proc = Path::new(proc);

                while proc.exists() {
                    thread::sleep(PROCESS_SLEEP_DURATION);
                }
            }

            if let Some(mut jobs) = jobs {
                for job in jobs.iter_mut() {
                    job.kill().ok();
                }
            }

            if let Err(err) = exit_cb() {
                err.warn();
            }

            if let Err(err) = term.reset_terminal() {
                err.warn();
            }

            match status.code() {
                Some(code) => exit(code),
                None => {
                    eprint!("\n{} process {status}", *SBX_EXECUTABLE);
                    println!();
                    exit(ExecutionError::Helper(status).code())
                }
            }
        }
        Err(error) => err!(ErrorKind::ProcessWaitFailure(*SBX_EXECUTABLE, error.kind())),
    }
}

/// Decodes the `--info-fd` payload bwrap-style helpers emit, extracting the
/// namespaced child's pid so signal forwarding and `wait_on_sandbox` can target it.
pub fn decode_info_json(mut info_pipe: (PipeReader, PipeWriter)) -> Result<i32> {
    let mut output = String::new();

    drop(info_pipe.1);
    info_pipe.0.read_to_string(&mut output).ok();

    match serde_yaml::from_str::<Value>(&output) {
        Ok(value) => match value["child-pid"].as_u64() {
            Some(value) => Ok(value as i32),
            None => err!(ErrorKind::Message("Unable to acquire child pid from the sandbox helper process.")),
        },
        Err(_) => err!(ErrorKind::Message("Unable to acquire child pid from the sandbox helper process.")),
    }
}

pub fn handle_process(name: &'static str, result: std::result::Result<Child, std::io::Error>) -> Result<()> {
    match result {
        Ok(child) => wait_on_process(name, child),
        Err(error) => err!(ErrorKind::ProcessInitFailure(name, error.kind())),
    }
}

pub fn wait_on_process(name: &'static str, mut child: Child) -> Result<()> {
    match child.wait() {
        Ok(_) => Ok(()),
        Err(error) => err!(ErrorKind::ProcessWaitFailure(name, error.kind())),
    }
}
