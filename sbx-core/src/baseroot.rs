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

//! Mandatory sandbox scaffolding: process namespace flags, `/proc` and `/tmp`, the
//! sealed `/etc/passwd` and `/etc/group`, the runtime's `etc/` projection, usr-compat
//! symlinks, and process personality.

use std::{fs, path::Path};

use nix::sys::personality::{self, Persona};

use crate::{
    constants::UID,
    exec::args::{Argument, ExecutionArgs},
    utils::sealed_tmpfile_str,
    Result,
};

const ETC_EXCLUDE: &[&str] = &["passwd", "group", "machine-id", "resolv.conf", "host.conf", "hosts", "localtime"];
const USR_COMPAT: &[&str] = &["lib", "lib32", "lib64", "bin", "sbin"];

#[derive(Debug, Clone, Default)]
pub struct BaseRootOptions {
    pub die_with_parent: bool,
    pub writable_etc: bool,
    pub linux32: bool,
    pub monitor_dir: Option<String>,
}

pub struct BaseRootBuilder<'a> {
    runtime_root: &'a Path,
    options: BaseRootOptions,
}

impl<'a> BaseRootBuilder<'a> {
    pub fn new(runtime_root: &'a Path, options: BaseRootOptions) -> Self {
        Self { runtime_root, options }
    }

    pub fn build(&self, out: &mut ExecutionArgs) -> Result<()> {
        self.scaffold(out);
        self.passwd_and_group(out)?;
        self.machine_id(out);
        self.project_etc(out)?;
        self.usr_compat_symlinks(out);
        self.apply_personality()?;
        self.project_resolver_files(out);
        Ok(())
    }

    fn scaffold(&self, out: &mut ExecutionArgs) {
        out.push_sys(Argument::UnsharePid);
        out.push_sys(Argument::ProcFs);
        out.dir("/tmp");
        out.dir("/var/tmp");
        out.dir("/run/host");
        out.dir(&format!("/run/user/{}", *UID));
        out.env("XDG_RUNTIME_DIR", &format!("/run/user/{}", *UID));
        out.symlink("../run", "/var/run");

        for subsys in ["block", "bus", "class", "dev", "devices"] {
            out.robind(&format!("/sys/{subsys}"), &format!("/sys/{subsys}"));
        }

        if self.options.die_with_parent {
            out.push_sys(Argument::DieWithParent);
        }

        if self.options.writable_etc {
            out.dir("/usr/etc");
            out.symlink("usr/etc", "/etc");
        }
    }

    fn passwd_and_group(&self, out: &mut ExecutionArgs) -> Result<()> {
        let user = crate::utils::env_var_opt("USER").unwrap_or_else(|| "user".to_string());
        let home = crate::utils::env_var_opt("HOME").unwrap_or_else(|| "/home/user".to_string());
        let shell = crate::utils::env_var_opt("SHELL").unwrap_or_else(|| "/bin/sh".to_string());

        let passwd = format!(
            "{user}:x:{uid}:{gid}::{home}:{shell}\nnfsnobody:x:65534:65534:Unmapped user:/:/sbin/nologin\n",
            uid = *UID,
            gid = *crate::constants::GID,
        );
        let group = format!("{user}:x:{gid}:\n", gid = *crate::constants::GID);

        let passwd_fd = sealed_tmpfile_str("passwd", &passwd)?;
        let group_fd = sealed_tmpfile_str("group", &group)?;

        out.push_fd_arg(passwd_fd, Argument::RoBindDataFd(passwd_fd, "/etc/passwd".into()));
        out.push_fd_arg(group_fd, Argument::RoBindDataFd(group_fd, "/etc/group".into()));

        Ok(())
    }

    fn machine_id(&self, out: &mut ExecutionArgs) {
        for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if Path::new(candidate).exists() {
                out.robind(candidate, "/etc/machine-id");
                return;
            }
        }
    }

    fn project_etc(&self, out: &mut ExecutionArgs) -> Result<()> {
        if self.options.writable_etc {
            return Ok(());
        }

        let runtime_etc = self.runtime_root.join("etc");
        let Ok(entries) = fs::read_dir(&runtime_etc) else { return Ok(()) };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if ETC_EXCLUDE.contains(&name.as_ref()) {
                continue;
            }

            let dest = format!("/etc/{name}");
            let meta = entry.metadata();

            if meta.map(|m| m.file_type().is_symlink()).unwrap_or(false) {
                if let Ok(target) = fs::read_link(entry.path()) {
                    out.symlink(&target.to_string_lossy(), &dest);
                }
            } else {
                out.robind(&entry.path().to_string_lossy(), &dest);
            }
        }

        Ok(())
    }

    fn usr_compat_symlinks(&self, out: &mut ExecutionArgs) {
        for name in USR_COMPAT {
            if self.runtime_root.join(name).exists() {
                out.symlink(&format!("usr/{name}"), &format!("/{name}"));
            }
        }
    }

    fn apply_personality(&self) -> Result<()> {
        let persona = if self.options.linux32 { Persona::LINUX32 } else { Persona::empty() };

        if !persona.is_empty() {
            personality::set(persona).map_err(|errno| {
                crate::Error::new(Box::new(crate::ErrorKind::IOError("personality".into(), std::io::Error::from_raw_os_error(errno as i32).kind())))
            })?;
        }

        Ok(())
    }

    /// Prefers a host service's monitor directory (network state mirrored for the
    /// sandbox); falls back to binding the host files directly when no monitor is
    /// available, preferring a `/usr/`-anchored symlink target for `/etc/localtime`.
    fn project_resolver_files(&self, out: &mut ExecutionArgs) {
        if let Some(monitor) = &self.options.monitor_dir {
            out.robind(monitor, "/run/host/monitor");
            for name in ["resolv.conf", "host.conf", "hosts", "localtime"] {
                out.symlink(&format!("host/monitor/{name}"), &format!("/etc/{name}"));
            }
            return;
        }

        for name in ["resolv.conf", "host.conf", "hosts"] {
            let path = format!("/etc/{name}");
            if Path::new(&path).exists() {
                out.robind(&path, &path);
            }
        }

        if let Ok(target) = fs::read_link("/etc/localtime") {
            if let Some(usr_anchored) = target.to_str().filter(|t| t.starts_with("/usr/") || t.starts_with("usr/")) {
                out.symlink(usr_anchored, "/etc/localtime");
                return;
            }
        }

        if Path::new("/etc/localtime").exists() {
            out.robind("/etc/localtime", "/etc/localtime");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_etc_skips_runtime_projection() {
        let builder = BaseRootBuilder::new(Path::new("/nonexistent-runtime"), BaseRootOptions { writable_etc: true, ..Default::default() });
        let mut args = ExecutionArgs::new();
        assert!(builder.project_etc(&mut args).is_ok());
    }

    #[test]
    fn scaffold_emits_xdg_runtime_dir() {
        let builder = BaseRootBuilder::new(Path::new("/nonexistent-runtime"), BaseRootOptions::default());
        let mut args = ExecutionArgs::new();
        builder.scaffold(&mut args);
        let rendered = args.arguments_owned();
        assert!(rendered.iter().any(|a| a == "XDG_RUNTIME_DIR"));
    }
}
