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

//! Publishes the `.flatpak-info`-style key-file describing the running instance to the
//! sandboxed process, via a pair of descriptors over the same sealed buffer so a torn-down
//! bind mount still leaves a readable real file behind.

use crate::{
    constants::UID,
    context::manifest::Manifest,
    exec::args::{Argument, ExecutionArgs},
    utils::sealed_tmpfile_str,
    Result,
};

#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub is_runtime: bool,
    pub name: String,
    pub runtime_ref: String,
    pub app_path: String,
    pub app_commit: String,
    pub app_extensions: String,
    pub runtime_path: String,
    pub runtime_commit: String,
    pub runtime_extensions: String,
    pub branch: String,
    pub flatpak_version: String,
    pub session_bus_proxy: bool,
    pub system_bus_proxy: bool,
}

pub struct AppInfoPublisher;

impl AppInfoPublisher {
    pub fn publish(info: &InstanceInfo, out: &mut ExecutionArgs) -> Result<()> {
        let manifest = Self::render(info);
        let content = manifest.to_string();

        let read_fd = sealed_tmpfile_str(".flatpak-info", &content)?;
        let write_fd = sealed_tmpfile_str(".flatpak-info", &content)?;

        out.push_fd_arg(write_fd, Argument::FileFd(write_fd, "/.flatpak-info".into()));
        out.push_fd_arg(read_fd, Argument::RoBindDataFd(read_fd, "/.flatpak-info".into()));

        out.symlink("../../../.flatpak-info", &format!("/run/user/{}/flatpak-info", *UID));

        Ok(())
    }

    fn render(info: &InstanceInfo) -> Manifest {
        let mut manifest = Manifest::new();
        let section = if info.is_runtime { "Runtime" } else { "Application" };

        manifest.set(section, "name", info.name.clone());
        manifest.set(section, "runtime", info.runtime_ref.clone());

        manifest.set("Instance", "app-path", info.app_path.clone());
        manifest.set("Instance", "app-commit", info.app_commit.clone());
        manifest.set("Instance", "app-extensions", info.app_extensions.clone());
        manifest.set("Instance", "runtime-path", info.runtime_path.clone());
        manifest.set("Instance", "runtime-commit", info.runtime_commit.clone());
        manifest.set("Instance", "runtime-extensions", info.runtime_extensions.clone());
        manifest.set("Instance", "branch", info.branch.clone());
        manifest.set("Instance", "flatpak-version", info.flatpak_version.clone());
        manifest.set("Instance", "session-bus-proxy", info.session_bus_proxy.to_string());
        manifest.set("Instance", "system-bus-proxy", info.system_bus_proxy.to_string());

        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InstanceInfo {
        InstanceInfo {
            is_runtime: false,
            name: "org.example.App".into(),
            runtime_ref: "runtime/org.example.Platform/x86_64/23.08".into(),
            app_path: "/deploy/app/files".into(),
            app_commit: "abc123".into(),
            app_extensions: String::new(),
            runtime_path: "/deploy/runtime/files".into(),
            runtime_commit: "def456".into(),
            runtime_extensions: String::new(),
            branch: "stable".into(),
            flatpak_version: "1.14.0".into(),
            session_bus_proxy: true,
            system_bus_proxy: false,
        }
    }

    #[test]
    fn render_uses_application_section_for_apps() {
        let manifest = AppInfoPublisher::render(&sample());
        assert_eq!(manifest.section("Application").unwrap().get("name").unwrap(), "org.example.App");
    }

    #[test]
    fn render_uses_runtime_section_for_runtimes() {
        let mut info = sample();
        info.is_runtime = true;
        let manifest = AppInfoPublisher::render(&info);
        assert!(manifest.section("Runtime").is_some());
        assert!(manifest.section("Application").is_none());
    }

    #[test]
    fn instance_section_carries_bus_proxy_flags() {
        let manifest = AppInfoPublisher::render(&sample());
        assert_eq!(manifest.section("Instance").unwrap().get("session-bus-proxy").unwrap(), "true");
    }
}
