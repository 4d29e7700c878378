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

//! The top-level flow: resolves metadata, composes every other component's output into
//! a single [`ExecutionArgs`], and hands the result to `SBX`.

use std::{
    os::{fd::AsRawFd, unix::process::CommandExt},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use command_fds::{CommandFdExt, FdMapping};
use os_pipe::pipe;
use signal_hook::{consts::SIGINT, iterator::Signals};

use crate::{
    appinfo::{AppInfoPublisher, InstanceInfo},
    baseroot::{BaseRootBuilder, BaseRootOptions},
    constants::{DATA_DIR, SBX_EXECUTABLE, UID, XDG_RUNTIME_DIR},
    context::{
        bitset::{Devices, Features, Shares, Sockets, TriState},
        filesystem::FilesystemMode,
        Context,
    },
    dbusproxy::DBusProxyOrchestrator,
    docportal::DocPortalForwarder,
    err,
    exec::{
        args::{Argument, ExecutionArgs},
        path::check_path,
        utils::{decode_info_json, wait_on_sandbox},
        ExecutionError,
    },
    export::{ExportMode, ExportPlanner, HOST_EXCLUDE},
    extension::{Extension, ExtensionMounter},
    impl_error,
    ldcache::{self, LdCacheRequest},
    lock::Lock,
    log::{Level, Logger},
    metadata::{AppMetadata, DeploymentStore, Ref, RuntimeMetadata},
    seccomp::{self, SeccompOptions, TargetArch},
    utils::{env_var_opt, sealed_tmpfile, sealed_tmpfile_str, TermControl},
    Result,
};

#[derive(Debug)]
pub enum LaunchError {
    SessionBusUnavailableForPolicy,
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionBusUnavailableForPolicy => write!(fmter, "Session bus policies configured but $DBUS_SESSION_BUS_ADDRESS is unset."),
        }
    }
}

impl_error!(LaunchError);

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub background: bool,
    pub dry_run: bool,
}

pub struct LaunchOrchestrator<'a> {
    store: &'a dyn DeploymentStore,
    logger: Logger,
}

impl<'a> LaunchOrchestrator<'a> {
    pub fn new(store: &'a dyn DeploymentStore) -> Result<Self> {
        Ok(Self {
            store,
            logger: Logger::new("sbx-core").init()?,
        })
    }

    pub fn launch(&mut self, app_ref: &Ref, overrides: &Context, command: &[String], options: &LaunchOptions) -> Result<()> {
        let _lock = Lock::new().lock()?;

        let app = self.store.app(app_ref)?;
        let runtime = self.store.runtime(app.runtime_ref())?;
        let data_dir = app.data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::IOError(data_dir.display().to_string(), e.kind()))))?;

        let context = self.effective_context(app.as_ref(), runtime.as_ref(), overrides)?;
        self.logger.log(Level::Info, "context computed").ok();

        let mut out = ExecutionArgs::new();

        out.robind(&runtime.files().to_string_lossy(), "/usr");
        out.lock_file("/usr/.ref");

        let app_data_dir = app.files();
        out.robind(&app_data_dir.to_string_lossy(), "/app");
        out.lock_file("/app/.ref");

        let app_tuples: Vec<(Box<dyn Extension>, bool)> = app.extensions().into_iter().map(|e| (e, false)).collect();
        let runtime_tuples: Vec<(Box<dyn Extension>, bool)> = runtime.extensions().into_iter().map(|e| (e, true)).collect();

        let mut app_mounter = ExtensionMounter::new(true);
        app_mounter.mount(&mut out, &app_tuples);
        app_mounter.apply_ld_library_path(&mut out);
        Self::emit_ld_conf_fragments(app_mounter.ld_conf_fragments(), &mut out)?;

        let mut runtime_mounter = ExtensionMounter::new(true);
        runtime_mounter.mount(&mut out, &runtime_tuples);
        runtime_mounter.apply_ld_library_path(&mut out);
        Self::emit_ld_conf_fragments(runtime_mounter.ld_conf_fragments(), &mut out)?;

        let app_extensions_summary = app_mounter.summary();
        let runtime_extensions_summary = runtime_mounter.summary();
        self.logger.log(Level::Info, "extensions mounted").ok();

        // The ld cache is built inside its own nested sandbox invocation, which doesn't see
        // `out` — re-run the extension mounts into a dedicated argument set so the cache's
        // `ldconfig` run has the same extension binds and ld.so.conf.d fragments present.
        let mut extension_mounts = ExecutionArgs::new();
        let mut ld_app_mounter = ExtensionMounter::new(true);
        ld_app_mounter.mount(&mut extension_mounts, &app_tuples);
        Self::emit_ld_conf_fragments(ld_app_mounter.ld_conf_fragments(), &mut extension_mounts)?;
        let mut ld_runtime_mounter = ExtensionMounter::new(true);
        ld_runtime_mounter.mount(&mut extension_mounts, &runtime_tuples);
        Self::emit_ld_conf_fragments(ld_runtime_mounter.ld_conf_fragments(), &mut extension_mounts)?;

        let ld_request = LdCacheRequest {
            app_commit: app.commit(),
            runtime_commit: runtime.commit(),
            app_extensions_summary: &app_extensions_summary,
            runtime_extensions_summary: &runtime_extensions_summary,
            runtime_files: runtime.files(),
            app_files: Some(app.files()),
            app_data_dir: Some(&data_dir),
            extension_mounts,
            runtime_ld_so_conf: runtime.ld_so_conf().as_deref(),
        };
        let ld_cache_fd = ldcache::open(ld_request).ok();
        self.logger.log(Level::Info, "ld cache resolved").ok();

        let base_options = BaseRootOptions {
            die_with_parent: !matches!(context.features.get(Features::DEVEL), TriState::Granted),
            writable_etc: false,
            linux32: false,
            monitor_dir: None,
        };
        BaseRootBuilder::new(runtime.files(), base_options).build(&mut out)?;

        if let Some(fd) = ld_cache_fd {
            out.push_fd_arg(fd, Argument::RoBindDataFd(fd, "/etc/ld.so.cache".into()));
        }

        let instance_info = InstanceInfo {
            is_runtime: false,
            name: app.app_id().to_string(),
            runtime_ref: app.runtime_ref().to_string(),
            app_path: app.files().to_string_lossy().into_owned(),
            app_commit: app.commit().to_string(),
            app_extensions: app_extensions_summary.clone(),
            runtime_path: runtime.files().to_string_lossy().into_owned(),
            runtime_commit: runtime.commit().to_string(),
            runtime_extensions: runtime_extensions_summary.clone(),
            branch: app_ref.branch.clone(),
            flatpak_version: env!("CARGO_PKG_VERSION").to_string(),
            session_bus_proxy: !context.session_bus_policy.is_empty(),
            system_bus_proxy: !context.system_bus_policy.is_empty(),
        };
        AppInfoPublisher::publish(&instance_info, &mut out)?;

        let mut portal = DocPortalForwarder::new(app.app_id());
        let portal_reachable = portal.probe();
        if portal_reachable {
            portal.bind(*UID, &mut out);
        }

        let mut seccomp_pipe = pipe().map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::IOError("seccomp pipe".into(), e.kind()))))?;
        let seccomp_options = SeccompOptions {
            arch: TargetArch::default_for_host(),
            multiarch: matches!(context.features.get(Features::MULTIARCH), TriState::Granted),
            devel: matches!(context.features.get(Features::DEVEL), TriState::Granted),
        };
        let seccomp_fd = seccomp::provide_bpf_program(&seccomp_options, &seccomp_pipe.0, seccomp_pipe.1)?;
        out.push_fd_arg(seccomp_fd, Argument::SeccompFd(seccomp_fd));
        self.logger.log(Level::Info, "seccomp filter sized").ok();

        let mut dbus_orchestrator = DBusProxyOrchestrator::new();
        let mut jobs: Vec<Child> = Vec::new();

        if DBusProxyOrchestrator::is_needed(&context.session_bus_policy, &context.system_bus_policy, &Default::default()) {
            if env_var_opt("DBUS_SESSION_BUS_ADDRESS").is_none() {
                self.logger.log(Level::Warn, "session bus policies configured but no session bus address; skipping proxy").ok();
            } else {
                dbus_orchestrator.spawn(app.app_id(), &context.session_bus_policy, &context.system_bus_policy, XDG_RUNTIME_DIR.as_str(), &mut out)?;
                self.logger.log(Level::Info, "proxy spawned").ok();
            }
        }

        self.apply_environment(&context, &mut out);
        self.apply_journal_and_fonts(&mut out);

        let planner = self.build_planner(&context, app.app_id())?;
        planner.emit(&mut out);

        let rewritten_command = if portal_reachable { portal.rewrite_arguments(command, &planner)? } else { command.to_vec() };

        dbus_orchestrator.wait_ready()?;

        if options.dry_run {
            self.logger.log(Level::Info, "dry run requested; not invoking SBX").ok();
            return Ok(());
        }

        let result = self.exec_sandbox(out, &rewritten_command, options.background, &mut jobs, app.files(), runtime.files());
        self.logger.log(Level::Info, "final argv handed to SBX").ok();
        result
    }

    fn effective_context(&self, app: &dyn AppMetadata, runtime: &dyn RuntimeMetadata, overrides: &Context) -> Result<Context> {
        let mut context = Context::defaults();
        context.merge(&Self::parse_or_default(runtime.metadata()));
        context.merge(&Self::parse_or_default(app.metadata()));
        context.merge(overrides);
        Ok(context)
    }

    fn parse_or_default(manifest: &crate::context::manifest::Manifest) -> Context {
        let mut context = Context::new();
        context.parse_metadata(manifest).ok();
        context
    }

    /// Composes the export plan per the context's `filesystems` grants (§4.2): `host`
    /// enumerates real root entries (minus the opaque/runtime set) plus `/run/media`;
    /// `home` exposes `$HOME` itself; every other entry resolves via `resolve_fs_path`,
    /// creating its target first when granted in `create` mode. On top of whatever the
    /// context grants, `$HOME` always gets a dir-only export, the platform's own user
    /// base directory is always tmpfs-hidden, and the per-app data parent
    /// (`$HOME/.var/app`) is always tmpfs-hidden with this app's own subdirectory
    /// re-exposed read-write.
    fn build_planner(&self, context: &Context, app_id: &str) -> Result<ExportPlanner> {
        let mut planner = ExportPlanner::new();
        let home = env_var_opt("HOME");

        if let Some(mode) = context.filesystems.get("host") {
            if let Some(export_mode) = export_mode_for(mode) {
                if let Ok(entries) = std::fs::read_dir("/") {
                    for entry in entries.flatten() {
                        let name = entry.file_name();
                        let name = name.to_string_lossy();
                        if HOST_EXCLUDE.contains(&name.as_ref()) {
                            continue;
                        }
                        planner.expose(Path::new(&format!("/{name}")), export_mode).ok();
                    }
                }
                planner.expose(Path::new("/run/media"), export_mode).ok();
            }
        }

        if let Some(mode) = context.filesystems.get("home") {
            if let (Some(export_mode), Some(home)) = (export_mode_for(mode), &home) {
                planner.expose(Path::new(home), export_mode).ok();
            }
        }

        for (key, mode) in &context.filesystems {
            if key == "host" || key == "home" {
                continue;
            }

            let Some(export_mode) = export_mode_for(mode) else { continue };
            let Some(path) = resolve_fs_path(key) else { continue };

            if let Some(home) = &home {
                if path == Path::new(home) {
                    continue;
                }
            }

            if export_mode == ExportMode::Create && !path.exists() {
                std::fs::create_dir_all(&path).map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::IOError(path.display().to_string(), e.kind()))))?;
            }

            planner.expose(&path, export_mode).ok();
        }

        if let Some(home) = &home {
            planner.dir(Path::new(home));

            let app_data_parent = format!("{home}/.var/app");
            let app_data_subdir = format!("{app_data_parent}/{app_id}");
            std::fs::create_dir_all(&app_data_subdir)
                .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::IOError(app_data_subdir.clone(), e.kind()))))?;

            planner.tmpfs(Path::new(&app_data_parent));
            planner.expose(Path::new(&app_data_subdir), ExportMode::ReadWrite).ok();
        }

        planner.tmpfs(Path::new(*DATA_DIR));

        Ok(planner)
    }

    fn emit_ld_conf_fragments(fragments: &[(String, String)], out: &mut ExecutionArgs) -> Result<()> {
        if fragments.is_empty() {
            return Ok(());
        }

        out.dir("/run/flatpak/ld.so.conf.d");

        for (name, path) in fragments {
            let fd = sealed_tmpfile_str(name, &format!("{path}\n"))?;
            out.push_fd_arg(fd, Argument::FileFd(fd, format!("/run/flatpak/ld.so.conf.d/{name}")));
        }

        Ok(())
    }

    fn apply_environment(&self, context: &Context, out: &mut ExecutionArgs) {
        if !matches!(context.shares.get(Shares::IPC), TriState::Granted) {
            out.push_sys(Argument::UnshareIpc);
        }

        if !matches!(context.shares.get(Shares::NETWORK), TriState::Granted) {
            out.push_sys(Argument::UnshareNet);
        } else {
            out.push_sys(Argument::HostNetworking);
        }

        if matches!(context.devices.get(Devices::DRI), TriState::Granted) {
            out.dev("/dev/dri");
        }

        if matches!(context.devices.get(Devices::KVM), TriState::Granted) {
            out.dev("/dev/kvm");
        }

        if matches!(context.devices.get(Devices::ALL), TriState::Granted) {
            out.push_sys(Argument::DevFs);
        }

        if matches!(context.sockets.get(Sockets::X11), TriState::Granted) {
            self.apply_x11(out);
        }

        if matches!(context.sockets.get(Sockets::WAYLAND), TriState::Granted) {
            if let Some(display) = env_var_opt("WAYLAND_DISPLAY") {
                let socket = format!("{}/{}", *crate::constants::XDG_RUNTIME_DIR, display);
                out.robind(&socket, &socket);
                out.env("WAYLAND_DISPLAY", &display);
            }
        }

        if matches!(context.sockets.get(Sockets::PULSEAUDIO), TriState::Granted) {
            let socket = format!("{}/pulse/native", *crate::constants::XDG_RUNTIME_DIR);
            if Path::new(&socket).exists() {
                out.robind(&socket, &socket);
            }
        }

        for (name, value) in &context.env_vars {
            out.env(name, value);
        }

        if !matches!(context.filesystems.get("host"), Some(FilesystemMode::ReadOnly | FilesystemMode::ReadWrite)) {
            for relative in &context.persistent {
                let home = env_var_opt("HOME").unwrap_or_default();
                let path = format!("{home}/{relative}");
                if Path::new(&path).exists() {
                    out.bind(&path, &path);
                }
            }
        }
    }

    fn apply_x11(&self, out: &mut ExecutionArgs) {
        let Some(display) = env_var_opt("DISPLAY") else { return };
        let display = display.trim_start_matches(':');
        out.tmpfs("/tmp/.X11-unix");
        out.bind(&format!("/tmp/.X11-unix/X{display}"), "/tmp/.X11-unix/X99");
        out.env("DISPLAY", ":99.0");
    }

    fn apply_journal_and_fonts(&self, out: &mut ExecutionArgs) {
        if Path::new("/var/log/journal").exists() {
            out.robind_try("/var/log/journal", "/var/log/journal");
        }

        for dir in ["/usr/share/fonts", "/usr/share/icons", "/usr/local/share/fonts"] {
            if Path::new(dir).exists() {
                out.robind_try(dir, dir);
            }
        }
    }

    fn exec_sandbox(&self, out: ExecutionArgs, command: &[String], background: bool, jobs: &mut Vec<Child>, app_root: &Path, runtime_root: &Path) -> Result<()> {
        let command_refs: Vec<&str> = command.iter().map(String::as_str).collect();
        check_path(Some(&app_root.to_string_lossy()), &runtime_root.to_string_lossy(), &command_refs)?;

        let argv = out.arguments_owned();
        let serialized: Vec<u8> = argv.join("\0").into_bytes();
        let args_fd = sealed_tmpfile("sbx-args", &serialized)?;

        let mut child = Command::new(*SBX_EXECUTABLE);
        child.arg("--args").arg(args_fd.to_string()).args(command);

        let mut mappings: Vec<FdMapping> = out.fds().iter().map(|fd| FdMapping { parent_fd: *fd, child_fd: *fd }).collect();
        mappings.push(FdMapping {
            parent_fd: args_fd,
            child_fd: args_fd,
        });

        if background {
            let (info_reader, info_writer) = pipe().map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::IOError("info pipe".into(), e.kind()))))?;
            let info_fd = info_writer.as_raw_fd();
            mappings.push(FdMapping { parent_fd: info_fd, child_fd: info_fd });

            child
                .arg("--info-fd")
                .arg(info_fd.to_string())
                .fd_mappings(mappings)
                .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::ProcessInitFailure(*SBX_EXECUTABLE, e.kind()))))?;

            let spawned = child
                .stdin(Stdio::inherit())
                .spawn()
                .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::ProcessInitFailure(*SBX_EXECUTABLE, e.kind()))))?;

            let sandbox_pid = decode_info_json((info_reader, info_writer))?;
            let term = TermControl::new(0);

            return wait_on_sandbox(spawned, term, sandbox_pid, true, Some(std::mem::take(jobs)), signal_trap, || Ok(()));
        }

        child
            .fd_mappings(mappings)
            .map_err(|e| crate::Error::new(Box::new(crate::ErrorKind::ProcessInitFailure(*SBX_EXECUTABLE, e.kind()))))?;

        let error = child.exec();
        err!(ExecutionError::ExecutableUnavailable(format!("{}: {error}", *SBX_EXECUTABLE)))
    }
}

fn signal_trap(sandbox_pid: i32) {
    let Ok(mut signals) = Signals::new([SIGINT]) else { return };
    thread::spawn(move || {
        for _ in signals.forever() {
            let proc = format!("/proc/{sandbox_pid}/");
            if Path::new(&proc).exists() {
                let _ = Command::new("kill").arg("-9").arg(sandbox_pid.to_string()).status();
            }
            thread::sleep(Duration::from_millis(50));
        }
    });
}

/// Resolves a canonical filesystem key (`host`, `home`, `xdg-*[/suffix]`, `xdg-run/suffix`,
/// `~/suffix`, or an absolute path) to a host path. Per the original behavior, an unset
/// `xdg-*` base directory is skipped rather than falling back to the XDG default.
fn resolve_fs_path(key: &str) -> Option<PathBuf> {
    if let Some(rest) = key.strip_prefix("~/") {
        let home = env_var_opt("HOME")?;
        return Some(PathBuf::from(format!("{home}/{rest}")));
    }

    if key == "home" {
        return env_var_opt("HOME").map(PathBuf::from);
    }

    if key == "host" {
        return Some(PathBuf::from("/"));
    }

    if let Some(rest) = key.strip_prefix("xdg-run/") {
        return Some(PathBuf::from(format!("{}/{rest}", *crate::constants::XDG_RUNTIME_DIR)));
    }

    for (prefix, env) in [
        ("xdg-data", "XDG_DATA_HOME"),
        ("xdg-cache", "XDG_CACHE_HOME"),
        ("xdg-config", "XDG_CONFIG_HOME"),
        ("xdg-desktop", "XDG_DESKTOP_DIR"),
        ("xdg-documents", "XDG_DOCUMENTS_DIR"),
        ("xdg-download", "XDG_DOWNLOAD_DIR"),
        ("xdg-music", "XDG_MUSIC_DIR"),
        ("xdg-pictures", "XDG_PICTURES_DIR"),
        ("xdg-public-share", "XDG_PUBLICSHARE_DIR"),
        ("xdg-templates", "XDG_TEMPLATES_DIR"),
        ("xdg-videos", "XDG_VIDEOS_DIR"),
    ] {
        if let Some(rest) = key.strip_prefix(prefix) {
            let base = env_var_opt(env)?;
            if env_var_opt("HOME").is_some_and(|home| home == base) {
                return None;
            }
            return Some(if rest.is_empty() { PathBuf::from(base) } else { PathBuf::from(format!("{base}{rest}")) });
        }
    }

    if key.starts_with('/') {
        return Some(PathBuf::from(key));
    }

    None
}

fn export_mode_for(mode: &FilesystemMode) -> Option<ExportMode> {
    match mode {
        FilesystemMode::ReadOnly => Some(ExportMode::ReadOnly),
        FilesystemMode::ReadWrite => Some(ExportMode::ReadWrite),
        FilesystemMode::Create => Some(ExportMode::Create),
        FilesystemMode::Denied => None,
    }
}

impl TargetArch {
    fn default_for_host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Self::Aarch64
        } else {
            Self::X8664
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_tilde_prefixed_path() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(resolve_fs_path("~/Projects"), Some(PathBuf::from("/home/tester/Projects")));
    }

    #[test]
    fn resolves_host_to_root() {
        assert_eq!(resolve_fs_path("host"), Some(PathBuf::from("/")));
    }

    #[test]
    fn xdg_run_resolves_under_user_runtime_dir() {
        let resolved = resolve_fs_path("xdg-run/app-socket").unwrap();
        assert!(resolved.to_string_lossy().ends_with("/app-socket"));
    }

    #[test]
    fn unset_xdg_base_is_skipped_not_defaulted() {
        std::env::remove_var("XDG_MUSIC_DIR");
        assert_eq!(resolve_fs_path("xdg-music"), None);
    }
}
