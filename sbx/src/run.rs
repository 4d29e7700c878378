/*
 * sbx
 *
 * Copyright (C) 2023-2024 Xavier R.M. <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify
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

//! `sbx run <ref> [context flags…] [-- command…]`

use sbx_core::{
    context::Context,
    err,
    launch::{LaunchOptions, LaunchOrchestrator},
    metadata::{AppMetadata, DeploymentStore, Ref},
    utils::arguments::{Arguments, InvalidArgument, Operand as Op},
    Result,
};

use crate::store::FileDeploymentStore;

const CONTEXT_FLAGS: &[&str] = &[
    "share",
    "unshare",
    "socket",
    "nosocket",
    "device",
    "nodevice",
    "allow",
    "disallow",
    "filesystem",
    "nofilesystem",
    "env",
    "own-name",
    "talk-name",
    "system-own-name",
    "system-talk-name",
    "add-policy",
    "remove-policy",
    "persist",
];

pub fn run(args: &mut Arguments) -> Result<()> {
    let mut overrides = Context::new();
    let mut target: Option<&str> = None;
    let mut verbosity: u8 = 0;
    let mut dry_run = false;

    while let Some(op) = args.next() {
        match op {
            Op::Long("verbose") | Op::Short('v') => verbosity += 1,
            Op::Long("dry-run") => dry_run = true,
            Op::Long("") => break,
            Op::LongPos(name, value) if CONTEXT_FLAGS.contains(&name) => overrides.apply_option(&format!("--{name}"), value)?,
            Op::Long(name) if CONTEXT_FLAGS.contains(&name) => continue,
            Op::LongPos(_, value) | Op::Value(value) | Op::ShortPos(_, value) =>
                if target.is_none() {
                    target = Some(value);
                } else {
                    args.invalid_operand()?;
                },
            _ => args.invalid_operand()?,
        }
    }

    let Some(target) = target else { return err!(InvalidArgument::TargetUnspecified) };
    let Some(app_ref) = Ref::parse(target) else { return err!(InvalidArgument::InvalidOperand(target.to_string())) };

    let command: Vec<String> = match args.inner().iter().position(|s| *s == "--") {
        Some(idx) => args.inner()[idx + 1 ..].iter().map(|s| s.to_string()).collect(),
        None => Vec::new(),
    };

    let store = FileDeploymentStore::default();
    let app = store.app(&app_ref)?;
    let command = if command.is_empty() { vec![app.command().to_string()] } else { command };

    if verbosity > 0 {
        eprintln!("{}running {app_ref} -> {}{}", *sbx_core::constants::DIM, command.join(" "), *sbx_core::constants::RESET);
    }

    let mut orchestrator = LaunchOrchestrator::new(&store)?;
    let options = LaunchOptions { background: false, dry_run };

    orchestrator.launch(&app_ref, &overrides, &command, &options)
}
