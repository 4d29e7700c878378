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

//! `sbx info <ref>`: resolves the effective [`Context`] for a ref (runtime metadata,
//! then app metadata, both merged over the built-in defaults) and prints it as the CLI
//! flags that would reconstruct it. Unlike `run --dry-run`, this never touches the
//! filesystem beyond reading the deployment's own metadata.

use sbx_core::{
    context::Context,
    err,
    metadata::{AppMetadata, DeploymentStore, Ref, RuntimeMetadata},
    utils::arguments::{Arguments, InvalidArgument, Operand as Op},
    Result,
};

use crate::store::FileDeploymentStore;

pub fn info(args: &mut Arguments) -> Result<()> {
    let target = args.target()?;
    let Some(app_ref) = Ref::parse(target) else { return err!(InvalidArgument::InvalidOperand(target.to_string())) };

    let store = FileDeploymentStore::default();
    let app = store.app(&app_ref)?;
    let runtime = store.runtime(app.runtime_ref())?;

    let mut context = Context::defaults();
    context.merge(&parse_manifest(runtime.metadata()));
    context.merge(&parse_manifest(app.metadata()));

    println!("ref: {app_ref}");
    println!("runtime: {}", app.runtime_ref());
    println!("app commit: {}", app.commit());
    println!("runtime commit: {}", runtime.commit());
    println!("command: {}", app.command());
    println!();

    for arg in context.to_args() {
        println!("{arg}");
    }

    Ok(())
}

fn parse_manifest(manifest: &sbx_core::context::manifest::Manifest) -> Context {
    let mut context = Context::new();
    context.parse_metadata(manifest).ok();
    context
}
