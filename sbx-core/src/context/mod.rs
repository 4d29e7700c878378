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

//! The permission aggregate: tri-state shares/sockets/devices/features, environment
//! variables, persistent home paths, filesystem grants, bus policies, and generic
//! per-subsystem policy lists. Created empty, populated from metadata and CLI overrides,
//! merged left-to-right, and consumed once by the launch orchestrator.

pub mod bitset;
pub mod dbus;
pub mod filesystem;
pub mod manifest;

use std::fmt::{Display, Formatter, Result as FmtResult};

use indexmap::{IndexMap, IndexSet};

use crate::{
    context::{
        bitset::{Devices, Features, Shares, Sockets, TriBits, TriState},
        dbus::{is_well_formed_bus_name, BusPolicy},
        filesystem::{self, FilesystemMode},
        manifest::{join_list, join_policy_list, split_list, split_policy_list, Manifest, ManifestError},
    },
    err,
    impl_error,
    Error,
    Result,
};

#[derive(Debug)]
pub enum ContextError {
    UnknownToken {
        field: &'static str,
        token: String,
        valid: &'static [&'static str],
    },
    UnknownOption(String),
    MalformedBusName(String),
    MalformedEnv(String),
    MalformedPolicyKey(String),
    NegatedPolicyValue(String),
    Manifest(ManifestError),
}

impl Display for ContextError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnknownToken { field, token, valid } =>
                write!(fmter, "'{token}' is not a recognized {field} (valid: {})", valid.join(", ")),
            Self::UnknownOption(opt) => write!(fmter, "Unrecognized option '{opt}'."),
            Self::MalformedBusName(name) => write!(fmter, "'{name}' is not a well-formed D-Bus name."),
            Self::MalformedEnv(entry) => write!(fmter, "'{entry}' is not a valid NAME=VALUE environment entry."),
            Self::MalformedPolicyKey(key) => write!(fmter, "Policy key '{key}' must be of the form SUBSYSTEM.KEY."),
            Self::NegatedPolicyValue(value) => write!(fmter, "Policy value '{value}' may not carry a leading '!'."),
            Self::Manifest(err) => write!(fmter, "{err}"),
        }
    }
}

impl_error!(ContextError);

impl From<ManifestError> for ContextError {
    fn from(value: ManifestError) -> Self {
        Self::Manifest(value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    pub shares: TriBits<Shares>,
    pub sockets: TriBits<Sockets>,
    pub devices: TriBits<Devices>,
    pub features: TriBits<Features>,
    pub env_vars: IndexMap<String, String>,
    pub persistent: IndexSet<String>,
    pub filesystems: IndexMap<String, FilesystemMode>,
    pub session_bus_policy: IndexMap<String, BusPolicy>,
    pub system_bus_policy: IndexMap<String, BusPolicy>,
    pub generic_policy: IndexMap<String, Vec<String>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// `org.freedesktop.portal.*` is reachable by every sandbox unconditionally; callers
    /// build the effective context by merging this default first.
    pub fn defaults() -> Self {
        let mut ctx = Self::new();
        ctx.session_bus_policy.insert("org.freedesktop.portal.*".into(), BusPolicy::Talk);
        ctx
    }

    pub fn parse_metadata(&mut self, manifest: &Manifest) -> Result<()> {
        if let Some(section) = manifest.section("Context") {
            for (key, value) in section {
                let entries = split_list(value);

                match key.as_str() {
                    "shared" => apply_bitlist(&mut self.shares, &entries, "share")?,
                    "sockets" => apply_bitlist(&mut self.sockets, &entries, "socket")?,
                    "devices" => apply_bitlist(&mut self.devices, &entries, "device")?,
                    "features" => apply_bitlist(&mut self.features, &entries, "feature")?,
                    "filesystems" => {
                        for entry in entries {
                            let (deny, token) = strip_bang(&entry);
                            let (expr, mode) = filesystem::parse_token(token, deny)
                                .map_err(|e| Error::new(Box::new(ContextError::UnknownToken { field: "filesystem expression", token: e, valid: &[] })))?;
                            self.filesystems.insert(expr, mode);
                        }
                    }
                    "persistent" => {
                        for entry in entries {
                            self.persistent.insert(entry);
                        }
                    }
                    _ => return err!(ContextError::UnknownOption(key.clone())),
                }
            }
        }

        if let Some(section) = manifest.section("Environment") {
            for (key, value) in section {
                self.env_vars.insert(key.clone(), value.clone());
            }
        }

        if let Some(section) = manifest.section("Session Bus Policy") {
            parse_bus_policy(section, &mut self.session_bus_policy)?;
        }

        if let Some(section) = manifest.section("System Bus Policy") {
            parse_bus_policy(section, &mut self.system_bus_policy)?;
        }

        for (name, section) in manifest.sections() {
            let Some(subsystem) = name.strip_prefix("Policy ") else { continue };

            for (key, value) in section {
                let full_key = format!("{subsystem}.{key}");
                merge_generic(&mut self.generic_policy, &full_key, split_policy_list(value));
            }
        }

        Ok(())
    }

    /// `flatten = true` contracts valid-bitsets to their enabled bits only (no `!`
    /// entries) and drops `!`-prefixed generic-policy values; `flatten = false` preserves
    /// everything needed to round-trip through `parse_metadata`.
    pub fn serialize_metadata(&self, flatten: bool) -> Manifest {
        let mut manifest = Manifest::new();

        manifest.set("Context", "shared", join_list(&self.shares.to_list(flatten)));
        manifest.set("Context", "sockets", join_list(&self.sockets.to_list(flatten)));
        manifest.set("Context", "devices", join_list(&self.devices.to_list(flatten)));
        manifest.set("Context", "features", join_list(&self.features.to_list(flatten)));

        let mut fs_entries = Vec::new();
        for (expr, mode) in &self.filesystems {
            match mode {
                FilesystemMode::Denied if flatten => continue,
                FilesystemMode::Denied => fs_entries.push(format!("!{expr}")),
                FilesystemMode::ReadOnly => fs_entries.push(format!("{expr}:ro")),
                FilesystemMode::ReadWrite => fs_entries.push(expr.clone()),
                FilesystemMode::Create => fs_entries.push(format!("{expr}:create")),
            }
        }
        manifest.set("Context", "filesystems", join_list(&fs_entries));
        manifest.set("Context", "persistent", join_list(&self.persistent.iter().cloned().collect::<Vec<_>>()));

        for (key, value) in &self.env_vars {
            manifest.set("Environment", key, value.clone());
        }

        for (name, policy) in &self.session_bus_policy {
            manifest.set("Session Bus Policy", name, policy.token());
        }

        for (name, policy) in &self.system_bus_policy {
            manifest.set("System Bus Policy", name, policy.token());
        }

        for (key, values) in &self.generic_policy {
            let Some((subsystem, item)) = key.split_once('.') else { continue };
            let filtered: Vec<String> = if flatten {
                values.iter().filter(|v| !v.starts_with('!')).cloned().collect()
            } else {
                values.clone()
            };

            if filtered.is_empty() {
                continue;
            }

            manifest.set(&format!("Policy {subsystem}"), item, join_policy_list(&filtered));
        }

        manifest
    }

    /// `self = (self & ~other.valid) | other.enabled`, overwrite-per-key for maps,
    /// list-merge-dedupe for `generic_policy`.
    pub fn merge(&mut self, other: &Self) {
        self.shares.merge(&other.shares);
        self.sockets.merge(&other.sockets);
        self.devices.merge(&other.devices);
        self.features.merge(&other.features);

        for (key, value) in &other.env_vars {
            self.env_vars.insert(key.clone(), value.clone());
        }

        for entry in &other.persistent {
            self.persistent.insert(entry.clone());
        }

        for (key, mode) in &other.filesystems {
            self.filesystems.insert(key.clone(), *mode);
        }

        for (name, policy) in &other.session_bus_policy {
            self.session_bus_policy.insert(name.clone(), *policy);
        }

        for (name, policy) in &other.system_bus_policy {
            self.system_bus_policy.insert(name.clone(), *policy);
        }

        for (key, values) in &other.generic_policy {
            for value in values {
                merge_generic(&mut self.generic_policy, key, vec![value.clone()]);
            }
        }
    }

    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "--share" => set_bit(&mut self.shares, value, TriState::Granted, "share"),
            "--unshare" => set_bit(&mut self.shares, value, TriState::Denied, "share"),
            "--socket" => set_bit(&mut self.sockets, value, TriState::Granted, "socket"),
            "--nosocket" => set_bit(&mut self.sockets, value, TriState::Denied, "socket"),
            "--device" => set_bit(&mut self.devices, value, TriState::Granted, "device"),
            "--nodevice" => set_bit(&mut self.devices, value, TriState::Denied, "device"),
            "--allow" => set_bit(&mut self.features, value, TriState::Granted, "feature"),
            "--disallow" => set_bit(&mut self.features, value, TriState::Denied, "feature"),
            "--filesystem" => {
                let (expr, mode) = filesystem::parse_token(value, false)
                    .map_err(|e| Error::new(Box::new(ContextError::UnknownToken { field: "filesystem expression", token: e, valid: &[] })))?;
                self.filesystems.insert(expr, mode);
                Ok(())
            }
            "--nofilesystem" => {
                let (expr, mode) = filesystem::parse_token(value, true)
                    .map_err(|e| Error::new(Box::new(ContextError::UnknownToken { field: "filesystem expression", token: e, valid: &[] })))?;
                self.filesystems.insert(expr, mode);
                Ok(())
            }
            "--env" => {
                let Some((k, v)) = value.split_once('=') else { return err!(ContextError::MalformedEnv(value.to_string())) };
                self.env_vars.insert(k.to_string(), v.to_string());
                Ok(())
            }
            "--own-name" => set_bus(&mut self.session_bus_policy, value, BusPolicy::Own),
            "--talk-name" => set_bus(&mut self.session_bus_policy, value, BusPolicy::Talk),
            "--system-own-name" => set_bus(&mut self.system_bus_policy, value, BusPolicy::Own),
            "--system-talk-name" => set_bus(&mut self.system_bus_policy, value, BusPolicy::Talk),
            "--add-policy" => apply_policy(&mut self.generic_policy, value, false),
            "--remove-policy" => apply_policy(&mut self.generic_policy, value, true),
            "--persist" => {
                self.persistent.insert(value.to_string());
                Ok(())
            }
            _ => err!(ContextError::UnknownOption(name.to_string())),
        }
    }

    /// Re-emits this context as the CLI flag surface that would reconstruct it, modulo
    /// the ordering of map entries.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        for token in self.shares.to_list(false) {
            args.push(flag_for(&token, "--share", "--unshare"));
        }
        for token in self.sockets.to_list(false) {
            args.push(flag_for(&token, "--socket", "--nosocket"));
        }
        for token in self.devices.to_list(false) {
            args.push(flag_for(&token, "--device", "--nodevice"));
        }
        for token in self.features.to_list(false) {
            args.push(flag_for(&token, "--allow", "--disallow"));
        }

        for (expr, mode) in &self.filesystems {
            match mode {
                FilesystemMode::Denied => args.push(format!("--nofilesystem={expr}")),
                FilesystemMode::ReadOnly => args.push(format!("--filesystem={expr}:ro")),
                FilesystemMode::ReadWrite => args.push(format!("--filesystem={expr}")),
                FilesystemMode::Create => args.push(format!("--filesystem={expr}:create")),
            }
        }

        for (k, v) in &self.env_vars {
            args.push(format!("--env={k}={v}"));
        }

        for (name, policy) in &self.session_bus_policy {
            match policy {
                BusPolicy::Own => args.push(format!("--own-name={name}")),
                BusPolicy::Talk => args.push(format!("--talk-name={name}")),
                _ => {}
            }
        }

        for (name, policy) in &self.system_bus_policy {
            match policy {
                BusPolicy::Own => args.push(format!("--system-own-name={name}")),
                BusPolicy::Talk => args.push(format!("--system-talk-name={name}")),
                _ => {}
            }
        }

        for (key, values) in &self.generic_policy {
            for value in values {
                match value.strip_prefix('!') {
                    Some(stripped) => args.push(format!("--remove-policy={key}={stripped}")),
                    None => args.push(format!("--add-policy={key}={value}")),
                }
            }
        }

        for path in &self.persistent {
            args.push(format!("--persist={path}"));
        }

        args
    }
}

fn flag_for(token: &str, granted: &str, denied: &str) -> String {
    match token.strip_prefix('!') {
        Some(stripped) => format!("{denied}={stripped}"),
        None => format!("{granted}={token}"),
    }
}

fn strip_bang(entry: &str) -> (bool, &str) {
    match entry.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, entry),
    }
}

fn apply_bitlist<F: bitset::Tokenized>(bits: &mut TriBits<F>, entries: &[String], field: &'static str) -> Result<()> {
    bits.apply_list(entries).map_err(|token| {
        Error::new(Box::new(ContextError::UnknownToken {
            field,
            token,
            valid: F::tokens(),
        }))
    })
}

fn set_bit<F: bitset::Tokenized>(bits: &mut TriBits<F>, token: &str, state: TriState, field: &'static str) -> Result<()> {
    match F::from_token(token) {
        Some(bit) => {
            bits.set(bit, state);
            Ok(())
        }
        None => err!(ContextError::UnknownToken {
            field,
            token: token.to_string(),
            valid: F::tokens(),
        }),
    }
}

fn set_bus(map: &mut IndexMap<String, BusPolicy>, name: &str, policy: BusPolicy) -> Result<()> {
    if !is_well_formed_bus_name(name) {
        return err!(ContextError::MalformedBusName(name.to_string()));
    }

    map.insert(name.to_string(), policy);
    Ok(())
}

fn parse_bus_policy(section: &IndexMap<String, String>, map: &mut IndexMap<String, BusPolicy>) -> Result<()> {
    for (name, token) in section {
        if !is_well_formed_bus_name(name) {
            return err!(ContextError::MalformedBusName(name.clone()));
        }

        let policy = BusPolicy::from_token(token).ok_or_else(|| {
            Error::new(Box::new(ContextError::UnknownToken {
                field: "bus policy",
                token: token.clone(),
                valid: &["none", "see", "filtered", "talk", "own"],
            }))
        })?;

        map.insert(name.clone(), policy);
    }

    Ok(())
}

fn apply_policy(map: &mut IndexMap<String, Vec<String>>, value: &str, remove: bool) -> Result<()> {
    let Some((key, val)) = value.split_once('=') else { return err!(ContextError::MalformedPolicyKey(value.to_string())) };

    if !key.contains('.') {
        return err!(ContextError::MalformedPolicyKey(key.to_string()));
    }

    if val.starts_with('!') {
        return err!(ContextError::NegatedPolicyValue(val.to_string()));
    }

    let stored = if remove { format!("!{val}") } else { val.to_string() };
    merge_generic(map, key, vec![stored]);
    Ok(())
}

/// Appends `incoming` to the list at `key`, then collapses any prior entry that shares
/// the same stripped-`!` value so that `x` and `!x` reduce to the latest occurrence,
/// preserving the position of each key's first appearance.
fn merge_generic(map: &mut IndexMap<String, Vec<String>>, key: &str, incoming: Vec<String>) {
    let entry = map.entry(key.to_string()).or_default();

    for value in incoming {
        let (_, stripped) = strip_bang(&value);
        let stripped = stripped.to_string();

        if let Some(pos) = entry.iter().position(|existing| strip_bang(existing).1 == stripped) {
            entry[pos] = value;
        } else {
            entry.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_manifest() {
        let mut ctx = Context::new();
        ctx.shares.set(Shares::NETWORK, TriState::Granted);
        ctx.sockets.set(Sockets::X11, TriState::Denied);
        ctx.filesystems.insert("home".into(), FilesystemMode::ReadOnly);
        ctx.env_vars.insert("FOO".into(), "bar".into());
        ctx.persistent.insert(".config/app".into());
        ctx.session_bus_policy.insert("org.example.App".into(), BusPolicy::Own);
        ctx.generic_policy.insert("gpu.driver".into(), vec!["nvidia".into()]);

        let manifest = ctx.serialize_metadata(false);
        let mut reparsed = Context::new();
        reparsed.parse_metadata(&manifest).unwrap();

        assert_eq!(reparsed.shares.get(Shares::NETWORK), TriState::Granted);
        assert_eq!(reparsed.sockets.get(Sockets::X11), TriState::Denied);
        assert_eq!(reparsed.filesystems.get("home"), Some(&FilesystemMode::ReadOnly));
        assert_eq!(reparsed.env_vars.get("FOO"), Some(&"bar".to_string()));
        assert!(reparsed.persistent.contains(".config/app"));
        assert_eq!(reparsed.session_bus_policy.get("org.example.App"), Some(&BusPolicy::Own));
        assert_eq!(reparsed.generic_policy.get("gpu.driver"), Some(&vec!["nvidia".to_string()]));
    }

    #[test]
    fn flatten_drops_negative_entries() {
        let mut ctx = Context::new();
        ctx.sockets.set(Sockets::X11, TriState::Denied);
        ctx.generic_policy.insert("gpu.driver".into(), vec!["!nvidia".into()]);

        let manifest = ctx.serialize_metadata(true);
        let rendered = manifest.to_string();
        assert!(!rendered.contains('!'));
    }

    #[test]
    fn merge_overwrites_maps_per_key() {
        let mut a = Context::new();
        a.filesystems.insert("home".into(), FilesystemMode::ReadOnly);

        let mut b = Context::new();
        b.filesystems.insert("home".into(), FilesystemMode::ReadWrite);

        a.merge(&b);
        assert_eq!(a.filesystems.get("home"), Some(&FilesystemMode::ReadWrite));
    }

    #[test]
    fn generic_policy_dedupes_by_stripped_key() {
        let mut a = Context::new();
        a.generic_policy.insert("gpu.driver".into(), vec!["nvidia".into()]);

        let mut b = Context::new();
        b.generic_policy.insert("gpu.driver".into(), vec!["!nvidia".into()]);

        a.merge(&b);
        assert_eq!(a.generic_policy.get("gpu.driver"), Some(&vec!["!nvidia".to_string()]));
    }

    #[test]
    fn apply_option_rejects_malformed_bus_name() {
        let mut ctx = Context::new();
        assert!(ctx.apply_option("--own-name", "not a bus name").is_err());
    }

    #[test]
    fn apply_option_rejects_policy_value_without_dot() {
        let mut ctx = Context::new();
        assert!(ctx.apply_option("--add-policy", "nodotkey=value").is_err());
    }
}
