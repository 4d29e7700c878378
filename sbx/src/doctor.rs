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

//! `sbx doctor`: a first-run environment preflight. Checks that the external helpers
//! this crate shells out to are actually resolvable on `PATH`, and reports the remedy
//! for each one missing rather than letting `run` fail deep inside the launch sequence.

use std::{env, path::Path};

use sbx_core::{
    constants::{BUSCTL_EXECUTABLE, DBUS_PROXY_EXECUTABLE, LDCONFIG_EXECUTABLE, SBX_EXECUTABLE},
    utils::arguments::Arguments,
    Result,
};

struct Check {
    executable: &'static str,
    remedy: &'static str,
}

fn on_path(executable: &str) -> bool {
    if executable.contains('/') {
        return Path::new(executable).is_file();
    }

    let Ok(path) = env::var("PATH") else { return false };
    path.split(':').any(|dir| Path::new(dir).join(executable).is_file())
}

pub fn doctor(_args: &mut Arguments) -> Result<()> {
    let checks = [
        Check {
            executable: *SBX_EXECUTABLE,
            remedy: "install the unprivileged namespace helper, or set SBX_NAMESPACE_HELPER to its path",
        },
        Check {
            executable: *DBUS_PROXY_EXECUTABLE,
            remedy: "install xdg-dbus-proxy, or set FLATPAK_DBUSPROXY to its path",
        },
        Check {
            executable: *LDCONFIG_EXECUTABLE,
            remedy: "ldconfig is normally shipped with glibc; set SBX_LDCONFIG if it lives elsewhere",
        },
        Check {
            executable: *BUSCTL_EXECUTABLE,
            remedy: "install systemd's busctl, or set SBX_BUSCTL to its path",
        },
    ];

    let mut failures = 0;

    for check in checks {
        if on_path(check.executable) {
            println!("{}ok{}   {}", *sbx_core::constants::BOLD_GREEN, *sbx_core::constants::RESET, check.executable);
        } else {
            failures += 1;
            println!("{}miss{} {} - {}", *sbx_core::constants::BOLD_RED, *sbx_core::constants::RESET, check.executable, check.remedy);
        }
    }

    if failures > 0 {
        println!("\n{failures} helper(s) unresolved; `run` will fail until they are.");
    } else {
        println!("\nAll external helpers resolved.");
    }

    Ok(())
}
