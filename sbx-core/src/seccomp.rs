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

use std::{fmt::{Display, Formatter, Result as FmtResult}, os::fd::AsRawFd};

use libseccomp::{
    ScmpAction as Action,
    ScmpArch,
    ScmpArgCompare as Compare,
    ScmpCompareOp as Op,
    ScmpFilterContext,
    ScmpSyscall as Syscall,
};
use nix::libc;
use os_pipe::{PipeReader, PipeWriter};

use crate::{err, impl_error, Error, ErrorGeneric, ErrorTrait, Result};

/// Target architectures a requesting caller may ask for; x86_64 and aarch64 optionally
/// pull in a compatibility 32-bit arch when multiarch is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    I386,
    X8664,
    Arm,
    Aarch64,
}

#[derive(Debug, Clone)]
pub struct SeccompOptions {
    pub arch: TargetArch,
    pub multiarch: bool,
    pub devel: bool,
}

impl Default for SeccompOptions {
    fn default() -> Self {
        Self {
            arch: if cfg!(target_arch = "aarch64") {
                TargetArch::Aarch64
            } else {
                TargetArch::X8664
            },
            multiarch: false,
            devel: false,
        }
    }
}

#[derive(Debug)]
pub enum SeccompError {
    UnknownSyscall(&'static str),
    Filter(String),
}

impl Display for SeccompError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnknownSyscall(name) => write!(fmter, "Unknown syscall '{name}' in seccomp filter table."),
            Self::Filter(err) => write!(fmter, "Failed to construct seccomp filter: {err}"),
        }
    }
}

impl_error!(SeccompError);

static EPERM: Action = Action::Errno(libc::EPERM);
static EAFNOSUPPORT: Action = Action::Errno(libc::EAFNOSUPPORT);

/*
 * Personality values obtained from personality.h in the Linux kernel
 *
 * https://git.kernel.org/pub/scm/linux/kernel/git/stable/linux.git/tree/include/uapi/linux/personality.h
 */
static PERSONALITY: u64 = if cfg!(target_pointer_width = "64") {
    0x0000
} else {
    0x0000 | 0x0800000
};

/*
 * Syscall blocklist derived from flatpak-run.c in the flatpak project.
 *
 * https://github.com/flatpak/flatpak/blob/main/common/flatpak-run.c#L1835
 *
 * Please do not open issue reports, esplicitly regarding lessened security, regarding filters
 * that of which can be toggled. When the relevant options are activated, users are warned of
 * the potential ramifications of so doing.
 */
static RULES: [(&str, Action); 16] = [
    ("syslog", EPERM),
    ("uselib", EPERM),
    ("acct", EPERM),
    ("modify_ldt", EPERM),
    ("quotactl", EPERM),
    ("add_key", EPERM),
    ("keyctl", EPERM),
    ("request_key", EPERM),
    ("move_pages", EPERM),
    ("mbind", EPERM),
    ("get_mempolicy", EPERM),
    ("set_mempolicy", EPERM),
    ("migrate_pages", EPERM),
    ("unshare", EPERM),
    ("mount", EPERM),
    ("pivot_root", EPERM),
];

static NON_DEVEL_RULES: [(&str, Action); 2] = [("perf_event_open", EPERM), ("ptrace", EPERM)];

static RULES_COND: [(&str, Action, Compare); 2] = [
    ("ioctl", EPERM, Compare::new(1, Op::MaskedEqual(libc::TIOCSTI), libc::TIOCSTI)),
    ("clone", EPERM, Compare::new(0, Op::MaskedEqual(libc::CLONE_NEWUSER as u64), libc::CLONE_NEWUSER as u64)),
];

// personality() is filtered separately: arg0 must equal PERSONALITY, anything else EPERM.
static PERSONALITY_RULE: (&str, Action, Compare) = ("personality", EPERM, Compare::new(0, Op::NotEqual, PERSONALITY));

/*
 * Socket address families that have no legitimate use inside the sandbox; denied with
 * EAFNOSUPPORT so userspace sees a normal "unsupported family" error rather than a crash.
 * Numeric values per linux/socket.h, since several (DECnet, NETBEUI) are absent from libc.
 */
static AF_DENYLIST: [(&str, u64); 12] = [
    ("AF_AX25", 3),
    ("AF_IPX", 4),
    ("AF_APPLETALK", 5),
    ("AF_NETROM", 6),
    ("AF_BRIDGE", 7),
    ("AF_ATMPVC", 8),
    ("AF_X25", 9),
    ("AF_ROSE", 11),
    ("AF_DECnet", 12),
    ("AF_NETBEUI", 13),
    ("AF_SECURITY", 14),
    ("AF_KEY", 15),
];
static AF_NETLINK: u64 = 16;

/// Builds and exports the seccomp-bpf program for a launch, returning a fd suitable for
/// `--seccomp FD`. The reader/writer pair is a pipe `provide_bpf_program` writes the
/// program into and the caller passes the read end on to `SBX`.
pub fn provide_bpf_program(options: &SeccompOptions, reader: &PipeReader, mut writer: PipeWriter) -> Result<i32> {
    let mut filter = ScmpFilterContext::new_filter(Action::Allow).generic()?;

    match options.arch {
        TargetArch::X8664 => {
            filter.add_arch(ScmpArch::X8664).generic()?;
            if options.multiarch {
                add_arch_allow_exists(&mut filter, ScmpArch::X86)?;
            }
        }
        TargetArch::I386 => filter.add_arch(ScmpArch::X86).generic()?,
        TargetArch::Aarch64 => {
            filter.add_arch(ScmpArch::Aarch64).generic()?;
            if options.multiarch {
                add_arch_allow_exists(&mut filter, ScmpArch::Arm)?;
            }
        }
        TargetArch::Arm => filter.add_arch(ScmpArch::Arm).generic()?,
    }

    for (name, action) in RULES.iter() {
        add_rule(&mut filter, name, *action)?;
    }

    if !options.devel {
        for (name, action) in NON_DEVEL_RULES.iter() {
            add_rule(&mut filter, name, *action)?;
        }
    }

    for (name, action, cmp) in RULES_COND.iter() {
        add_rule_cond(&mut filter, name, *action, *cmp)?;
    }

    add_rule_cond(&mut filter, PERSONALITY_RULE.0, PERSONALITY_RULE.1, PERSONALITY_RULE.2)?;

    for (_, family) in AF_DENYLIST.iter() {
        add_rule_cond(&mut filter, "socket", EAFNOSUPPORT, Compare::new(0, Op::Equal, *family))?;
    }

    add_rule_cond(&mut filter, "socket", EAFNOSUPPORT, Compare::new(0, Op::GreaterEqual, AF_NETLINK + 1))?;

    filter.export_bpf(&mut writer).map_err(|e| Error::new(Box::new(SeccompError::Filter(e.to_string()))))?;
    Ok(reader.as_raw_fd())
}

fn add_arch_allow_exists(filter: &mut ScmpFilterContext, arch: ScmpArch) -> Result<()> {
    match filter.add_arch(arch) {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().to_lowercase().contains("exist") => Ok(()),
        Err(e) => err!(SeccompError::Filter(e.to_string())),
    }
}

fn add_rule(filter: &mut ScmpFilterContext, name: &'static str, action: Action) -> Result<()> {
    let syscall = Syscall::from_name(name).map_err(|_| Error::new(Box::new(SeccompError::UnknownSyscall(name))))?;
    filter.add_rule(action, syscall).generic()
}

fn add_rule_cond(filter: &mut ScmpFilterContext, name: &'static str, action: Action, cmp: Compare) -> Result<()> {
    let syscall = Syscall::from_name(name).map_err(|_| Error::new(Box::new(SeccompError::UnknownSyscall(name))))?;
    filter.add_rule_conditional(action, syscall, &[cmp]).generic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_rules_include_modify_ldt() {
        assert!(RULES.iter().any(|(name, _)| *name == "modify_ldt"));
    }

    #[test]
    fn non_devel_rules_block_ptrace_and_perf_event_open() {
        let names: Vec<&str> = NON_DEVEL_RULES.iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"ptrace"));
        assert!(names.contains(&"perf_event_open"));
    }

    #[test]
    fn tty_control_rule_always_present() {
        assert!(RULES_COND.iter().any(|(name, _, _)| *name == "ioctl"));
    }

    #[test]
    fn af_denylist_excludes_inet_and_unix() {
        assert!(AF_DENYLIST.iter().all(|(_, fam)| *fam != 1 && *fam != 2));
        assert_eq!(AF_NETLINK, 16);
    }
}
