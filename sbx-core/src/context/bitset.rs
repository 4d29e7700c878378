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

//! Tri-state bitsets: every bit is `Unspecified`, `Granted`, or `Denied`, replacing the
//! old pairs of `enabled`/`valid` masks with a single type per bit. `TriBits<F>` is generic
//! over any `bitflags`-generated flag set that additionally implements `Tokenized`.

use bitflags::{bitflags, Flags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    Unspecified,
    Granted,
    Denied,
}

/// Maps a single-bit flag value to and from its manifest/CLI token spelling.
pub trait Tokenized: Flags + Copy {
    fn token(bit: Self) -> Option<&'static str>;
    fn from_token(token: &str) -> Option<Self>;
    fn tokens() -> &'static [&'static str];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriBits<F> {
    enabled: F,
    valid: F,
}

impl<F: Flags + Copy> Default for TriBits<F> {
    fn default() -> Self {
        Self {
            enabled: F::empty(),
            valid: F::empty(),
        }
    }
}

impl<F: Flags + Copy> TriBits<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bit: F) -> TriState {
        if !self.valid.contains(bit) {
            TriState::Unspecified
        } else if self.enabled.contains(bit) {
            TriState::Granted
        } else {
            TriState::Denied
        }
    }

    pub fn set(&mut self, bit: F, state: TriState) {
        match state {
            TriState::Unspecified => {
                self.valid.remove(bit);
                self.enabled.remove(bit);
            }
            TriState::Granted => {
                self.valid.insert(bit);
                self.enabled.insert(bit);
            }
            TriState::Denied => {
                self.valid.insert(bit);
                self.enabled.remove(bit);
            }
        }
    }

    /// `self = (self & ~other.valid) | (other.enabled & other.valid)`, `self.valid |= other.valid`.
    pub fn merge(&mut self, other: &Self) {
        let retained = self.enabled.intersection(other.valid.complement());
        let incoming = other.enabled.intersection(other.valid);
        self.enabled = retained.union(incoming);
        self.valid = self.valid.union(other.valid);
    }

    pub fn granted(&self) -> F {
        self.enabled.intersection(self.valid)
    }

    pub fn denied(&self) -> F {
        self.valid.intersection(self.enabled.complement())
    }
}

impl<F: Tokenized> TriBits<F> {
    /// Applies a manifest/CLI list where each entry is a token, optionally `!`-prefixed
    /// to mean "deny" rather than "grant". Returns the offending token on failure.
    pub fn apply_list<S: AsRef<str>>(&mut self, entries: impl IntoIterator<Item = S>) -> Result<(), String> {
        for entry in entries {
            let entry = entry.as_ref();
            let (deny, token) = match entry.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, entry),
            };

            match F::from_token(token) {
                Some(bit) => self.set(bit, if deny { TriState::Denied } else { TriState::Granted }),
                None => return Err(token.to_string()),
            }
        }

        Ok(())
    }

    pub fn to_list(&self, flatten: bool) -> Vec<String> {
        let mut out = Vec::new();

        for token in F::tokens() {
            let bit = F::from_token(token).expect("token round-trips through from_token");

            match self.get(bit) {
                TriState::Granted => out.push(token.to_string()),
                TriState::Denied if !flatten => out.push(format!("!{token}")),
                _ => {}
            }
        }

        out
    }
}

macro_rules! tokenized_flags {
    ($name:ident: $repr:ty { $($variant:ident = $bits:expr => $token:expr),+ $(,)? }) => {
        bitflags! {
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name: $repr {
                $(const $variant = $bits;)+
            }
        }

        impl Tokenized for $name {
            fn token(bit: Self) -> Option<&'static str> {
                match bit {
                    $(Self::$variant => Some($token),)+
                    _ => None,
                }
            }

            fn from_token(token: &str) -> Option<Self> {
                match token {
                    $($token => Some(Self::$variant),)+
                    _ => None,
                }
            }

            fn tokens() -> &'static [&'static str] {
                &[$($token),+]
            }
        }
    };
}

tokenized_flags!(Shares: u8 {
    NETWORK = 0b0001 => "network",
    IPC     = 0b0010 => "ipc",
});

tokenized_flags!(Sockets: u8 {
    X11         = 0b00001 => "x11",
    WAYLAND     = 0b00010 => "wayland",
    PULSEAUDIO  = 0b00100 => "pulseaudio",
    SESSION_BUS = 0b01000 => "session-bus",
    SYSTEM_BUS  = 0b10000 => "system-bus",
});

tokenized_flags!(Devices: u8 {
    DRI = 0b001 => "dri",
    ALL = 0b010 => "all",
    KVM = 0b100 => "kvm",
});

tokenized_flags!(Features: u8 {
    DEVEL     = 0b01 => "devel",
    MULTIARCH = 0b10 => "multiarch",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_deny_round_trip_through_tokens() {
        let mut bits: TriBits<Shares> = TriBits::new();
        bits.apply_list(["network"]).unwrap();
        assert_eq!(bits.get(Shares::NETWORK), TriState::Granted);
        assert_eq!(bits.get(Shares::IPC), TriState::Unspecified);
        assert_eq!(bits.to_list(false), vec!["network".to_string()]);
    }

    #[test]
    fn denied_bit_serializes_with_bang_unless_flattened() {
        let mut bits: TriBits<Sockets> = TriBits::new();
        bits.apply_list(["!x11"]).unwrap();
        assert_eq!(bits.get(Sockets::X11), TriState::Denied);
        assert_eq!(bits.to_list(false), vec!["!x11".to_string()]);
        assert!(bits.to_list(true).is_empty());
    }

    #[test]
    fn merge_lets_later_valid_bits_win() {
        let mut a: TriBits<Features> = TriBits::new();
        a.set(Features::DEVEL, TriState::Granted);

        let mut b: TriBits<Features> = TriBits::new();
        b.set(Features::DEVEL, TriState::Denied);

        a.merge(&b);
        assert_eq!(a.get(Features::DEVEL), TriState::Denied);
    }

    #[test]
    fn merge_preserves_bits_other_leaves_unspecified() {
        let mut a: TriBits<Devices> = TriBits::new();
        a.set(Devices::DRI, TriState::Granted);

        let b: TriBits<Devices> = TriBits::new();
        a.merge(&b);

        assert_eq!(a.get(Devices::DRI), TriState::Granted);
    }

    #[test]
    fn unknown_token_reports_offending_value() {
        let mut bits: TriBits<Shares> = TriBits::new();
        let err = bits.apply_list(["bogus"]).unwrap_err();
        assert_eq!(err, "bogus");
    }
}
