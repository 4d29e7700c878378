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

//! D-Bus name policy tokens and bus-name well-formedness checks.

use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusPolicy {
    None,
    See,
    Filtered,
    Talk,
    Own,
}

impl BusPolicy {
    pub fn token(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::See => "see",
            Self::Filtered => "filtered",
            Self::Talk => "talk",
            Self::Own => "own",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "none" => Some(Self::None),
            "see" => Some(Self::See),
            "filtered" => Some(Self::Filtered),
            "talk" => Some(Self::Talk),
            "own" => Some(Self::Own),
            _ => None,
        }
    }
}

impl Display for BusPolicy {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        write!(fmter, "{}", self.token())
    }
}

/// A bus name is well-formed if it is not a unique name (`:…`), has at least two
/// dot-separated elements, each non-empty and composed of `[A-Za-z0-9_-]` with no leading
/// digit — except the final element may be a bare `*` wildcard, verified against the
/// stripped prefix (i.e. `org.freedesktop.*` is valid, `*` alone is not).
pub fn is_well_formed_bus_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with(':') {
        return false;
    }

    let elements: Vec<&str> = name.split('.').collect();

    if elements.len() < 2 {
        return false;
    }

    for (i, element) in elements.iter().enumerate() {
        let last = i == elements.len() - 1;

        if last && *element == "*" {
            continue;
        }

        if !is_well_formed_element(element) {
            return false;
        }
    }

    true
}

fn is_well_formed_element(element: &str) -> bool {
    if element.is_empty() {
        return false;
    }

    let mut chars = element.chars();
    let first = chars.next().unwrap();

    if first.is_ascii_digit() {
        return false;
    }

    element.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_names_accepted() {
        assert!(is_well_formed_bus_name("org.freedesktop.Notifications"));
        assert!(is_well_formed_bus_name("org.freedesktop.portal.*"));
    }

    #[test]
    fn unique_names_rejected() {
        assert!(!is_well_formed_bus_name(":1.42"));
    }

    #[test]
    fn single_element_rejected() {
        assert!(!is_well_formed_bus_name("org"));
    }

    #[test]
    fn bare_wildcard_rejected() {
        assert!(!is_well_formed_bus_name("*"));
    }

    #[test]
    fn leading_digit_element_rejected() {
        assert!(!is_well_formed_bus_name("org.1foo"));
    }

    #[test]
    fn policy_tokens_round_trip() {
        for token in ["none", "see", "filtered", "talk", "own"] {
            let policy = BusPolicy::from_token(token).unwrap();
            assert_eq!(policy.token(), token);
        }
    }
}
