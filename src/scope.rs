//! Scope tags partitioning the indexed documentation.
//!
//! Every document belongs to exactly one [`Scope`]. Searches and rebuilds
//! address either one scope or the reserved union selector
//! [`ScopeSelector::All`]. Adding a scope means adding a variant here and to
//! [`Scope::ALL`]; nothing else branches on individual tags.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Reserved textual tag for the union of all scopes.
pub const ALL_TAG: &str = "all";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Build-toolchain notes.
    Toolchain,
    /// Configuration-management conventions.
    Configuration,
    /// Operational playbooks (cleanup, maintenance).
    Playbooks,
    /// Everything else.
    Notes,
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::Toolchain,
        Scope::Configuration,
        Scope::Playbooks,
        Scope::Notes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Toolchain => "toolchain",
            Scope::Configuration => "configuration",
            Scope::Playbooks => "playbooks",
            Scope::Notes => "notes",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == wanted)
            .ok_or_else(|| Error::ScopeNotFound(s.to_string()))
    }
}

/// Target of a search or rebuild: one scope, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeSelector {
    One(Scope),
    All,
}

impl ScopeSelector {
    /// The concrete scopes this selector addresses, in declaration order.
    ///
    /// # Examples
    ///
    /// ```
    /// use docscope::scope::{Scope, ScopeSelector};
    ///
    /// assert_eq!(
    ///     ScopeSelector::One(Scope::Notes).scopes(),
    ///     vec![Scope::Notes]
    /// );
    /// assert_eq!(ScopeSelector::All.scopes().len(), Scope::ALL.len());
    /// ```
    pub fn scopes(self) -> Vec<Scope> {
        match self {
            ScopeSelector::One(scope) => vec![scope],
            ScopeSelector::All => Scope::ALL.to_vec(),
        }
    }

    pub fn contains(self, scope: Scope) -> bool {
        match self {
            ScopeSelector::One(s) => s == scope,
            ScopeSelector::All => true,
        }
    }
}

impl From<Scope> for ScopeSelector {
    fn from(scope: Scope) -> Self {
        ScopeSelector::One(scope)
    }
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeSelector::One(scope) => scope.fmt(f),
            ScopeSelector::All => f.write_str(ALL_TAG),
        }
    }
}

impl FromStr for ScopeSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(ALL_TAG) {
            return Ok(ScopeSelector::All);
        }
        s.parse().map(ScopeSelector::One)
    }
}
