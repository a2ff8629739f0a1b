//! Specification identity and version chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// A position in a specification's linear evolution chain (`v1`, `v2`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpecVersion(u32);

impl SpecVersion {
    pub const V1: Self = Self(1);
    pub const V2: Self = Self(2);

    pub fn new(number: u32) -> DomainResult<Self> {
        if number == 0 {
            return Err(DomainError::InvalidVersion(format!("v{number}")));
        }
        Ok(Self(number))
    }

    pub const fn number(self) -> u32 {
        self.0
    }

    /// The version this one evolved from, if any.
    pub fn previous(self) -> Option<Self> {
        (self.0 > 1).then(|| Self(self.0 - 1))
    }
}

impl Default for SpecVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for SpecVersion {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = s
            .trim()
            .strip_prefix('v')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| DomainError::InvalidVersion(s.to_string()))?;
        Self::new(number).map_err(|_| DomainError::InvalidVersion(s.to_string()))
    }
}

impl TryFrom<String> for SpecVersion {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpecVersion> for String {
    fn from(value: SpecVersion) -> Self {
        value.to_string()
    }
}

/// An identified, versioned behavioral contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecRef {
    pub name: String,
    pub version: SpecVersion,
}

impl SpecRef {
    pub fn new(name: impl Into<String>, version: SpecVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// The same specification one step back in the evolution chain.
    pub fn previous(&self) -> Option<Self> {
        self.version.previous().map(|version| Self {
            name: self.name.clone(),
            version,
        })
    }
}

impl fmt::Display for SpecRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}
