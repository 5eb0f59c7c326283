//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Lowest assignable unit code.
pub const CODE_MIN: u32 = 1_000_000;

/// Highest assignable unit code.
pub const CODE_MAX: u32 = 9_999_999;

/// Identifier of a tenant (multi-tenant boundary).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TenantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for TenantId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<TenantId> for Uuid {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl FromStr for TenantId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("TenantId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Code of an organizational unit: exactly 7 numeric digits in
/// [`CODE_MIN`, `CODE_MAX`].
///
/// The code is the unit's public identity and the ordering key for its
/// events. Format is validated independently of hierarchy placement; a
/// unit without a code exists only as `Option<UnitCode>` while awaiting
/// server-side generation, so an empty code is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitCode(String);

impl UnitCode {
    /// Parse and validate a code.
    pub fn parse(s: impl AsRef<str>) -> DomainResult<Self> {
        let s = s.as_ref();
        if s.len() != 7 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "organization code must be 7 numeric digits, got '{s}'"
            )));
        }
        let n: u32 = s
            .parse()
            .map_err(|_| DomainError::validation(format!("organization code '{s}' out of range")))?;
        if !(CODE_MIN..=CODE_MAX).contains(&n) {
            return Err(DomainError::validation(format!(
                "organization code must be in [{CODE_MIN}, {CODE_MAX}], got '{s}'"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Build a code from its numeric value. Fails outside the valid range.
    pub fn from_number(n: u32) -> DomainResult<Self> {
        if !(CODE_MIN..=CODE_MAX).contains(&n) {
            return Err(DomainError::validation(format!(
                "organization code must be in [{CODE_MIN}, {CODE_MAX}], got {n}"
            )));
        }
        Ok(Self(format!("{n:07}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the code.
    pub fn as_number(&self) -> u32 {
        // Validated at construction: always 7 digits within u32 range.
        self.0.parse().unwrap_or(0)
    }
}

impl core::fmt::Display for UnitCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UnitCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UnitCode> for String {
    fn from(value: UnitCode) -> Self {
        value.0
    }
}
