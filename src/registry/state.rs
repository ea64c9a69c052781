// SPDX-License-Identifier: Apache-2.0

//! Per-source progress records and their removal policy.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Removal policy for a finished record.
///
/// A zero duration is NOT "unset": it converts to [`Ttl::Immediate`], which
/// makes a finished record removable on the next cleanup pass. Use
/// [`Ttl::Never`] to keep a record indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Ttl {
    /// Never eligible for removal
    #[default]
    Never,
    /// Always eligible for removal, regardless of age
    Immediate,
    /// Eligible once more than this much time has passed since the last update
    After(Duration),
}

impl Ttl {
    /// Whether a record last updated at `timestamp` may be removed at `now`.
    ///
    /// A timestamp in the future (clock skew between writers) is never expired.
    pub fn is_expired(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Ttl::Never => false,
            Ttl::Immediate => true,
            Ttl::After(ttl) => now
                .signed_duration_since(timestamp)
                .to_std()
                .map(|age| age > *ttl)
                .unwrap_or(false),
        }
    }

    /// Whether a record with this policy can expire at some later point.
    pub fn can_expire(&self) -> bool {
        matches!(self, Ttl::After(_))
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Ttl::Immediate
        } else {
            Ttl::After(d)
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Never => f.write_str("never"),
            Ttl::Immediate => f.write_str("0s"),
            Ttl::After(d) => write!(f, "{}", humantime::format_duration(*d)),
        }
    }
}

impl FromStr for Ttl {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "never" => Ok(Ttl::Never),
            other => humantime::parse_duration(other).map(Ttl::from),
        }
    }
}

impl TryFrom<String> for Ttl {
    type Error = humantime::DurationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ttl> for String {
    fn from(ttl: Ttl) -> Self {
        ttl.to_string()
    }
}

/// Tracked read progress of one input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    /// Stable identifier of the source (e.g. derived from device and inode)
    pub id: String,
    /// Last known path, for diagnostics only
    pub source: String,
    /// Byte position to resume reading from
    pub offset: u64,
    /// Time of the last upsert; overwritten by the registry on every update
    pub timestamp: DateTime<Utc>,
    /// Removal policy once the source is finished
    pub ttl: Ttl,
    /// The source will not be read any further. Required before removal.
    pub finished: bool,
}

impl StateRecord {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            offset: 0,
            timestamp: DateTime::<Utc>::default(),
            ttl: Ttl::Never,
            finished: false,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = ttl.into();
        self
    }

    pub fn with_finished(mut self, finished: bool) -> Self {
        self.finished = finished;
        self
    }

    /// Whether this record's TTL makes it eligible for removal at `now`.
    /// Says nothing about `finished`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_expired(self.timestamp, now)
    }
}
