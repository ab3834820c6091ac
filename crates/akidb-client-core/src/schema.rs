//! Wire-schema generations and server identity.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Default maximum gRPC message size when the server does not advertise one.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// One generation of the wire message format.
///
/// Variants are ordered oldest first, so `SchemaVersion::V6 > SchemaVersion::V4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SchemaVersion {
    /// Single vectors as repeated floats.
    V4,
    /// Single vectors as packed little-endian bytes.
    V51,
    /// Named vectors.
    V52,
    /// Multi-vectors and per-object error codes.
    V6,
}

impl SchemaVersion {
    /// All generations this client understands, newest first.
    pub const ALL: [SchemaVersion; 4] = [Self::V6, Self::V52, Self::V51, Self::V4];

    /// Label used on the wire and in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V4 => "v4",
            Self::V51 => "v51",
            Self::V52 => "v52",
            Self::V6 => "v6",
        }
    }

    /// Protobuf package carrying this generation's service.
    #[must_use]
    pub const fn package(&self) -> &'static str {
        match self {
            Self::V4 => "akidb.v4",
            Self::V51 => "akidb.v51",
            Self::V52 => "akidb.v52",
            Self::V6 => "akidb.v6",
        }
    }

    /// Whether the generation can carry named vectors.
    #[must_use]
    pub const fn supports_named_vectors(&self) -> bool {
        matches!(self, Self::V52 | Self::V6)
    }

    /// Whether the generation can carry multi-vectors.
    #[must_use]
    pub const fn supports_multi_vectors(&self) -> bool {
        matches!(self, Self::V6)
    }

    /// Whether search requests can resolve reference properties.
    #[must_use]
    pub const fn supports_references(&self) -> bool {
        matches!(self, Self::V52 | Self::V6)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v4" => Ok(Self::V4),
            "v51" => Ok(Self::V51),
            "v52" => Ok(Self::V52),
            "v6" => Ok(Self::V6),
            other => Err(ClientError::validation(format!(
                "unknown schema version `{other}`"
            ))),
        }
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(value: SchemaVersion) -> Self {
        value.as_str().to_string()
    }
}

/// Semantic version reported by the server, e.g. `v1.25.3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns true when this version is `major.minor.patch` or newer.
    #[must_use]
    pub fn is_at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        *self >= Self::new(major, minor, patch)
    }
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = ClientError;

    /// Accepts `1.25`, `v1.25.3` and pre-release suffixes such as `1.26.0-rc.1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.');
        let mut next = |required: bool| -> Result<u32, ClientError> {
            match parts.next() {
                Some(part) => part.parse::<u32>().map_err(|_| {
                    ClientError::validation(format!("invalid server version `{s}`"))
                }),
                None if required => Err(ClientError::validation(format!(
                    "invalid server version `{s}`"
                ))),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        Ok(Self::new(major, minor, patch))
    }
}

/// What the server reported during the handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_version: Option<ServerVersion>,
    /// Generations the server accepts that this client also knows.
    pub schema_versions: Vec<SchemaVersion>,
    /// Advertised strings this client does not recognise.
    pub unknown_schema_versions: Vec<String>,
    pub max_message_size: usize,
}

impl ServerInfo {
    /// Builds server info from raw handshake fields, ignoring unknown versions.
    #[must_use]
    pub fn from_advertised(
        server_version: &str,
        advertised: &[String],
        max_message_size: Option<usize>,
    ) -> Self {
        let mut schema_versions = Vec::new();
        let mut unknown_schema_versions = Vec::new();
        for raw in advertised {
            match raw.parse::<SchemaVersion>() {
                Ok(version) if !schema_versions.contains(&version) => schema_versions.push(version),
                Ok(_) => {}
                Err(_) => unknown_schema_versions.push(raw.clone()),
            }
        }
        Self {
            server_version: server_version.parse().ok(),
            schema_versions,
            unknown_schema_versions,
            max_message_size: max_message_size
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
        }
    }

    /// Picks the first entry of `preferred` the server also supports.
    #[must_use]
    pub fn negotiate(&self, preferred: &[SchemaVersion]) -> Option<SchemaVersion> {
        preferred
            .iter()
            .copied()
            .find(|version| self.schema_versions.contains(version))
    }
}
