//! Silo Address Codec
//!
//! Textual forms of cluster node addresses and the suspect-time list.
//!
//! - Canonical address: `<ip>:<port>@<generation>` (IPv6 in brackets)
//! - Gateway URI: `gwy.tcp://<ip>:<port>/<generation>`
//! - Suspect list: `<address>,<timestamp>` entries joined by `|`
//! - Timestamps: UTC RFC 3339 with nine fractional digits, e.g.
//!   `2024-01-02T03:04:05.000000006Z`

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// URI scheme used for gateway endpoints
pub const GATEWAY_SCHEME: &str = "gwy.tcp";

/// Earliest year the fixed-width timestamp format can hold
pub const TIMESTAMP_MIN_YEAR: i32 = 0;

/// Latest year the fixed-width timestamp format can hold
pub const TIMESTAMP_MAX_YEAR: i32 = 9999;

const GENERATION_SEPARATOR: char = '@';
const SUSPECT_ENTRY_SEPARATOR: char = '|';
const SUSPECT_FIELD_SEPARATOR: char = ',';

/// Address of a silo: network endpoint plus the generation that
/// distinguishes restarts on the same endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SiloAddress {
    endpoint: SocketAddr,
    generation: i32,
}

impl SiloAddress {
    /// Create a new silo address
    pub fn new(ip: IpAddr, port: u16, generation: i32) -> Self {
        Self {
            endpoint: SocketAddr::new(ip, port),
            generation,
        }
    }

    /// The unspecified address (`0.0.0.0:0@0`), used as the "no address" sentinel
    pub fn zero() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, 0)
    }

    /// Check if this is the unspecified sentinel address
    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn ip(&self) -> IpAddr {
        self.endpoint.ip()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    /// Canonical, reversible string form
    pub fn to_parsable_string(&self) -> String {
        self.to_string()
    }

    /// Parse the canonical string form
    pub fn from_parsable_string(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Gateway URI pointing at this address
    pub fn to_gateway_uri(&self) -> GatewayUri {
        GatewayUri(*self)
    }
}

impl fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.endpoint, GENERATION_SEPARATOR, self.generation)
    }
}

impl FromStr for SiloAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (endpoint, generation) = s
            .rsplit_once(GENERATION_SEPARATOR)
            .ok_or_else(|| Error::Format(format!("silo address '{}' has no generation", s)))?;

        let endpoint: SocketAddr = endpoint
            .parse()
            .map_err(|e| Error::Format(format!("silo address '{}': {}", s, e)))?;
        let generation: i32 = generation
            .parse()
            .map_err(|e| Error::Format(format!("silo address '{}': bad generation: {}", s, e)))?;

        Ok(Self {
            endpoint: SocketAddr::new(endpoint.ip(), endpoint.port()),
            generation,
        })
    }
}

impl From<SiloAddress> for String {
    fn from(address: SiloAddress) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for SiloAddress {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Client-facing gateway endpoint of a silo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GatewayUri(SiloAddress);

impl GatewayUri {
    /// The silo address this URI points at
    pub fn silo_address(&self) -> SiloAddress {
        self.0
    }
}

impl fmt::Display for GatewayUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", GATEWAY_SCHEME, self.0.endpoint, self.0.generation)
    }
}

impl FromStr for GatewayUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(GATEWAY_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| Error::Format(format!("gateway uri '{}' must start with {}://", s, GATEWAY_SCHEME)))?;

        let (endpoint, generation) = rest
            .split_once('/')
            .ok_or_else(|| Error::Format(format!("gateway uri '{}' has no generation", s)))?;

        let endpoint: SocketAddr = endpoint
            .parse()
            .map_err(|e| Error::Format(format!("gateway uri '{}': {}", s, e)))?;
        let generation: i32 = generation
            .parse()
            .map_err(|e| Error::Format(format!("gateway uri '{}': bad generation: {}", s, e)))?;

        Ok(GatewayUri(SiloAddress::new(endpoint.ip(), endpoint.port(), generation)))
    }
}

/// Format a timestamp in the fixed storage format
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Check that a timestamp has a four-digit year
///
/// Outside that range chrono writes a signed, wider year, which neither
/// sorts with the rest nor parses back.
pub fn check_timestamp(ts: &DateTime<Utc>) -> Result<()> {
    if (TIMESTAMP_MIN_YEAR..=TIMESTAMP_MAX_YEAR).contains(&ts.year()) {
        Ok(())
    } else {
        Err(Error::Format(format!(
            "timestamp {} is outside years {:04}-{}",
            ts, TIMESTAMP_MIN_YEAR, TIMESTAMP_MAX_YEAR
        )))
    }
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 offset is accepted)
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Format(format!("timestamp '{}': {}", s, e)))
}

/// Encode suspect times into a single field
pub fn encode_suspect_times(suspect_times: &[(SiloAddress, DateTime<Utc>)]) -> String {
    suspect_times
        .iter()
        .map(|(address, ts)| {
            format!("{}{}{}", address, SUSPECT_FIELD_SEPARATOR, format_timestamp(ts))
        })
        .collect::<Vec<_>>()
        .join(&SUSPECT_ENTRY_SEPARATOR.to_string())
}

/// Decode a suspect-times field; empty or whitespace input yields no entries
pub fn decode_suspect_times(field: &str) -> Result<Vec<(SiloAddress, DateTime<Utc>)>> {
    if field.trim().is_empty() {
        return Ok(Vec::new());
    }

    field
        .split(SUSPECT_ENTRY_SEPARATOR)
        .map(|segment| -> Result<(SiloAddress, DateTime<Utc>)> {
            let (address, ts) = segment.split_once(SUSPECT_FIELD_SEPARATOR).ok_or_else(|| {
                Error::Format(format!("suspect time segment '{}' has no timestamp", segment))
            })?;
            Ok((address.parse()?, parse_timestamp(ts)?))
        })
        .collect()
}
