//! Port/protocol tuples, filter keys and traffic direction

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport protocol of a port rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
    Any,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
            Protocol::Any => "ANY",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            // An omitted protocol means any
            "ANY" | "" => Ok(Protocol::Any),
            _ => Err(ValidationError::InvalidProtocol {
                protocol: s.to_string(),
            }),
        }
    }
}

/// Canonical identity of a filter slot: `<port>/<PROTOCOL>`
///
/// Port 0 is the wildcard port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortProtocol {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortProtocol {
    /// All ports, all protocols
    pub const WILDCARD: PortProtocol = PortProtocol {
        port: 0,
        protocol: Protocol::Any,
    };

    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }

    pub fn tcp(port: u16) -> Self {
        Self::new(port, Protocol::Tcp)
    }

    pub fn is_wildcard_port(&self) -> bool {
        self.port == 0
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

impl Serialize for PortProtocol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for PortProtocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, protocol) = s.split_once('/').ok_or_else(|| ValidationError::InvalidKey {
            key: s.to_string(),
        })?;
        Ok(Self {
            port: parse_port(port)?,
            protocol: protocol.parse()?,
        })
    }
}

/// Parse a numeric port; named ports are not supported
pub fn parse_port(port: &str) -> Result<u16, ValidationError> {
    let trimmed = port.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse::<u16>().map_err(|_| ValidationError::InvalidPort {
        port: port.to_string(),
    })
}

/// Traffic direction a filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_parse() {
        let key = PortProtocol::tcp(8080);
        assert_eq!(key.to_string(), "8080/TCP");
        assert_eq!("8080/TCP".parse::<PortProtocol>().unwrap(), key);
        assert_eq!(
            "53/udp".parse::<PortProtocol>().unwrap(),
            PortProtocol::new(53, Protocol::Udp)
        );
    }

    #[test]
    fn test_invalid_keys() {
        assert!("8080".parse::<PortProtocol>().is_err());
        assert!("70000/TCP".parse::<PortProtocol>().is_err());
        assert!("80/ICMP".parse::<PortProtocol>().is_err());
        assert!("http/TCP".parse::<PortProtocol>().is_err());
    }

    #[test]
    fn test_wildcard_port() {
        assert!(PortProtocol::WILDCARD.is_wildcard_port());
        assert_eq!(PortProtocol::WILDCARD.to_string(), "0/ANY");
        assert_eq!(parse_port("").unwrap(), 0);
        assert!(!PortProtocol::tcp(80).is_wildcard_port());
    }
}
