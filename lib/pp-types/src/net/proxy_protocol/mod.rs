/*
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::SocketAddr;
use std::num::TryFromIntError;
use std::str::FromStr;

use anyhow::anyhow;
use smol_str::SmolStr;
use thiserror::Error;

mod v1;
mod v2;

pub use v1::ProxyProtocolV1Encoder;
pub use v2::ProxyProtocolV2Encoder;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProxyProtocolVersion {
    V1,
    V2,
}

impl FromStr for ProxyProtocolVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "v1" | "V1" => Ok(ProxyProtocolVersion::V1),
            "2" | "v2" | "V2" => Ok(ProxyProtocolVersion::V2),
            _ => Err(anyhow!("invalid proxy protocol version string")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Unix,
    Unknown,
}

impl AddressFamily {
    /// Map the high nibble of the v2 family/protocol byte. Values not
    /// assigned by the protocol mean a newer sender revision and map to
    /// `Unknown` instead of failing the decode.
    pub fn from_v2_code(code: u8) -> Self {
        match code {
            0x01 => AddressFamily::Ipv4,
            0x02 => AddressFamily::Ipv6,
            0x03 => AddressFamily::Unix,
            _ => AddressFamily::Unknown,
        }
    }

    pub fn v2_code(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 0x01,
            AddressFamily::Ipv6 => 0x02,
            AddressFamily::Unix => 0x03,
            AddressFamily::Unknown => 0x00,
        }
    }

    /// Minimum v2 address payload length for this family.
    pub fn v2_address_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => 12,
            AddressFamily::Ipv6 => 36,
            AddressFamily::Unix => 216,
            AddressFamily::Unknown => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Unknown,
}

impl TransportProtocol {
    pub fn from_v2_code(code: u8) -> Self {
        match code {
            0x01 => TransportProtocol::Tcp,
            0x02 => TransportProtocol::Udp,
            _ => TransportProtocol::Unknown,
        }
    }

    pub fn v2_code(&self) -> u8 {
        match self {
            TransportProtocol::Tcp => 0x01,
            TransportProtocol::Udp => 0x02,
            TransportProtocol::Unknown => 0x00,
        }
    }
}

/// Decoded PROXY protocol header data for one accepted connection.
///
/// Addresses keep their textual form: the v1 decoder stores tokens verbatim
/// and the v2 decoder renders the binary payload, so a record survives a
/// round trip through either wire format unchanged.
///
/// `family == Unknown` implies all four optional fields are `None`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyProtocolData {
    pub family: AddressFamily,
    pub protocol: TransportProtocol,
    pub src_addr: Option<SmolStr>,
    pub dst_addr: Option<SmolStr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl ProxyProtocolData {
    /// The record for `PROXY UNKNOWN` / v2 UNSPEC senders: no address info.
    pub fn unknown() -> Self {
        ProxyProtocolData {
            family: AddressFamily::Unknown,
            protocol: TransportProtocol::Unknown,
            src_addr: None,
            dst_addr: None,
            src_port: None,
            dst_port: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyProtocolEncodeError {
    #[error("address family not match")]
    AddressFamilyNotMatch,
    #[error("family {0:?} not encodable in this version")]
    UnsupportedFamily(AddressFamily),
    #[error("protocol {0:?} not encodable in this version")]
    UnsupportedProtocol(TransportProtocol),
    #[error("no source address set")]
    MissingSrcAddr,
    #[error("no destination address set")]
    MissingDstAddr,
    #[error("no source port set")]
    MissingSrcPort,
    #[error("no destination port set")]
    MissingDstPort,
    #[error("invalid address string")]
    InvalidAddrString,
    #[error("invalid u16 length: {0}")]
    InvalidU16Length(TryFromIntError),
    #[error("total length overflow")]
    TotalLengthOverflow,
}

#[allow(clippy::large_enum_variant)]
pub enum ProxyProtocolEncoder {
    V1(ProxyProtocolV1Encoder),
    V2(ProxyProtocolV2Encoder),
}

impl ProxyProtocolEncoder {
    pub fn new(version: ProxyProtocolVersion) -> Self {
        match version {
            ProxyProtocolVersion::V1 => ProxyProtocolEncoder::V1(ProxyProtocolV1Encoder::new()),
            ProxyProtocolVersion::V2 => ProxyProtocolEncoder::V2(ProxyProtocolV2Encoder::new()),
        }
    }

    pub fn encode_tcp(
        &mut self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<&[u8], ProxyProtocolEncodeError> {
        match self {
            ProxyProtocolEncoder::V1(v1) => v1.encode_tcp(client_addr, server_addr),
            ProxyProtocolEncoder::V2(v2) => v2.encode_tcp(client_addr, server_addr),
        }
    }

    /// Encode a decoded record back into this encoder's wire format.
    pub fn encode_data(
        &mut self,
        data: &ProxyProtocolData,
    ) -> Result<&[u8], ProxyProtocolEncodeError> {
        match self {
            ProxyProtocolEncoder::V1(v1) => v1.encode_data(data),
            ProxyProtocolEncoder::V2(v2) => v2.encode_data(data),
        }
    }
}
