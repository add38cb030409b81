/*
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io::Write;
use std::net::SocketAddr;

use super::{AddressFamily, ProxyProtocolData, ProxyProtocolEncodeError, TransportProtocol};

const V1_BUF_CAP: usize = 108;

pub struct ProxyProtocolV1Encoder(Vec<u8>);

impl ProxyProtocolV1Encoder {
    pub fn new() -> Self {
        ProxyProtocolV1Encoder(Vec::with_capacity(V1_BUF_CAP))
    }

    pub fn encode_tcp(
        &mut self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<&[u8], ProxyProtocolEncodeError> {
        self.0.clear();
        match (client_addr, server_addr) {
            (SocketAddr::V4(_), SocketAddr::V4(_)) => {
                self.0.extend_from_slice(b"PROXY TCP4 ");
            }
            (SocketAddr::V6(_), SocketAddr::V6(_)) => {
                self.0.extend_from_slice(b"PROXY TCP6 ");
            }
            _ => return Err(ProxyProtocolEncodeError::AddressFamilyNotMatch),
        }
        let _ = write!(
            self.0,
            "{} {} {} {}\r\n",
            client_addr.ip(),
            server_addr.ip(),
            client_addr.port(),
            server_addr.port()
        );
        Ok(self.0.as_slice())
    }

    /// Encode a decoded record as a v1 text line.
    ///
    /// The text format can only carry TCP over INET families, or the
    /// degenerate `UNKNOWN` line. Address tokens are written verbatim,
    /// matching the decoder which does not validate them either.
    pub fn encode_data(
        &mut self,
        data: &ProxyProtocolData,
    ) -> Result<&[u8], ProxyProtocolEncodeError> {
        self.0.clear();
        match data.family {
            AddressFamily::Unknown => {
                self.0.extend_from_slice(b"PROXY UNKNOWN\r\n");
                return Ok(self.0.as_slice());
            }
            AddressFamily::Ipv4 | AddressFamily::Ipv6 => {}
            AddressFamily::Unix => {
                return Err(ProxyProtocolEncodeError::UnsupportedFamily(data.family));
            }
        }
        if data.protocol != TransportProtocol::Tcp {
            return Err(ProxyProtocolEncodeError::UnsupportedProtocol(data.protocol));
        }
        let src_addr = data
            .src_addr
            .as_ref()
            .ok_or(ProxyProtocolEncodeError::MissingSrcAddr)?;
        let dst_addr = data
            .dst_addr
            .as_ref()
            .ok_or(ProxyProtocolEncodeError::MissingDstAddr)?;
        let src_port = data
            .src_port
            .ok_or(ProxyProtocolEncodeError::MissingSrcPort)?;
        let dst_port = data
            .dst_port
            .ok_or(ProxyProtocolEncodeError::MissingDstPort)?;

        match data.family {
            AddressFamily::Ipv4 => self.0.extend_from_slice(b"PROXY TCP4 "),
            AddressFamily::Ipv6 => self.0.extend_from_slice(b"PROXY TCP6 "),
            _ => unreachable!(),
        }
        let _ = write!(self.0, "{src_addr} {dst_addr} {src_port} {dst_port}\r\n");
        Ok(self.0.as_slice())
    }
}

impl Default for ProxyProtocolV1Encoder {
    fn default() -> Self {
        ProxyProtocolV1Encoder::new()
    }
}
