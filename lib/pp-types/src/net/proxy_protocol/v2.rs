/*
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use super::{AddressFamily, ProxyProtocolData, ProxyProtocolEncodeError, TransportProtocol};

const V2_MAGIC_HEADER: &[u8] = b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a";

const V2_BUF_CAP: usize = 536;
const V2_HDR_LEN: usize = 16;

const BITS_VERSION: u8 = 0x20;

const _SOURCE_LOCAL: u8 = 0x00;
const SOURCE_PROXY: u8 = 0x01;

const BYTE_13_PROXY: u8 = BITS_VERSION | SOURCE_PROXY;

pub struct ProxyProtocolV2Encoder {
    buf: [u8; V2_BUF_CAP],
    len: usize,
}

impl ProxyProtocolV2Encoder {
    pub(super) fn new() -> Self {
        ProxyProtocolV2Encoder {
            buf: [0u8; V2_BUF_CAP],
            len: 0,
        }
    }

    pub fn new_tcp(
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<Self, ProxyProtocolEncodeError> {
        let mut encoder = ProxyProtocolV2Encoder::new();
        encoder.encode_tcp(client_addr, server_addr)?;
        Ok(encoder)
    }

    pub(super) fn encode_tcp(
        &mut self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<&[u8], ProxyProtocolEncodeError> {
        match (client_addr, server_addr) {
            (SocketAddr::V4(c4), SocketAddr::V4(s4)) => Ok(self.encode_inet4(
                TransportProtocol::Tcp,
                *c4.ip(),
                *s4.ip(),
                c4.port(),
                s4.port(),
            )),
            (SocketAddr::V6(c6), SocketAddr::V6(s6)) => Ok(self.encode_inet6(
                TransportProtocol::Tcp,
                *c6.ip(),
                *s6.ip(),
                c6.port(),
                s6.port(),
            )),
            _ => Err(ProxyProtocolEncodeError::AddressFamilyNotMatch),
        }
    }

    /// Encode a decoded record as a v2 binary header.
    ///
    /// `Unknown` family encodes as UNSPEC with an empty payload. `Unix` is
    /// not supported by this encoder.
    pub fn encode_data(
        &mut self,
        data: &ProxyProtocolData,
    ) -> Result<&[u8], ProxyProtocolEncodeError> {
        match data.family {
            AddressFamily::Unknown => {
                self.buf[..12].copy_from_slice(V2_MAGIC_HEADER);
                self.buf[12..16].copy_from_slice(&[BYTE_13_PROXY, 0x00, 0x00, 0x00]);
                self.len = V2_HDR_LEN;
                Ok(&self.buf[..self.len])
            }
            AddressFamily::Ipv4 => {
                let (src_addr, dst_addr, src_port, dst_port) = required_fields(data)?;
                let src_ip = Ipv4Addr::from_str(src_addr)
                    .map_err(|_| ProxyProtocolEncodeError::InvalidAddrString)?;
                let dst_ip = Ipv4Addr::from_str(dst_addr)
                    .map_err(|_| ProxyProtocolEncodeError::InvalidAddrString)?;
                Ok(self.encode_inet4(data.protocol, src_ip, dst_ip, src_port, dst_port))
            }
            AddressFamily::Ipv6 => {
                let (src_addr, dst_addr, src_port, dst_port) = required_fields(data)?;
                let src_ip = Ipv6Addr::from_str(src_addr)
                    .map_err(|_| ProxyProtocolEncodeError::InvalidAddrString)?;
                let dst_ip = Ipv6Addr::from_str(dst_addr)
                    .map_err(|_| ProxyProtocolEncodeError::InvalidAddrString)?;
                Ok(self.encode_inet6(data.protocol, src_ip, dst_ip, src_port, dst_port))
            }
            AddressFamily::Unix => Err(ProxyProtocolEncodeError::UnsupportedFamily(data.family)),
        }
    }

    fn encode_inet4(
        &mut self,
        protocol: TransportProtocol,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> &[u8] {
        let byte14 = (AddressFamily::Ipv4.v2_code() << 4) | protocol.v2_code();
        self.buf[..12].copy_from_slice(V2_MAGIC_HEADER);
        self.buf[12..16].copy_from_slice(&[BYTE_13_PROXY, byte14, 0, 12]);
        self.buf[16..20].copy_from_slice(&src_ip.octets());
        self.buf[20..24].copy_from_slice(&dst_ip.octets());
        self.buf[24..26].copy_from_slice(&src_port.to_be_bytes());
        self.buf[26..28].copy_from_slice(&dst_port.to_be_bytes());
        self.len = 28;
        &self.buf[..self.len]
    }

    fn encode_inet6(
        &mut self,
        protocol: TransportProtocol,
        src_ip: Ipv6Addr,
        dst_ip: Ipv6Addr,
        src_port: u16,
        dst_port: u16,
    ) -> &[u8] {
        let byte14 = (AddressFamily::Ipv6.v2_code() << 4) | protocol.v2_code();
        self.buf[..12].copy_from_slice(V2_MAGIC_HEADER);
        self.buf[12..16].copy_from_slice(&[BYTE_13_PROXY, byte14, 0, 36]);
        self.buf[16..32].copy_from_slice(&src_ip.octets());
        self.buf[32..48].copy_from_slice(&dst_ip.octets());
        self.buf[48..50].copy_from_slice(&src_port.to_be_bytes());
        self.buf[50..52].copy_from_slice(&dst_port.to_be_bytes());
        self.len = 52;
        &self.buf[..self.len]
    }

    /// Append a TLV extension after the address payload. The length field
    /// is patched by `finalize`.
    pub fn push_tlv(&mut self, key: u8, value: &[u8]) -> Result<(), ProxyProtocolEncodeError> {
        let v_len = value.len();
        let len = u16::try_from(value.len()).map_err(ProxyProtocolEncodeError::InvalidU16Length)?;
        let len_b = len.to_be_bytes();
        let mut offset = self.len;
        self.len += 3 + v_len;
        if self.len > V2_BUF_CAP {
            self.len = offset;
            return Err(ProxyProtocolEncodeError::TotalLengthOverflow);
        }
        self.buf[offset] = key;
        offset += 1;
        self.buf[offset..offset + 2].copy_from_slice(&len_b);
        offset += 2;
        self.buf[offset..offset + v_len].copy_from_slice(value);
        Ok(())
    }

    pub fn finalize(&mut self) -> &[u8] {
        let data_len = (self.len - V2_HDR_LEN) as u16; // len is capped at V2_BUF_CAP
        let b = data_len.to_be_bytes();
        self.buf[14..=15].copy_from_slice(&b);
        &self.buf[..self.len]
    }
}

fn required_fields(
    data: &ProxyProtocolData,
) -> Result<(&str, &str, u16, u16), ProxyProtocolEncodeError> {
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
    Ok((src_addr, dst_addr, src_port, dst_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn t_tcp4() {
        let client = SocketAddr::from_str("192.168.0.1:56324").unwrap();
        let server = SocketAddr::from_str("192.168.0.11:443").unwrap();

        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();
        assert_eq!(
            encoder.finalize(),
            b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a\
              \x21\x11\x00\x0C\
              \xC0\xA8\x00\x01\
              \xC0\xA8\x00\x0B\
              \xDC\x04\x01\xBB"
        );
    }

    #[test]
    fn t_tcp4_tlv() {
        let client = SocketAddr::from_str("192.168.0.1:56324").unwrap();
        let server = SocketAddr::from_str("192.168.0.11:443").unwrap();

        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();
        encoder.push_tlv(0xE3, b"1234").unwrap();
        assert_eq!(
            encoder.finalize(),
            b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a\
              \x21\x11\x00\x13\
              \xC0\xA8\x00\x01\
              \xC0\xA8\x00\x0B\
              \xDC\x04\x01\xBB\
              \xE3\x00\x04\
              1234"
        );
    }

    #[test]
    fn t_tcp6() {
        let client = SocketAddr::from_str("[2001:db8::1]:56324").unwrap();
        let server = SocketAddr::from_str("[2001:db8::11]:443").unwrap();

        let mut encoder = ProxyProtocolV2Encoder::new_tcp(client, server).unwrap();
        assert_eq!(
            encoder.finalize(),
            b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a\
              \x21\x21\x00\x24\
              \x20\x01\x0d\xb8\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x01\
              \x20\x01\x0d\xb8\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x11\
              \xDC\x04\x01\xBB"
        );
    }

    #[test]
    fn t_data_udp4() {
        let data = ProxyProtocolData {
            family: AddressFamily::Ipv4,
            protocol: TransportProtocol::Udp,
            src_addr: Some("192.168.0.1".into()),
            dst_addr: Some("192.168.0.11".into()),
            src_port: Some(56324),
            dst_port: Some(443),
        };

        let mut encoder = ProxyProtocolV2Encoder::new();
        let encoded = encoder.encode_data(&data).unwrap();
        assert_eq!(
            encoded,
            b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a\
              \x21\x12\x00\x0C\
              \xC0\xA8\x00\x01\
              \xC0\xA8\x00\x0B\
              \xDC\x04\x01\xBB"
        );
    }

    #[test]
    fn t_data_unknown() {
        let mut encoder = ProxyProtocolV2Encoder::new();
        let encoded = encoder.encode_data(&ProxyProtocolData::unknown()).unwrap();
        assert_eq!(
            encoded,
            b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a\
              \x21\x00\x00\x00"
        );
    }

    #[test]
    fn t_data_bad_addr() {
        let data = ProxyProtocolData {
            family: AddressFamily::Ipv4,
            protocol: TransportProtocol::Tcp,
            src_addr: Some("not-an-ip".into()),
            dst_addr: Some("192.168.0.11".into()),
            src_port: Some(56324),
            dst_port: Some(443),
        };

        let mut encoder = ProxyProtocolV2Encoder::new();
        assert!(matches!(
            encoder.encode_data(&data),
            Err(ProxyProtocolEncodeError::InvalidAddrString)
        ));
    }
}
