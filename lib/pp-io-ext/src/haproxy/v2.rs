/*
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use smol_str::SmolStr;
use tokio::io::AsyncRead;

use pp_types::net::{AddressFamily, ProxyProtocolData, TransportProtocol};

use super::{ProxyProtocolReadError, V2_MAGIC_HEADER};
use crate::PeekBufReader;

const V2_HDR_LEN: usize = 16;

const BITS_VERSION: u8 = 0x02;

const SOURCE_LOCAL: u8 = 0x00;
const SOURCE_PROXY: u8 = 0x01;

/// Reader for listeners configured to always expect a v2 binary header.
pub struct ProxyProtocolV2Reader {
    timeout: Duration,
}

impl ProxyProtocolV2Reader {
    pub fn new(timeout: Duration) -> Self {
        ProxyProtocolV2Reader { timeout }
    }

    /// Read and parse the v2 binary header. A stream without the magic
    /// signature is rejected.
    pub async fn read_proxy_protocol_v2_for_tcp<R>(
        &mut self,
        stream: &mut PeekBufReader<R>,
    ) -> Result<ProxyProtocolData, ProxyProtocolReadError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.timeout, read_data(stream)).await {
            Ok(r) => r,
            Err(_) => Err(ProxyProtocolReadError::ReadTimeout),
        }
    }
}

/// Parse the fixed 16-byte header and the declared payload, consuming
/// exactly `16 + length` bytes whether or not every extension TLV after the
/// address block is understood.
pub(super) async fn read_data<R>(
    stream: &mut PeekBufReader<R>,
) -> Result<ProxyProtocolData, ProxyProtocolReadError>
where
    R: AsyncRead + Unpin,
{
    let hdr = stream.peek(V2_HDR_LEN).await?;
    if hdr.len() < V2_HDR_LEN {
        return Err(ProxyProtocolReadError::ClosedUnexpected);
    }
    if &hdr[..12] != V2_MAGIC_HEADER {
        return Err(ProxyProtocolReadError::InvalidMagicHeader);
    }

    let version = hdr[12] >> 4;
    if version != BITS_VERSION {
        return Err(ProxyProtocolReadError::InvalidVersion(version));
    }
    let command = hdr[12] & 0x0F;
    if command != SOURCE_LOCAL && command != SOURCE_PROXY {
        return Err(ProxyProtocolReadError::InvalidCommand(command));
    }

    let family = AddressFamily::from_v2_code(hdr[13] >> 4);
    let protocol = TransportProtocol::from_v2_code(hdr[13] & 0x0F);
    let data_len = usize::from(u16::from_be_bytes([hdr[14], hdr[15]]));
    stream.consume(V2_HDR_LEN);

    let payload = stream.peek(data_len).await?;
    if payload.len() < data_len {
        return Err(ProxyProtocolReadError::ClosedUnexpected);
    }

    // LOCAL connections carry no usable address info even if the sender
    // declared a family; the payload is still drained below.
    let data = if command == SOURCE_LOCAL {
        ProxyProtocolData::unknown()
    } else {
        match family {
            AddressFamily::Ipv4 => {
                if data_len < family.v2_address_len() {
                    return Err(ProxyProtocolReadError::InvalidDataLength(data_len));
                }
                let src_ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
                let dst_ip = Ipv4Addr::new(payload[4], payload[5], payload[6], payload[7]);
                let src_port = u16::from_be_bytes([payload[8], payload[9]]);
                let dst_port = u16::from_be_bytes([payload[10], payload[11]]);
                inet_data(family, protocol, src_ip.to_string(), dst_ip.to_string(), src_port, dst_port)
            }
            AddressFamily::Ipv6 => {
                if data_len < family.v2_address_len() {
                    return Err(ProxyProtocolReadError::InvalidDataLength(data_len));
                }
                let mut b = [0u8; 16];
                b.copy_from_slice(&payload[0..16]);
                let src_ip = Ipv6Addr::from(b);
                b.copy_from_slice(&payload[16..32]);
                let dst_ip = Ipv6Addr::from(b);
                let src_port = u16::from_be_bytes([payload[32], payload[33]]);
                let dst_port = u16::from_be_bytes([payload[34], payload[35]]);
                inet_data(family, protocol, src_ip.to_string(), dst_ip.to_string(), src_port, dst_port)
            }
            AddressFamily::Unix => {
                if data_len < family.v2_address_len() {
                    return Err(ProxyProtocolReadError::InvalidDataLength(data_len));
                }
                let src_addr =
                    unix_path(&payload[0..108]).ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;
                let dst_addr =
                    unix_path(&payload[108..216]).ok_or(ProxyProtocolReadError::InvalidDstAddr)?;
                ProxyProtocolData {
                    family,
                    protocol,
                    src_addr: Some(src_addr),
                    dst_addr: Some(dst_addr),
                    src_port: None,
                    dst_port: None,
                }
            }
            // UNSPEC or a newer family revision: nothing to interpret
            AddressFamily::Unknown => ProxyProtocolData::unknown(),
        }
    };

    stream.consume(data_len);
    Ok(data)
}

fn inet_data(
    family: AddressFamily,
    protocol: TransportProtocol,
    src_addr: String,
    dst_addr: String,
    src_port: u16,
    dst_port: u16,
) -> ProxyProtocolData {
    ProxyProtocolData {
        family,
        protocol,
        src_addr: Some(SmolStr::from(src_addr)),
        dst_addr: Some(SmolStr::from(dst_addr)),
        src_port: Some(src_port),
        dst_port: Some(dst_port),
    }
}

fn unix_path(buf: &[u8]) -> Option<SmolStr> {
    let end = memchr::memchr(0x00, buf).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).ok().map(SmolStr::from)
}
