/*
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::Duration;

use smol_str::SmolStr;
use tokio::io::AsyncRead;

use pp_types::net::{AddressFamily, ProxyProtocolData, TransportProtocol};

use super::{ProxyProtocolReadError, V1_GREETING};
use crate::PeekBufReader;

const PROXY_DATA_V1_MAX_LEN: usize = 107;

/// Reader for listeners configured to always expect a v1 text header.
pub struct ProxyProtocolV1Reader {
    timeout: Duration,
}

impl ProxyProtocolV1Reader {
    pub fn new(timeout: Duration) -> Self {
        ProxyProtocolV1Reader { timeout }
    }

    /// Read and parse the v1 header line. A stream without the `PROXY `
    /// greeting is rejected.
    pub async fn read_proxy_protocol_v1_for_tcp<R>(
        &mut self,
        stream: &mut PeekBufReader<R>,
    ) -> Result<ProxyProtocolData, ProxyProtocolReadError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.timeout, Self::read_checked(stream)).await {
            Ok(r) => r,
            Err(_) => Err(ProxyProtocolReadError::ReadTimeout),
        }
    }

    async fn read_checked<R>(
        stream: &mut PeekBufReader<R>,
    ) -> Result<ProxyProtocolData, ProxyProtocolReadError>
    where
        R: AsyncRead + Unpin,
    {
        let data = stream.peek(V1_GREETING.len()).await?;
        if data != V1_GREETING {
            return Err(ProxyProtocolReadError::InvalidMagicHeader);
        }
        read_data(stream).await
    }
}

/// Parse the header line, greeting included, and consume it from the stream.
///
/// The line must end with CRLF within 107 bytes. Scanning never goes past
/// that bound, so a sender streaming garbage without a line ending cannot
/// grow the buffer indefinitely.
pub(super) async fn read_data<R>(
    stream: &mut PeekBufReader<R>,
) -> Result<ProxyProtocolData, ProxyProtocolReadError>
where
    R: AsyncRead + Unpin,
{
    let line_len = loop {
        let data = stream.buffer();
        if let Some(p) = memchr::memchr(b'\n', data) {
            break p + 1;
        }
        if data.len() >= PROXY_DATA_V1_MAX_LEN {
            return Err(ProxyProtocolReadError::InvalidDataLength(data.len()));
        }
        if stream.fill_more().await? == 0 {
            return Err(ProxyProtocolReadError::ClosedUnexpected);
        }
    };
    if line_len > PROXY_DATA_V1_MAX_LEN {
        return Err(ProxyProtocolReadError::InvalidDataLength(line_len));
    }

    let data = parse_buf(&stream.buffer()[..line_len])?;
    stream.consume(line_len);
    Ok(data)
}

fn parse_buf(data: &[u8]) -> Result<ProxyProtocolData, ProxyProtocolReadError> {
    let line = data
        .strip_suffix(b"\r\n")
        .ok_or(ProxyProtocolReadError::InvalidLineTermination)?;

    let mut iter = line[V1_GREETING.len()..].split(|c| *c == b' ');
    let keyword = iter
        .next()
        .ok_or(ProxyProtocolReadError::InvalidProtocol(0x00))?;
    let family_c = match keyword.len() {
        4 => {
            if !keyword.starts_with(b"TCP") {
                return Err(ProxyProtocolReadError::InvalidProtocol(keyword[0]));
            }
            keyword[3]
        }
        7 => {
            return if keyword == b"UNKNOWN" {
                // anything else before CRLF is ignored for UNKNOWN senders
                Ok(ProxyProtocolData::unknown())
            } else {
                Err(ProxyProtocolReadError::InvalidProtocol(keyword[0]))
            };
        }
        _ => return Err(ProxyProtocolReadError::InvalidProtocol(0x00)),
    };
    let family = match family_c {
        b'4' => AddressFamily::Ipv4,
        b'6' => AddressFamily::Ipv6,
        c => return Err(ProxyProtocolReadError::InvalidFamily(c)),
    };

    // address tokens are kept verbatim, validation is up to the caller
    let src_addr = iter.next().ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;
    let src_addr =
        std::str::from_utf8(src_addr).map_err(|_| ProxyProtocolReadError::InvalidSrcAddr)?;
    if src_addr.is_empty() {
        return Err(ProxyProtocolReadError::InvalidSrcAddr);
    }

    let dst_addr = iter.next().ok_or(ProxyProtocolReadError::InvalidDstAddr)?;
    let dst_addr =
        std::str::from_utf8(dst_addr).map_err(|_| ProxyProtocolReadError::InvalidDstAddr)?;
    if dst_addr.is_empty() {
        return Err(ProxyProtocolReadError::InvalidDstAddr);
    }

    let src_port = iter.next().ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;
    let src_port = atoi::atoi::<u16>(src_port).ok_or(ProxyProtocolReadError::InvalidSrcAddr)?;

    let dst_port = iter.next().ok_or(ProxyProtocolReadError::InvalidDstAddr)?;
    let dst_port = atoi::atoi::<u16>(dst_port).ok_or(ProxyProtocolReadError::InvalidDstAddr)?;

    Ok(ProxyProtocolData {
        family,
        protocol: TransportProtocol::Tcp,
        src_addr: Some(SmolStr::from(src_addr)),
        dst_addr: Some(SmolStr::from(dst_addr)),
        src_port: Some(src_port),
        dst_port: Some(dst_port),
    })
}
