/*
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io;
use std::time::Duration;

use log::trace;
use thiserror::Error;
use tokio::io::AsyncRead;

use pp_types::net::ProxyProtocolData;

use crate::PeekBufReader;

mod v1;
mod v2;

pub use v1::ProxyProtocolV1Reader;
pub use v2::ProxyProtocolV2Reader;

pub(crate) const V1_GREETING: &[u8] = b"PROXY ";
pub(crate) const V2_MAGIC_HEADER: &[u8] = b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a";

#[derive(Debug, Error)]
pub enum ProxyProtocolReadError {
    #[error("read failed: {0:?}")]
    ReadFailed(#[from] io::Error),
    #[error("read timed out")]
    ReadTimeout,
    #[error("connection closed unexpectedly")]
    ClosedUnexpected,
    #[error("invalid magic header")]
    InvalidMagicHeader,
    #[error("invalid data length: {0}")]
    InvalidDataLength(usize),
    #[error("invalid line termination")]
    InvalidLineTermination,
    #[error("unsupported protocol version: {0}")]
    InvalidVersion(u8),
    #[error("invalid command: {0}")]
    InvalidCommand(u8),
    #[error("invalid address family: {0:#04x}")]
    InvalidFamily(u8),
    #[error("invalid inet protocol: {0:#04x}")]
    InvalidProtocol(u8),
    #[error("invalid source address")]
    InvalidSrcAddr,
    #[error("invalid destination address")]
    InvalidDstAddr,
}

/// Classification of the first bytes of an accepted connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeaderKind {
    V1,
    V2,
    Absent,
}

/// Peek at most 12 bytes to classify the stream prefix.
///
/// Nothing is consumed: a stream classified `Absent` reaches the next
/// protocol layer byte-for-byte intact, and a matched signature is left for
/// the corresponding decoder. Most non-proxied traffic is ruled out on the
/// first byte.
pub async fn detect_header<R>(stream: &mut PeekBufReader<R>) -> io::Result<HeaderKind>
where
    R: AsyncRead + Unpin,
{
    let first = stream.peek(1).await?.first().copied();
    match first {
        Some(b'P') => {
            let data = stream.peek(V1_GREETING.len()).await?;
            if data == V1_GREETING {
                Ok(HeaderKind::V1)
            } else {
                Ok(HeaderKind::Absent)
            }
        }
        Some(b'\r') => {
            let data = stream.peek(V2_MAGIC_HEADER.len()).await?;
            if data == V2_MAGIC_HEADER {
                Ok(HeaderKind::V2)
            } else {
                Ok(HeaderKind::Absent)
            }
        }
        _ => Ok(HeaderKind::Absent),
    }
}

/// Auto-detecting reader for listeners that accept both proxied and direct
/// connections.
pub struct ProxyProtocolReader {
    timeout: Duration,
}

impl ProxyProtocolReader {
    pub fn new(timeout: Duration) -> Self {
        ProxyProtocolReader { timeout }
    }

    /// Decode the PROXY protocol header of an accepted connection, if any.
    ///
    /// Returns `Ok(Some(_))` with the stream positioned just after the
    /// header, `Ok(None)` with the stream untouched when no signature
    /// matched, and an error when a matched signature is followed by a
    /// malformed body. A matched signature never falls back to "absent".
    pub async fn read_proxy_protocol_for_tcp<R>(
        &self,
        stream: &mut PeekBufReader<R>,
    ) -> Result<Option<ProxyProtocolData>, ProxyProtocolReadError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.timeout, Self::read_header(stream)).await {
            Ok(r) => r,
            Err(_) => Err(ProxyProtocolReadError::ReadTimeout),
        }
    }

    async fn read_header<R>(
        stream: &mut PeekBufReader<R>,
    ) -> Result<Option<ProxyProtocolData>, ProxyProtocolReadError>
    where
        R: AsyncRead + Unpin,
    {
        match detect_header(stream).await? {
            HeaderKind::V1 => {
                trace!("proxy protocol v1 header detected");
                v1::read_data(stream).await.map(Some)
            }
            HeaderKind::V2 => {
                trace!("proxy protocol v2 header detected");
                v2::read_data(stream).await.map(Some)
            }
            HeaderKind::Absent => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    use pp_types::net::{
        AddressFamily, ProxyProtocolEncoder, ProxyProtocolVersion, TransportProtocol,
    };

    fn reader() -> ProxyProtocolReader {
        ProxyProtocolReader::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn t_absent() {
        let payload = b"GET / HTTP/1.1\r\nHost: example.net\r\n\r\n";
        let mut stream = PeekBufReader::new(Cursor::new(payload.to_vec()));

        let r = reader().read_proxy_protocol_for_tcp(&mut stream).await;
        assert!(matches!(r, Ok(None)));

        let mut all = Vec::new();
        stream.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, payload);
    }

    #[tokio::test]
    async fn t_absent_partial_greeting() {
        // close enough to the v1 greeting to need more than one byte
        let payload = b"PROG";
        let mut stream = PeekBufReader::new(Cursor::new(payload.to_vec()));

        let r = reader().read_proxy_protocol_for_tcp(&mut stream).await;
        assert!(matches!(r, Ok(None)));

        let mut all = Vec::new();
        stream.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, payload);
    }

    #[tokio::test]
    async fn t_absent_truncated_magic() {
        let payload = &V2_MAGIC_HEADER[..7];
        let mut stream = PeekBufReader::new(Cursor::new(payload.to_vec()));

        let r = reader().read_proxy_protocol_for_tcp(&mut stream).await;
        assert!(matches!(r, Ok(None)));

        let mut all = Vec::new();
        stream.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, payload);
    }

    #[tokio::test]
    async fn t_detect_v1() {
        let mut data = b"PROXY TCP4 192.168.0.1 192.168.0.11 56324 443\r\n".to_vec();
        data.extend_from_slice(b"GET / HTTP/1.1\r\n");
        let mut stream = PeekBufReader::new(Cursor::new(data));

        let decoded = reader()
            .read_proxy_protocol_for_tcp(&mut stream)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decoded.family, AddressFamily::Ipv4);
        assert_eq!(decoded.protocol, TransportProtocol::Tcp);
        assert_eq!(decoded.src_addr.as_deref(), Some("192.168.0.1"));
        assert_eq!(decoded.dst_addr.as_deref(), Some("192.168.0.11"));
        assert_eq!(decoded.src_port, Some(56324));
        assert_eq!(decoded.dst_port, Some(443));

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn t_detect_v2() {
        let mut data = b"\x0d\x0a\x0d\x0a\x00\x0d\x0a\x51\x55\x49\x54\x0a\
              \x21\x11\x00\x0C\
              \xC0\xA8\x00\x01\
              \xC0\xA8\x00\x0B\
              \xDC\x04\x01\xBB"
            .to_vec();
        data.extend_from_slice(b"GET / HTTP/1.1\r\n");
        let mut stream = PeekBufReader::new(Cursor::new(data));

        let decoded = reader()
            .read_proxy_protocol_for_tcp(&mut stream)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decoded.src_addr.as_deref(), Some("192.168.0.1"));
        assert_eq!(decoded.dst_port, Some(443));

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn t_matched_signature_never_absent() {
        // valid v1 greeting followed by garbage is an error, not None
        let mut stream = PeekBufReader::new(Cursor::new(b"PROXY JUNK\r\n".to_vec()));

        let r = reader().read_proxy_protocol_for_tcp(&mut stream).await;
        assert!(matches!(
            r,
            Err(ProxyProtocolReadError::InvalidProtocol(_))
        ));
    }

    #[tokio::test]
    async fn t_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let mut stream = PeekBufReader::new(server);

        let reader = ProxyProtocolReader::new(Duration::from_millis(10));
        let r = reader.read_proxy_protocol_for_tcp(&mut stream).await;
        assert!(matches!(r, Err(ProxyProtocolReadError::ReadTimeout)));
        drop(client);
    }

    async fn run_round_trip(version: ProxyProtocolVersion, data: ProxyProtocolData) {
        let mut encoder = ProxyProtocolEncoder::new(version);
        let encoded = encoder.encode_data(&data).unwrap().to_vec();

        let mut stream = PeekBufReader::new(Cursor::new(encoded));
        let decoded = reader()
            .read_proxy_protocol_for_tcp(&mut stream)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decoded, data);
    }

    fn inet_data(
        family: AddressFamily,
        protocol: TransportProtocol,
        src: &str,
        dst: &str,
    ) -> ProxyProtocolData {
        ProxyProtocolData {
            family,
            protocol,
            src_addr: Some(src.into()),
            dst_addr: Some(dst.into()),
            src_port: Some(56324),
            dst_port: Some(443),
        }
    }

    #[tokio::test]
    async fn t_round_trip_v1() {
        run_round_trip(
            ProxyProtocolVersion::V1,
            inet_data(
                AddressFamily::Ipv4,
                TransportProtocol::Tcp,
                "192.168.0.1",
                "192.168.0.11",
            ),
        )
        .await;
        run_round_trip(
            ProxyProtocolVersion::V1,
            inet_data(
                AddressFamily::Ipv6,
                TransportProtocol::Tcp,
                "2001:db8::1",
                "2001:db8::11",
            ),
        )
        .await;
        run_round_trip(ProxyProtocolVersion::V1, ProxyProtocolData::unknown()).await;
    }

    #[tokio::test]
    async fn t_round_trip_v2() {
        for protocol in [TransportProtocol::Tcp, TransportProtocol::Udp] {
            run_round_trip(
                ProxyProtocolVersion::V2,
                inet_data(
                    AddressFamily::Ipv4,
                    protocol,
                    "192.168.0.1",
                    "192.168.0.11",
                ),
            )
            .await;
            run_round_trip(
                ProxyProtocolVersion::V2,
                inet_data(
                    AddressFamily::Ipv6,
                    protocol,
                    "2001:db8::1",
                    "2001:db8::11",
                ),
            )
            .await;
        }
        run_round_trip(ProxyProtocolVersion::V2, ProxyProtocolData::unknown()).await;
    }
}
