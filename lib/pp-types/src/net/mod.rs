/*
 * SPDX-License-Identifier: Apache-2.0
 */

mod proxy_protocol;
pub use proxy_protocol::{
    AddressFamily, ProxyProtocolData, ProxyProtocolEncodeError, ProxyProtocolEncoder,
    ProxyProtocolV1Encoder, ProxyProtocolV2Encoder, ProxyProtocolVersion, TransportProtocol,
};
