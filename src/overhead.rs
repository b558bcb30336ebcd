use nix::sys::socket::AddressFamily;

use crate::constants::{
    COMPRESSION_HEADER_SIZE, FRAGMENT_HEADER_SIZE, IPV4_HEADER_SIZE, IPV6_HEADER_SIZE,
    LEGACY_CIPHER_NAME, LEGACY_CIPHER_OVERHEAD, OPCODE_PEER_ID_SIZE, OPCODE_SIZE,
    SOCKS_UDP_HEADER_SIZE, STREAM_LENGTH_PREFIX_SIZE, TCP_HEADER_SIZE, UDP_HEADER_SIZE,
};
use crate::crypto::{calculate_crypto_overhead, KeyType, KeyTypeError};
use crate::frame::Frame;
use crate::options::{CompressionHeader, Options, Proto};

/// Pass 0 with `occ` set for a size-independent value.
pub fn protocol_header_size(kt: &KeyType, options: &Options, payload_size: usize, occ: bool) -> usize {
    let mut header_size = 0;
    let tls_mode = options.tls_mode();

    // the socks UDP header carries the destination; a TCP proxy connection
    // already knows it
    if options.socks_proxy && options.proto.is_datagram() {
        header_size += SOCKS_UDP_HEADER_SIZE;
    }

    if options.proto.is_stream() {
        header_size += STREAM_LENGTH_PREFIX_SIZE;
    }

    if tls_mode {
        header_size += if options.use_peer_id { OPCODE_PEER_ID_SIZE } else { OPCODE_SIZE };
    }

    let packet_id = options.replay;
    let packet_id_long_form = !tls_mode || kt.is_ofb_cfb();
    header_size += calculate_crypto_overhead(kt, packet_id, packet_id_long_form, payload_size, occ);

    header_size
}

// v2 compression only adds its header when that does not grow the packet,
// so it is not counted
pub fn payload_overhead(frame: &Frame, options: &Options, include_tun_extra: bool) -> usize {
    let mut overhead = 0;

    if include_tun_extra {
        overhead += frame.extra_tun;
    }

    if options.compression.header() == CompressionHeader::Byte {
        overhead += COMPRESSION_HEADER_SIZE;
    }

    if options.fragment.is_some() {
        overhead += FRAGMENT_HEADER_SIZE;
    }

    overhead
}

pub fn payload_size(frame: &Frame, options: &Options) -> usize {
    options.tun_mtu_or_default() + payload_overhead(frame, options, true)
}

/// Key type to size the data channel with, plus bytes to add on top of it.
///
/// BF-CBC may be configured although the crypto backend cannot provide it.
/// It is accounted for as cipher "none" plus its block and IV, the auth
/// overhead still comes through the key type.
pub fn occ_key_type(options: &Options) -> Result<(KeyType, usize), KeyTypeError> {
    if options.ciphername == LEGACY_CIPHER_NAME {
        Ok((KeyType::new("none", &options.authname)?, LEGACY_CIPHER_OVERHEAD))
    } else {
        Ok((KeyType::new(&options.ciphername, &options.authname)?, 0))
    }
}

/// Link MTU as advertised to the peer in the options string. Never used for sizing.
pub fn advertised_link_mtu(options: &Options, frame: &Frame) -> Result<usize, KeyTypeError> {
    let payload = payload_size(frame, options);

    // neither static key nor TLS: no crypto at all
    if !options.tls_mode() && !options.shared_secret {
        return Ok(payload);
    }

    let (occ_kt, legacy_overhead) = occ_key_type(options)?;
    let overhead = legacy_overhead + protocol_header_size(&occ_kt, options, 0, true);

    Ok(payload + overhead)
}

/// IP + transport header in front of every outer packet.
pub fn datagram_overhead(family: AddressFamily, proto: Proto) -> usize {
    let ip = if family == AddressFamily::Inet6 { IPV6_HEADER_SIZE } else { IPV4_HEADER_SIZE };
    let transport = match proto {
        Proto::Udp => UDP_HEADER_SIZE,
        Proto::Tcp => TCP_HEADER_SIZE,
    };
    ip + transport
}
