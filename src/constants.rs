// Defaults only. The frame carries its own minimum and every calculator takes
// its inputs as arguments, so nothing below is read implicitly.

pub const TUN_MTU_MIN: usize = 100;
pub const TUN_MTU_DEFAULT: usize = 1500;
pub const LINK_MTU_DEFAULT: usize = 1500;

// Ethernet header + VLAN tag + slack, for tap devices
pub const TAP_MTU_EXTRA_DEFAULT: usize = 32;

pub const PAYLOAD_ALIGN: usize = 4;

// Per-packet header sizes on the outer link

/// SOCKS5 UDP associate header (IPv4 only).
pub const SOCKS_UDP_HEADER_SIZE: usize = 10;
/// 16 bit length field in front of every packet on a stream transport.
pub const STREAM_LENGTH_PREFIX_SIZE: usize = 2;
pub const OPCODE_SIZE: usize = 1;
/// opcode + 24 bit peer id
pub const OPCODE_PEER_ID_SIZE: usize = 4;

// Headers below the tunnel, reported path MTUs include them
pub const IPV4_HEADER_SIZE: usize = 20;
pub const IPV6_HEADER_SIZE: usize = 40;
pub const UDP_HEADER_SIZE: usize = 8;
pub const TCP_HEADER_SIZE: usize = 20;

// Payload additions inside the encrypted part

pub const COMPRESSION_HEADER_SIZE: usize = 1;
/// fragment header is a single u32
pub const FRAGMENT_HEADER_SIZE: usize = 4;

// Replay protection packet ids: u32 counter, plus u32 timestamp in long form
pub const PACKET_ID_SIZE: usize = 4;
pub const PACKET_ID_LONG_SIZE: usize = 8;

/// BF-CBC: 64 bit block + 64 bit IV. Added by hand since BF-CBC is not
/// resolvable as a cipher.
pub const LEGACY_CIPHER_OVERHEAD: usize = 64 / 8 + 64 / 8;
pub const LEGACY_CIPHER_NAME: &str = "BF-CBC";

static_assertions::const_assert!(TUN_MTU_MIN < TUN_MTU_DEFAULT);
static_assertions::const_assert!(TUN_MTU_MIN < LINK_MTU_DEFAULT);
static_assertions::const_assert!(PAYLOAD_ALIGN.is_power_of_two());
static_assertions::const_assert!(OPCODE_SIZE < OPCODE_PEER_ID_SIZE);
static_assertions::const_assert!(PACKET_ID_SIZE < PACKET_ID_LONG_SIZE);
