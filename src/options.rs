use crate::constants::TUN_MTU_DEFAULT;

/// Outer transport of the tunnel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Proto {
    #[default]
    Udp,
    Tcp,
}

impl Proto {
    pub fn is_datagram(self) -> bool {
        self == Proto::Udp
    }

    pub fn is_stream(self) -> bool {
        self == Proto::Tcp
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TlsRole {
    Client,
    Server,
}

/// Configured compression algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Compression {
    #[default]
    None,
    /// Framing only, no actual compression (v1 framing).
    Stub,
    Lzo,
    Lz4,
    /// Framing only, v2 framing.
    StubV2,
    Lz4V2,
}

/// How a compression algorithm frames its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionHeader {
    None,
    /// v1: always one leading byte.
    Byte,
    /// v2: header only present when it does not grow the packet.
    LengthPrefixed,
}

impl Compression {
    pub fn header(self) -> CompressionHeader {
        match self {
            Compression::None => CompressionHeader::None,
            Compression::Stub | Compression::Lzo | Compression::Lz4 => CompressionHeader::Byte,
            Compression::StubV2 | Compression::Lz4V2 => CompressionHeader::LengthPrefixed,
        }
    }
}

/// Resolved tunnel options, as far as the MTU accounting is concerned.
#[derive(Clone, Debug)]
pub struct Options {
    pub proto: Proto,
    pub socks_proxy: bool,
    /// Some when running a TLS session (secure-session mode).
    pub tls: Option<TlsRole>,
    /// Static pre-shared key mode.
    pub shared_secret: bool,
    pub use_peer_id: bool,
    /// Replay protection, i.e. packet ids on data packets.
    pub replay: bool,
    pub ciphername: String,
    pub authname: String,
    pub compression: Compression,
    /// Max fragment size when internal fragmentation is on.
    pub fragment: Option<usize>,
    pub tun_mtu: Option<usize>,
    pub link_mtu: Option<usize>,
    /// Extra tun-side bytes, e.g. the ethernet header of a tap device.
    pub tun_mtu_extra: Option<usize>,
    /// "yes", "maybe" or "no"; None leaves the OS default alone.
    pub mtu_discover: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            proto: Proto::Udp,
            socks_proxy: false,
            tls: None,
            shared_secret: false,
            use_peer_id: false,
            replay: true,
            ciphername: "BF-CBC".into(),
            authname: "SHA1".into(),
            compression: Compression::None,
            fragment: None,
            tun_mtu: None,
            link_mtu: None,
            tun_mtu_extra: None,
            mtu_discover: None,
        }
    }
}

impl Options {
    pub fn tls_mode(&self) -> bool {
        self.tls.is_some()
    }

    /// Tun MTU used for payload sizing: the configured one, or the default
    /// when only the link MTU was given.
    pub fn tun_mtu_or_default(&self) -> usize {
        self.tun_mtu.unwrap_or(TUN_MTU_DEFAULT)
    }

    /// The pair handed to `Frame::finalize`. With nothing configured the tun
    /// MTU defaults, so a default config always names exactly one side.
    pub fn mtu_source(&self) -> (Option<usize>, Option<usize>) {
        match (self.link_mtu, self.tun_mtu) {
            (None, None) => (None, Some(TUN_MTU_DEFAULT)),
            other => other,
        }
    }
}
