use nix::errno::Errno;
use thiserror::Error;

use crate::crypto::KeyTypeError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("exactly one of link-mtu and tun-mtu must be defined (link-mtu: {link_mtu:?}, tun-mtu: {tun_mtu:?})")]
    MtuSource {
        link_mtu: Option<usize>,
        tun_mtu: Option<usize>,
    },

    #[error("TUN MTU value ({tun_mtu}) must be at least {min}: MTU is too small {frame}")]
    TunMtuTooSmall {
        tun_mtu: usize,
        min: usize,
        frame: String,
    },

    #[error("TUN MTU value ({tun_mtu}) is too large")]
    TunMtuTooLarge { tun_mtu: usize },

    #[error(transparent)]
    KeyType(#[from] KeyTypeError),

    #[error("invalid --mtu-disc type: '{0}' -- valid types are 'yes', 'maybe', or 'no'")]
    InvalidDiscoveryMode(String),

    #[error("--mtu-disc is not supported on this OS")]
    DiscoveryUnsupported,

    #[error("--mtu-disc is not supported on {family} sockets")]
    UnsupportedAddressFamily { family: String },

    #[error("Error setting {option} type={mode} on {socket} socket: {source}")]
    SetDiscoveryMode {
        option: &'static str,
        mode: i32,
        socket: &'static str,
        #[source]
        source: Errno,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
