use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::str::FromStr;

use log::{info, warn};
use nix::sys::socket::AddressFamily;

use crate::error::{ConfigError, ConfigResult};

/// Don't-fragment behaviour requested from the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// "no": never set DF, fragment locally.
    Dont,
    /// "maybe": use path MTU discovery when the route has one.
    Want,
    /// "yes": always set DF, oversized sends fail with EMSGSIZE.
    Do,
}

pub fn translate_discovery_mode_name(name: &str) -> ConfigResult<DiscoveryMode> {
    if !cfg!(target_os = "linux") {
        return Err(ConfigError::DiscoveryUnsupported);
    }
    match name {
        "yes" => Ok(DiscoveryMode::Do),
        "maybe" => Ok(DiscoveryMode::Want),
        "no" => Ok(DiscoveryMode::Dont),
        _ => Err(ConfigError::InvalidDiscoveryMode(name.to_string())),
    }
}

impl FromStr for DiscoveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        translate_discovery_mode_name(s)
    }
}

pub fn address_family(addr: &SocketAddr) -> AddressFamily {
    match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    }
}

/// Per address family handling of the PMTU socket options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmtuControl {
    Ipv4,
    Ipv6,
    Unsupported(AddressFamily),
}

impl PmtuControl {
    pub fn for_family(family: AddressFamily) -> PmtuControl {
        match family {
            AddressFamily::Inet => PmtuControl::Ipv4,
            AddressFamily::Inet6 => PmtuControl::Ipv6,
            other => PmtuControl::Unsupported(other),
        }
    }

    #[cfg(target_os = "linux")]
    pub fn apply<F: AsFd>(self, socket: &F, mode: DiscoveryMode) -> ConfigResult<()> {
        use nix::libc;

        let (level, option, option_name, socket_name, raw_mode) = match self {
            PmtuControl::Ipv4 => {
                let raw_mode = match mode {
                    DiscoveryMode::Dont => libc::IP_PMTUDISC_DONT,
                    DiscoveryMode::Want => libc::IP_PMTUDISC_WANT,
                    DiscoveryMode::Do => libc::IP_PMTUDISC_DO,
                };
                (libc::IPPROTO_IP, libc::IP_MTU_DISCOVER, "IP_MTU_DISCOVER", "TCP/UDP", raw_mode)
            }
            PmtuControl::Ipv6 => {
                let raw_mode = match mode {
                    DiscoveryMode::Dont => libc::IPV6_PMTUDISC_DONT,
                    DiscoveryMode::Want => libc::IPV6_PMTUDISC_WANT,
                    DiscoveryMode::Do => libc::IPV6_PMTUDISC_DO,
                };
                (libc::IPPROTO_IPV6, libc::IPV6_MTU_DISCOVER, "IPV6_MTU_DISCOVER", "TCP6/UDP6", raw_mode)
            }
            PmtuControl::Unsupported(family) => {
                return Err(ConfigError::UnsupportedAddressFamily { family: format!("{:?}", family) });
            }
        };

        raw::setsockopt_int(socket, level, option, raw_mode)
            .map_err(|source| ConfigError::SetDiscoveryMode {
                option: option_name,
                mode: raw_mode,
                socket: socket_name,
                source,
            })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn apply<F: AsFd>(self, _socket: &F, _mode: DiscoveryMode) -> ConfigResult<()> {
        Err(ConfigError::DiscoveryUnsupported)
    }

    /// Ask the kernel to queue ICMP and local errors (with the path MTU) on
    /// the socket's error queue. Failure only costs us the feedback, so it is
    /// a warning. Returns whether it worked.
    #[cfg(target_os = "linux")]
    pub fn enable_extended_errors<F: AsFd>(self, socket: &F) -> bool {
        use nix::sys::socket::{setsockopt, sockopt};

        let result = match self {
            PmtuControl::Ipv4 => setsockopt(socket, sockopt::Ipv4RecvErr, &true),
            PmtuControl::Ipv6 => setsockopt(socket, sockopt::Ipv6RecvErr, &true),
            PmtuControl::Unsupported(_) => Err(nix::errno::Errno::EAFNOSUPPORT),
        };
        if let Err(e) = result {
            warn!("Note: enable extended error passing on TCP/UDP socket failed (IP_RECVERR): {e}");
            return false;
        }
        true
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enable_extended_errors<F: AsFd>(self, _socket: &F) -> bool {
        warn!("Note: extended error passing is not supported on this OS");
        false
    }
}

/// Apply `--mtu-disc` to a transport socket. `None` leaves the OS default.
pub fn set_discovery_mode<F: AsFd>(socket: &F, mode: Option<DiscoveryMode>, family: AddressFamily) -> ConfigResult<()> {
    let Some(mode) = mode else {
        return Ok(());
    };
    PmtuControl::for_family(family).apply(socket, mode)?;
    info!("Path MTU discovery set to {:?} on {:?} socket", mode, family);
    Ok(())
}

#[cfg(target_os = "linux")]
pub(crate) mod raw {
    use std::os::fd::{AsFd, AsRawFd};

    use nix::errno::Errno;
    use nix::libc;

    pub fn setsockopt_int<F: AsFd>(socket: &F, level: libc::c_int, option: libc::c_int, value: libc::c_int) -> nix::Result<()> {
        let res = unsafe {
            libc::setsockopt(socket.as_fd().as_raw_fd(), level, option,
                             &value as *const libc::c_int as *const libc::c_void,
                             std::mem::size_of::<libc::c_int>() as libc::socklen_t)
        };
        Errno::result(res).map(drop)
    }

    #[cfg(test)]
    pub fn getsockopt_int<F: AsFd>(socket: &F, level: libc::c_int, option: libc::c_int) -> nix::Result<libc::c_int> {
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let res = unsafe {
            libc::getsockopt(socket.as_fd().as_raw_fd(), level, option,
                             &mut value as *mut libc::c_int as *mut libc::c_void,
                             &mut len)
        };
        Errno::result(res).map(|_| value)
    }
}
