// MSG_ERRQUEUE: ICMP errors and local send failures, EMSGSIZE carries the path MTU

use std::fmt;

use log::trace;

use crate::frame::{Frame, SetMtuFlags};

/// Raw extended error as delivered by the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtendedError {
    pub errno: i32,
    /// For EMSGSIZE: the path MTU.
    pub info: u32,
}

/// One message read off the error queue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorQueueEntry {
    pub error: Option<ExtendedError>,
    /// Control messages other than the extended error, by name.
    pub other_cmsgs: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    TimedOut,
    MessageTooLarge { path_mtu: usize },
    ConnectionRefused,
    Protocol,
    HostUnreachable,
    NetworkUnreachable,
    PermissionDenied,
    Unknown(i32),
}

impl ErrorKind {
    pub fn classify(error: &ExtendedError) -> ErrorKind {
        use nix::errno::Errno;

        match Errno::from_raw(error.errno) {
            Errno::ETIMEDOUT => ErrorKind::TimedOut,
            Errno::EMSGSIZE => ErrorKind::MessageTooLarge { path_mtu: error.info as usize },
            Errno::ECONNREFUSED => ErrorKind::ConnectionRefused,
            Errno::EPROTO => ErrorKind::Protocol,
            Errno::EHOSTUNREACH => ErrorKind::HostUnreachable,
            Errno::ENETUNREACH => ErrorKind::NetworkUnreachable,
            Errno::EACCES => ErrorKind::PermissionDenied,
            _ => ErrorKind::Unknown(error.errno),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TimedOut => write!(f, "ETIMEDOUT"),
            ErrorKind::MessageTooLarge { path_mtu } => write!(f, "EMSGSIZE Path-MTU={}", path_mtu),
            ErrorKind::ConnectionRefused => write!(f, "ECONNREFUSED"),
            ErrorKind::Protocol => write!(f, "EPROTO"),
            ErrorKind::HostUnreachable => write!(f, "EHOSTUNREACH"),
            ErrorKind::NetworkUnreachable => write!(f, "ENETUNREACH"),
            ErrorKind::PermissionDenied => write!(f, "EACCES"),
            ErrorKind::Unknown(_) => write!(f, "UNKNOWN"),
        }
    }
}

pub trait ErrorQueue {
    /// Next entry, or None once the queue is empty.
    fn recv_error(&mut self) -> anyhow::Result<Option<ErrorQueueEntry>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PmtuReport {
    /// Everything seen, in order, separated by '|'.
    pub trace: String,
    /// Path MTU of the last EMSGSIZE entry.
    pub mtu: Option<usize>,
}

impl PmtuReport {
    /// Feed the discovered MTU into the frame. The kernel reports IP packet
    /// sizes, so `datagram_overhead` (IP + UDP/TCP header) comes off first.
    /// Feedback can only shrink the dynamic MTU. Returns whether it changed.
    pub fn apply_to(&self, frame: &mut Frame, datagram_overhead: usize) -> bool {
        let Some(path_mtu) = self.mtu else {
            return false;
        };
        let before = frame.link_mtu_dynamic;
        frame.set_mtu_dynamic(path_mtu.saturating_sub(datagram_overhead), SetMtuFlags::UPPER_BOUND_ONLY);
        frame.link_mtu_dynamic != before
    }
}

/// Read the error queue until it is empty, describing every entry.
///
/// An entry without extended error information ends the drain with
/// "NO-INFO". A failing receive also ends it, keeping what was collected.
pub fn drain_extended_errors<Q: ErrorQueue + ?Sized>(queue: &mut Q) -> PmtuReport {
    let mut parts = Vec::new();
    let mut mtu = None;

    loop {
        let entry = match queue.recv_error() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                trace!("Error queue receive failed: {e}");
                break;
            }
        };

        parts.extend(entry.other_cmsgs.iter().map(|name| format!("CMSG={}", name)));

        let Some(error) = entry.error else {
            parts.push("NO-INFO".to_string());
            break;
        };

        let kind = ErrorKind::classify(&error);
        trace!("Extended socket error: {} (errno {})", kind, error.errno);
        if let ErrorKind::MessageTooLarge { path_mtu } = kind {
            mtu = Some(path_mtu);
        }
        parts.push(kind.to_string());
    }

    PmtuReport { trace: parts.join("|"), mtu }
}

#[cfg(target_os = "linux")]
mod socket {
    use std::io::IoSliceMut;
    use std::os::fd::{AsFd, AsRawFd};

    use nix::errno::Errno;
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrStorage};

    use super::{ErrorQueue, ErrorQueueEntry, ExtendedError};

    // offending packet payload, only read so the kernel has somewhere to put it
    const PROBE_SIZE: usize = 64;
    const CMSG_SIZE: usize = 256;

    /// Error queue of a socket.
    pub struct SocketErrorQueue<'a, F: AsFd> {
        socket: &'a F,
    }

    impl<'a, F: AsFd> SocketErrorQueue<'a, F> {
        pub fn new(socket: &'a F) -> Self {
            Self { socket }
        }
    }

    fn cmsg_name(cmsg: &ControlMessageOwned) -> &'static str {
        match cmsg {
            ControlMessageOwned::ScmRights(_) => "SCM_RIGHTS",
            ControlMessageOwned::ScmTimestamp(_) => "SCM_TIMESTAMP",
            ControlMessageOwned::ScmTimestampns(_) => "SCM_TIMESTAMPNS",
            ControlMessageOwned::Ipv4PacketInfo(_) => "IP_PKTINFO",
            ControlMessageOwned::Ipv6PacketInfo(_) => "IPV6_PKTINFO",
            ControlMessageOwned::Ipv4RecvErr(..) => "IP_RECVERR",
            ControlMessageOwned::Ipv6RecvErr(..) => "IPV6_RECVERR",
            ControlMessageOwned::RxqOvfl(_) => "SO_RXQ_OVFL",
            _ => "UNKNOWN",
        }
    }

    impl<F: AsFd> ErrorQueue for SocketErrorQueue<'_, F> {
        fn recv_error(&mut self) -> anyhow::Result<Option<ErrorQueueEntry>> {
            let mut probe = [0u8; PROBE_SIZE];
            let mut iov = [IoSliceMut::new(&mut probe)];
            let mut cmsg_buffer = nix::cmsg_space!([u8; CMSG_SIZE]);

            let msg = match recvmsg::<SockaddrStorage>(
                self.socket.as_fd().as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buffer),
                MsgFlags::MSG_ERRQUEUE | MsgFlags::MSG_DONTWAIT,
            ) {
                Ok(msg) => msg,
                Err(Errno::EAGAIN) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            let mut entry = ErrorQueueEntry::default();
            for cmsg in msg.cmsgs()? {
                match cmsg {
                    ControlMessageOwned::Ipv4RecvErr(err, _) | ControlMessageOwned::Ipv6RecvErr(err, _) => {
                        entry.error = Some(ExtendedError { errno: err.ee_errno as i32, info: err.ee_info });
                    }
                    other => entry.other_cmsgs.push(cmsg_name(&other).to_string()),
                }
            }
            Ok(Some(entry))
        }
    }

}

#[cfg(target_os = "linux")]
pub use socket::SocketErrorQueue;
