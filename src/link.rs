use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time;

use anyhow::Result;
use log::{debug, info, trace};
use nix::libc;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::socket::AddressFamily;

use crate::errqueue::{drain_extended_errors, PmtuReport, SocketErrorQueue};
use crate::frame::Frame;
use crate::options::Proto;
use crate::overhead::datagram_overhead;
use crate::pmtu::{address_family, set_discovery_mode, DiscoveryMode, PmtuControl};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Larger than the known path MTU with DF set. Feedback is on the error queue.
    TooLarge,
    /// An ICMP port unreachable came back for an earlier packet.
    Refused,
}

/// Outer UDP socket of a tunnel, with PMTU discovery applied and an epoll
/// instance watching it for queued errors.
pub struct LinkSocket {
    sock: UdpSocket,
    remote_addr: SocketAddr,
    family: AddressFamily,
    epoll: Epoll,
    extended_errors: bool,
}

impl LinkSocket {
    pub fn connect<T>(remote_addr: T, mtu_discover: Option<DiscoveryMode>) -> Result<LinkSocket>
    where T: ToSocketAddrs {
        let remote_addr = remote_addr.to_socket_addrs()?
            .next().ok_or(anyhow::format_err!("lookup_host failed"))?;
        let family = address_family(&remote_addr);
        info!("Creating udp link socket to {remote_addr}");

        let local_addr = match family {
            AddressFamily::Inet6 => "[::]:0",
            _ => "0.0.0.0:0",
        };
        let sock = UdpSocket::bind(local_addr)?;
        set_discovery_mode(&sock, mtu_discover, family)?;
        let extended_errors = PmtuControl::for_family(family).enable_extended_errors(&sock);
        sock.connect(remote_addr)?;

        let epoll = Epoll::new(EpollCreateFlags::empty())?;
        epoll.add(&sock, EpollEvent::new(EpollFlags::EPOLLERR, 0))?;

        Ok(LinkSocket { sock, remote_addr, family, epoll, extended_errors })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn datagram_overhead(&self) -> usize {
        datagram_overhead(self.family, Proto::Udp)
    }

    pub fn send(&self, buf: &[u8]) -> Result<SendOutcome> {
        match self.sock.send(buf) {
            Ok(_) => Ok(SendOutcome::Sent),
            Err(e) if e.raw_os_error() == Some(libc::EMSGSIZE) => {
                trace!("Udp send of {} bytes: {}", buf.len(), e);
                Ok(SendOutcome::TooLarge)
            }
            // connection_refused is OK (peer not started)
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                trace!("Udp send error: {}", e);
                Ok(SendOutcome::Refused)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait until the socket reports a pending error. Returns false on timeout.
    pub fn wait_error(&self, timeout: time::Duration) -> Result<bool> {
        let timeout_ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut events = [EpollEvent::empty()];
        let n = self.epoll.wait(&mut events, EpollTimeout::from(timeout_ms))?;
        Ok(n > 0 && events[0].events().contains(EpollFlags::EPOLLERR))
    }

    /// Drain the error queue and shrink the frame's dynamic MTU if the kernel
    /// reported a smaller path MTU.
    pub fn handle_errors(&self, frame: &mut Frame) -> PmtuReport {
        if !self.extended_errors {
            return PmtuReport::default();
        }
        let report = drain_extended_errors(&mut SocketErrorQueue::new(&self.sock));
        if !report.trace.is_empty() {
            debug!("Extended socket errors from {}: {}", self.remote_addr, report.trace);
        }
        let before = frame.link_mtu_dynamic;
        if report.apply_to(frame, self.datagram_overhead()) {
            debug!("Path MTU feedback: link MTU dynamic {} -> {}", before, frame.link_mtu_dynamic);
        }
        report
    }
}
