use std::net::ToSocketAddrs;
use std::time;

use anyhow::Result;
use log::{debug, info, Level};

use crate::crypto::KeyType;
use crate::error::ConfigResult;
use crate::frame::{BufferKind, Frame};
use crate::link::{LinkSocket, SendOutcome};
use crate::options::Options;
use crate::overhead::{occ_key_type, payload_overhead, protocol_header_size};
use crate::pmtu::translate_discovery_mode_name;

/// Build and finalize the frame for `options`.
pub fn init_frame(options: &Options) -> ConfigResult<Frame> {
    let mut frame = Frame::default();
    frame.add_to_extra_tun(options.tun_mtu_extra.unwrap_or(0));

    let crypto = options.tls_mode() || options.shared_secret;
    let header_size = if crypto {
        let (kt, legacy_overhead) = occ_key_type(options)?;
        legacy_overhead + protocol_header_size(&kt, options, 0, true)
    } else {
        // no crypto layer, so no packet ids either
        let options = Options { replay: false, ..options.clone() };
        protocol_header_size(&KeyType::new("none", "none")?, &options, 0, true)
    };
    frame.add_to_extra_frame(header_size + payload_overhead(&frame, options, false));

    let (link_mtu, tun_mtu) = options.mtu_source();
    frame.finalize(link_mtu, tun_mtu)?;
    frame.log(Level::Debug, "Data Channel MTU parms");
    Ok(frame)
}

pub struct Session {
    pub options: Options,
    pub frame: Frame,
    pub link: LinkSocket,
}

impl Session {
    pub fn open<T: ToSocketAddrs>(options: Options, remote_addr: T) -> Result<Session> {
        let frame = init_frame(&options)?;
        let mtu_discover = options.mtu_discover.as_deref()
            .map(translate_discovery_mode_name)
            .transpose()?;
        let link = LinkSocket::connect(remote_addr, mtu_discover)?;
        info!("Session to {} opened, {}", link.remote_addr(), frame);
        Ok(Session { options, frame, link })
    }

    /// Send full sized link packets until the dynamic MTU settles. Each round
    /// waits up to `timeout` for the kernel to report an error. Returns the
    /// resulting dynamic link MTU.
    pub fn probe(&mut self, rounds: usize, timeout: time::Duration) -> Result<usize> {
        let buf = self.frame.alloc_buf(BufferKind::Link);

        for round in 0..rounds {
            let len = usize::min(self.frame.link_mtu_dynamic, buf.len());
            let outcome = self.link.send(&buf[..len])?;
            debug!("Probe round {}: {} bytes, {:?}", round, len, outcome);

            if outcome == SendOutcome::Sent && !self.link.wait_error(timeout)? {
                break;
            }
            let report = self.link.handle_errors(&mut self.frame);
            if self.frame.link_mtu_dynamic == len && report.mtu.is_none() {
                break;
            }
        }

        info!("Probed link MTU {} (tun MTU {})", self.frame.link_mtu_dynamic, self.frame.tun_mtu_dynamic());
        Ok(self.frame.link_mtu_dynamic)
    }
}
