use std::fmt;

use bitflags::bitflags;
use bytes::{Buf, BytesMut};
use log::{debug, log, Level};

use crate::constants::{PAYLOAD_ALIGN, TUN_MTU_MIN};
use crate::error::{ConfigError, ConfigResult};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SetMtuFlags: u32 {
        /// The value is a tun MTU, convert it to a link MTU first.
        const AS_TUN_VALUE = 1 << 0;
        /// Only ever shrink the dynamic MTU.
        const UPPER_BOUND_ONLY = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Tun,
    Link,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Max outer packet size, fixed by `finalize`.
    pub link_mtu: usize,
    /// Working link MTU, moved around by path MTU feedback.
    pub link_mtu_dynamic: usize,

    /// Protocol + crypto overhead around the payload.
    pub extra_frame: usize,
    /// Headroom for in-place buffer manipulation, never on the wire.
    pub extra_buffer: usize,
    /// Tun-side encapsulation (e.g. ethernet header) not covered by the tun MTU.
    pub extra_tun: usize,
    /// Outer-transport-only overhead (e.g. stream length prefix).
    pub extra_link: usize,

    /// Smallest tun MTU the frame may ever be finalized or shrunk to.
    pub tun_mtu_min: usize,
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new(TUN_MTU_MIN)
    }
}

fn constrain(x: usize, min: usize, max: usize) -> usize {
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}

fn align_up(x: usize, align: usize) -> usize {
    (x + align - 1) / align * align
}

impl Frame {
    pub fn new(tun_mtu_min: usize) -> Frame {
        Frame {
            link_mtu: 0,
            link_mtu_dynamic: 0,
            extra_frame: 0,
            extra_buffer: 0,
            extra_tun: 0,
            extra_link: 0,
            tun_mtu_min,
        }
    }

    pub fn add_to_extra_frame(&mut self, bytes: usize) {
        self.extra_frame += bytes;
    }

    pub fn add_to_extra_tun(&mut self, bytes: usize) {
        self.extra_tun += bytes;
    }

    pub fn add_to_extra_link(&mut self, bytes: usize) {
        self.extra_link += bytes;
    }

    pub fn add_to_extra_buffer(&mut self, bytes: usize) {
        self.extra_buffer += bytes;
    }

    /// Difference between link MTU and tun MTU.
    pub fn tun_link_delta(&self) -> usize {
        self.extra_frame + self.extra_tun
    }

    pub fn tun_mtu(&self) -> usize {
        self.link_mtu.saturating_sub(self.tun_link_delta())
    }

    pub fn tun_mtu_dynamic(&self) -> usize {
        self.link_mtu_dynamic.saturating_sub(self.tun_link_delta())
    }

    /// Ceiling of the dynamic link MTU.
    pub fn expanded_size(&self) -> usize {
        self.link_mtu
    }

    /// Floor of the dynamic link MTU.
    pub fn expanded_size_min(&self) -> usize {
        self.tun_mtu_min + self.tun_link_delta()
    }

    /// Link MTU minus the frame overhead.
    pub fn link_payload_size(&self) -> usize {
        self.link_mtu.saturating_sub(self.extra_frame)
    }

    pub fn link_payload_size_dynamic(&self) -> usize {
        self.link_mtu_dynamic.saturating_sub(self.extra_frame)
    }

    pub fn headroom_base(&self) -> usize {
        self.tun_link_delta() + self.extra_buffer + self.extra_link
    }

    /// Headroom in front of the payload, padded so the payload is aligned.
    pub fn headroom(&self) -> usize {
        align_up(self.headroom_base(), PAYLOAD_ALIGN)
    }

    /// Allocation size of a socket or tun buffer.
    pub fn buf_size(&self) -> usize {
        self.tun_mtu() + self.headroom_base() * 2
    }

    pub fn max_rw_size_tun(&self) -> usize {
        self.link_payload_size()
    }

    pub fn max_rw_size_link(&self) -> usize {
        self.expanded_size() + self.extra_link
    }

    /// Derive the static link MTU from whichever of link/tun MTU was
    /// configured. Exactly one must be given.
    pub fn finalize(&mut self, link_mtu: Option<usize>, tun_mtu: Option<usize>) -> ConfigResult<()> {
        self.link_mtu = match (link_mtu, tun_mtu) {
            (None, Some(tun_mtu)) => tun_mtu.checked_add(self.tun_link_delta())
                .ok_or(ConfigError::TunMtuTooLarge { tun_mtu })?,
            (Some(link_mtu), None) => link_mtu,
            (link_mtu, tun_mtu) => return Err(ConfigError::MtuSource { link_mtu, tun_mtu }),
        };

        if self.link_mtu < self.tun_link_delta() || self.tun_mtu() < self.tun_mtu_min {
            return Err(ConfigError::TunMtuTooSmall {
                tun_mtu: self.tun_mtu(),
                min: self.tun_mtu_min,
                frame: self.to_string(),
            });
        }

        self.link_mtu_dynamic = self.link_mtu;
        Ok(())
    }

    /// Move the dynamic link MTU, always keeping it within
    /// `[expanded_size_min, expanded_size]`.
    pub fn set_mtu_dynamic(&mut self, mtu: usize, flags: SetMtuFlags) {
        let orig_link_mtu_dynamic = self.link_mtu_dynamic;

        let link_mtu = if flags.contains(SetMtuFlags::AS_TUN_VALUE) {
            mtu.saturating_add(self.tun_link_delta())
        } else {
            mtu
        };

        if !flags.contains(SetMtuFlags::UPPER_BOUND_ONLY) || link_mtu < self.link_mtu_dynamic {
            self.link_mtu_dynamic = constrain(link_mtu, self.expanded_size_min(), self.expanded_size());
        }

        debug!("MTU DYNAMIC mtu={}, flags={:?}, {} -> {}",
               mtu, flags, orig_link_mtu_dynamic, self.link_mtu_dynamic);
    }

    /// Reclassify the frame overhead of `src` (a layer further down the
    /// pipeline) as tun-side overhead. The total delta stays the same; at most
    /// the current `extra_frame` is moved.
    pub fn subtract_extra(&mut self, src: &Frame) {
        let moved = usize::min(src.extra_frame, self.extra_frame);
        self.extra_frame -= moved;
        self.extra_tun += moved;
    }

    pub fn log(&self, level: Level, prefix: &str) {
        log!(level, "{} {}", prefix, self);
    }

    /// Zeroed buffer for socket or tun I/O. The headroom is skipped, so the
    /// returned length is the max read/write size of that side.
    pub fn alloc_buf(&self, kind: BufferKind) -> BytesMut {
        let len = match kind {
            BufferKind::Tun => self.max_rw_size_tun(),
            BufferKind::Link => self.max_rw_size_link(),
        };
        let headroom = self.headroom();
        let mut buf = BytesMut::zeroed(usize::max(self.buf_size(), headroom + len));
        buf.advance(headroom);
        buf.truncate(len);
        buf
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ L:{} D:{} EF:{} EB:{} ET:{} EL:{} ]",
               self.link_mtu, self.link_mtu_dynamic,
               self.extra_frame, self.extra_buffer, self.extra_tun, self.extra_link)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn frame_with(extra_frame: usize, extra_tun: usize) -> Frame {
        let mut frame = Frame::default();
        frame.add_to_extra_frame(extra_frame);
        frame.add_to_extra_tun(extra_tun);
        frame
    }

    #[test]
    fn test_finalize_from_tun_mtu() -> anyhow::Result<()> {
        let mut frame = frame_with(41, 32);
        frame.finalize(None, Some(1500))?;
        assert_eq!(frame.link_mtu, 1573);
        assert_eq!(frame.link_mtu_dynamic, frame.link_mtu);
        assert_eq!(frame.tun_mtu(), 1500);
        Ok(())
    }

    #[test]
    fn test_finalize_from_link_mtu() -> anyhow::Result<()> {
        let mut frame = frame_with(41, 0);
        frame.finalize(Some(1400), None)?;
        assert_eq!(frame.link_mtu, 1400);
        assert_eq!(frame.link_mtu_dynamic, 1400);
        assert_eq!(frame.tun_mtu(), 1359);
        Ok(())
    }

    #[rstest]
    #[case::both(Some(1500), Some(1500))]
    #[case::neither(None, None)]
    fn test_finalize_needs_exactly_one(#[case] link_mtu: Option<usize>, #[case] tun_mtu: Option<usize>) {
        let mut frame = frame_with(41, 0);
        let err = frame.finalize(link_mtu, tun_mtu).unwrap_err();
        assert!(matches!(err, ConfigError::MtuSource { .. }));
    }

    #[rstest]
    #[case::tun_below_min(None, Some(99))]
    #[case::link_leaves_too_little(Some(140), None)]
    #[case::link_below_overhead(Some(20), None)]
    fn test_finalize_too_small(#[case] link_mtu: Option<usize>, #[case] tun_mtu: Option<usize>) {
        let mut frame = frame_with(41, 0);
        match frame.finalize(link_mtu, tun_mtu) {
            Err(ConfigError::TunMtuTooSmall { min, frame, .. }) => {
                assert_eq!(min, TUN_MTU_MIN);
                assert!(frame.starts_with("[ L:"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_finalize_tun_mtu_overflow() {
        let mut frame = frame_with(41, 0);
        let err = frame.finalize(None, Some(usize::MAX)).unwrap_err();
        assert!(matches!(err, ConfigError::TunMtuTooLarge { tun_mtu: usize::MAX }));
        assert_eq!(frame.link_mtu_dynamic, 0);
    }

    #[rstest]
    #[case::tun_value(SetMtuFlags::AS_TUN_VALUE)]
    #[case::tun_value_upper_bound(SetMtuFlags::AS_TUN_VALUE | SetMtuFlags::UPPER_BOUND_ONLY)]
    fn test_set_mtu_dynamic_huge_tun_value(#[case] flags: SetMtuFlags) {
        let mut frame = finalized(41, 0, 1500);
        frame.set_mtu_dynamic(1300, SetMtuFlags::empty());
        frame.set_mtu_dynamic(usize::MAX, flags);
        let expected = if flags.contains(SetMtuFlags::UPPER_BOUND_ONLY) { 1300 } else { frame.expanded_size() };
        assert_eq!(frame.link_mtu_dynamic, expected);
    }

    #[test]
    fn test_finalize_at_min() -> anyhow::Result<()> {
        let mut frame = Frame::new(576);
        frame.add_to_extra_frame(10);
        frame.finalize(None, Some(576))?;
        assert_eq!(frame.expanded_size_min(), frame.expanded_size());
        Ok(())
    }

    fn finalized(extra_frame: usize, extra_tun: usize, tun_mtu: usize) -> Frame {
        let mut frame = frame_with(extra_frame, extra_tun);
        frame.finalize(None, Some(tun_mtu)).unwrap();
        frame
    }

    #[rstest]
    #[case::unconditional_shrink(1200, SetMtuFlags::empty(), 1200)]
    #[case::clamped_to_ceiling(9000, SetMtuFlags::empty(), 1541)]
    #[case::clamped_to_floor(10, SetMtuFlags::empty(), 141)]
    #[case::tun_value(1300, SetMtuFlags::AS_TUN_VALUE, 1341)]
    #[case::upper_bound_shrinks(1400, SetMtuFlags::UPPER_BOUND_ONLY, 1400)]
    #[case::upper_bound_ignores_growth(1600, SetMtuFlags::UPPER_BOUND_ONLY, 1541)]
    #[case::upper_bound_tun_value(1000, SetMtuFlags::UPPER_BOUND_ONLY | SetMtuFlags::AS_TUN_VALUE, 1041)]
    fn test_set_mtu_dynamic(#[case] mtu: usize, #[case] flags: SetMtuFlags, #[case] expected: usize) {
        let mut frame = finalized(41, 0, 1500);
        frame.set_mtu_dynamic(mtu, flags);
        assert_eq!(frame.link_mtu_dynamic, expected);
        assert_eq!(frame.link_mtu, 1541);
    }

    #[test]
    fn test_upper_bound_only_cannot_regrow() {
        let mut frame = finalized(41, 0, 1500);
        frame.set_mtu_dynamic(1300, SetMtuFlags::UPPER_BOUND_ONLY);
        frame.set_mtu_dynamic(1400, SetMtuFlags::UPPER_BOUND_ONLY);
        assert_eq!(frame.link_mtu_dynamic, 1300);

        // configuration-sourced values may widen again
        frame.set_mtu_dynamic(1400, SetMtuFlags::empty());
        assert_eq!(frame.link_mtu_dynamic, 1400);
        assert_eq!(frame.tun_mtu_dynamic(), 1359);
    }

    #[test]
    fn test_subtract_extra() {
        let mut frame = frame_with(41, 14);
        let mut fragment_frame = Frame::default();
        fragment_frame.add_to_extra_frame(4);

        frame.subtract_extra(&fragment_frame);
        assert_eq!(frame.extra_frame, 37);
        assert_eq!(frame.extra_tun, 18);
    }

    #[test]
    fn test_sizes() {
        let mut frame = frame_with(41, 0);
        frame.add_to_extra_link(2);
        frame.add_to_extra_buffer(8);
        frame.finalize(None, Some(1500)).unwrap();

        assert_eq!(frame.headroom_base(), 51);
        assert_eq!(frame.headroom(), 52);
        assert_eq!(frame.buf_size(), 1500 + 102);
        assert_eq!(frame.max_rw_size_tun(), 1500);
        assert_eq!(frame.max_rw_size_link(), 1543);
        assert_eq!(frame.link_payload_size_dynamic(), 1500);
    }

    #[test]
    fn test_alloc_buf() {
        let mut frame = frame_with(41, 0);
        frame.add_to_extra_link(2);
        frame.finalize(None, Some(1500)).unwrap();

        let buf = frame.alloc_buf(BufferKind::Tun);
        assert_eq!(buf.len(), 1500);
        let buf = frame.alloc_buf(BufferKind::Link);
        assert_eq!(buf.len(), 1543);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_display() {
        let mut frame = frame_with(41, 32);
        frame.add_to_extra_buffer(8);
        frame.add_to_extra_link(2);
        frame.finalize(Some(1500), None).unwrap();
        assert_eq!(frame.to_string(), "[ L:1500 D:1500 EF:41 EB:8 ET:32 EL:2 ]");
    }

    proptest! {
        #[test]
        fn prop_dynamic_mtu_within_bounds(extra_frame in 0usize..200,
                                          extra_tun in 0usize..64,
                                          tun_mtu in TUN_MTU_MIN..9000,
                                          requests in prop::collection::vec((prop_oneof![0usize..20000, (usize::MAX - 20000)..=usize::MAX],
                                                                     0u32..4), 1..16)) {
            let mut frame = finalized(extra_frame, extra_tun, tun_mtu);
            for (mtu, bits) in requests {
                let flags = SetMtuFlags::from_bits_truncate(bits);
                let before = frame.link_mtu_dynamic;
                frame.set_mtu_dynamic(mtu, flags);

                prop_assert!(frame.link_mtu_dynamic >= frame.expanded_size_min());
                prop_assert!(frame.link_mtu_dynamic <= frame.expanded_size());
                if flags.contains(SetMtuFlags::UPPER_BOUND_ONLY) {
                    prop_assert!(frame.link_mtu_dynamic <= before);
                }
            }
        }

        #[test]
        fn prop_upper_bound_only(extra_frame in 0usize..200, tun_mtu in TUN_MTU_MIN..9000,
                                 first in 0usize..20000, mtu in 0usize..20000) {
            let mut frame = finalized(extra_frame, 0, tun_mtu);
            frame.set_mtu_dynamic(first, SetMtuFlags::empty());
            let current = frame.link_mtu_dynamic;

            frame.set_mtu_dynamic(mtu, SetMtuFlags::UPPER_BOUND_ONLY);
            if mtu >= current {
                prop_assert_eq!(frame.link_mtu_dynamic, current);
            } else {
                prop_assert_eq!(frame.link_mtu_dynamic,
                                constrain(mtu, frame.expanded_size_min(), frame.expanded_size()));
            }
        }

        #[test]
        fn prop_subtract_extra_conserves(extra_frame in 0usize..500, extra_tun in 0usize..500,
                                         src_extra in 0usize..1000) {
            let mut frame = frame_with(extra_frame, extra_tun);
            let mut src = Frame::default();
            src.add_to_extra_frame(src_extra);

            let delta = frame.tun_link_delta();
            let headroom = frame.headroom_base();
            frame.subtract_extra(&src);
            prop_assert_eq!(frame.tun_link_delta(), delta);
            prop_assert_eq!(frame.headroom_base(), headroom);
        }
    }
}
