use core::ptr;

use ebpfw_common::PacketView;

/// Packet bytes between `data` and `data_end` of an XDP or tc context.
///
/// Every read is checked against `data_end` right before the load, which is
/// the form the verifier accepts.
pub struct RawFrame {
    start: usize,
    end: usize,
}

impl RawFrame {
    #[inline(always)]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl PacketView for RawFrame {
    #[inline(always)]
    fn end(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline(always)]
    fn bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let at = self.start.checked_add(offset)?;
        if at + N > self.end {
            return None;
        }
        // SAFETY: [at, at + N) lies inside the packet, checked above
        Some(unsafe { ptr::read_unaligned(at as *const [u8; N]) })
    }
}
