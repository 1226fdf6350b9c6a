//! Zero-copy packet representation with offset-based segment tracking and
//! in-place buffer promotion.
//!
//! Each decoder's consumed header is recorded as a `(offset, length)` pair
//! against whichever buffer currently backs the packet, rather than a raw
//! pointer: both the raw frame and the owned copy buffer start at offset 0
//! and share a common prefix up to the point of promotion, so recorded
//! offsets stay valid across promotion — only the buffer they're read
//! against changes, with no pointer-fixup walk required.

use crate::buffer::ByteBuffer;
use crate::flow::{Direction, FlowHandle, FlowId, Identity};
use crate::module::{ModuleId, Registry};

/// Capture-time metadata the reader hands in alongside the raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureHeader {
    pub ts_secs: i64,
    pub ts_usecs: i64,
    pub wire_len: u32,
    pub captured_len: u32,
}

/// Which buffer currently backs the packet's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PacketState {
    /// Bytes live in the capture reader's buffer; `Packet` only borrows them.
    Raw,
    /// Header bytes have been copied into an owned buffer; the payload was dropped.
    ShallowCopy,
    /// The owned buffer also holds the payload.
    DeepCopy,
}

/// One decoder's record of the header bytes it consumed.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRecord {
    pub module: ModuleId,
    offset: usize,
    header_length: usize,
    /// Bytes remaining after this segment at the time it was recorded —
    /// i.e. the length of everything from the end of this header to the
    /// end of the packet. Updated in lockstep by `make_copy` (payload
    /// dropped) and `change_payload` (payload replaced) so it always
    /// reflects the current packet, not just the value at entry.
    payload_length_at_entry: usize,
    /// `false` once a later mutation may have invalidated header fields
    /// this segment's module owns; cleared by `fix_header` during serialization.
    pub valid: bool,
}

impl SegmentRecord {
    pub fn header_length(&self) -> usize {
        self.header_length
    }
}

/// A reusable, mutable view over one captured frame as it moves through the pipeline.
pub struct Packet {
    pub capture_header: CaptureHeader,
    pub packet_number: u64,
    state: PacketState,
    /// Zero-copy view into the capture reader's buffer. Valid only while
    /// `state == Raw` and only until the next `initialize` call — the
    /// reader owns this memory, not the packet.
    raw_ptr: *const u8,
    raw_len: usize,
    copy_buf: ByteBuffer,
    segments: Vec<SegmentRecord>,
    payload_offset: usize,
    payload_length: usize,
    pub flow_id: FlowId,
    pub direction: Option<Direction>,
    pub flow_handle: Option<FlowHandle>,
    pub user_id: Option<Identity>,
    pub equipment_id: Option<Identity>,
    scratch_header: CaptureHeader,
}

// `raw_ptr` makes `Packet` neither `Send` nor `Sync`, matching the
// single-threaded pipeline model without extra code.

impl Default for Packet {
    fn default() -> Self {
        Packet {
            capture_header: CaptureHeader::default(),
            packet_number: 0,
            state: PacketState::Raw,
            raw_ptr: std::ptr::null(),
            raw_len: 0,
            copy_buf: ByteBuffer::with_capacity(2048),
            segments: Vec::new(),
            payload_offset: 0,
            payload_length: 0,
            flow_id: FlowId::default(),
            direction: None,
            flow_handle: None,
            user_id: None,
            equipment_id: None,
            scratch_header: CaptureHeader::default(),
        }
    }
}

impl Packet {
    /// Binds the packet to a new raw frame. The caller must guarantee
    /// `data` remains valid for `len` bytes until the next call to
    /// `bind_raw_frame` or `reset` — the capture reader owns this memory,
    /// not the packet.
    ///
    /// # Safety
    /// `data` must be valid for reads of `len` bytes for the entire time
    /// the packet may be in `PacketState::Raw`.
    pub unsafe fn bind_raw_frame(&mut self, data: *const u8, len: usize, header: CaptureHeader) {
        self.raw_ptr = data;
        self.raw_len = len;
        self.capture_header = header;
    }

    fn clear_transient_state(&mut self) {
        self.segments.clear();
        self.flow_id = FlowId::default();
        self.direction = None;
        self.flow_handle = None;
        self.user_id = None;
        self.equipment_id = None;
    }

    /// Binds to the raw frame set by a prior `bind_raw_frame` call.
    /// Resets flow and segment state; the payload cursor covers the
    /// entire captured length; state becomes `Raw`.
    pub fn initialize(&mut self, packet_number: u64) {
        self.clear_transient_state();
        self.packet_number = packet_number;
        self.state = PacketState::Raw;
        self.copy_buf.clear();
        self.payload_offset = 0;
        self.payload_length = self.raw_len;
    }

    /// Releases the packet back to its pool. Drops the (possibly
    /// dangling after release) raw-frame pointer so a stale `Packet`
    /// never exposes memory it no longer has a claim to.
    pub fn reset(&mut self) {
        self.clear_transient_state();
        self.raw_ptr = std::ptr::null();
        self.raw_len = 0;
        self.copy_buf.clear();
        self.payload_offset = 0;
        self.payload_length = 0;
        self.state = PacketState::Raw;
    }

    pub fn state(&self) -> PacketState {
        self.state
    }

    fn active_len(&self) -> usize {
        match self.state {
            PacketState::Raw => self.raw_len,
            PacketState::ShallowCopy | PacketState::DeepCopy => self.copy_buf.len(),
        }
    }

    fn active_bytes(&self) -> &[u8] {
        match self.state {
            PacketState::Raw => {
                if self.raw_ptr.is_null() {
                    &[]
                } else {
                    // Safety: `bind_raw_frame`'s caller contract guarantees
                    // `raw_ptr`/`raw_len` are valid while `state == Raw`.
                    unsafe { std::slice::from_raw_parts(self.raw_ptr, self.raw_len) }
                }
            }
            PacketState::ShallowCopy | PacketState::DeepCopy => self.copy_buf.as_slice(),
        }
    }

    /// Records a segment at the current payload cursor, then advances
    /// the cursor past it. Fails if `header_length` exceeds the
    /// remaining payload.
    pub fn save_segment(&mut self, module: ModuleId, header_length: usize) -> bool {
        if header_length > self.payload_length {
            return false;
        }
        let offset = self.payload_offset;
        self.payload_offset += header_length;
        self.payload_length -= header_length;
        self.segments.push(SegmentRecord {
            module,
            offset,
            header_length,
            payload_length_at_entry: self.payload_length,
            valid: true,
        });
        true
    }

    pub fn get_segment(&self, module: ModuleId) -> Option<(&[u8], usize)> {
        let seg = self.segments.iter().find(|s| s.module == module)?;
        let bytes = self.active_bytes();
        Some((
            &bytes[seg.offset..seg.offset + seg.header_length],
            seg.header_length,
        ))
    }

    pub fn segment_header_length(&self, module: ModuleId) -> Option<usize> {
        self.segments
            .iter()
            .find(|s| s.module == module)
            .map(|s| s.header_length)
    }

    pub fn segment_payload_length_at_entry(&self, module: ModuleId) -> Option<usize> {
        self.segments
            .iter()
            .find(|s| s.module == module)
            .map(|s| s.payload_length_at_entry)
    }

    /// A mutable view of the header bytes `module` owns, for `fix_header`
    /// implementations. Only available once the packet has been promoted
    /// off the (read-only, reader-owned) raw buffer.
    pub fn segment_bytes_mut(&mut self, module: ModuleId) -> Option<&mut [u8]> {
        let seg = *self.segments.iter().find(|s| s.module == module)?;
        match self.state {
            PacketState::Raw => None,
            PacketState::ShallowCopy | PacketState::DeepCopy => {
                let buf = self.copy_buf.as_mut_slice();
                Some(&mut buf[seg.offset..seg.offset + seg.header_length])
            }
        }
    }

    pub fn get_payload(&self) -> &[u8] {
        let bytes = self.active_bytes();
        &bytes[self.payload_offset..self.payload_offset + self.payload_length]
    }

    pub fn payload_len(&self) -> usize {
        self.payload_length
    }

    /// Promotes the packet off the raw buffer into an owned copy.
    /// Idempotent: already-promoted packets return `true` immediately.
    pub fn make_copy(&mut self, copy_payload: bool) -> bool {
        match self.state {
            PacketState::ShallowCopy | PacketState::DeepCopy => return true,
            PacketState::Raw => {}
        }

        let keep_len = if copy_payload {
            self.active_len()
        } else {
            self.payload_offset
        };
        let src = self.active_bytes()[..keep_len].to_vec();
        if !self.copy_buf.copy(&src) {
            return false;
        }

        if copy_payload {
            self.state = PacketState::DeepCopy;
        } else {
            self.state = PacketState::ShallowCopy;
            let dropped = self.payload_length as u32;
            for seg in &mut self.segments {
                seg.payload_length_at_entry = seg.payload_length_at_entry.saturating_sub(dropped as usize);
            }
            self.capture_header.captured_len = self.capture_header.captured_len.saturating_sub(dropped);
            self.payload_length = 0;
        }
        true
    }

    /// Drops the current payload (if any), then appends `payload` after
    /// the last recorded segment. Marks every segment invalid, since
    /// each one's header may reference a total length that just changed.
    pub fn change_payload(&mut self, payload: &[u8]) -> bool {
        if !self.make_copy(false) {
            return false;
        }
        let offset = self.payload_offset;
        if !self.copy_buf.copy_at(offset, payload) {
            // `make_copy` already completed; the packet is left as a
            // valid (if payload-less) copy rather than half-mutated.
            return false;
        }
        self.payload_length = payload.len();
        let added = payload.len() as u32;
        self.capture_header.captured_len += added;
        self.capture_header.wire_len += added;
        for seg in &mut self.segments {
            seg.valid = false;
            seg.payload_length_at_entry += payload.len();
        }
        true
    }

    /// Serializes a view of the packet. If `fix_headers`, walks segments
    /// top-down, calling each invalid one's module's `fix_header` until
    /// `base_module` is reached (or the end, if `None`). `snap_length ==
    /// 0` means unlimited.
    pub fn to_byte_array(
        &mut self,
        registry: &Registry,
        base_module: Option<ModuleId>,
        snap_length: usize,
        fix_headers: bool,
    ) -> (CaptureHeader, &[u8]) {
        if fix_headers {
            for i in 0..self.segments.len() {
                let module_id = self.segments[i].module;
                if !self.segments[i].valid {
                    registry.fix_header(module_id, self);
                    if let Some(seg) = self.segments.get_mut(i) {
                        seg.valid = true;
                    }
                }
                if Some(module_id) == base_module {
                    break;
                }
            }
        }

        let total_len = self.active_len();
        let (start, span) = match base_module.and_then(|m| self.segments.iter().find(|s| s.module == m)) {
            Some(seg) => (seg.offset, total_len - seg.offset),
            None => (0, total_len),
        };
        let len = if snap_length == 0 { span } else { span.min(snap_length) };

        let mut header = self.capture_header;
        header.captured_len = len as u32;
        if start > 0 {
            header.wire_len = header.wire_len.saturating_sub(start as u32);
        }
        self.scratch_header = header;

        let bytes = self.active_bytes();
        (self.scratch_header, &bytes[start..start + len])
    }

    /// Diagnostic text dump: each recorded segment's owning module's own
    /// `describe`, in segment order.
    pub fn describe(&self, registry: &Registry) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if let Some(text) = registry.describe(seg.module, self) {
                out.push_str(&text);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_packet(bytes: &[u8]) -> Packet {
        let mut packet = Packet::default();
        unsafe {
            packet.bind_raw_frame(
                bytes.as_ptr(),
                bytes.len(),
                CaptureHeader {
                    ts_secs: 0,
                    ts_usecs: 0,
                    wire_len: bytes.len() as u32,
                    captured_len: bytes.len() as u32,
                },
            );
        }
        packet.initialize(1);
        packet
    }

    fn id(n: u32) -> ModuleId {
        crate::module::test_support::module_id(n)
    }

    #[test]
    fn save_segment_advances_cursor_and_rejects_overlong_header() {
        let data = [0u8; 34];
        let mut packet = raw_packet(&data);
        assert!(packet.save_segment(id(0), 14));
        assert_eq!(packet.payload_len(), 20);
        assert!(!packet.save_segment(id(1), 1000));
    }

    #[test]
    fn make_copy_is_idempotent_and_preserves_offsets() {
        let data: Vec<u8> = (0..40u8).collect();
        let mut packet = raw_packet(&data);
        packet.save_segment(id(0), 14);
        packet.save_segment(id(1), 20);
        assert!(packet.make_copy(true));
        assert!(packet.make_copy(true));
        assert_eq!(packet.state(), PacketState::DeepCopy);
        let (header, bytes) = packet.get_segment(id(1)).unwrap();
        assert_eq!(header.len(), 20);
        assert_eq!(bytes, 20);
        assert_eq!(packet.get_payload(), &data[34..]);
    }

    #[test]
    fn make_copy_without_payload_zeroes_payload_and_shrinks_captured_len() {
        let data: Vec<u8> = (0..40u8).collect();
        let mut packet = raw_packet(&data);
        packet.save_segment(id(0), 14);
        packet.save_segment(id(1), 20);
        assert!(packet.make_copy(false));
        assert_eq!(packet.payload_len(), 0);
        assert_eq!(packet.capture_header.captured_len, 34);
        assert!(packet.get_payload().is_empty());
    }

    #[test]
    fn change_payload_marks_segments_invalid_and_extends_length() {
        let data: Vec<u8> = (0..42u8).collect(); // 14 + 20 + 8 header bytes
        let mut packet = raw_packet(&data);
        packet.save_segment(id(0), 14);
        packet.save_segment(id(1), 20);
        packet.save_segment(id(2), 8);
        assert!(packet.change_payload(b"XYZ"));
        assert_eq!(packet.capture_header.captured_len, 45);
        assert_eq!(packet.capture_header.wire_len, 45);
        assert_eq!(packet.get_payload(), b"XYZ");
    }

    #[test]
    fn change_payload_fails_cleanly_over_capacity() {
        let data = [0u8; 10];
        let mut packet = raw_packet(&data);
        packet.copy_buf = ByteBuffer::with_capacity_and_cap(0, 12);
        packet.save_segment(id(0), 10);
        assert!(!packet.change_payload(b"too much data"));
    }

    /// Marks its own header byte 0 whenever `fix_header` runs, so tests can
    /// tell whether a given segment's `fix_header` was actually invoked.
    struct MarkerModule {
        id: ModuleId,
    }

    impl crate::module::Module for MarkerModule {
        fn name(&self) -> &str {
            "marker"
        }
        fn set_id(&mut self, id: ModuleId) {
            self.id = id;
        }
        fn init(&mut self, _config: &crate::config::Config, _registry: &Registry) -> Result<(), crate::error::ConfigError> {
            Ok(())
        }
        fn process(&mut self, _packet: &mut Packet) -> Option<ModuleId> {
            None
        }
        fn fix_header(&self, packet: &mut Packet) {
            if let Some(bytes) = packet.segment_bytes_mut(self.id) {
                bytes[0] = 0xAA;
            }
        }
        fn describe(&self, _packet: &Packet) -> String {
            String::new()
        }
        fn get_status(&mut self, _elapsed_secs: u64, _period_secs: u64) -> String {
            String::new()
        }
        fn datalink_type(&self) -> u32 {
            0
        }
    }

    #[test]
    fn to_byte_array_fixes_base_module_segment_too() {
        let mut registry = Registry::new();
        let marker_id = registry.register(Box::new(MarkerModule { id: ModuleId::default() }));
        registry.init_all(&crate::config::Config::default()).unwrap();

        let data = vec![0u8; 20];
        let mut packet = raw_packet(&data);
        packet.save_segment(marker_id, 20);
        // `change_payload` marks every segment invalid, including the one
        // that will be passed as `base_module` below.
        assert!(packet.change_payload(b"hi"));

        let (_, bytes) = packet.to_byte_array(&registry, Some(marker_id), 0, true);
        assert_eq!(bytes[0], 0xAA, "base_module's own header must be fixed, not skipped");
    }
}
