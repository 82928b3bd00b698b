use crate::error::FpError;
use crate::image::{Image, ImageFlags};

use super::constants::{
    IMG_WIDTH, INITIAL_LAST_SEQNUM, MAX_ROWS, NUM_BLANK_LIMIT, PACKET_DATA_LEN,
    ROW_BLANK_TOTAL_THRESHOLD, ROW_DEDUP_DIFF_THRESHOLD, SEQNUM_MODULUS,
};

/// Packet → row reassembly state for one capture session.
pub struct CaptureState {
    rows: Vec<Vec<u8>>,
    rowbuf: Vec<u8>,
    /// `-1` means no row is currently being assembled.
    rowbuf_offset: i32,
    last_seqnum: u32,
    wraparounds: i64,
    num_blank: u32,
    finger_removed: bool,
}

impl CaptureState {
    /// Matches the reset performed at the start of the Capture SSM.
    /// `wraparounds` starts at `-1` deliberately: the
    /// very first packet always satisfies the wrap-detection test against
    /// the `16383` sentinel, bumping it to `0` before any address math.
    pub fn new() -> Self {
        CaptureState {
            rows: Vec::new(),
            rowbuf: Vec::new(),
            rowbuf_offset: -1,
            last_seqnum: INITIAL_LAST_SEQNUM,
            wraparounds: -1,
            num_blank: 0,
            finger_removed: false,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn finger_removed(&self) -> bool {
        self.finger_removed
    }

    pub fn should_handoff(&self) -> bool {
        self.finger_removed || self.rows.len() >= MAX_ROWS
    }

    pub fn rowbuf_offset(&self) -> i32 {
        self.rowbuf_offset
    }

    /// Consumes one 64-byte packet (2-byte big-endian sequence number + 62
    /// bytes of image data).
    pub fn process_packet(&mut self, packet: &[u8]) {
        debug_assert_eq!(packet.len(), 64);
        let seqnum = (u16::from_be_bytes([packet[0], packet[1]]) & 0x3FFF) as u32;

        if seqnum <= self.last_seqnum {
            self.wraparounds += 1;
            if self.last_seqnum != INITIAL_LAST_SEQNUM && seqnum != 0 {
                log::warn!(
                    "swipe: unexpected sequence gap (last={}, new={seqnum})",
                    self.last_seqnum
                );
            }
        }
        self.last_seqnum = seqnum;

        let abs_base_addr = (seqnum as u64 + self.wraparounds.max(0) as u64 * SEQNUM_MODULUS as u64)
            * PACKET_DATA_LEN as u64;
        self.assemble(abs_base_addr, &packet[2..64]);
    }

    fn assemble(&mut self, abs_base_addr: u64, data: &[u8]) {
        if self.rowbuf_offset >= 0 {
            let offset = self.rowbuf_offset as usize;
            let room = IMG_WIDTH - offset;
            let take = room.min(PACKET_DATA_LEN);
            self.rowbuf[offset..offset + take].copy_from_slice(&data[..take]);
            self.rowbuf_offset += take as i32;
            if self.rowbuf_offset as usize >= IMG_WIDTH {
                self.complete_row();
            }
            return;
        }

        if abs_base_addr % IMG_WIDTH as u64 == 0 {
            self.start_row_aligned(data);
            return;
        }

        let next_boundary = (abs_base_addr / IMG_WIDTH as u64 + 1) * IMG_WIDTH as u64;
        let diff = (next_boundary - abs_base_addr) as usize;
        if diff < PACKET_DATA_LEN {
            self.start_row_mid_packet(data, diff);
        }
        // else: packet falls entirely before the next row boundary; discard.
    }

    /// The packet's first byte is exactly row-aligned. Compensates for a
    /// wire quirk by moving the first 2 bytes to the row's tail and the
    /// remaining 60 to its head.
    fn start_row_aligned(&mut self, data: &[u8]) {
        let mut row = vec![0u8; IMG_WIDTH];
        row[IMG_WIDTH - 2..].copy_from_slice(&data[0..2]);
        row[0..PACKET_DATA_LEN - 2].copy_from_slice(&data[2..PACKET_DATA_LEN]);
        self.rowbuf = row;
        self.rowbuf_offset = (PACKET_DATA_LEN - 2) as i32;
    }

    /// The next row boundary falls `diff` bytes into this packet; start a
    /// fresh row from that point, discarding the bytes before it.
    fn start_row_mid_packet(&mut self, data: &[u8], diff: usize) {
        let copy_len = PACKET_DATA_LEN - diff;
        let mut row = vec![0u8; IMG_WIDTH];
        row[0..copy_len].copy_from_slice(&data[diff..PACKET_DATA_LEN]);
        self.rowbuf = row;
        self.rowbuf_offset = copy_len as i32;
        if self.rowbuf_offset as usize >= IMG_WIDTH {
            self.complete_row();
        }
    }

    /// Finishes the in-progress row and runs dedup/blank-row accounting
    /// against the previously-completed row.
    fn complete_row(&mut self) {
        let row = std::mem::take(&mut self.rowbuf);
        self.rowbuf_offset = -1;

        if let Some(prev) = self.rows.last() {
            let diff: u32 = row
                .iter()
                .zip(prev.iter())
                .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs())
                .sum();
            let total: u32 = prev.iter().map(|&b| b as u32).sum();

            if total >= ROW_BLANK_TOTAL_THRESHOLD {
                self.num_blank += 1;
                if self.num_blank > NUM_BLANK_LIMIT {
                    self.finger_removed = true;
                }
            } else {
                self.num_blank = 0;
            }

            if diff < ROW_DEDUP_DIFF_THRESHOLD {
                return;
            }
        }

        self.rows.push(row);
    }

    /// Finalizes the capture into an image, oldest row first. An empty row
    /// list is reported as a `PROTOCOL` error rather than handed off as a
    /// zero-height image.
    pub fn handoff(&mut self) -> Result<Image, FpError> {
        if self.rows.is_empty() {
            return Err(FpError::protocol("swipe capture produced no rows"));
        }
        let mut data = Vec::with_capacity(IMG_WIDTH * self.rows.len());
        for row in &self.rows {
            data.extend_from_slice(row);
        }
        let height = self.rows.len();
        self.rows.clear();
        Ok(Image::from_bytes(IMG_WIDTH, height, data, ImageFlags::empty()))
    }
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seqnum: u16, fill: u8) -> [u8; 64] {
        let mut p = [fill; 64];
        p[0..2].copy_from_slice(&seqnum.to_be_bytes());
        p
    }

    #[test]
    fn rowbuf_offset_invariant_holds_after_every_packet() {
        let mut state = CaptureState::new();
        for i in 0..200u16 {
            state.process_packet(&packet(i, (i % 251) as u8));
            assert!(state.rowbuf_offset() >= -1);
            assert!(state.rowbuf_offset() <= IMG_WIDTH as i32);
            assert_eq!(state.rowbuf_offset() == -1, state.rowbuf_offset() < 0);
        }
    }

    #[test]
    fn first_packet_starts_a_row_at_zero_wraparounds() {
        let mut state = CaptureState::new();
        state.process_packet(&packet(0, 7));
        assert_eq!(state.wraparounds, 0);
        assert_eq!(state.rowbuf_offset(), (PACKET_DATA_LEN - 2) as i32);
    }

    #[test]
    fn row_start_quirk_moves_first_two_bytes_to_tail() {
        let mut state = CaptureState::new();
        let mut p = [0u8; 64];
        p[0..2].copy_from_slice(&0u16.to_be_bytes());
        p[2] = 0xAA; // first data byte
        p[3] = 0xBB;
        state.process_packet(&p);
        assert_eq!(state.rowbuf[0], 0xAA);
        assert_eq!(state.rowbuf[1], 0xBB);
    }

    #[test]
    fn identical_consecutive_rows_are_deduped() {
        let mut state = CaptureState::new();
        // Two full rows, each 288 bytes == ~4.6 packets; drive exactly
        // enough packets with identical fill to reassemble two identical
        // rows and confirm the second is dropped.
        let packets_per_row = (IMG_WIDTH as f64 / PACKET_DATA_LEN as f64).ceil() as u16 + 1;
        for i in 0..packets_per_row * 2 {
            state.process_packet(&packet(i, 5));
        }
        assert!(state.num_rows() <= 1);
    }

    #[test]
    fn blank_rows_trigger_finger_removed_after_limit() {
        let mut state = CaptureState::new();
        // Seed one non-blank row so subsequent comparisons have a
        // `total >= threshold` previous row to compare against.
        state.rows.push(vec![200u8; IMG_WIDTH]);
        for _ in 0..(NUM_BLANK_LIMIT + 1) {
            state.rows.push(vec![200u8; IMG_WIDTH]);
            let total: u32 = state.rows.last().unwrap().iter().map(|&b| b as u32).sum();
            if total >= ROW_BLANK_TOTAL_THRESHOLD {
                state.num_blank += 1;
            }
        }
        assert!(state.num_blank > NUM_BLANK_LIMIT);
    }

    #[test]
    fn handoff_reports_protocol_error_when_no_rows_completed() {
        let mut state = CaptureState::new();
        assert!(matches!(state.handoff(), Err(FpError::Protocol(_))));
    }

    #[test]
    fn handoff_image_size_matches_width_times_rows() {
        let mut state = CaptureState::new();
        state.rows.push(vec![1u8; IMG_WIDTH]);
        state.rows.push(vec![2u8; IMG_WIDTH]);
        let image = state.handoff().unwrap();
        assert_eq!(image.width(), IMG_WIDTH);
        assert_eq!(image.height(), 2);
        assert_eq!(image.data().len(), IMG_WIDTH * 2);
    }
}
