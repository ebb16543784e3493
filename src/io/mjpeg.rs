//! MJPEG stream framing
//!
//! Cameras serve `multipart/x-mixed-replace` streams where each part is a
//! JPEG. Rather than parsing part headers, frames are cut on the JPEG
//! markers themselves:
//! - SOI: 0xFF 0xD8
//! - EOI: 0xFF 0xD9
//! - SOS: 0xFF 0xDA
//!
//! After SOI the header segments are skipped by their 2-byte length up to
//! SOS, so an EXIF thumbnail (a complete JPEG inside APP1) stays part of its
//! frame. From SOS on the entropy-coded data cannot contain a bare marker
//! other than RSTn, so the decoder scans for EOI. A header that does not
//! look like a marker segment falls back to the same scan.
//!
//! Bytes arrive in arbitrary chunks, so the decoder keeps a persistent buffer
//! and resumes where the previous chunk ended. A new SOI at a segment
//! boundary or in scan data means the previous frame was truncated;
//! decoding restarts at the new SOI.

use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use tracing::{debug, warn};

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Discarding bytes until a start-of-image marker
    SeekStart,
    /// Walking length-prefixed header segments up to start-of-scan
    Headers,
    /// In scan data, looking for end-of-image
    SeekEnd,
}

/// Frames completed by one `push`; typically zero or one
pub type DecodedFrames = SmallVec<[Bytes; 2]>;

#[derive(Debug)]
pub struct MjpegDecoder {
    buf: BytesMut,
    state: State,
    /// Offset in `buf` where the next marker search resumes
    scan_from: usize,
    max_frame_bytes: usize,
    truncated: u64,
    oversized: u64,
}

impl MjpegDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(64 * 1024),
            state: State::SeekStart,
            scan_from: 0,
            max_frame_bytes: max_frame_bytes.max(4),
            truncated: 0,
            oversized: 0,
        }
    }

    /// Feed a chunk from the stream and collect any completed frames
    pub fn push(&mut self, chunk: &[u8]) -> DecodedFrames {
        self.buf.extend_from_slice(chunk);
        let mut frames = DecodedFrames::new();

        loop {
            match self.state {
                State::SeekStart => match find_marker(&self.buf, 0, |b| b == SOI) {
                    Some((pos, _)) => {
                        if pos > 0 {
                            debug!(discarded = pos, "mjpeg_skipped_bytes");
                            let _ = self.buf.split_to(pos);
                        }
                        self.state = State::Headers;
                        self.scan_from = 2;
                    }
                    None => {
                        // Keep a trailing 0xFF, it may start a marker split across chunks
                        let keep = usize::from(self.buf.last() == Some(&MARKER));
                        let drop = self.buf.len() - keep;
                        let _ = self.buf.split_to(drop);
                        break;
                    }
                },
                State::Headers => {
                    let p = self.scan_from;
                    if p >= self.buf.len() {
                        if !self.wait_for_more() {
                            continue;
                        }
                        break;
                    }
                    if self.buf[p] != MARKER {
                        self.state = State::SeekEnd;
                        continue;
                    }
                    let Some(&marker) = self.buf.get(p + 1) else {
                        if !self.wait_for_more() {
                            continue;
                        }
                        break;
                    };
                    match marker {
                        // Fill byte before the marker code
                        MARKER => self.scan_from = p + 1,
                        SOI => self.restart_at(p),
                        EOI => self.finish_frame(p + 2, &mut frames),
                        TEM | RST0..=RST7 => self.scan_from = p + 2,
                        _ => {
                            if self.buf.len() < p + 4 {
                                if !self.wait_for_more() {
                                    continue;
                                }
                                break;
                            }
                            let len = usize::from(u16::from_be_bytes([
                                self.buf[p + 2],
                                self.buf[p + 3],
                            ]));
                            if len < 2 {
                                self.state = State::SeekEnd;
                                continue;
                            }
                            self.scan_from = p + 2 + len;
                            if marker == SOS {
                                self.state = State::SeekEnd;
                            }
                        }
                    }
                }
                State::SeekEnd => {
                    match find_marker(&self.buf, self.scan_from, |b| b == EOI || b == SOI) {
                        Some((pos, EOI)) => self.finish_frame(pos + 2, &mut frames),
                        Some((pos, _)) => self.restart_at(pos),
                        None => {
                            if self.wait_for_more() {
                                // Re-check the last byte next time in case it is a split marker
                                self.scan_from =
                                    self.scan_from.max(self.buf.len().saturating_sub(1)).max(2);
                            }
                            break;
                        }
                    }
                }
            }
        }

        frames
    }

    /// Cut a complete frame ending at `end` and go back to seeking SOI
    fn finish_frame(&mut self, end: usize, frames: &mut DecodedFrames) {
        let frame = self.buf.split_to(end).freeze();
        self.state = State::SeekStart;
        self.scan_from = 0;
        if frame.len() > self.max_frame_bytes {
            self.oversized += 1;
            warn!(bytes = frame.len(), "mjpeg_frame_too_large");
        } else {
            frames.push(frame);
        }
    }

    /// A new SOI at `pos` cuts the frame in progress
    fn restart_at(&mut self, pos: usize) {
        self.truncated += 1;
        debug!(discarded = pos, "mjpeg_truncated_frame");
        let _ = self.buf.split_to(pos);
        self.state = State::Headers;
        self.scan_from = 2;
    }

    /// Returns false when the partial frame outgrew the limit and was dropped
    fn wait_for_more(&mut self) -> bool {
        if self.buf.len() > self.max_frame_bytes {
            self.oversized += 1;
            warn!(bytes = self.buf.len(), "mjpeg_frame_too_large");
            self.buf.clear();
            self.state = State::SeekStart;
            self.scan_from = 0;
            return false;
        }
        true
    }

    /// Drop any partial frame, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::SeekStart;
        self.scan_from = 0;
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn truncated_frames(&self) -> u64 {
        self.truncated
    }

    pub fn oversized_frames(&self) -> u64 {
        self.oversized
    }
}

/// Find the next `0xFF, x` pair at or after `from` where `want(x)` holds
fn find_marker(buf: &[u8], from: usize, want: impl Fn(u8) -> bool) -> Option<(usize, u8)> {
    if buf.len() < 2 || from >= buf.len() - 1 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w[0] == MARKER && want(w[1]))
        .map(|i| (from + i, buf[from + i + 1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8];
        v.extend_from_slice(body);
        v.extend_from_slice(&[0xFF, 0xD9]);
        v
    }

    fn part(frame: &[u8]) -> Vec<u8> {
        let mut v = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        v.extend_from_slice(frame);
        v.extend_from_slice(b"\r\n");
        v
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = MjpegDecoder::new(1024);
        let frame = jpeg(b"abc");
        let frames = decoder.push(&part(&frame));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), frame.as_slice());
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut decoder = MjpegDecoder::new(1024);
        let a = jpeg(b"first");
        let b = jpeg(b"second");
        let mut stream = part(&a);
        stream.extend(part(&b));

        let frames = decoder.push(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), a.as_slice());
        assert_eq!(frames[1].as_ref(), b.as_slice());
    }

    #[test]
    fn test_frame_split_at_every_offset() {
        let frame = jpeg(&[0x01, 0xFF, 0x00, 0x02]);
        let stream = part(&frame);

        for split in 1..stream.len() {
            let mut decoder = MjpegDecoder::new(1024);
            let mut frames = decoder.push(&stream[..split]);
            frames.extend(decoder.push(&stream[split..]));
            assert_eq!(frames.len(), 1, "split at {split}");
            assert_eq!(frames[0].as_ref(), frame.as_slice());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = MjpegDecoder::new(1024);
        let a = jpeg(b"one");
        let b = jpeg(b"two");
        let mut stream = part(&a);
        stream.extend(part(&b));

        let frames: Vec<Bytes> = stream.iter().flat_map(|byte| decoder.push(&[*byte])).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_ref(), b.as_slice());
    }

    #[test]
    fn test_truncated_frame_followed_by_complete_frame() {
        let mut decoder = MjpegDecoder::new(1024);
        let complete = jpeg(b"whole");

        let mut stream = part(&[0xFF, 0xD8, 0x10, 0x20]);
        stream.extend(part(&complete));

        let frames = decoder.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), complete.as_slice());
        assert_eq!(decoder.truncated_frames(), 1);
    }

    fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![0xFF, marker];
        v.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    /// SOI, APP1 carrying an EXIF thumbnail, DQT, SOS, scan data, EOI
    fn jpeg_with_thumbnail() -> Vec<u8> {
        let mut exif = b"Exif\0\0".to_vec();
        exif.extend_from_slice(&jpeg(&[0x07, 0xFF, 0x00, 0x08]));
        exif.extend_from_slice(b"tail");

        let mut v = vec![0xFF, 0xD8];
        v.extend(segment(0xE1, &exif));
        v.extend(segment(0xDB, &[0x00; 5]));
        v.extend(segment(0xDA, &[0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]));
        v.extend_from_slice(&[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56]);
        v.extend_from_slice(&[0xFF, 0xD9]);
        v
    }

    #[test]
    fn test_exif_thumbnail_stays_inside_frame() {
        let frame = jpeg_with_thumbnail();
        let next = jpeg(b"next");
        let mut stream = part(&frame);
        stream.extend(part(&next));

        let mut decoder = MjpegDecoder::new(1024);
        let frames = decoder.push(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), frame.as_slice());
        assert_eq!(frames[1].as_ref(), next.as_slice());
        assert_eq!(decoder.truncated_frames(), 0);

        let mut decoder = MjpegDecoder::new(1024);
        let frames: Vec<Bytes> = stream.iter().flat_map(|byte| decoder.push(&[*byte])).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), frame.as_slice());
        assert_eq!(decoder.truncated_frames(), 0);
    }

    #[test]
    fn test_truncated_in_headers_restarts_at_new_frame() {
        let mut decoder = MjpegDecoder::new(1024);
        let complete = jpeg_with_thumbnail();

        let mut stream = vec![0xFF, 0xD8];
        stream.extend(segment(0xE0, b"JFIF\0"));
        stream.extend_from_slice(&complete);

        let frames = decoder.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), complete.as_slice());
        assert_eq!(decoder.truncated_frames(), 1);
    }

    #[test]
    fn test_oversized_frame_dropped() {
        let mut decoder = MjpegDecoder::new(16);
        let big = jpeg(&[0x11; 64]);
        let small = jpeg(b"ok");

        assert!(decoder.push(&big).is_empty());
        assert_eq!(decoder.oversized_frames(), 1);
        let frames = decoder.push(&small);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_unterminated_frame_buffer_is_bounded() {
        let mut decoder = MjpegDecoder::new(32);
        decoder.push(&[0xFF, 0xD8]);
        for _ in 0..10 {
            decoder.push(&[0x22; 16]);
            assert!(decoder.buffered() <= 32 + 16);
        }
        assert!(decoder.oversized_frames() >= 1);
    }

    #[test]
    fn test_garbage_without_markers_is_discarded() {
        let mut decoder = MjpegDecoder::new(1024);
        assert!(decoder.push(&[0x00; 500]).is_empty());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut decoder = MjpegDecoder::new(1024);
        decoder.push(&[0xFF, 0xD8, 0x01, 0x02]);
        decoder.reset();
        assert!(decoder.push(&[0x03, 0xFF, 0xD9]).is_empty());
    }
}
