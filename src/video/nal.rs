//! Annex-B NAL unit inspection
//!
//! Stateless helpers over raw H.264 byte streams: start-code location,
//! NAL type classification, and the config+keyframe bundle split used
//! during sync acquisition. No allocation, bounded scans only.

/// NAL unit types this pipeline acts on (ITU-T H.264 Table 7-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalType {
    /// Coded slice of a non-IDR picture (delta frame)
    NonIdrSlice,
    /// Coded slice of an IDR picture (keyframe)
    IdrSlice,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Any other type; the raw 5-bit value is preserved
    Other(u8),
}

impl NalType {
    /// Map the low 5 bits of a NAL header byte
    pub fn from_header_byte(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NalType::NonIdrSlice,
            5 => NalType::IdrSlice,
            7 => NalType::Sps,
            8 => NalType::Pps,
            other => NalType::Other(other),
        }
    }

    /// Whether this NAL carries decoder configuration data
    pub fn is_config(&self) -> bool {
        matches!(self, NalType::Sps | NalType::Pps)
    }

    /// Whether this NAL can start a decode after a discontinuity
    pub fn is_sync_point(&self) -> bool {
        matches!(self, NalType::IdrSlice | NalType::Sps)
    }
}

impl std::fmt::Display for NalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NalType::NonIdrSlice => write!(f, "P"),
            NalType::IdrSlice => write!(f, "IDR"),
            NalType::Sps => write!(f, "SPS"),
            NalType::Pps => write!(f, "PPS"),
            NalType::Other(t) => write!(f, "NAL({})", t),
        }
    }
}

/// Locate the next Annex-B start code at or after `from`, scanning at
/// most `limit` bytes of `buf`. Returns (start-code offset, length).
///
/// Both the 3-byte (`00 00 01`) and 4-byte (`00 00 00 01`) forms are
/// recognized; the 4-byte form wins when both match at an offset.
pub fn find_start_code(buf: &[u8], from: usize, limit: usize) -> Option<(usize, usize)> {
    let end = buf.len().min(limit);
    if from >= end {
        return None;
    }
    let mut i = from;
    // A 3-byte start code is the minimum; stop where one can no longer fit.
    while i + 3 <= end {
        if buf[i] == 0 && buf[i + 1] == 0 {
            if buf[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= end && buf[i + 2] == 0 && buf[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Classify the first NAL unit in `buf`, scanning at most `scan_window`
/// bytes for its start code. Returns `None` when no complete start code
/// plus header byte is found in the window.
pub fn classify(buf: &[u8], scan_window: usize) -> Option<NalType> {
    let (offset, sc_len) = find_start_code(buf, 0, scan_window)?;
    let header = offset + sc_len;
    if header >= buf.len() {
        return None;
    }
    Some(NalType::from_header_byte(buf[header]))
}

/// Find the byte offset of the first NAL of `target` type within the
/// first `scan_window` bytes of `buf`. The offset points at the start
/// code, so the slice `buf[offset..]` is a valid Annex-B stream.
pub fn find(buf: &[u8], target: NalType, scan_window: usize) -> Option<usize> {
    let mut from = 0;
    while let Some((offset, sc_len)) = find_start_code(buf, from, scan_window) {
        let header = offset + sc_len;
        if header >= buf.len() {
            return None;
        }
        if NalType::from_header_byte(buf[header]) == target {
            return Some(offset);
        }
        from = header;
    }
    None
}

/// Split point for a config+keyframe bundle.
///
/// When a buffer leads with an SPS, the adapter may have concatenated
/// SPS+PPS+IDR into one delivery. Returns the IDR start-code offset if
/// one exists within `bundle_scan_window`, so the caller can submit
/// `buf[..offset]` as configuration data and `buf[offset..]` as a frame.
/// The window is a tunable heuristic, not protocol truth.
pub fn bundle_split_point(buf: &[u8], bundle_scan_window: usize) -> Option<usize> {
    match classify(buf, bundle_scan_window)? {
        NalType::Sps => {
            let offset = find(buf, NalType::IdrSlice, bundle_scan_window)?;
            // A zero offset would mean the buffer leads with the IDR,
            // contradicting the SPS classification above.
            (offset > 0).then_some(offset)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: usize = 64;

    fn annexb(nal_header: u8, payload_len: usize) -> Vec<u8> {
        let mut buf = vec![0, 0, 0, 1, nal_header];
        buf.extend(std::iter::repeat(0xAA).take(payload_len));
        buf
    }

    #[test]
    fn test_classify_idr() {
        assert_eq!(classify(&annexb(0x65, 16), SCAN), Some(NalType::IdrSlice));
    }

    #[test]
    fn test_classify_sps_pps_delta() {
        assert_eq!(classify(&annexb(0x67, 8), SCAN), Some(NalType::Sps));
        assert_eq!(classify(&annexb(0x68, 4), SCAN), Some(NalType::Pps));
        assert_eq!(classify(&annexb(0x41, 32), SCAN), Some(NalType::NonIdrSlice));
    }

    #[test]
    fn test_classify_three_byte_start_code() {
        let buf = [0u8, 0, 1, 0x65, 0xAA];
        assert_eq!(classify(&buf, SCAN), Some(NalType::IdrSlice));
    }

    #[test]
    fn test_classify_masks_low_five_bits() {
        // nal_ref_idc bits must not change the type
        for header in [0x05u8, 0x25, 0x45, 0x65] {
            assert_eq!(classify(&annexb(header, 1), SCAN), Some(NalType::IdrSlice));
        }
    }

    #[test]
    fn test_short_buffers_return_none() {
        // Anything shorter than start code + header classifies as None,
        // never panics or reads out of bounds.
        for len in 0..4 {
            let buf = vec![0u8; len];
            assert_eq!(classify(&buf, SCAN), None);
        }
        // Start code present but header byte missing
        assert_eq!(classify(&[0, 0, 0, 1], SCAN), None);
        assert_eq!(classify(&[0, 0, 1], SCAN), None);
    }

    #[test]
    fn test_classify_respects_scan_window() {
        let mut buf = vec![0xFFu8; 32];
        buf.extend_from_slice(&[0, 0, 0, 1, 0x65]);
        assert_eq!(classify(&buf, 8), None);
        assert_eq!(classify(&buf, 64), Some(NalType::IdrSlice));
    }

    #[test]
    fn test_find_skips_leading_nals() {
        let mut buf = annexb(0x67, 8);
        buf.extend(annexb(0x68, 4));
        buf.extend(annexb(0x65, 32));
        let offset = find(&buf, NalType::IdrSlice, 512).unwrap();
        assert_eq!(&buf[offset..offset + 5], &[0, 0, 0, 1, 0x65]);
    }

    #[test]
    fn test_find_missing_type() {
        let buf = annexb(0x67, 8);
        assert_eq!(find(&buf, NalType::IdrSlice, 512), None);
    }

    #[test]
    fn test_bundle_split() {
        let mut buf = annexb(0x67, 10);
        buf.extend(annexb(0x68, 4));
        let config_len = buf.len();
        buf.extend(annexb(0x65, 100));

        let split = bundle_split_point(&buf, 512).unwrap();
        assert_eq!(split, config_len);
        assert_eq!(classify(&buf[..split], SCAN), Some(NalType::Sps));
        assert_eq!(classify(&buf[split..], SCAN), Some(NalType::IdrSlice));
    }

    #[test]
    fn test_bundle_split_requires_leading_sps() {
        let mut buf = annexb(0x65, 20);
        buf.extend(annexb(0x67, 10));
        assert_eq!(bundle_split_point(&buf, 512), None);
    }

    #[test]
    fn test_bundle_split_sps_without_idr() {
        let mut buf = annexb(0x67, 10);
        buf.extend(annexb(0x68, 4));
        assert_eq!(bundle_split_point(&buf, 512), None);
    }

    #[test]
    fn test_false_start_inside_payload() {
        // Payload bytes that contain 00 00 01 past the window must not
        // affect classification of the leading NAL.
        let mut buf = annexb(0x41, 2);
        buf.extend_from_slice(&[0, 0, 1, 0x65]);
        assert_eq!(classify(&buf, SCAN), Some(NalType::NonIdrSlice));
    }
}
