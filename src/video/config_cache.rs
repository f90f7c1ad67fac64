//! SPS/PPS configuration cache
//!
//! Retains the most recently observed parameter sets so the decoder can
//! be re-primed after a reset or ahead of an IDR on transports that
//! deliver configuration only once per session.

use bytes::Bytes;
use tracing::debug;

use super::nal::NalType;

/// Cache of the last observed SPS and PPS NAL units.
///
/// Mutated only by the feeder thread. Once both parameter sets are
/// present they survive decoder resets and flushes; only an explicit
/// [`ConfigCache::replace`] or [`ConfigCache::clear`] evicts them, so a
/// mid-stream `observe` can never leave the cache half-overwritten.
#[derive(Debug, Default)]
pub struct ConfigCache {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parameter-set NAL. The payload must be a complete
    /// Annex-B unit (start code included). Identical re-observations are
    /// ignored; a changed SPS or PPS overwrites only its own slot.
    /// Non-config NAL types are ignored.
    pub fn observe(&mut self, nal_type: NalType, payload: &[u8]) {
        let slot = match nal_type {
            NalType::Sps => &mut self.sps,
            NalType::Pps => &mut self.pps,
            _ => return,
        };
        match slot {
            Some(existing) if existing.as_ref() == payload => {}
            _ => {
                debug!("Caching {} ({} bytes)", nal_type, payload.len());
                *slot = Some(Bytes::copy_from_slice(payload));
            }
        }
    }

    /// Replace both parameter sets atomically (new stream / resolution
    /// change). This is the only sanctioned way to swap an established
    /// configuration.
    pub fn replace(&mut self, sps: Bytes, pps: Bytes) {
        debug!(
            "Replacing cached config (sps {} bytes, pps {} bytes)",
            sps.len(),
            pps.len()
        );
        self.sps = Some(sps);
        self.pps = Some(pps);
    }

    /// Drop all cached configuration (session-level restart)
    pub fn clear(&mut self) {
        self.sps = None;
        self.pps = None;
    }

    /// Whether both SPS and PPS have been observed
    pub fn has_config(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// Concatenated `sps || pps` payload for a configuration-tagged
    /// decoder submission. `None` until both sets have been observed.
    pub fn build_injection_payload(&self) -> Option<Bytes> {
        let (sps, pps) = (self.sps.as_ref()?, self.pps.as_ref()?);
        let mut payload = Vec::with_capacity(sps.len() + pps.len());
        payload.extend_from_slice(sps);
        payload.extend_from_slice(pps);
        Some(Bytes::from(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80];

    #[test]
    fn test_empty_cache() {
        let cache = ConfigCache::new();
        assert!(!cache.has_config());
        assert!(cache.build_injection_payload().is_none());
    }

    #[test]
    fn test_partial_config_is_not_ready() {
        let mut cache = ConfigCache::new();
        cache.observe(NalType::Sps, SPS);
        assert!(!cache.has_config());
        assert!(cache.build_injection_payload().is_none());
    }

    #[test]
    fn test_injection_payload_concatenates() {
        let mut cache = ConfigCache::new();
        cache.observe(NalType::Sps, SPS);
        cache.observe(NalType::Pps, PPS);
        assert!(cache.has_config());

        let payload = cache.build_injection_payload().unwrap();
        let mut expected = SPS.to_vec();
        expected.extend_from_slice(PPS);
        assert_eq!(payload.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_identical_observe_is_idempotent() {
        let mut cache = ConfigCache::new();
        cache.observe(NalType::Sps, SPS);
        cache.observe(NalType::Pps, PPS);
        let first = cache.build_injection_payload().unwrap();

        cache.observe(NalType::Sps, SPS);
        cache.observe(NalType::Pps, PPS);
        let second = cache.build_injection_payload().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_changed_sps_overwrites() {
        let mut cache = ConfigCache::new();
        cache.observe(NalType::Sps, SPS);
        let new_sps: &[u8] = &[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x28];
        cache.observe(NalType::Sps, new_sps);
        cache.observe(NalType::Pps, PPS);

        let payload = cache.build_injection_payload().unwrap();
        assert!(payload.starts_with(new_sps));
    }

    #[test]
    fn test_non_config_nals_ignored() {
        let mut cache = ConfigCache::new();
        cache.observe(NalType::IdrSlice, &[0, 0, 0, 1, 0x65, 0xFF]);
        cache.observe(NalType::NonIdrSlice, &[0, 0, 0, 1, 0x41, 0xFF]);
        assert!(!cache.has_config());
    }

    #[test]
    fn test_replace_and_clear() {
        let mut cache = ConfigCache::new();
        cache.observe(NalType::Sps, SPS);
        cache.observe(NalType::Pps, PPS);

        let new_sps = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x64]);
        let new_pps = Bytes::from_static(&[0, 0, 0, 1, 0x68, 0xEF]);
        cache.replace(new_sps.clone(), new_pps.clone());
        let payload = cache.build_injection_payload().unwrap();
        assert!(payload.starts_with(new_sps.as_ref()));

        cache.clear();
        assert!(!cache.has_config());
    }
}
