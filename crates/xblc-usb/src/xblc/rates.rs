//! Sample rates selectable through the vendor SET_SAMPLE_RATE request.

use xblc_audio::PcmFormat;

use crate::error::{Result, XblcError};

pub const SAMPLE_RATES_HZ: [u32; 5] = [8_000, 11_025, 16_000, 22_050, 24_000];

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Capture audio older than this many milliseconds is discarded instead of delivered late.
pub const MAX_CAPTURE_BACKLOG_MS: u32 = 100;

pub fn rate_for_index(index: u8) -> Result<u32> {
    SAMPLE_RATES_HZ
        .get(index as usize)
        .copied()
        .ok_or(XblcError::SampleRateIndexOutOfRange { index })
}

pub fn index_for_rate(rate_hz: u32) -> Option<u8> {
    SAMPLE_RATES_HZ
        .iter()
        .position(|&r| r == rate_hz)
        .map(|i| i as u8)
}

/// Bytes of mono S16 capture audio allowed to queue up at `rate_hz`.
pub const fn max_capture_backlog_bytes(rate_hz: u32) -> usize {
    PcmFormat::mono_s16le(rate_hz).bytes_for_ms(MAX_CAPTURE_BACKLOG_MS)
}
