//! QR-payload install flow: decoded payload text to a URL work list.
//!
//! A scanned code carries a newline-separated list of install URLs. The
//! payload is bounded, not validated: at most [`URLS_MAX`] URLs of at
//! most [`URL_MAX`] bytes each, with anything beyond the bounds truncated
//! rather than rejected. A trailing remainder without a terminating
//! newline still counts as a URL.
//!
//! The camera side shares a frame buffer between the capture producer
//! and the decoding consumer; [`SharedFrame`] holds its lock only for
//! the duration of the copy-out, never across a decode, so the producer
//! is never blocked on decoding work.

use std::sync::{Arc, Mutex};

use tracing::debug;

use super::net::UrlInstallBackend;
use super::service::InstallService;

/// Maximum length of a single payload URL in bytes; longer URLs are cut
/// at this bound.
pub const URL_MAX: usize = 1024;

/// Maximum number of URLs taken from one payload; the rest are dropped.
pub const URLS_MAX: usize = 128;

/// Splits a decoded payload into its URL list, applying the truncation
/// bounds.
///
/// Blank lines are skipped; they carry no URL and would otherwise burn a
/// work item on a guaranteed failure.
#[must_use]
pub fn parse_payload(payload: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for line in payload.split('\n') {
        if urls.len() == URLS_MAX {
            debug!(limit = URLS_MAX, "payload URL count truncated");
            break;
        }
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        urls.push(truncate_url(line));
    }
    urls
}

/// Cuts a URL at [`URL_MAX`] bytes, backing off to a character boundary.
fn truncate_url(url: &str) -> String {
    if url.len() <= URL_MAX {
        return url.to_string();
    }
    let mut end = URL_MAX;
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    url[..end].to_string()
}

/// A URL work list lifted out of a scanned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrInstallPlan {
    urls: Vec<String>,
}

impl QrInstallPlan {
    /// Builds a plan from decoded payload text. Returns `None` when the
    /// payload yields no URLs at all.
    #[must_use]
    pub fn from_payload(payload: &str) -> Option<Self> {
        let urls = parse_payload(payload);
        if urls.is_empty() {
            None
        } else {
            Some(Self { urls })
        }
    }

    /// The parsed URL list.
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Delegates the plan to the network install backend.
    #[must_use]
    pub fn into_backend(self, service: Arc<dyn InstallService>) -> UrlInstallBackend {
        UrlInstallBackend::new(self.urls, service)
    }
}

/// RGB565 frame buffer shared between a capture producer and a decoding
/// consumer.
#[derive(Debug)]
pub struct SharedFrame {
    width: usize,
    height: usize,
    pixels: Mutex<Box<[u16]>>,
}

impl SharedFrame {
    /// Allocates a zeroed frame of `width * height` RGB565 pixels.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: Mutex::new(vec![0u16; width * height].into_boxed_slice()),
        }
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Producer side: stores a captured frame. Short frames fill a
    /// prefix; excess pixels are ignored.
    pub fn store(&self, frame: &[u16]) {
        let mut pixels = self.pixels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let take = frame.len().min(pixels.len());
        pixels[..take].copy_from_slice(&frame[..take]);
    }

    /// Consumer side: snapshots the frame into `out`. The lock is held
    /// only while copying; decode the snapshot after this returns.
    pub fn snapshot_into(&self, out: &mut Vec<u16>) {
        let pixels = self.pixels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        out.clear();
        out.extend_from_slice(&pixels);
    }
}

/// Collapses an RGB565 snapshot to 8-bit grayscale for the QR decoder.
#[must_use]
pub fn grayscale(frame: &[u16]) -> Vec<u8> {
    frame
        .iter()
        .map(|&px| {
            let r = ((px >> 11) & 0x1F) << 3;
            let g = ((px >> 5) & 0x3F) << 2;
            let b = (px & 0x1F) << 3;
            ((u32::from(r) + u32::from(g) + u32::from(b)) / 3) as u8
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload_splits_on_newline() {
        let urls = parse_payload("https://a.example/1.cia\nhttps://a.example/2.cia\n");
        assert_eq!(
            urls,
            vec!["https://a.example/1.cia", "https://a.example/2.cia"]
        );
    }

    #[test]
    fn test_parse_payload_trailing_remainder_is_a_url() {
        let urls = parse_payload("https://a.example/1.cia\nhttps://a.example/2.cia");
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1], "https://a.example/2.cia");
    }

    #[test]
    fn test_parse_payload_skips_blank_lines() {
        let urls = parse_payload("https://a.example/1.cia\n\nhttps://a.example/2.cia\n");
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_parse_payload_truncates_long_url() {
        let long = format!("https://a.example/{}", "x".repeat(2 * URL_MAX));
        let urls = parse_payload(&long);
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].len(), URL_MAX);
        assert!(urls[0].starts_with("https://a.example/"));
    }

    #[test]
    fn test_parse_payload_truncates_url_count() {
        let payload: String = (0..URLS_MAX + 10)
            .map(|i| format!("https://a.example/{i}\n"))
            .collect();
        let urls = parse_payload(&payload);
        assert_eq!(urls.len(), URLS_MAX);
        assert_eq!(urls[0], "https://a.example/0");
    }

    #[test]
    fn test_plan_from_empty_payload_is_none() {
        assert!(QrInstallPlan::from_payload("\n\n").is_none());
        assert!(QrInstallPlan::from_payload("").is_none());
    }

    #[test]
    fn test_plan_preserves_url_order() {
        let plan = QrInstallPlan::from_payload("https://x/1\nhttps://x/2").unwrap();
        assert_eq!(plan.urls(), ["https://x/1", "https://x/2"]);
    }

    #[test]
    fn test_shared_frame_round_trip() {
        let frame = SharedFrame::new(4, 2);
        frame.store(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut out = Vec::new();
        frame.snapshot_into(&mut out);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_shared_frame_short_store_fills_prefix() {
        let frame = SharedFrame::new(2, 2);
        frame.store(&[9, 9]);
        let mut out = Vec::new();
        frame.snapshot_into(&mut out);
        assert_eq!(out, vec![9, 9, 0, 0]);
    }

    #[test]
    fn test_grayscale_extremes() {
        let gray = grayscale(&[0x0000, 0xFFFF]);
        assert_eq!(gray[0], 0);
        // Full white: (248 + 252 + 248) / 3 = 249
        assert_eq!(gray[1], 249);
    }
}
