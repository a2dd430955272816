//! MJPEG frame assembly.
//!
//! Cameras emit MJPEG as a plain concatenation of JPEG images, delivered in
//! chunks that need not line up with image boundaries.  [`MjpegSplitter`]
//! buffers the stream and cuts it at each JPEG start-of-image marker: a
//! frame is only emitted once the *next* frame's marker has been seen, so
//! viewers never observe a partially assembled image.

use rover_types::RoverError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::frame_bus::{Frame, FrameBus};

/// JPEG start-of-image followed by the first marker prefix.
const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
/// JPEG end-of-image.
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Pending data beyond this size is assumed to be corrupt and dropped.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

pub struct MjpegSplitter {
    pending: Vec<u8>,
    /// Offset in `pending` from which to resume searching for the next SOI.
    scan_from: usize,
    max_frame_len: usize,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            scan_from: 1,
            max_frame_len,
        }
    }

    /// Feed the next chunk of the stream; returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        if !self.pending.starts_with(&SOI) {
            self.skip_to_marker();
        }
        while self.pending.starts_with(&SOI) {
            match find_marker(&self.pending, self.scan_from) {
                Some(at) => {
                    let rest = self.pending.split_off(at);
                    let frame = std::mem::replace(&mut self.pending, rest);
                    frames.push(Frame::from(frame));
                    self.scan_from = 1;
                }
                None => {
                    // Keep the tail so a marker split across chunks is found.
                    self.scan_from = self.pending.len().saturating_sub(SOI.len() - 1).max(1);
                    break;
                }
            }
        }

        if self.pending.len() > self.max_frame_len {
            warn!(pending = self.pending.len(), "no frame boundary found; dropping buffered data");
            self.pending.clear();
            self.scan_from = 1;
        }
        frames
    }

    /// Flush the final frame at end of stream, if it is complete.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.pending);
        self.scan_from = 1;
        (rest.starts_with(&SOI) && rest.ends_with(&EOI)).then(|| Frame::from(rest))
    }

    fn skip_to_marker(&mut self) {
        match find_marker(&self.pending, 0) {
            Some(at) => {
                debug!(skipped = at, "skipping bytes before first frame");
                self.pending.drain(..at);
            }
            None => {
                let cut = self.pending.len().saturating_sub(SOI.len() - 1);
                self.pending.drain(..cut);
            }
        }
        self.scan_from = 1;
    }
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(haystack: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(SOI.len())
        .position(|window| window == SOI)
        .map(|pos| pos + from)
}

/// Read an MJPEG byte stream to its end, publishing every complete frame.
///
/// Returns the number of frames published.
pub async fn pump_frames<R>(mut reader: R, bus: &FrameBus) -> Result<u64, RoverError>
where
    R: AsyncRead + Unpin,
{
    let mut splitter = MjpegSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut published = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| RoverError::Io(format!("reading camera stream: {e}")))?;
        if n == 0 {
            break;
        }
        for frame in splitter.push(&buf[..n]) {
            bus.publish(frame);
            published += 1;
        }
    }
    if let Some(frame) = splitter.finish() {
        bus.publish(frame);
        published += 1;
    }

    debug!(published, "camera stream ended");
    Ok(published)
}
