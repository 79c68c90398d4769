//! Serialized preview/thumbnail fetch queue.
//!
//! Preview fetches for unrelated entities go through one FIFO queue: at most
//! one fetch in flight, duplicate requests for a key already queued or in
//! flight are dropped, and a key can be cancelled when its component unmounts.
//! The queue is a synchronous state object; the UI loop asks it what to fetch
//! next and reports completion.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::io::Cursor;

use anyhow::Context;
use tracing::debug;

use crate::decode::RawFrame;
use crate::error::{CanvasError, CanvasResult};

/// FIFO fetch queue with de-duplication by request key.
#[derive(Clone, Debug, Default)]
pub struct PreviewQueue<K: Eq + Hash + Clone> {
    queue: VecDeque<K>,
    known: HashSet<K>,
    in_flight: Option<K>,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> PreviewQueue<K> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            known: HashSet::new(),
            in_flight: None,
        }
    }

    /// Enqueue a fetch request. Returns `false` when the key is already
    /// queued or in flight and the request was dropped.
    pub fn request(&mut self, key: K) -> bool {
        if self.known.contains(&key) || self.in_flight.as_ref() == Some(&key) {
            debug!(?key, "duplicate preview request dropped");
            return false;
        }
        self.known.insert(key.clone());
        self.queue.push_back(key);
        true
    }

    /// Take the next key to fetch, marking it in flight. `None` while a fetch
    /// is already running or the queue is empty.
    pub fn next_to_fetch(&mut self) -> Option<K> {
        if self.in_flight.is_some() {
            return None;
        }
        let key = self.queue.pop_front()?;
        self.known.remove(&key);
        self.in_flight = Some(key.clone());
        Some(key)
    }

    /// Report that the in-flight fetch finished (successfully or not).
    /// Returns `false` when `key` was not the in-flight request.
    pub fn complete(&mut self, key: &K) -> bool {
        if self.in_flight.as_ref() == Some(key) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Cancel a pending or in-flight request (component unmount). An
    /// in-flight cancellation frees the slot; the collaborator discards the
    /// response when it arrives.
    pub fn cancel(&mut self, key: &K) -> bool {
        if self.in_flight.as_ref() == Some(key) {
            self.in_flight = None;
            return true;
        }
        if self.known.remove(key) {
            self.queue.retain(|k| k != key);
            return true;
        }
        false
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_none()
    }
}

/// PNG-encode a decoded frame as a preview image, downscaled so its longer
/// edge is at most `max_edge` pixels. Aspect ratio is preserved.
pub fn preview_png(frame: &RawFrame, max_edge: u32) -> CanvasResult<Vec<u8>> {
    if max_edge == 0 {
        return Err(CanvasError::validation("preview max_edge must be nonzero"));
    }
    let img = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| CanvasError::validation("frame buffer does not match its dimensions"))?;
    let thumb = image::DynamicImage::ImageRgba8(img).thumbnail(max_edge, max_edge);
    let mut buf = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .context("encode preview png")?;
    Ok(buf)
}
