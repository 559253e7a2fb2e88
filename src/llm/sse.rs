//! Server-sent event framing for streamed completions.

use std::collections::VecDeque;

/// Accumulates raw body bytes and yields the `data` payload of each
/// complete event. Other fields (`event`, `id`, `retry`) and comments are
/// dropped; completion streams only use `data`.
#[derive(Debug, Default)]
pub(crate) struct EventBuffer {
    pending: Vec<u8>,
    data: Option<String>,
    ready: VecDeque<String>,
}

impl EventBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feeds a piece of the body; any events it completes become available
    /// from [`next_data`](Self::next_data).
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.feed_line(line.trim_end_matches(['\n', '\r']));
        }
    }

    /// Flushes a trailing unterminated line and event at end of stream.
    pub(crate) fn finish(&mut self) {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.feed_line(line.trim_end_matches('\r'));
        }
        self.feed_line("");
    }

    pub(crate) fn next_data(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    fn feed_line(&mut self, line: &str) {
        if line.is_empty() {
            if let Some(data) = self.data.take() {
                self.ready.push_back(data);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field != "data" {
            return;
        }
        match &mut self.data {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => self.data = Some(value.to_owned()),
        }
    }
}
