//! Folds Ollama's newline-delimited JSON chat stream into display text.
//!
//! Every line of the response body is one JSON object:
//! ```text
//! {"message":{"role":"assistant","content":"<think>"},"done":false}
//! {"message":{"role":"assistant","content":"Hello"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":20,"eval_count":10}
//! ```
//!
//! The accumulator keeps the full answer and the full thinking trace, pulls
//! `<think>`/`<thinking>` blocks out of the answer, and reports the token
//! counters of the last fragment once the stream ends.

use crate::error::ChatError;
use crate::types::UsageMetrics;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Matched opening/closing pair of either accepted spelling
static THINK_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<think(?:ing)?>(.*?)</think(?:ing)?>").expect("valid think block regex")
});

/// Longest line kept in memory; longer lines are dropped like malformed ones
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

static THINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?think(?:ing)?>").expect("valid think tag regex"));

/// Receives the accumulated state of a chat stream.
///
/// For one stream, either `on_complete` or `on_error` is called exactly once,
/// after any number of `on_chunk` calls. A cancelled stream gets neither.
pub trait StreamCallbacks: Send {
    /// Full display text and full thinking text so far
    fn on_chunk(&mut self, content: &str, thinking: Option<&str>);

    fn on_complete(&mut self, usage: Option<UsageMetrics>);

    fn on_error(&mut self, error: ChatError);
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Default, Deserialize)]
struct StreamFragment {
    #[serde(default)]
    message: Option<FragmentMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    done: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FragmentMessage {
    #[serde(default)]
    content: Option<String>,
    // Older releases send `think`, newer ones `thinking`
    #[serde(default)]
    think: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

/// Incremental UTF-8 decoder.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk arrives. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));

                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    fn flush(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Stateful reducer from response bytes to display and thinking text.
///
/// One instance per stream; never share it between requests.
#[derive(Debug)]
pub struct StreamAccumulator {
    decoder: Utf8Decoder,
    line_buf: String,
    max_line_length: usize,
    /// Inside an oversized line; skip until the next newline
    discarding: bool,
    content: String,
    thinking: String,
    prompt_eval_count: u64,
    eval_count: u64,
    done: bool,
    finished: bool,
    cancel: Option<CancellationToken>,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self {
            decoder: Utf8Decoder::default(),
            line_buf: String::new(),
            max_line_length: MAX_LINE_LENGTH,
            discarding: false,
            content: String::new(),
            thinking: String::new(),
            prompt_eval_count: 0,
            eval_count: 0,
            done: false,
            finished: false,
            cancel: None,
        }
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Stop delivering callbacks as soon as `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn thinking(&self) -> Option<&str> {
        if self.thinking.is_empty() {
            None
        } else {
            Some(&self.thinking)
        }
    }

    /// Usage from the most recently seen counters
    pub fn usage(&self) -> UsageMetrics {
        UsageMetrics::new(self.prompt_eval_count, self.eval_count)
    }

    /// Whether a fragment with `done: true` has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Process one raw chunk of the response body.
    ///
    /// Returns `true` once the stream has signalled completion; later input is
    /// ignored.
    pub fn feed(&mut self, bytes: &[u8], callbacks: &mut dyn StreamCallbacks) -> bool {
        if self.done || self.finished {
            return true;
        }

        let text = self.decoder.decode(bytes);
        let mut rest = text.as_str();

        // Only the newly decoded text is searched for newlines
        while let Some(newline_pos) = rest.find('\n') {
            if self.is_cancelled() {
                return false;
            }

            let (head, tail) = rest.split_at(newline_pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }

            self.line_buf.push_str(head);
            if self.line_buf.len() > self.max_line_length {
                trace!("dropping stream line of {} bytes", self.line_buf.len());
                self.line_buf.clear();
                continue;
            }

            let line = std::mem::take(&mut self.line_buf);
            if self.process_line(&line, callbacks) {
                return true;
            }
        }

        if !self.discarding {
            self.line_buf.push_str(rest);
            if self.line_buf.len() > self.max_line_length {
                trace!("dropping unterminated stream line over {} bytes", self.max_line_length);
                self.line_buf.clear();
                self.discarding = true;
            }
        }

        false
    }

    /// End the stream and report usage.
    ///
    /// A trailing line without a newline is still parsed unless completion was
    /// already signalled. `on_complete` fires at most once per accumulator.
    pub fn finish(&mut self, callbacks: &mut dyn StreamCallbacks) -> UsageMetrics {
        if !self.done && !self.finished && !self.discarding {
            let tail = self.decoder.flush();
            self.line_buf.push_str(&tail);
            let remaining = std::mem::take(&mut self.line_buf);
            self.process_line(&remaining, callbacks);
        }

        let usage = self.usage();
        if !self.finished && !self.is_cancelled() {
            self.finished = true;
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat stream complete"
            );
            callbacks.on_complete(Some(usage));
        }

        usage
    }

    /// Returns `true` when the line carried `done: true`
    fn process_line(&mut self, line: &str, callbacks: &mut dyn StreamCallbacks) -> bool {
        let line = line.trim();
        if line.is_empty() || self.is_cancelled() {
            return false;
        }

        let fragment: StreamFragment = match serde_json::from_str(line) {
            Ok(f) => f,
            Err(e) => {
                trace!("skipping malformed stream line: {}", e);
                return false;
            }
        };

        self.apply_fragment(fragment, callbacks)
    }

    fn apply_fragment(
        &mut self,
        fragment: StreamFragment,
        callbacks: &mut dyn StreamCallbacks,
    ) -> bool {
        if let Some(message) = fragment.message {
            for think in [message.think, message.thinking].into_iter().flatten() {
                self.thinking.push_str(&think);
            }
            if let Some(content) = message.content {
                self.content.push_str(&content);
            }
        }

        self.extract_think_blocks();

        callbacks.on_chunk(&self.content, self.thinking());

        if let Some(count) = fragment.prompt_eval_count {
            self.prompt_eval_count = count;
        }
        if let Some(count) = fragment.eval_count {
            self.eval_count = count;
        }

        if fragment.done.unwrap_or(false) {
            self.done = true;
        }

        self.done
    }

    /// Move every complete think block from the display text into the thinking
    /// text. Runs over the whole display text so tags split between fragments
    /// are still found.
    fn extract_think_blocks(&mut self) {
        if !THINK_BLOCK.is_match(&self.content) {
            return;
        }

        for block in THINK_BLOCK.find_iter(&self.content) {
            let inner = THINK_TAG.replace_all(block.as_str(), "");
            let inner = inner.trim();
            if inner.is_empty() || self.thinking.contains(inner) {
                continue;
            }
            if !self.thinking.is_empty() {
                self.thinking.push('\n');
            }
            self.thinking.push_str(inner);
        }

        self.content = THINK_BLOCK.replace_all(&self.content, "").trim().to_string();
    }
}

/// Drive an accumulator over a byte stream until it ends, fails or is cancelled.
///
/// The only suspension point is waiting for the next chunk.
pub async fn consume<S, B>(
    body: S,
    callbacks: &mut dyn StreamCallbacks,
    cancel: &CancellationToken,
) -> StreamOutcome
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    let mut acc = StreamAccumulator::new().with_cancellation(cancel.clone());
    let mut body = std::pin::pin!(body);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if acc.feed(chunk.as_ref(), callbacks) {
                    break;
                }
                if cancel.is_cancelled() {
                    return StreamOutcome::Cancelled;
                }
            }
            Some(Err(e)) => {
                callbacks.on_error(ChatError::Body(e));
                return StreamOutcome::Failed;
            }
            None => break,
        }
    }

    if cancel.is_cancelled() {
        return StreamOutcome::Cancelled;
    }

    acc.finish(callbacks);
    StreamOutcome::Completed
}
