//! The tellask stream parser (component D).
//!
//! Consumes model output chunk by chunk and emits a deterministic sequence
//! of [`ParserEvent`]s regardless of how the input is sliced into chunks.
//! Grounded on the buffer-drain-at-boundary discipline of
//! `sa-providers::sse::{drain_data_lines, sse_response_stream}`, adapted
//! from `\n\n`-delimited SSE framing to the `!?`-line-prefixed tellask
//! grammar: a line accumulator that only emits events at newline
//! boundaries (or at end-of-stream for any trailing partial line).

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

const SENTINEL: &str = "!?";

/// Validation outcome for the first line of a call (the head line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status")]
pub enum MentionValidation {
    #[serde(rename = "valid")]
    Valid { first_mention: String },
    #[serde(rename = "malformed")]
    Malformed { reason: String },
}

impl MentionValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, MentionValidation::Valid { .. })
    }

    pub fn first_mention(&self) -> Option<&str> {
        match self {
            MentionValidation::Valid { first_mention } => Some(first_mention),
            MentionValidation::Malformed { .. } => None,
        }
    }
}

/// One event emitted by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParserEvent {
    MarkdownStart,
    MarkdownChunk(String),
    MarkdownFinish,
    CallStart(MentionValidation),
    CallHeadLineChunk(String),
    CallHeadLineFinish,
    CallBodyStart,
    CallBodyChunk(String),
    CallBodyFinish,
    /// Carries the generated call id.
    CallFinish(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Markdown,
    CallHead,
    CallBody,
}

/// Incremental tellask parser. Feed it chunks of arbitrary size via
/// [`feed`](Self::feed); call [`finish`](Self::finish) once at
/// end-of-stream to flush any trailing partial line.
pub struct TellaskParser {
    pending: String,
    state: State,
    markdown_active: bool,
    call_counter: u64,
}

impl Default for TellaskParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TellaskParser {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            state: State::Markdown,
            markdown_active: false,
            call_counter: 0,
        }
    }

    /// Feed the next chunk of model output. Returns any events the new
    /// data completed (full lines only; a trailing partial line is held
    /// until the next `feed` or until `finish`).
    pub fn feed(&mut self, chunk: &str) -> Vec<ParserEvent> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            self.process_line(&line, &mut out);
        }
        out
    }

    /// Flush any trailing partial line and close whatever segment is
    /// still open. Call exactly once at end-of-stream.
    pub fn finish(&mut self) -> Vec<ParserEvent> {
        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.process_line(&line, &mut out);
        }
        self.close_active(&mut out);
        out
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<ParserEvent>) {
        let is_call_line = line.starts_with(SENTINEL);
        match self.state {
            State::Markdown => {
                if is_call_line {
                    self.close_markdown(out);
                    self.open_call(line, out);
                } else {
                    self.open_markdown_if_needed(out);
                    push_chunk(out, ParserEvent::MarkdownChunk, line);
                }
            }
            State::CallHead => {
                if is_call_line {
                    let stripped = &line[SENTINEL.len()..];
                    if is_head_continuation(stripped) {
                        push_chunk(out, ParserEvent::CallHeadLineChunk, stripped);
                    } else {
                        out.push(ParserEvent::CallHeadLineFinish);
                        out.push(ParserEvent::CallBodyStart);
                        push_chunk(out, ParserEvent::CallBodyChunk, stripped);
                        self.state = State::CallBody;
                    }
                } else {
                    out.push(ParserEvent::CallHeadLineFinish);
                    self.finish_call(out);
                    self.open_markdown_if_needed(out);
                    push_chunk(out, ParserEvent::MarkdownChunk, line);
                }
            }
            State::CallBody => {
                if is_call_line {
                    let stripped = &line[SENTINEL.len()..];
                    push_chunk(out, ParserEvent::CallBodyChunk, stripped);
                } else {
                    out.push(ParserEvent::CallBodyFinish);
                    self.finish_call(out);
                    self.open_markdown_if_needed(out);
                    push_chunk(out, ParserEvent::MarkdownChunk, line);
                }
            }
        }
    }

    fn open_call(&mut self, line: &str, out: &mut Vec<ParserEvent>) {
        let stripped = &line[SENTINEL.len()..];
        let validation = validate_mention(stripped);
        out.push(ParserEvent::CallStart(validation));
        push_chunk(out, ParserEvent::CallHeadLineChunk, stripped);
        self.state = State::CallHead;
    }

    fn close_markdown(&mut self, out: &mut Vec<ParserEvent>) {
        if self.markdown_active {
            out.push(ParserEvent::MarkdownFinish);
            self.markdown_active = false;
        }
    }

    fn open_markdown_if_needed(&mut self, out: &mut Vec<ParserEvent>) {
        if !self.markdown_active {
            out.push(ParserEvent::MarkdownStart);
            self.markdown_active = true;
        }
    }

    fn finish_call(&mut self, out: &mut Vec<ParserEvent>) {
        self.call_counter += 1;
        out.push(ParserEvent::CallFinish(format!("call-{}", self.call_counter)));
        self.state = State::Markdown;
    }

    fn close_active(&mut self, out: &mut Vec<ParserEvent>) {
        match self.state {
            State::Markdown => self.close_markdown(out),
            State::CallHead => {
                out.push(ParserEvent::CallHeadLineFinish);
                self.finish_call(out);
            }
            State::CallBody => {
                out.push(ParserEvent::CallBodyFinish);
                self.finish_call(out);
            }
        }
    }
}

fn push_chunk(out: &mut Vec<ParserEvent>, variant: impl FnOnce(String) -> ParserEvent, text: &str) {
    if !text.is_empty() {
        out.push(variant(text.to_string()));
    }
}

fn is_head_continuation(stripped: &str) -> bool {
    stripped.trim_start().starts_with('@')
}

fn mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*").expect("static regex"))
}

fn validate_mention(stripped: &str) -> MentionValidation {
    let trimmed = stripped.trim_start();
    if !trimmed.starts_with('@') {
        return MentionValidation::Malformed {
            reason: "missing_mention_prefix".into(),
        };
    }
    let after_at = trimmed[1..].trim_start();
    match mention_pattern().find(after_at) {
        Some(m) if m.start() == 0 && !m.as_str().is_empty() => MentionValidation::Valid {
            first_mention: m.as_str().to_string(),
        },
        _ => MentionValidation::Malformed {
            reason: "invalid_mention_id".into(),
        },
    }
}

/// Merge adjacent same-kind chunk events into one, per the parser's
/// "canonicalized event sequence" guarantee (see SPEC_FULL.md §8.1):
/// chunking invariance is defined up to this canonicalization, not on the
/// raw per-line event stream.
pub fn canonicalize(events: Vec<ParserEvent>) -> Vec<ParserEvent> {
    let mut out: Vec<ParserEvent> = Vec::with_capacity(events.len());
    for ev in events {
        let merged = match (out.last_mut(), &ev) {
            (Some(ParserEvent::MarkdownChunk(prev)), ParserEvent::MarkdownChunk(next)) => {
                prev.push_str(next);
                true
            }
            (Some(ParserEvent::CallHeadLineChunk(prev)), ParserEvent::CallHeadLineChunk(next)) => {
                prev.push_str(next);
                true
            }
            (Some(ParserEvent::CallBodyChunk(prev)), ParserEvent::CallBodyChunk(next)) => {
                prev.push_str(next);
                true
            }
            _ => false,
        };
        if !merged {
            out.push(ev);
        }
    }
    out
}

/// Run a full input through the parser using a single chunking strategy
/// (closure maps input length to a slice of chunk byte-lengths), returning
/// the canonicalized event sequence. Used by tests to assert chunking
/// invariance.
pub fn parse_all_canonical(input: &str) -> Vec<ParserEvent> {
    let mut parser = TellaskParser::new();
    let mut events = parser.feed(input);
    events.extend(parser.finish());
    canonicalize(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_in_chunks(input: &str, chunk_sizes: &[usize]) -> Vec<ParserEvent> {
        let mut parser = TellaskParser::new();
        let mut events = Vec::new();
        let mut rest = input;
        let mut i = 0;
        while !rest.is_empty() {
            let size = chunk_sizes[i % chunk_sizes.len()].max(1).min(rest.len());
            let (chunk, remainder) = rest.split_at(size);
            events.extend(parser.feed(chunk));
            rest = remainder;
            i += 1;
        }
        events.extend(parser.finish());
        canonicalize(events)
    }

    #[test]
    fn s1_basic_tellask() {
        let input = "before\n!?@pangu do\n!?body 1\n!?body 2\nafter\n";
        let events = parse_all_canonical(input);
        assert_eq!(
            events,
            vec![
                ParserEvent::MarkdownStart,
                ParserEvent::MarkdownChunk("before\n".into()),
                ParserEvent::MarkdownFinish,
                ParserEvent::CallStart(MentionValidation::Valid {
                    first_mention: "pangu".into()
                }),
                ParserEvent::CallHeadLineChunk("@pangu do\n".into()),
                ParserEvent::CallHeadLineFinish,
                ParserEvent::CallBodyStart,
                ParserEvent::CallBodyChunk("body 1\nbody 2\n".into()),
                ParserEvent::CallBodyFinish,
                ParserEvent::CallFinish("call-1".into()),
                ParserEvent::MarkdownStart,
                ParserEvent::MarkdownChunk("after\n".into()),
                ParserEvent::MarkdownFinish,
            ]
        );
    }

    #[test]
    fn s2_malformed_head() {
        let input = "!?hello\n!?body\n";
        let events = parse_all_canonical(input);
        assert_eq!(
            events,
            vec![
                ParserEvent::CallStart(MentionValidation::Malformed {
                    reason: "missing_mention_prefix".into()
                }),
                ParserEvent::CallHeadLineChunk("hello\n".into()),
                ParserEvent::CallHeadLineFinish,
                ParserEvent::CallBodyStart,
                ParserEvent::CallBodyChunk("body\n".into()),
                ParserEvent::CallBodyFinish,
                ParserEvent::CallFinish("call-1".into()),
            ]
        );
    }

    #[test]
    fn invalid_mention_id_malformed() {
        let input = "!?@1nope body\n";
        let events = parse_all_canonical(input);
        assert_eq!(
            events[0],
            ParserEvent::CallStart(MentionValidation::Malformed {
                reason: "invalid_mention_id".into()
            })
        );
    }

    #[test]
    fn chunking_invariance_s1() {
        let input = "before\n!?@pangu do\n!?body 1\n!?body 2\nafter\n";
        let whole = feed_in_chunks(input, &[input.len()]);
        for sizes in [&[1usize][..], &[2, 3, 5][..], &[7][..], &[1, 1, 2, 3, 5, 8][..]] {
            let chunked = feed_in_chunks(input, sizes);
            assert_eq!(chunked, whole, "chunking {:?} diverged", sizes);
        }
    }

    #[test]
    fn chunking_invariance_malformed() {
        let input = "!?hello\n!?body line one\n!?body line two\nmore markdown\n";
        let whole = feed_in_chunks(input, &[input.len()]);
        for sizes in [&[1usize][..], &[3, 4][..], &[9][..]] {
            let chunked = feed_in_chunks(input, sizes);
            assert_eq!(chunked, whole);
        }
    }

    #[test]
    fn no_empty_chunks_emitted() {
        let input = "!?\nafter\n";
        let events = parse_all_canonical(input);
        for ev in &events {
            match ev {
                ParserEvent::MarkdownChunk(s)
                | ParserEvent::CallHeadLineChunk(s)
                | ParserEvent::CallBodyChunk(s) => assert!(!s.is_empty()),
                _ => {}
            }
        }
    }

    #[test]
    fn call_with_no_body() {
        let input = "!?@cmdr !review\nmore text\n";
        let events = parse_all_canonical(input);
        assert_eq!(
            events,
            vec![
                ParserEvent::CallStart(MentionValidation::Valid {
                    first_mention: "cmdr".into()
                }),
                ParserEvent::CallHeadLineChunk("@cmdr !review\n".into()),
                ParserEvent::CallHeadLineFinish,
                ParserEvent::CallFinish("call-1".into()),
                ParserEvent::MarkdownStart,
                ParserEvent::MarkdownChunk("more text\n".into()),
                ParserEvent::MarkdownFinish,
            ]
        );
    }

    #[test]
    fn call_at_end_of_stream_no_trailing_newline() {
        let input = "!?@self thinking without a trailing newline";
        let events = parse_all_canonical(input);
        assert_eq!(
            events,
            vec![
                ParserEvent::CallStart(MentionValidation::Valid {
                    first_mention: "self".into()
                }),
                ParserEvent::CallHeadLineChunk("@self thinking without a trailing newline".into()),
                ParserEvent::CallHeadLineFinish,
                ParserEvent::CallFinish("call-1".into()),
            ]
        );
    }

    #[test]
    fn multiple_calls_get_distinct_ids() {
        let input = "!?@human question one\nmarkdown\n!?@self question two\n";
        let events = parse_all_canonical(input);
        let ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::CallFinish(id) => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["call-1", "call-2"]);
    }
}
