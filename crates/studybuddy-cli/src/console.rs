//! Terminal implementation of the response sink.
//!
//! Tokens go to stdout as they arrive. The thinking indicator is drawn on
//! its own line and erased in place when the answer starts.

use std::io::Write;
use async_trait::async_trait;
use parking_lot::Mutex;

use studybuddy_runtime::{NoticeKind, ResponseSink};

const CLEAR_LINE: &str = "\r\x1b[2K";

struct State<W> {
    out: W,
    thinking: bool,
}

pub struct ConsoleSink<W: Write + Send> {
    state: Mutex<State<W>>,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(State { out, thinking: false }),
        }
    }

    fn with<F>(&self, f: F)
    where
        F: FnOnce(&mut State<W>) -> std::io::Result<()>,
    {
        let mut state = self.state.lock();
        let result = f(&mut state).and_then(|_| state.out.flush());
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write to terminal");
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.state.into_inner().out
    }
}

fn prefix(kind: NoticeKind) -> &'static str {
    match kind {
        NoticeKind::Refusal => "🚫 ",
        _ => "",
    }
}

#[async_trait]
impl<W: Write + Send> ResponseSink for ConsoleSink<W> {
    async fn send_message(&self, kind: NoticeKind, text: &str) {
        self.with(|state| {
            if state.thinking {
                write!(state.out, "{}", CLEAR_LINE)?;
                state.thinking = false;
            }
            if kind == NoticeKind::Thinking {
                state.thinking = true;
                write!(state.out, "{}", text)
            } else {
                writeln!(state.out, "{}{}", prefix(kind), text)
            }
        });
    }

    async fn clear_thinking(&self) {
        self.with(|state| {
            if state.thinking {
                state.thinking = false;
                write!(state.out, "{}", CLEAR_LINE)?;
            }
            Ok(())
        });
    }

    async fn stream_token(&self, token: &str) {
        self.with(|state| write!(state.out, "{}", token));
    }

    async fn finish(&self) {
        self.with(|state| writeln!(state.out));
    }

    async fn abort(&self, reason: &str) {
        self.with(|state| writeln!(state.out, "\n[{}]", reason));
    }
}
