//! TB-030: Diagnostics for degraded-but-valid bridging paths.
//!
//! Warnings go to a thread-local sink. The default sink logs through
//! `tracing`; tests swap in a [`MemorySink`] to assert on them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A placeholder token carried no `[TOKEN.<n>]` sequence number.
    TokenNumberMissing,
    /// A non-s3 backend construct was dropped from the provisioning stack.
    UnsupportedBackend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

pub trait DiagnosticSink {
    fn report(&self, diagnostic: Diagnostic);
}

/// Logs every diagnostic as a `tracing` warning.
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        tracing::warn!(kind = ?diagnostic.kind, "{}", diagnostic.message);
    }
}

/// Collects diagnostics in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: RefCell<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.borrow().clone()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.borrow().iter().filter(|d| d.kind == kind).count()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: Diagnostic) {
        self.entries.borrow_mut().push(diagnostic);
    }
}

thread_local! {
    static SINK: RefCell<Rc<dyn DiagnosticSink>> = RefCell::new(Rc::new(TracingSink));
}

/// Install `sink` for this thread; returns the previous one.
pub fn set_sink(sink: Rc<dyn DiagnosticSink>) -> Rc<dyn DiagnosticSink> {
    SINK.with(|s| std::mem::replace(&mut *s.borrow_mut(), sink))
}

pub fn warn(kind: DiagnosticKind, message: impl Into<String>) {
    let sink = SINK.with(|s| Rc::clone(&s.borrow()));
    sink.report(Diagnostic {
        kind,
        message: message.into(),
    });
}
