use std::collections::VecDeque;
use std::fmt;

use tracing::warn;

/// Recent diagnostics kept for inspection.
pub const DIAGNOSTIC_HISTORY: usize = 64;

/// Why an inbound frame was not delivered, or was delivered altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    UnboundChannel,
    TypeMismatch,
    Malformed,
    IndexOutOfRange,
    /// Delivered, but cut to the declared capacity.
    Trimmed,
}

impl DiagnosticKind {
    const ALL: [DiagnosticKind; 5] = [
        DiagnosticKind::UnboundChannel,
        DiagnosticKind::TypeMismatch,
        DiagnosticKind::Malformed,
        DiagnosticKind::IndexOutOfRange,
        DiagnosticKind::Trimmed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::UnboundChannel => "unbound_channel",
            DiagnosticKind::TypeMismatch => "type_mismatch",
            DiagnosticKind::Malformed => "malformed",
            DiagnosticKind::IndexOutOfRange => "index_out_of_range",
            DiagnosticKind::Trimmed => "trimmed",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub channel: String,
    pub index: u32,
    pub detail: String,
}

/// Bounded history of routing problems plus per-kind totals.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    recent: VecDeque<Diagnostic>,
    counts: [u64; DiagnosticKind::ALL.len()],
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and remember one diagnostic.
    pub fn record(
        &mut self,
        kind: DiagnosticKind,
        channel: &str,
        index: u32,
        detail: impl Into<String>,
    ) {
        let detail = detail.into();
        warn!(kind = %kind, channel, index, detail = %detail, "inbound frame not delivered as sent");

        self.counts[kind.slot()] += 1;
        if self.recent.len() == DIAGNOSTIC_HISTORY {
            self.recent.pop_front();
        }
        self.recent.push_back(Diagnostic {
            kind,
            channel: channel.to_string(),
            index,
            detail,
        });
    }

    /// Total recorded for `kind`, including entries no longer in history.
    pub fn count(&self, kind: DiagnosticKind) -> u64 {
        self.counts[kind.slot()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Per-kind totals, zero counts included.
    pub fn counts(&self) -> impl Iterator<Item = (DiagnosticKind, u64)> + '_ {
        DiagnosticKind::ALL
            .iter()
            .map(|&kind| (kind, self.count(kind)))
    }

    /// Oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.recent.iter()
    }

    pub fn last(&self) -> Option<&Diagnostic> {
        self.recent.back()
    }
}
