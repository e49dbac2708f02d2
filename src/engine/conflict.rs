use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("interval start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(())
}

// ── Conflict Detection ────────────────────────────────────────────

/// A commitment considered for conflict purposes. Either a booking in a
/// blocking status or an externally-sourced busy block — the accessor below
/// is the single place that resolves which interval counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commitment {
    Booking {
        id: Ulid,
        proposed: Option<Span>,
        preferred_start: Option<Ms>,
        /// Service duration (or the default) used to estimate an end when
        /// only a preferred start exists.
        estimated_duration: Ms,
    },
    Busy {
        id: Ulid,
        span: Span,
    },
}

impl Commitment {
    pub fn id(&self) -> Ulid {
        match self {
            Commitment::Booking { id, .. } | Commitment::Busy { id, .. } => *id,
        }
    }

    /// The interval this commitment occupies. A concrete proposed interval
    /// wins; a legacy record with only a preferred start gets an estimated
    /// end; a record with neither does not block.
    pub fn effective_span(&self) -> Option<Span> {
        match self {
            Commitment::Booking {
                proposed: Some(span),
                ..
            } => Some(*span),
            Commitment::Booking {
                preferred_start: Some(start),
                estimated_duration,
                ..
            } => Some(Span::new(*start, start + estimated_duration)),
            Commitment::Booking { .. } => None,
            Commitment::Busy { span, .. } => Some(*span),
        }
    }
}

/// Buffered overlap test. A conflict exists when
/// `candidate.start < c.end + buffer && candidate.end + buffer > c.start`,
/// which guarantees at least `buffer` idle between any two commitments.
/// Returns the first conflicting commitment id.
pub fn conflicts(candidate: &Span, commitments: &[Commitment], buffer_ms: Ms) -> Option<Ulid> {
    for c in commitments {
        if let Some(span) = c.effective_span()
            && candidate.start < span.end + buffer_ms
            && candidate.end + buffer_ms > span.start
        {
            return Some(c.id());
        }
    }
    None
}

/// All commitments of a business that currently block time: bookings in a
/// blocking status (optionally excluding the one being transitioned) plus
/// every busy block.
pub(crate) fn blocking_commitments(bs: &BusinessState, exclude: Option<Ulid>) -> Vec<Commitment> {
    let mut out = Vec::new();
    for b in bs.bookings.values() {
        if !b.status.is_blocking() {
            continue;
        }
        if Some(b.id) == exclude {
            continue;
        }
        out.push(Commitment::Booking {
            id: b.id,
            proposed: b.proposed,
            preferred_start: b.preferred_start,
            estimated_duration: bs.service_duration_ms(b.service_id),
        });
    }
    for blk in &bs.busy_blocks {
        out.push(Commitment::Busy {
            id: blk.id,
            span: blk.span,
        });
    }
    out
}

/// Conflict re-check used at transition-commit time, under the business
/// write lock.
pub(crate) fn check_no_conflict(
    bs: &BusinessState,
    candidate: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let commitments = blocking_commitments(bs, exclude);
    if let Some(id) = conflicts(candidate, &commitments, bs.policy.buffer_ms()) {
        return Err(EngineError::SchedulingConflict(Some(id)));
    }
    Ok(())
}
