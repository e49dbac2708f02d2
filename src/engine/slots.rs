use crate::model::*;

use super::conflict::{Commitment, conflicts};

// ── Slot Generation ───────────────────────────────────────────────

/// Candidate starts are enumerated on a fixed 15-minute grid.
pub const SLOT_STEP_MS: Ms = 15 * MS_PER_MIN;

/// Round an instant forward to the next 15-minute boundary. Timezone
/// offsets are whole multiples of 15 minutes, so the epoch grid lines up
/// with local wall clocks.
pub fn snap_forward(t: Ms) -> Ms {
    let rem = t.rem_euclid(SLOT_STEP_MS);
    if rem == 0 { t } else { t + (SLOT_STEP_MS - rem) }
}

/// Enumerate bookable slots inside `open`.
///
/// A candidate `[start, start + duration)` is kept when it fits inside the
/// open interval, starts no earlier than `now + min_notice`, and clears
/// every commitment under the buffer. Output is strictly increasing by
/// start. Deterministic and side-effect free given identical inputs.
pub fn generate(
    open: &Span,
    duration_ms: Ms,
    buffer_ms: Ms,
    min_notice_ms: Ms,
    now: Ms,
    commitments: &[Commitment],
) -> Vec<Span> {
    let mut slots = Vec::new();
    if duration_ms <= 0 {
        return slots;
    }

    let earliest = now + min_notice_ms;
    let mut start = snap_forward(open.start);

    while start + duration_ms <= open.end {
        if start >= earliest {
            let candidate = Span::new(start, start + duration_ms);
            if conflicts(&candidate, commitments, buffer_ms).is_none() {
                slots.push(candidate);
            }
        }
        start += SLOT_STEP_MS;
    }

    slots
}
