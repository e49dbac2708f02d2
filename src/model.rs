use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

pub const MS_PER_MIN: Ms = 60_000;
pub const MS_PER_HOUR: Ms = 3_600_000;

/// Duration assumed when a booking has no service attached.
pub const DEFAULT_DURATION_MIN: u32 = 60;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// One recurring weekly opening. `weekday` is 0..=6, Sunday = 0.
///
/// A business normally carries at most one enabled window per weekday; the
/// resolver takes the first enabled match when the model holds more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub weekday: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub enabled: bool,
}

/// Date-specific override of the weekly schedule. Fully replaces the weekly
/// window for that one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionKind {
    ClosedAllDay,
    /// Replacement hours. Either bound missing means closed (fail safe,
    /// never guess).
    CustomHours {
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    pub active: bool,
}

/// Per-business scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    pub timezone: Tz,
    pub buffer_minutes: u32,
    pub min_notice_hours: u32,
    pub max_days_out: u32,
}

impl BookingPolicy {
    pub fn buffer_ms(&self) -> Ms {
        self.buffer_minutes as Ms * MS_PER_MIN
    }

    pub fn min_notice_ms(&self) -> Ms {
        self.min_notice_hours as Ms * MS_PER_HOUR
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            buffer_minutes: 0,
            min_notice_hours: 0,
            max_days_out: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Requested,
    ProposedTime,
    Approved,
    Declined,
    Completed,
    Canceled,
}

impl BookingStatus {
    /// Whether this status occupies its interval for conflict purposes.
    /// ProposedTime blocks: a pending offer must not be double-offered.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            BookingStatus::ProposedTime | BookingStatus::Approved | BookingStatus::Completed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Declined | BookingStatus::Completed | BookingStatus::Canceled
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Requested => "requested",
            BookingStatus::ProposedTime => "proposed_time",
            BookingStatus::Approved => "approved",
            BookingStatus::Declined => "declined",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// The audited action behind a lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionAction {
    Create,
    ProposeTime,
    CounterPropose,
    Approve,
    Decline,
    Complete,
    Cancel,
    Reactivate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Option<Ulid>,
    pub customer: Customer,
    /// What the customer originally asked for.
    pub preferred_start: Option<Ms>,
    pub preferred_end: Option<Ms>,
    /// The concrete interval offered or confirmed by the business. Wins over
    /// the preferred interval for conflict purposes.
    pub proposed: Option<Span>,
    pub status: BookingStatus,
    pub internal_notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// An opaque commitment imported from an external calendar feed or entered
/// manually. Blocks time like an approved booking, has no lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyBlock {
    pub id: Ulid,
    pub span: Span,
    pub source: String,
}

/// One append-only audit record per accepted lifecycle change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub action: TransitionAction,
    /// None for booking creation.
    pub from_status: Option<BookingStatus>,
    pub to_status: BookingStatus,
    pub actor_id: Option<String>,
    pub created_at: Ms,
    /// Free-form JSON. Stored as text in the WAL — bincode cannot frame
    /// self-describing values.
    #[serde(with = "json_text")]
    pub metadata: Option<serde_json::Value>,
}

mod json_text {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        v: &Option<serde_json::Value>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match v {
            Some(val) => s.serialize_some(&val.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<serde_json::Value>, D::Error> {
        let text = Option::<String>::deserialize(d)?;
        text.map(|t| serde_json::from_str(&t))
            .transpose()
            .map_err(D::Error::custom)
    }
}

/// In-memory aggregate for one business. Rebuilt from the WAL on startup;
/// mutated only by event application under the business write lock.
#[derive(Debug, Clone)]
pub struct BusinessState {
    pub id: Ulid,
    pub name: Option<String>,
    pub policy: BookingPolicy,
    pub windows: Vec<AvailabilityWindow>,
    pub exceptions: BTreeMap<NaiveDate, ExceptionKind>,
    pub services: HashMap<Ulid, Service>,
    pub bookings: HashMap<Ulid, BookingRequest>,
    /// Sorted by `span.start`.
    pub busy_blocks: Vec<BusyBlock>,
    /// Append-only, chronological.
    pub audit_log: Vec<AuditEntry>,
}

impl BusinessState {
    pub fn new(id: Ulid, name: Option<String>, policy: BookingPolicy) -> Self {
        Self {
            id,
            name,
            policy,
            windows: Vec::new(),
            exceptions: BTreeMap::new(),
            services: HashMap::new(),
            bookings: HashMap::new(),
            busy_blocks: Vec::new(),
            audit_log: Vec::new(),
        }
    }

    /// Insert a busy block maintaining sort order by span.start.
    pub fn insert_busy_block(&mut self, block: BusyBlock) {
        let pos = self
            .busy_blocks
            .binary_search_by_key(&block.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.busy_blocks.insert(pos, block);
    }

    pub fn remove_busy_block(&mut self, id: Ulid) -> Option<BusyBlock> {
        if let Some(pos) = self.busy_blocks.iter().position(|b| b.id == id) {
            Some(self.busy_blocks.remove(pos))
        } else {
            None
        }
    }

    /// Effective duration for a booking's service, in milliseconds.
    /// Unknown or absent service falls back to the default duration.
    pub fn service_duration_ms(&self, service_id: Option<Ulid>) -> Ms {
        let minutes = service_id
            .and_then(|sid| self.services.get(&sid))
            .map(|s| s.duration_minutes)
            .unwrap_or(DEFAULT_DURATION_MIN);
        minutes as Ms * MS_PER_MIN
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BusinessCreated {
        id: Ulid,
        name: Option<String>,
        policy: BookingPolicy,
    },
    BusinessDeleted {
        id: Ulid,
    },
    PolicyUpdated {
        id: Ulid,
        policy: BookingPolicy,
    },
    /// Settings updates replace the whole weekly schedule.
    WindowsReplaced {
        business_id: Ulid,
        windows: Vec<AvailabilityWindow>,
    },
    ExceptionSet {
        business_id: Ulid,
        date: NaiveDate,
        kind: ExceptionKind,
    },
    ExceptionCleared {
        business_id: Ulid,
        date: NaiveDate,
    },
    ServiceUpserted {
        business_id: Ulid,
        service: Service,
    },
    BusyBlockAdded {
        id: Ulid,
        business_id: Ulid,
        span: Span,
        source: String,
    },
    BusyBlockRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    /// Carries the full record plus its creation audit entry so a single WAL
    /// append covers both writes.
    BookingCreated {
        business_id: Ulid,
        booking: BookingRequest,
        audit: AuditEntry,
    },
    /// Status change plus its audit entry, committed as one record: a failed
    /// append leaves neither.
    TransitionApplied {
        business_id: Ulid,
        booking_id: Ulid,
        proposed: Option<Span>,
        audit: AuditEntry,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn busy_block_ordering() {
        let mut bs = BusinessState::new(Ulid::new(), None, BookingPolicy::default());
        bs.insert_busy_block(BusyBlock {
            id: Ulid::new(),
            span: Span::new(300, 400),
            source: "gcal".into(),
        });
        bs.insert_busy_block(BusyBlock {
            id: Ulid::new(),
            span: Span::new(100, 200),
            source: "manual".into(),
        });
        bs.insert_busy_block(BusyBlock {
            id: Ulid::new(),
            span: Span::new(200, 300),
            source: "gcal".into(),
        });
        assert_eq!(bs.busy_blocks[0].span.start, 100);
        assert_eq!(bs.busy_blocks[1].span.start, 200);
        assert_eq!(bs.busy_blocks[2].span.start, 300);
    }

    #[test]
    fn busy_block_remove() {
        let mut bs = BusinessState::new(Ulid::new(), None, BookingPolicy::default());
        let id = Ulid::new();
        bs.insert_busy_block(BusyBlock {
            id,
            span: Span::new(100, 200),
            source: "manual".into(),
        });
        assert!(bs.remove_busy_block(id).is_some());
        assert!(bs.busy_blocks.is_empty());
        assert!(bs.remove_busy_block(id).is_none());
    }

    #[test]
    fn service_duration_fallback() {
        let mut bs = BusinessState::new(Ulid::new(), None, BookingPolicy::default());
        let sid = Ulid::new();
        bs.services.insert(
            sid,
            Service {
                id: sid,
                name: "Consult".into(),
                duration_minutes: 45,
                active: true,
            },
        );
        assert_eq!(bs.service_duration_ms(Some(sid)), 45 * MS_PER_MIN);
        assert_eq!(
            bs.service_duration_ms(None),
            DEFAULT_DURATION_MIN as Ms * MS_PER_MIN
        );
        // Unknown service id: defensive fallback, not a panic.
        assert_eq!(
            bs.service_duration_ms(Some(Ulid::new())),
            DEFAULT_DURATION_MIN as Ms * MS_PER_MIN
        );
    }

    #[test]
    fn blocking_statuses() {
        assert!(BookingStatus::Approved.is_blocking());
        assert!(BookingStatus::ProposedTime.is_blocking());
        assert!(BookingStatus::Completed.is_blocking());
        assert!(!BookingStatus::Requested.is_blocking());
        assert!(!BookingStatus::Declined.is_blocking());
        assert!(!BookingStatus::Canceled.is_blocking());
    }

    #[test]
    fn terminal_statuses() {
        assert!(BookingStatus::Declined.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Canceled.is_terminal());
        assert!(!BookingStatus::Requested.is_terminal());
        assert!(!BookingStatus::ProposedTime.is_terminal());
        assert!(!BookingStatus::Approved.is_terminal());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BusinessCreated {
            id: Ulid::new(),
            name: Some("Fade Factory".into()),
            policy: BookingPolicy {
                timezone: chrono_tz::America::New_York,
                buffer_minutes: 15,
                min_notice_hours: 24,
                max_days_out: 30,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn transition_event_roundtrip() {
        let booking_id = Ulid::new();
        let event = Event::TransitionApplied {
            business_id: Ulid::new(),
            booking_id,
            proposed: Some(Span::new(1000, 2000)),
            audit: AuditEntry {
                id: Ulid::new(),
                booking_id,
                action: TransitionAction::Approve,
                from_status: Some(BookingStatus::Requested),
                to_status: BookingStatus::Approved,
                actor_id: Some("owner-1".into()),
                created_at: 500,
                metadata: Some(serde_json::json!({"channel": "dashboard"})),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
