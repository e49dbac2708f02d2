use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::conflict::blocking_commitments;
use super::{Engine, EngineError, SharedBusinessState, availability, slots};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub policy: BookingPolicy,
}

impl Engine {
    /// Bookable slots for one business, date and service.
    ///
    /// `now` is the caller's clock — injected so the result is a pure
    /// function of its inputs. A date beyond the policy's look-ahead window,
    /// a closed day and a fully booked day all return an empty list; only
    /// malformed input is an error.
    pub async fn query_slots(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        service_id: Option<Ulid>,
        now: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let started = std::time::Instant::now();
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;

        let duration_ms = match service_id {
            Some(sid) => {
                let service = guard
                    .services
                    .get(&sid)
                    .ok_or(EngineError::InvalidInput("unknown service"))?;
                if !service.active {
                    return Err(EngineError::InvalidInput("service is not active"));
                }
                service.duration_minutes as Ms * MS_PER_MIN
            }
            None => DEFAULT_DURATION_MIN as Ms * MS_PER_MIN,
        };

        let tz = guard.policy.timezone;
        let today = chrono::DateTime::from_timestamp_millis(now)
            .ok_or(EngineError::InvalidInput("timestamp out of range"))?
            .with_timezone(&tz)
            .date_naive();
        // Beyond the look-ahead window: an expected empty result, not an error.
        if (date - today).num_days() > guard.policy.max_days_out as i64 {
            return Ok(Vec::new());
        }

        let hours = availability::resolve(&guard.windows, &guard.exceptions, date);
        let Some(open) = availability::day_span(&hours, date, tz) else {
            return Ok(Vec::new());
        };

        let commitments = blocking_commitments(&guard, None);
        let result = slots::generate(
            &open,
            duration_ms,
            guard.policy.buffer_ms(),
            guard.policy.min_notice_ms(),
            now,
            &commitments,
        );

        metrics::counter!(observability::SLOT_QUERIES_TOTAL).increment(1);
        metrics::histogram!(observability::SLOT_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(result)
    }

    // ── Booking reads ────────────────────────────────────────

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<BookingRequest, EngineError> {
        let business_id = self
            .get_business_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Bookings for a business, optionally filtered by status, ordered by
    /// creation time.
    pub async fn list_bookings(
        &self,
        business_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<BookingRequest>, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        let mut bookings: Vec<BookingRequest> = guard
            .bookings
            .values()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        Ok(bookings)
    }

    // ── Audit reads ──────────────────────────────────────────

    /// Audit trail for one booking, in the order entries were appended.
    pub async fn audit_for_booking(
        &self,
        business_id: Ulid,
        booking_id: Ulid,
    ) -> Result<Vec<AuditEntry>, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        Ok(guard
            .audit_log
            .iter()
            .filter(|e| e.booking_id == booking_id)
            .cloned()
            .collect())
    }

    /// Audit entries whose timestamp falls inside `range`, chronological.
    pub async fn audit_in_range(
        &self,
        business_id: Ulid,
        range: Span,
    ) -> Result<Vec<AuditEntry>, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        Ok(guard
            .audit_log
            .iter()
            .filter(|e| range.contains_instant(e.created_at))
            .cloned()
            .collect())
    }

    /// Settings summary for every business. Waits on each business read
    /// lock, so a listing concurrent with a booking write completes once
    /// that write commits.
    pub async fn list_businesses(&self) -> Vec<BusinessInfo> {
        let arcs: Vec<SharedBusinessState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for bs in arcs {
            let guard = bs.read().await;
            out.push(BusinessInfo {
                id: guard.id,
                name: guard.name.clone(),
                policy: guard.policy,
            });
        }
        out
    }
}
