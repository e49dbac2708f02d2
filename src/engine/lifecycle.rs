use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::{Engine, EngineError};

// ── Booking Lifecycle ─────────────────────────────────────────────

/// The legal transition table. Returns the audited action for an allowed
/// edge, None for an illegal one.
///
/// Declined is terminal. Completed and Canceled are terminal except for the
/// explicit administrative reactivation back to Requested.
pub fn transition_edge(from: BookingStatus, to: BookingStatus) -> Option<TransitionAction> {
    use BookingStatus::*;
    match (from, to) {
        (Requested, ProposedTime) => Some(TransitionAction::ProposeTime),
        (Requested, Approved) => Some(TransitionAction::Approve),
        (Requested, Declined) => Some(TransitionAction::Decline),
        (ProposedTime, Approved) => Some(TransitionAction::Approve),
        (ProposedTime, Declined) => Some(TransitionAction::Decline),
        // Customer counter-propose: back to the request pool.
        (ProposedTime, Requested) => Some(TransitionAction::CounterPropose),
        (Approved, Completed) => Some(TransitionAction::Complete),
        (Approved, Canceled) => Some(TransitionAction::Cancel),
        // Administrative escape hatch, audited distinctly.
        (Completed, Requested) => Some(TransitionAction::Reactivate),
        (Canceled, Requested) => Some(TransitionAction::Reactivate),
        _ => None,
    }
}

impl Engine {
    // ── Business settings ────────────────────────────────────

    pub async fn create_business(
        &self,
        id: Ulid,
        name: Option<String>,
        policy: BookingPolicy,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_BUSINESSES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("business name too long"));
        }
        validate_policy(&policy)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::BusinessCreated {
            id,
            name: name.clone(),
            policy,
        };
        self.wal_append(&event).await?;
        let bs = BusinessState::new(id, name, policy);
        self.state.insert(id, Arc::new(RwLock::new(bs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn delete_business(&self, id: Ulid) -> Result<(), EngineError> {
        let bs = self.get_business(&id).ok_or(EngineError::NotFound(id))?;
        // Hold the write lock so no booking or busy block lands between the
        // WAL append and the map removal below.
        let _guard = bs.write().await;

        let event = Event::BusinessDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        // Sweep the reverse lookups the same way replay does.
        self.entity_to_business
            .retain(|_, business_id| *business_id != id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    pub async fn update_policy(&self, id: Ulid, policy: BookingPolicy) -> Result<(), EngineError> {
        validate_policy(&policy)?;
        let bs = self.get_business(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = bs.write().await;
        let event = Event::PolicyUpdated { id, policy };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Replace the whole weekly schedule.
    pub async fn set_weekly_windows(
        &self,
        business_id: Ulid,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<(), EngineError> {
        if windows.len() > MAX_WINDOWS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many weekly windows"));
        }
        for w in &windows {
            if w.weekday > 6 {
                return Err(EngineError::InvalidInput("weekday must be 0..=6"));
            }
            if w.start >= w.end {
                return Err(EngineError::InvalidInput(
                    "window start must be before window end",
                ));
            }
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        let event = Event::WindowsReplaced {
            business_id,
            windows,
        };
        self.persist_and_apply(business_id, &mut guard, &event).await
    }

    pub async fn set_exception(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        kind: ExceptionKind,
    ) -> Result<(), EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        let event = Event::ExceptionSet {
            business_id,
            date,
            kind,
        };
        self.persist_and_apply(business_id, &mut guard, &event).await
    }

    pub async fn clear_exception(
        &self,
        business_id: Ulid,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        let event = Event::ExceptionCleared { business_id, date };
        self.persist_and_apply(business_id, &mut guard, &event).await
    }

    pub async fn upsert_service(
        &self,
        business_id: Ulid,
        service: Service,
    ) -> Result<(), EngineError> {
        if service.duration_minutes == 0 {
            return Err(EngineError::InvalidInput(
                "service duration must be positive",
            ));
        }
        if service.duration_minutes > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::LimitExceeded("service duration too long"));
        }
        if service.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if !guard.services.contains_key(&service.id)
            && guard.services.len() >= MAX_SERVICES_PER_BUSINESS
        {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let event = Event::ServiceUpserted {
            business_id,
            service,
        };
        self.persist_and_apply(business_id, &mut guard, &event).await
    }

    // ── Busy blocks ──────────────────────────────────────────

    /// Import an externally-sourced commitment. No conflict check: the
    /// external calendar is authoritative about its own time.
    pub async fn add_busy_block(
        &self,
        id: Ulid,
        business_id: Ulid,
        span: Span,
        source: String,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        if source.len() > MAX_SOURCE_LEN {
            return Err(EngineError::LimitExceeded("source label too long"));
        }
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if guard.busy_blocks.len() >= MAX_BUSY_BLOCKS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many busy blocks"));
        }
        if self.entity_to_business.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::BusyBlockAdded {
            id,
            business_id,
            span,
            source,
        };
        self.persist_and_apply(business_id, &mut guard, &event).await
    }

    pub async fn remove_busy_block(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.busy_blocks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BusyBlockRemoved { id, business_id };
        self.persist_and_apply(business_id, &mut guard, &event)
            .await?;
        Ok(business_id)
    }

    // ── Booking creation ─────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        id: Ulid,
        business_id: Ulid,
        service_id: Option<Ulid>,
        customer: Customer,
        preferred_start: Option<Ms>,
        preferred_end: Option<Ms>,
        internal_notes: Option<String>,
        actor_id: Option<String>,
    ) -> Result<BookingRequest, EngineError> {
        if customer.name.is_empty() || customer.email.is_empty() {
            return Err(EngineError::InvalidInput(
                "customer name and email are required",
            ));
        }
        if customer.name.len() > MAX_NAME_LEN || customer.email.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("customer field too long"));
        }
        if let Some(ref notes) = internal_notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        match (preferred_start, preferred_end) {
            (Some(s), Some(e)) => validate_span(&Span { start: s, end: e })?,
            (Some(s), None) => {
                if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&s) {
                    return Err(EngineError::LimitExceeded("timestamp out of range"));
                }
            }
            (None, Some(_)) => {
                return Err(EngineError::InvalidInput(
                    "preferred end requires a preferred start",
                ));
            }
            (None, None) => {}
        }

        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        if guard.bookings.contains_key(&id) || self.entity_to_business.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(sid) = service_id
            && !guard.services.contains_key(&sid)
        {
            return Err(EngineError::InvalidInput("unknown service"));
        }

        let now = now_ms();
        let booking = BookingRequest {
            id,
            business_id,
            service_id,
            customer,
            preferred_start,
            preferred_end,
            proposed: None,
            status: BookingStatus::Requested,
            internal_notes,
            created_at: now,
            updated_at: now,
        };
        let audit = AuditEntry {
            id: Ulid::new(),
            booking_id: id,
            action: TransitionAction::Create,
            from_status: None,
            to_status: BookingStatus::Requested,
            actor_id,
            created_at: now,
            metadata: None,
        };
        let event = Event::BookingCreated {
            business_id,
            booking: booking.clone(),
            audit,
        };
        self.persist_and_apply(business_id, &mut guard, &event)
            .await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(booking)
    }

    // ── Lifecycle transitions ────────────────────────────────

    /// Validate and apply one status transition.
    ///
    /// The conflict re-check, the WAL append, the in-memory status write and
    /// the audit append all happen under the business write lock — the slot
    /// a customer picked may have been taken between query and submit, and
    /// this is where that race is decided.
    ///
    /// Re-applying the current status is a no-op success (no audit entry),
    /// so retried requests are harmless.
    pub async fn apply_transition(
        &self,
        booking_id: Ulid,
        target: BookingStatus,
        proposed: Option<Span>,
        actor_id: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<BookingRequest, EngineError> {
        if let Some(ref span) = proposed {
            validate_span(span)?;
        }
        let business_id = self
            .get_business_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;

        // Bounded lock wait: under contention the loser fails fast with a
        // conflict instead of queueing behind the winner.
        let mut guard = tokio::time::timeout(LOCK_TIMEOUT, bs.write_owned())
            .await
            .map_err(|_| EngineError::SchedulingConflict(None))?;

        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let from = booking.status;

        if from == target {
            return Ok(booking.clone());
        }

        let Some(action) = transition_edge(from, target) else {
            return Err(EngineError::InvalidTransition { from, to: target });
        };

        let effective_proposed = proposed.or(booking.proposed);

        // Entering a blocking status requires a concrete interval, and that
        // interval must clear every *other* blocking commitment right now.
        if target.is_blocking() && target != BookingStatus::Completed {
            let span = effective_proposed.ok_or(EngineError::InvalidInput(
                "a concrete interval is required for this transition",
            ))?;
            if let Err(e) = check_no_conflict(&guard, &span, Some(booking_id)) {
                metrics::counter!(observability::SCHEDULING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
        }

        let audit = AuditEntry {
            id: Ulid::new(),
            booking_id,
            action,
            from_status: Some(from),
            to_status: target,
            actor_id,
            created_at: now_ms(),
            metadata,
        };
        let event = Event::TransitionApplied {
            business_id,
            booking_id,
            proposed: effective_proposed,
            audit,
        };
        self.persist_and_apply(business_id, &mut guard, &event)
            .await?;
        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "action" => observability::action_label(action)
        )
        .increment(1);

        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }
}

fn validate_policy(policy: &BookingPolicy) -> Result<(), EngineError> {
    if policy.max_days_out > MAX_DAYS_OUT_CEILING {
        return Err(EngineError::LimitExceeded("look-ahead window too wide"));
    }
    Ok(())
}
