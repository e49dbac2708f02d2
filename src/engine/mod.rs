mod availability;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod slots;

pub use availability::{DayHours, day_span, resolve};
pub use conflict::{Commitment, conflicts};
pub use error::EngineError;
pub use lifecycle::transition_edge;
pub use queries::BusinessInfo;
pub use slots::{SLOT_STEP_MS, generate, snap_forward};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedBusinessState = Arc<RwLock<BusinessState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's scheduling engine: per-business state, a WAL, and a
/// transition-event hub. All booking writes go through a business write
/// lock, so the conflict re-check and the status write are one atomic unit.
pub struct Engine {
    pub state: DashMap<Ulid, SharedBusinessState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (booking/busy block) id → business id
    pub(super) entity_to_business: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a BusinessState (no locking — caller holds
/// the lock). This is the only code path that mutates business state, both
/// live and during replay.
fn apply_to_business(bs: &mut BusinessState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::PolicyUpdated { policy, .. } => {
            bs.policy = *policy;
        }
        Event::WindowsReplaced { windows, .. } => {
            bs.windows = windows.clone();
        }
        Event::ExceptionSet { date, kind, .. } => {
            bs.exceptions.insert(*date, kind.clone());
        }
        Event::ExceptionCleared { date, .. } => {
            bs.exceptions.remove(date);
        }
        Event::ServiceUpserted { service, .. } => {
            bs.services.insert(service.id, service.clone());
        }
        Event::BusyBlockAdded {
            id,
            business_id,
            span,
            source,
        } => {
            bs.insert_busy_block(BusyBlock {
                id: *id,
                span: *span,
                source: source.clone(),
            });
            entity_map.insert(*id, *business_id);
        }
        Event::BusyBlockRemoved { id, .. } => {
            bs.remove_busy_block(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated {
            business_id,
            booking,
            audit,
        } => {
            bs.bookings.insert(booking.id, booking.clone());
            bs.audit_log.push(audit.clone());
            entity_map.insert(booking.id, *business_id);
        }
        Event::TransitionApplied {
            booking_id,
            proposed,
            audit,
            ..
        } => {
            if let Some(b) = bs.bookings.get_mut(booking_id) {
                b.status = audit.to_status;
                b.proposed = *proposed;
                b.updated_at = audit.created_at;
            }
            bs.audit_log.push(audit.clone());
        }
        // BusinessCreated/Deleted are handled at the DashMap level, not here
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_business: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::BusinessCreated { id, name, policy } => {
                    let bs = BusinessState::new(*id, name.clone(), *policy);
                    engine.state.insert(*id, Arc::new(RwLock::new(bs)));
                }
                Event::BusinessDeleted { id } => {
                    engine.state.remove(id);
                    engine
                        .entity_to_business
                        .retain(|_, business_id| business_id != id);
                }
                other => {
                    if let Some(business_id) = event_business_id(other)
                        && let Some(entry) = engine.state.get(&business_id)
                    {
                        let bs_arc = entry.clone();
                        let mut guard = bs_arc.try_write().expect("replay: uncontended write");
                        apply_to_business(&mut guard, other, &engine.entity_to_business);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_business(&self, id: &Ulid) -> Option<SharedBusinessState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_business_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_business.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, under the caller's write
    /// lock. The notify is fire-and-forget: a missing or lagging subscriber
    /// never fails the write.
    pub(super) async fn persist_and_apply(
        &self,
        business_id: Ulid,
        bs: &mut BusinessState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_business(bs, event, &self.entity_to_business);
        self.notify.send(business_id, event);
        Ok(())
    }

    /// Lookup entity → business, get business, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<BusinessState>), EngineError> {
        let business_id = self
            .get_business_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.write_owned().await;
        Ok((business_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Booking history is preserved by replaying
    /// each audit entry as its own event, in chronological order.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let business_arcs: Vec<SharedBusinessState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        for bs_arc in business_arcs {
            let guard = bs_arc.read().await;
            snapshot_business(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Emit the minimal event sequence that recreates one business.
fn snapshot_business(bs: &BusinessState, events: &mut Vec<Event>) {
    events.push(Event::BusinessCreated {
        id: bs.id,
        name: bs.name.clone(),
        policy: bs.policy,
    });
    if !bs.windows.is_empty() {
        events.push(Event::WindowsReplaced {
            business_id: bs.id,
            windows: bs.windows.clone(),
        });
    }
    for (date, kind) in &bs.exceptions {
        events.push(Event::ExceptionSet {
            business_id: bs.id,
            date: *date,
            kind: kind.clone(),
        });
    }
    for service in bs.services.values() {
        events.push(Event::ServiceUpserted {
            business_id: bs.id,
            service: service.clone(),
        });
    }
    for block in &bs.busy_blocks {
        events.push(Event::BusyBlockAdded {
            id: block.id,
            business_id: bs.id,
            span: block.span,
            source: block.source.clone(),
        });
    }
    // Replay the audit log in order: the creation entry re-emits the booking
    // record, every later entry re-applies its status. Replaying them lands
    // each booking on its current status with the full history intact.
    for entry in &bs.audit_log {
        match entry.action {
            TransitionAction::Create => {
                if let Some(booking) = bs.bookings.get(&entry.booking_id) {
                    events.push(Event::BookingCreated {
                        business_id: bs.id,
                        booking: booking.clone(),
                        audit: entry.clone(),
                    });
                }
            }
            _ => {
                let proposed = bs.bookings.get(&entry.booking_id).and_then(|b| b.proposed);
                events.push(Event::TransitionApplied {
                    business_id: bs.id,
                    booking_id: entry.booking_id,
                    proposed,
                    audit: entry.clone(),
                });
            }
        }
    }
}

/// Extract the business id from an event (for non-Create/Delete events).
fn event_business_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::WindowsReplaced { business_id, .. }
        | Event::ExceptionSet { business_id, .. }
        | Event::ExceptionCleared { business_id, .. }
        | Event::ServiceUpserted { business_id, .. }
        | Event::BusyBlockAdded { business_id, .. }
        | Event::BusyBlockRemoved { business_id, .. }
        | Event::BookingCreated { business_id, .. }
        | Event::TransitionApplied { business_id, .. } => Some(*business_id),
        Event::PolicyUpdated { id, .. } => Some(*id),
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => None,
    }
}
