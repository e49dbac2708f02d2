//! slotwise — an embeddable availability and booking-lifecycle engine.
//!
//! Each tenant runs an isolated [`engine::Engine`] backed by its own
//! write-ahead log. Businesses declare weekly availability windows,
//! date exceptions and a booking policy; the engine answers bookable-slot
//! queries and drives booking requests through an audited lifecycle.
//!
//! State is event-sourced: every mutation is an [`model::Event`] appended
//! to the WAL (group-committed) before it is applied in memory, so a
//! restart replays the log and lands on the exact pre-crash state,
//! audit trail included.

pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod tenant;
pub mod wal;
