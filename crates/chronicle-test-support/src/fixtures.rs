//! Fixture aggregate — a small ledger account used by tests across the
//! workspace to exercise the store, replay, outbox, and projection crates.

use chrono::{DateTime, Utc};
use chronicle_core::aggregate::{AggregateRoot, Snapshotting};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventMetadata};
use chronicle_core::record::EventRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event payload variants for the ledger fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEventKind {
    /// The account was opened.
    AccountOpened {
        /// Display name of the account owner.
        owner: String,
    },
    /// Funds were deposited.
    FundsDeposited {
        /// Amount in minor units.
        amount: i64,
    },
    /// Funds were withdrawn.
    FundsWithdrawn {
        /// Amount in minor units.
        amount: i64,
    },
}

/// Domain event envelope for the ledger fixture.
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: LedgerEventKind,
}

impl DomainEvent for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match &self.kind {
            LedgerEventKind::AccountOpened { .. } => "ledger.account_opened",
            LedgerEventKind::FundsDeposited { .. } => "ledger.funds_deposited",
            LedgerEventKind::FundsWithdrawn { .. } => "ledger.funds_withdrawn",
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(&self.kind).expect("LedgerEventKind serialization is infallible")
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn from_record(record: &EventRecord) -> Result<Self, DomainError> {
        let kind: LedgerEventKind = serde_json::from_value(record.payload.clone())?;
        Ok(Self {
            metadata: record.event_metadata(),
            kind,
        })
    }
}

/// Serialized snapshot state for [`LedgerAccount`].
#[derive(Debug, Serialize, Deserialize)]
struct LedgerAccountState {
    owner: Option<String>,
    balance: i64,
}

/// The fixture aggregate: an account whose balance derives from its event
/// history.
#[derive(Debug)]
pub struct LedgerAccount {
    /// Aggregate identifier.
    pub id: Uuid,
    version: i64,
    /// Owner name, set by `AccountOpened`.
    pub owner: Option<String>,
    /// Current balance in minor units.
    pub balance: i64,
    uncommitted_events: Vec<LedgerEvent>,
}

impl LedgerAccount {
    fn build_event(
        &self,
        event_type: &str,
        kind: LedgerEventKind,
        correlation_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> LedgerEvent {
        LedgerEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: event_type.to_owned(),
                schema_version: 1,
                aggregate_id: self.id,
                sequence_number: self.version + 1,
                user_id: None,
                correlation_id,
                causation_id: correlation_id,
                occurred_at,
            },
            kind,
        }
    }

    /// Raises an event: applies it to local state immediately and appends it
    /// to the uncommitted list.
    fn raise(&mut self, event: LedgerEvent) {
        self.apply(&event);
        self.uncommitted_events.push(event);
    }

    /// Opens the account, producing an `AccountOpened` event.
    pub fn open(&mut self, owner: impl Into<String>, correlation_id: Uuid, clock: &dyn Clock) {
        let event = self.build_event(
            "ledger.account_opened",
            LedgerEventKind::AccountOpened {
                owner: owner.into(),
            },
            correlation_id,
            clock.now(),
        );
        self.raise(event);
    }

    /// Deposits funds, producing a `FundsDeposited` event.
    pub fn deposit(&mut self, amount: i64, correlation_id: Uuid, clock: &dyn Clock) {
        let event = self.build_event(
            "ledger.funds_deposited",
            LedgerEventKind::FundsDeposited { amount },
            correlation_id,
            clock.now(),
        );
        self.raise(event);
    }

    /// Withdraws funds, producing a `FundsWithdrawn` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` when the balance is insufficient.
    pub fn withdraw(
        &mut self,
        amount: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if amount > self.balance {
            return Err(DomainError::Validation("insufficient funds".into()));
        }
        let event = self.build_event(
            "ledger.funds_withdrawn",
            LedgerEventKind::FundsWithdrawn { amount },
            correlation_id,
            clock.now(),
        );
        self.raise(event);
        Ok(())
    }
}

impl AggregateRoot for LedgerAccount {
    type Event = LedgerEvent;

    fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            owner: None,
            balance: 0,
            uncommitted_events: Vec::new(),
        }
    }

    fn aggregate_type() -> &'static str {
        "ledger_account"
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        match &event.kind {
            LedgerEventKind::AccountOpened { owner } => {
                self.owner = Some(owner.clone());
            }
            LedgerEventKind::FundsDeposited { amount } => {
                self.balance += amount;
            }
            LedgerEventKind::FundsWithdrawn { amount } => {
                self.balance -= amount;
            }
        }
        self.version += 1;
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }
}

impl Snapshotting for LedgerAccount {
    fn snapshot_state(&self) -> serde_json::Value {
        serde_json::to_value(LedgerAccountState {
            owner: self.owner.clone(),
            balance: self.balance,
        })
        .expect("LedgerAccountState serialization is infallible")
    }

    fn restore(id: Uuid, version: i64, state: &serde_json::Value) -> Result<Self, DomainError> {
        let state: LedgerAccountState = serde_json::from_value(state.clone())?;
        Ok(Self {
            id,
            version,
            owner: state.owner,
            balance: state.balance,
            uncommitted_events: Vec::new(),
        })
    }
}
