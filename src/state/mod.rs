//! Bill state machine
//!
//! upload → analyzing → assign → summary, with reset back to upload from
//! anywhere. A `BillSession` exclusively owns one `BillState`; every mutation
//! goes through the methods here.
//!
//! Receipt reading and voice commands wait on the network, so each is split
//! into `begin_*` and `complete_*`. `begin_*` sets the busy flag and hands
//! back a ticket carrying what the external call needs; the caller makes the
//! call without holding the session and brings the result back to
//! `complete_*`. A result whose ticket predates a `reset` is discarded.

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocation::{allocate, Allocation};
use crate::error::SplitError;
use crate::ingestion::ReceiptExtractor;
use crate::media::MediaPayload;
use crate::models::{BillState, BillStep, Person, ReceiptData, ReceiptItem, COLORS};
use crate::voice::{AssignmentUpdate, VoiceContext, VoiceInterpreter};
use crate::Result;

/// Which external request is outstanding
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Ingestion,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
    /// No item with that id; nothing changed
    UnknownItem,
}

/// Outcome of bringing an external result back to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    Applied(T),
    /// The session moved on (reset, or left the step) while the request ran
    Discarded,
}

#[derive(Debug, Clone)]
pub struct IngestionTicket {
    epoch: u64,
    pub image: MediaPayload,
}

#[derive(Debug, Clone)]
pub struct VoiceTicket {
    epoch: u64,
    pub context: VoiceContext,
    pub audio: MediaPayload,
}

/// One bill-splitting session
#[derive(Debug)]
pub struct BillSession {
    id: Uuid,
    state: BillState,
    in_flight: Option<RequestKind>,
    /// Bumped on reset so late results can be recognised
    epoch: u64,
}

impl BillSession {
    /// Fresh session with the default roster
    pub fn new() -> Self {
        Self::with_state(BillState::default())
    }

    pub fn with_state(state: BillState) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            in_flight: None,
            epoch: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &BillState {
        &self.state
    }

    pub fn step(&self) -> BillStep {
        self.state.step
    }

    pub fn receipt(&self) -> Option<&ReceiptData> {
        self.state.raw_receipt_data.as_ref()
    }

    pub fn people(&self) -> &[Person] {
        &self.state.people
    }

    pub fn host(&self) -> Option<&Person> {
        self.state.person(&self.state.host_person_id)
    }

    pub fn in_flight(&self) -> Option<RequestKind> {
        self.in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Items nobody is assigned to yet
    pub fn unassigned_items(&self) -> Vec<&ReceiptItem> {
        self.receipt()
            .map(|r| r.unassigned_items().collect())
            .unwrap_or_default()
    }

    // =============================
    // Receipt ingestion
    // =============================

    /// Accept a receipt photo and move to `analyzing`
    pub fn begin_ingestion(&mut self, image: MediaPayload) -> Result<IngestionTicket> {
        self.ensure_idle()?;
        self.ensure_step("submit_image", &[BillStep::Upload])?;

        self.state.step = BillStep::Analyzing;
        self.state.receipt_image = Some(image.clone());
        self.state.raw_receipt_data = None;
        self.in_flight = Some(RequestKind::Ingestion);

        info!(session_id = %self.id, "Receipt submitted, analyzing");

        Ok(IngestionTicket {
            epoch: self.epoch,
            image,
        })
    }

    /// Store the extracted receipt, or fall back to `upload` on failure.
    ///
    /// Failures come back as `IngestionFailed` whatever the extractor raised.
    pub fn complete_ingestion(
        &mut self,
        ticket: IngestionTicket,
        result: Result<ReceiptData>,
    ) -> Result<Completion<()>> {
        if ticket.epoch != self.epoch || self.state.step != BillStep::Analyzing {
            debug!(session_id = %self.id, "Dropping stale ingestion result");
            return Ok(Completion::Discarded);
        }
        self.in_flight = None;

        match result {
            Ok(mut receipt) => {
                for (idx, item) in receipt.items.iter_mut().enumerate() {
                    item.id = format!("item-{}", idx);
                    item.assigned_to.clear();
                }

                info!(
                    session_id = %self.id,
                    merchant = %receipt.merchant_name,
                    items = receipt.items.len(),
                    "Receipt ready for assignment"
                );

                self.state.raw_receipt_data = Some(receipt);
                self.state.step = BillStep::Assign;
                Ok(Completion::Applied(()))
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Receipt ingestion failed");

                self.state.raw_receipt_data = None;
                self.state.receipt_image = None;
                self.state.step = BillStep::Upload;

                Err(match e {
                    SplitError::IngestionFailed(_) => e,
                    other => SplitError::IngestionFailed(other.to_string()),
                })
            }
        }
    }

    /// Read a receipt photo start to finish
    pub async fn submit_image(
        &mut self,
        image: MediaPayload,
        extractor: &dyn ReceiptExtractor,
    ) -> Result<()> {
        let ticket = self.begin_ingestion(image)?;
        let result = extractor.extract(&ticket.image).await;
        self.complete_ingestion(ticket, result).map(|_| ())
    }

    // =============================
    // Assignment
    // =============================

    /// Flip whether `person_id` shares `item_id`
    pub fn toggle_assignment(&mut self, item_id: &str, person_id: &str) -> Result<ToggleOutcome> {
        self.ensure_step("toggle_assignment", &[BillStep::Assign])?;
        self.ensure_person(person_id)?;

        let session_id = self.id;
        let Some(item) = self
            .state
            .raw_receipt_data
            .as_mut()
            .and_then(|r| r.item_mut(item_id))
        else {
            debug!(%session_id, item_id, "Toggle for unknown item ignored");
            return Ok(ToggleOutcome::UnknownItem);
        };

        let outcome = match item.assigned_to.iter().position(|id| id == person_id) {
            Some(pos) => {
                item.assigned_to.remove(pos);
                ToggleOutcome::Removed
            }
            None => {
                item.assigned_to.push(person_id.to_string());
                ToggleOutcome::Added
            }
        };

        debug!(%session_id, item_id, person_id, ?outcome, "Assignment toggled");
        Ok(outcome)
    }

    /// Replace assignments wholesale, one item per update.
    ///
    /// Updates naming unknown items are skipped. Person ids are all checked
    /// before any item changes. Returns how many items were updated.
    pub fn apply_voice_updates(&mut self, updates: &[AssignmentUpdate]) -> Result<usize> {
        self.ensure_step("apply_voice_updates", &[BillStep::Assign])?;

        for update in updates {
            for person_id in &update.assigned_to {
                self.ensure_person(person_id)?;
            }
        }

        let Some(receipt) = self.state.raw_receipt_data.as_mut() else {
            return Ok(0);
        };

        let mut applied = 0;
        for update in updates {
            match receipt.item_mut(&update.item_id) {
                Some(item) => {
                    let mut assigned_to: Vec<String> = Vec::with_capacity(update.assigned_to.len());
                    for person_id in &update.assigned_to {
                        if !assigned_to.contains(person_id) {
                            assigned_to.push(person_id.clone());
                        }
                    }
                    item.assigned_to = assigned_to;
                    applied += 1;
                }
                None => {
                    debug!(item_id = %update.item_id, "Voice update for unknown item ignored");
                }
            }
        }

        info!(session_id = %self.id, applied, received = updates.len(), "Voice updates applied");
        Ok(applied)
    }

    // =============================
    // Voice commands
    // =============================

    /// Snapshot the bill for the interpreter and mark the session busy
    pub fn begin_voice(&mut self, audio: MediaPayload) -> Result<VoiceTicket> {
        self.ensure_idle()?;
        self.ensure_step("voice_command", &[BillStep::Assign])?;

        let items = self
            .receipt()
            .map(|r| r.items.as_slice())
            .unwrap_or_default();
        let context = VoiceContext::new(items, &self.state.people);

        self.in_flight = Some(RequestKind::Voice);
        info!(session_id = %self.id, "Voice command submitted");

        Ok(VoiceTicket {
            epoch: self.epoch,
            context,
            audio,
        })
    }

    /// Apply interpreted updates; on failure the assignments stay as they were
    pub fn complete_voice(
        &mut self,
        ticket: VoiceTicket,
        result: Result<Vec<AssignmentUpdate>>,
    ) -> Result<Completion<usize>> {
        if ticket.epoch != self.epoch || self.in_flight != Some(RequestKind::Voice) {
            debug!(session_id = %self.id, "Dropping stale voice result");
            return Ok(Completion::Discarded);
        }
        self.in_flight = None;

        if self.state.step != BillStep::Assign {
            debug!(session_id = %self.id, step = %self.state.step, "Voice result arrived after leaving assign");
            return Ok(Completion::Discarded);
        }

        let updates = result.map_err(|e| {
            warn!(session_id = %self.id, error = %e, "Voice processing failed");
            match e {
                SplitError::VoiceProcessingFailed(_) => e,
                other => SplitError::VoiceProcessingFailed(other.to_string()),
            }
        })?;

        let applied = self.apply_voice_updates(&updates).map_err(|e| {
            warn!(session_id = %self.id, error = %e, "Voice updates rejected");
            SplitError::VoiceProcessingFailed(e.to_string())
        })?;

        Ok(Completion::Applied(applied))
    }

    /// Interpret and apply a recorded command start to finish
    pub async fn process_voice_command(
        &mut self,
        audio: MediaPayload,
        interpreter: &dyn VoiceInterpreter,
    ) -> Result<Completion<usize>> {
        let ticket = self.begin_voice(audio)?;
        let result = interpreter.interpret(&ticket.context, &ticket.audio).await;
        self.complete_voice(ticket, result)
    }

    // =============================
    // Roster
    // =============================

    /// Add someone to the roster with the next palette color
    pub fn add_person(&mut self, name: &str) -> Result<&Person> {
        self.ensure_step("add_person", &[BillStep::Upload, BillStep::Assign])?;

        let name = name.trim();
        if name.is_empty() {
            return Err(SplitError::InvalidInput("person name is empty".to_string()));
        }

        let count = self.state.people.len();
        let color = COLORS[count % COLORS.len()];
        let id = (count + 1..)
            .map(|n| format!("p{}", n))
            .find(|id| !self.state.has_person(id))
            .unwrap_or_else(|| format!("p-{}", Uuid::new_v4()));

        info!(session_id = %self.id, person_id = %id, person_name = name, "Person added");

        self.state.people.push(Person::new(id, name, color));
        Ok(&self.state.people[count])
    }

    /// Choose who receives the money
    pub fn set_host(&mut self, person_id: &str) -> Result<()> {
        self.ensure_person(person_id)?;
        self.state.host_person_id = person_id.to_string();
        debug!(session_id = %self.id, person_id, "Host changed");
        Ok(())
    }

    /// Record a PayNow number; blank clears it
    pub fn set_mobile_number(&mut self, person_id: &str, mobile_number: &str) -> Result<()> {
        self.ensure_person(person_id)?;
        let mobile_number = mobile_number.trim();

        if let Some(person) = self.state.people.iter_mut().find(|p| p.id == person_id) {
            person.mobile_number = if mobile_number.is_empty() {
                None
            } else {
                Some(mobile_number.to_string())
            };
        }
        Ok(())
    }

    // =============================
    // Summary
    // =============================

    /// Move to `summary` and return the split.
    ///
    /// Unassigned items do not block this; they are left out of every share.
    pub fn finalize(&mut self) -> Result<Allocation> {
        self.ensure_idle()?;
        self.ensure_step("finalize", &[BillStep::Assign])?;

        let allocation = self.allocation()?;
        if allocation.has_unassigned() {
            warn!(
                session_id = %self.id,
                unassigned = allocation.unassigned_item_ids.len(),
                "Finalizing with unassigned items"
            );
        }

        self.state.step = BillStep::Summary;
        info!(session_id = %self.id, "Bill finalized");
        Ok(allocation)
    }

    /// Split of the current receipt, in any step that has one
    pub fn allocation(&self) -> Result<Allocation> {
        let receipt = self.receipt().ok_or_else(|| {
            SplitError::InvalidReceiptState("no receipt has been analyzed".to_string())
        })?;
        allocate(receipt, &self.state.people)
    }

    /// Back to `upload`, dropping the receipt but keeping the roster and host
    pub fn reset(&mut self) {
        self.state.step = BillStep::Upload;
        self.state.receipt_image = None;
        self.state.raw_receipt_data = None;
        self.in_flight = None;
        self.epoch += 1;
        info!(session_id = %self.id, "Session reset");
    }

    // =============================
    // Guards
    // =============================

    fn ensure_idle(&self) -> Result<()> {
        match self.in_flight {
            Some(kind) => {
                debug!(session_id = %self.id, ?kind, "Rejected while request in flight");
                Err(SplitError::RequestInFlight)
            }
            None => Ok(()),
        }
    }

    fn ensure_step(&self, operation: &'static str, allowed: &[BillStep]) -> Result<()> {
        if allowed.contains(&self.state.step) {
            Ok(())
        } else {
            Err(SplitError::InvalidTransition {
                operation,
                step: self.state.step,
            })
        }
    }

    fn ensure_person(&self, person_id: &str) -> Result<()> {
        if self.state.has_person(person_id) {
            Ok(())
        } else {
            Err(SplitError::InvalidReceiptState(format!(
                "unknown person '{}'",
                person_id
            )))
        }
    }
}

impl Default for BillSession {
    fn default() -> Self {
        Self::new()
    }
}
