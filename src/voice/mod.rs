//! Voice command interpretation
//!
//! A spoken instruction ("Bob didn't drink the coffee") goes to the external
//! AI service together with the current items and people. What comes back is
//! a list of per-item replacement assignments, checked against the roster
//! before anything touches the session.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::error::SplitError;
use crate::gemini::strip_json_fence;
use crate::media::MediaPayload;
use crate::models::{Person, ReceiptItem};
use crate::Result;

pub mod gemini;
pub use gemini::GeminiVoiceInterpreter;

/// New complete assignment for one item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentUpdate {
    pub item_id: String,
    pub assigned_to: Vec<String>,
}

/// What the interpreter is told about the bill
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceContext {
    pub people: Vec<ContextPerson>,
    pub items: Vec<ContextItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextPerson {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub currently_assigned_to: Vec<String>,
}

impl VoiceContext {
    pub fn new(items: &[ReceiptItem], people: &[Person]) -> Self {
        Self {
            people: people
                .iter()
                .map(|p| ContextPerson {
                    id: p.id.clone(),
                    name: p.name.clone(),
                })
                .collect(),
            items: items
                .iter()
                .map(|i| ContextItem {
                    id: i.id.clone(),
                    name: i.name.clone(),
                    price: price_as_number(&i.price),
                    currently_assigned_to: i.assigned_to.clone(),
                })
                .collect(),
        }
    }

    fn knows_person(&self, person_id: &str) -> bool {
        self.people.iter().any(|p| p.id == person_id)
    }
}

fn price_as_number(price: &BigDecimal) -> f64 {
    price.to_f64().unwrap_or_default()
}

/// Interprets a recorded command against the current bill
#[async_trait]
pub trait VoiceInterpreter: Send + Sync {
    async fn interpret(
        &self,
        context: &VoiceContext,
        audio: &MediaPayload,
    ) -> Result<Vec<AssignmentUpdate>>;
}

#[derive(Debug, Deserialize)]
struct VoiceResponse {
    updates: Vec<AssignmentUpdate>,
}

/// Parse and check the service's JSON text.
///
/// Every person id must be on the roster the service was shown. Repeated ids
/// within one update collapse to one. Unknown item ids pass through; the
/// session ignores them.
pub fn parse_voice_response(text: &str, context: &VoiceContext) -> Result<Vec<AssignmentUpdate>> {
    let response: VoiceResponse = serde_json::from_str(strip_json_fence(text)).map_err(|e| {
        SplitError::VoiceProcessingFailed(format!("unexpected update schema: {}", e))
    })?;

    let mut updates = Vec::with_capacity(response.updates.len());
    for update in response.updates {
        let mut seen = HashSet::new();
        let mut assigned_to = Vec::with_capacity(update.assigned_to.len());

        for person_id in update.assigned_to {
            if !context.knows_person(&person_id) {
                return Err(SplitError::VoiceProcessingFailed(format!(
                    "update for '{}' names unknown person '{}'",
                    update.item_id, person_id
                )));
            }
            if seen.insert(person_id.clone()) {
                assigned_to.push(person_id);
            }
        }

        updates.push(AssignmentUpdate {
            item_id: update.item_id,
            assigned_to,
        });
    }

    debug!(updates = updates.len(), "Voice response parsed");
    Ok(updates)
}

/// Interpreter that replays a canned service response
pub struct FixtureInterpreter {
    response: String,
}

impl FixtureInterpreter {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl VoiceInterpreter for FixtureInterpreter {
    async fn interpret(
        &self,
        context: &VoiceContext,
        _audio: &MediaPayload,
    ) -> Result<Vec<AssignmentUpdate>> {
        parse_voice_response(&self.response, context)
    }
}
