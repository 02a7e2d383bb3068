//! Gemini-powered voice command interpretation

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::GeminiConfig;
use crate::error::SplitError;
use crate::gemini::{GeminiClient, StructuredRequest};
use crate::media::MediaPayload;
use crate::Result;

use super::{parse_voice_response, AssignmentUpdate, VoiceContext, VoiceInterpreter};

pub struct GeminiVoiceInterpreter {
    client: GeminiClient,
}

impl GeminiVoiceInterpreter {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(config)?,
        })
    }
}

#[async_trait]
impl VoiceInterpreter for GeminiVoiceInterpreter {
    async fn interpret(
        &self,
        context: &VoiceContext,
        audio: &MediaPayload,
    ) -> Result<Vec<AssignmentUpdate>> {
        info!(
            items = context.items.len(),
            people = context.people.len(),
            "Interpreting voice command"
        );

        let request = StructuredRequest {
            media: audio.clone(),
            instruction: build_prompt(context)?,
            response_schema: update_schema(),
            temperature: None,
        };

        let text = self
            .client
            .generate_structured(&request)
            .await
            .map_err(|e| SplitError::VoiceProcessingFailed(e.to_string()))?;

        parse_voice_response(&text, context)
    }
}

fn build_prompt(context: &VoiceContext) -> Result<String> {
    let state = serde_json::to_string_pretty(context)?;

    Ok(format!(
        r#"You are a bill splitting assistant.

Current State:
{}

Instructions:
1. Listen to the user's voice command regarding how to split the bill.
2. Interpret the command semantically to re-distribute items.
3. "Rebalancing" Rule: If a user is removed from an item (e.g., "Bob didn't drink"), you MUST assign that item to the REMAINING people in the group.
4. CRITICAL: Do NOT leave items unassigned (assignedTo: []) unless the user explicitly says "remove everyone" or "no one had this". If a specific person is removed, the costs MUST be redistributed to the others.
5. "Split evenly" means assign every item to every person.
6. "Split evenly but X didn't have Y" means assign Y to everyone EXCEPT X.
7. Return a JSON object with 'updates'. Each update must contain the 'itemId' and the NEW complete list of 'assignedTo' person IDs for that item.
8. Only return updates for items that need to change."#,
        state
    ))
}

fn update_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "updates": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "itemId": { "type": "STRING", "description": "The ID of the item to update" },
                        "assignedTo": {
                            "type": "ARRAY",
                            "items": { "type": "STRING" },
                            "description": "The list of person IDs assigned to this item after the command"
                        }
                    },
                    "required": ["itemId", "assignedTo"]
                }
            }
        },
        "required": ["updates"]
    })
}
