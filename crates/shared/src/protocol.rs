use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{AttributeDefinition, AttributeId, AttributeRecord, DefinitionId, ParentId};

/// One fetched attribute: the stored (or not yet stored) value together with
/// the definition that types it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeWrapper {
    pub attribute: AttributeRecord,
    pub definition: AttributeDefinition,
}

/// Save payload for one attribute. Every typed slot is always present so a
/// save overwrites stale values in the slots that do not match the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AttributeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ParentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_id: Option<DefinitionId>,
    pub text_value: Option<String>,
    pub number_value: Option<f64>,
    pub date_value: Option<NaiveDate>,
    pub checkbox_value: Option<bool>,
    pub picklist_value: Option<String>,
}

impl AttributePayload {
    pub fn cleared(id: Option<AttributeId>) -> Self {
        Self {
            id,
            parent_id: None,
            definition_id: None,
            text_value: None,
            number_value: None,
            date_value: None,
            checkbox_value: None,
            picklist_value: None,
        }
    }

    /// Number of typed slots carrying a value.
    pub fn populated_slots(&self) -> usize {
        [
            self.text_value.is_some(),
            self.number_value.is_some(),
            self.date_value.is_some(),
            self.checkbox_value.is_some(),
            self.picklist_value.is_some(),
        ]
        .into_iter()
        .filter(|populated| *populated)
        .count()
    }
}

impl AttributeRecord {
    /// Copies the typed slots of a persisted payload onto this record.
    pub fn apply_payload(&mut self, payload: &AttributePayload) {
        if payload.id.is_some() {
            self.id = payload.id;
        }
        self.text_value = payload.text_value.clone();
        self.number_value = payload.number_value;
        self.date_value = payload.date_value;
        self.checkbox_value = payload.checkbox_value;
        self.picklist_value = payload.picklist_value.clone();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAttributesRequest {
    pub attributes_to_update: Vec<serde_json::Value>,
}
