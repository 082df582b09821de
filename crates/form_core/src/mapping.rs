//! Field naming schemes for save payloads sent over the wire.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::protocol::AttributePayload;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("unknown field mapping '{0}'")]
    UnknownPreset(String),
}

/// Names of the payload keys. Reference keys are only emitted when the
/// payload carries the reference; typed value keys are always emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub id: String,
    pub parent: String,
    pub definition: String,
    pub text: String,
    pub number: String,
    pub date: String,
    pub checkbox: String,
    pub picklist: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::snake_case()
    }
}

impl FieldMapping {
    pub fn sponsorable() -> Self {
        Self {
            id: "Id".into(),
            parent: "Sponsorable__c".into(),
            definition: "Attribute_Type__c".into(),
            text: "Text_Value__c".into(),
            number: "Number_Value__c".into(),
            date: "Date_Value__c".into(),
            checkbox: "Checkbox_Value__c".into(),
            picklist: "Picklist_Value__c".into(),
        }
    }

    pub fn snake_case() -> Self {
        Self {
            id: "id".into(),
            parent: "parent_id".into(),
            definition: "definition_id".into(),
            text: "text_value".into(),
            number: "number_value".into(),
            date: "date_value".into(),
            checkbox: "checkbox_value".into(),
            picklist: "picklist_value".into(),
        }
    }

    pub fn render(&self, payload: &AttributePayload) -> Value {
        let mut object = Map::new();
        if let Some(id) = payload.id {
            object.insert(self.id.clone(), Value::from(id.0));
        }
        if let Some(parent_id) = payload.parent_id {
            object.insert(self.parent.clone(), Value::from(parent_id.0));
        }
        if let Some(definition_id) = payload.definition_id {
            object.insert(self.definition.clone(), Value::from(definition_id.0));
        }
        object.insert(self.text.clone(), Value::from(payload.text_value.clone()));
        object.insert(self.number.clone(), Value::from(payload.number_value));
        object.insert(
            self.date.clone(),
            Value::from(
                payload
                    .date_value
                    .map(|date| date.format("%Y-%m-%d").to_string()),
            ),
        );
        object.insert(self.checkbox.clone(), Value::from(payload.checkbox_value));
        object.insert(
            self.picklist.clone(),
            Value::from(payload.picklist_value.clone()),
        );
        Value::Object(object)
    }
}

impl FromStr for FieldMapping {
    type Err = MappingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sponsorable" | "salesforce" => Ok(Self::sponsorable()),
            "snake_case" | "snake" | "default" => Ok(Self::snake_case()),
            other => Err(MappingError::UnknownPreset(other.to_string())),
        }
    }
}
