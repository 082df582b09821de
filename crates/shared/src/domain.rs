use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ParentId);
id_newtype!(AttributeId);
id_newtype!(DefinitionId);

/// Value type an attribute definition declares. Decides which typed slot of an
/// [`AttributeRecord`] carries the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Text,
    LongText,
    Number,
    Date,
    Checkbox,
    Picklist,
    #[serde(other)]
    Unknown,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Text,
        DataType::LongText,
        DataType::Number,
        DataType::Date,
        DataType::Checkbox,
        DataType::Picklist,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Text => "Text",
            DataType::LongText => "LongText",
            DataType::Number => "Number",
            DataType::Date => "Date",
            DataType::Checkbox => "Checkbox",
            DataType::Picklist => "Picklist",
            DataType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let data_type = DataType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
            .unwrap_or(DataType::Unknown);
        Ok(data_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: DefinitionId,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub picklist_choices: Option<String>,
}

/// One stored value of an attribute for a parent record. Only the slot that
/// matches the definition's [`DataType`] is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    #[serde(default)]
    pub id: Option<AttributeId>,
    pub parent_id: ParentId,
    pub definition_id: DefinitionId,
    #[serde(default)]
    pub text_value: Option<String>,
    #[serde(default)]
    pub number_value: Option<f64>,
    #[serde(default)]
    pub date_value: Option<NaiveDate>,
    #[serde(default)]
    pub checkbox_value: Option<bool>,
    #[serde(default)]
    pub picklist_value: Option<String>,
}

impl AttributeRecord {
    pub fn unsaved(parent_id: ParentId, definition_id: DefinitionId) -> Self {
        Self {
            id: None,
            parent_id,
            definition_id,
            text_value: None,
            number_value: None,
            date_value: None,
            checkbox_value: None,
            picklist_value: None,
        }
    }

    /// Builds an unsaved record whose matching slot is seeded from the
    /// definition's default value. Defaults that do not parse for the type are
    /// ignored.
    pub fn seeded_from_default(parent_id: ParentId, definition: &AttributeDefinition) -> Self {
        let mut record = Self::unsaved(parent_id, definition.id);
        let Some(default) = definition
            .default_value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return record;
        };

        match definition.data_type {
            DataType::Text | DataType::LongText => record.text_value = Some(default.to_string()),
            DataType::Number => record.number_value = default.parse::<f64>().ok(),
            DataType::Date => {
                record.date_value = NaiveDate::parse_from_str(default, "%Y-%m-%d").ok()
            }
            DataType::Checkbox => record.checkbox_value = parse_flag(default),
            DataType::Picklist => record.picklist_value = Some(default.to_string()),
            DataType::Unknown => {}
        }
        record
    }
}

/// Lenient boolean parsing shared by defaults and user input.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "checked" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
