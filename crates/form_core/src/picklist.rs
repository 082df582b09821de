use serde::Serialize;
use shared::domain::AttributeDefinition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PicklistOption {
    pub label: String,
    pub value: String,
}

impl PicklistOption {
    fn new(choice: &str) -> Self {
        Self {
            label: choice.to_string(),
            value: choice.to_string(),
        }
    }
}

pub fn picklist_options(definition: &AttributeDefinition) -> Vec<PicklistOption> {
    parse_choices(definition.picklist_choices.as_deref())
}

/// Splits a `;`-delimited choice list into trimmed options.
pub fn parse_choices(choices: Option<&str>) -> Vec<PicklistOption> {
    let Some(choices) = choices else {
        return Vec::new();
    };

    choices
        .split(';')
        .map(str::trim)
        .filter(|choice| !choice.is_empty())
        .map(PicklistOption::new)
        .collect()
}
