//! Type-dispatch between an attribute's typed value slots and the single
//! working value a form edits.

use std::fmt;

use serde::{Deserialize, Serialize};
use shared::domain::{parse_flag, AttributeRecord, DataType};

/// Working value of one form row. Text, long text, date and picklist rows all
/// edit a `Text` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EditValue {
    Checkbox(bool),
    Number(f64),
    Text(String),
}

impl EditValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            EditValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EditValue::Checkbox(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Truthiness used for checkbox icons: `false`, `0` and `""` are unset.
    pub fn is_truthy(&self) -> bool {
        match self {
            EditValue::Checkbox(flag) => *flag,
            EditValue::Number(number) => *number != 0.0,
            EditValue::Text(text) => !text.is_empty(),
        }
    }

    /// Converts this value to the shape `data_type` edits. Unparsable numbers
    /// become 0 and unparsable flags become `false`.
    pub fn coerce(self, data_type: DataType) -> EditValue {
        match data_type {
            DataType::Number => EditValue::Number(match self {
                EditValue::Number(number) => finite_or_zero(number),
                EditValue::Text(text) => parse_number(&text),
                EditValue::Checkbox(flag) => f64::from(u8::from(flag)),
            }),
            DataType::Checkbox => EditValue::Checkbox(match self {
                EditValue::Checkbox(flag) => flag,
                EditValue::Number(number) => number != 0.0,
                EditValue::Text(text) => parse_flag(&text).unwrap_or(false),
            }),
            DataType::Text
            | DataType::LongText
            | DataType::Date
            | DataType::Picklist
            | DataType::Unknown => match self {
                EditValue::Text(text) => EditValue::Text(text),
                other => EditValue::Text(other.to_string()),
            },
        }
    }
}

impl fmt::Display for EditValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditValue::Checkbox(flag) => write!(f, "{flag}"),
            EditValue::Number(number) => write!(f, "{number}"),
            EditValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for EditValue {
    fn from(value: &str) -> Self {
        EditValue::Text(value.to_string())
    }
}

impl From<String> for EditValue {
    fn from(value: String) -> Self {
        EditValue::Text(value)
    }
}

impl From<f64> for EditValue {
    fn from(value: f64) -> Self {
        EditValue::Number(value)
    }
}

impl From<bool> for EditValue {
    fn from(value: bool) -> Self {
        EditValue::Checkbox(value)
    }
}

/// The value a form shows for `record`, taken from the slot that matches
/// `data_type`, with a typed fallback when that slot is empty.
pub fn display_value(record: &AttributeRecord, data_type: DataType) -> EditValue {
    match data_type {
        DataType::Text | DataType::LongText => {
            EditValue::Text(record.text_value.clone().unwrap_or_default())
        }
        DataType::Number => EditValue::Number(record.number_value.map_or(0.0, finite_or_zero)),
        DataType::Date => EditValue::Text(
            record
                .date_value
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ),
        DataType::Checkbox => EditValue::Checkbox(record.checkbox_value.unwrap_or(false)),
        DataType::Picklist => EditValue::Text(record.picklist_value.clone().unwrap_or_default()),
        DataType::Unknown => EditValue::Text(String::new()),
    }
}

/// Reads the leading decimal number of `raw`, ignoring anything after it, so
/// `"12abc"` is 12. Input without a leading number, or a non-finite one, is 0.
pub fn parse_number(raw: &str) -> f64 {
    let raw = raw.trim_start();
    raw[..numeric_prefix_len(raw)]
        .parse::<f64>()
        .map_or(0.0, finite_or_zero)
}

fn numeric_prefix_len(raw: &str) -> usize {
    let bytes = raw.as_bytes();
    let digits_from = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|byte| byte.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let integer_digits = digits_from(end);
    end += integer_digits;

    let mut fraction_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction_digits = digits_from(end + 1);
        if integer_digits > 0 || fraction_digits > 0 {
            end += 1 + fraction_digits;
        }
    }
    if integer_digits == 0 && fraction_digits == 0 {
        return 0;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exponent_digits = digits_from(end + 1 + sign);
        if exponent_digits > 0 {
            end += 1 + sign + exponent_digits;
        }
    }
    end
}

fn finite_or_zero(number: f64) -> f64 {
    if number.is_finite() {
        number
    } else {
        0.0
    }
}

#[cfg(test)]
#[path = "tests/display_tests.rs"]
mod tests;
