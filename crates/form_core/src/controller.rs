//! Edit/dirty-tracking state machine for a parent record's attributes.

use std::{collections::HashSet, fmt, str::FromStr, sync::Arc};

use chrono::NaiveDate;
use serde::Deserialize;
use shared::{
    domain::{AttributeDefinition, AttributeId, AttributeRecord, DataType, DefinitionId, ParentId},
    protocol::{AttributePayload, AttributeWrapper},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    display::{display_value, parse_number, EditValue},
    mapping::FieldMapping,
    picklist::{picklist_options, PicklistOption},
    user_facing_message, AttributeSink, AttributeSource, MissingAttributeSink,
    MissingAttributeSource, Notifier, NotifyLevel, TracingNotifier,
};

const SAVE_SUCCESS_MESSAGE: &str = "Attributes updated successfully";
const CHECKBOX_CHECKED_ICON: &str = "utility:check";
const CHECKBOX_UNCHECKED_ICON: &str = "utility:close";

/// Identity of a form row: the stored attribute id, or a temporary key for
/// definitions that have no stored value yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Persisted(AttributeId),
    Temporary {
        definition_id: DefinitionId,
        index: usize,
    },
}

impl RowKey {
    fn for_record(record: &AttributeRecord, index: usize) -> Self {
        match record.id {
            Some(id) => RowKey::Persisted(id),
            None => RowKey::Temporary {
                definition_id: record.definition_id,
                index,
            },
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Persisted(id) => write!(f, "{}", id.0),
            RowKey::Temporary {
                definition_id,
                index,
            } => write!(f, "temp_{}_{index}", definition_id.0),
        }
    }
}

impl FromStr for RowKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if let Some(rest) = value.strip_prefix("temp_") {
            let (definition_id, index) = rest
                .split_once('_')
                .ok_or_else(|| format!("malformed temporary row key '{value}'"))?;
            let definition_id = definition_id
                .parse::<i64>()
                .map_err(|_| format!("malformed temporary row key '{value}'"))?;
            let index = index
                .parse::<usize>()
                .map_err(|_| format!("malformed temporary row key '{value}'"))?;
            return Ok(RowKey::Temporary {
                definition_id: DefinitionId(definition_id),
                index,
            });
        }

        value
            .parse::<i64>()
            .map(|id| RowKey::Persisted(AttributeId(id)))
            .map_err(|_| format!("invalid row key '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditGranularity {
    /// Each row enters and leaves edit mode on its own.
    Row,
    /// One edit mode for the whole form.
    #[default]
    Table,
}

impl FromStr for EditGranularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "row" => Ok(EditGranularity::Row),
            "table" => Ok(EditGranularity::Table),
            other => Err(format!("unknown edit granularity '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormOptions {
    pub card_title: String,
    pub granularity: EditGranularity,
    pub field_mapping: FieldMapping,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            card_title: "Attributes".into(),
            granularity: EditGranularity::default(),
            field_mapping: FieldMapping::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("failed to load attributes: {message}")]
    Load { message: String },
    #[error("failed to save attributes: {message}")]
    Save { message: String },
}

impl FormError {
    /// Text shown to the user.
    pub fn message(&self) -> &str {
        match self {
            FormError::Load { message } | FormError::Save { message } => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("'{value}' is not a valid date for {attribute}")]
    InvalidDate { attribute: String, value: String },
    #[error("no attribute row {0}")]
    UnknownRow(RowKey),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRow {
    pub key: RowKey,
    pub record: AttributeRecord,
    pub definition: AttributeDefinition,
    pub edit_value: EditValue,
}

impl AttributeRow {
    fn from_wrapper(wrapper: AttributeWrapper, index: usize) -> Self {
        let AttributeWrapper {
            attribute,
            definition,
        } = wrapper;
        Self {
            key: RowKey::for_record(&attribute, index),
            edit_value: display_value(&attribute, definition.data_type),
            record: attribute,
            definition,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.definition.data_type
    }

    /// Value this row shows when nothing has been edited.
    pub fn stored_value(&self) -> EditValue {
        display_value(&self.record, self.data_type())
    }

    /// Save payload for this row. All typed slots start out null and only the
    /// one matching the data type is filled from the working value. Parent and
    /// definition references are sent for whole-table saves and for rows that
    /// were never stored.
    pub fn to_payload(&self, granularity: EditGranularity) -> Result<AttributePayload, PayloadError> {
        let mut payload = AttributePayload::cleared(self.record.id);
        if granularity == EditGranularity::Table || self.record.id.is_none() {
            payload.parent_id = Some(self.record.parent_id);
            payload.definition_id = Some(self.definition.id);
        }

        let value = self.edit_value.clone().coerce(self.data_type());
        match self.data_type() {
            DataType::Text | DataType::LongText => payload.text_value = Some(value.to_string()),
            DataType::Number => {
                payload.number_value = Some(value.as_number().unwrap_or_default())
            }
            DataType::Date => payload.date_value = parse_date(&self.definition.name, &value)?,
            DataType::Checkbox => payload.checkbox_value = value.as_bool(),
            DataType::Picklist => payload.picklist_value = Some(value.to_string()),
            DataType::Unknown => {}
        }
        Ok(payload)
    }
}

fn parse_date(attribute: &str, value: &EditValue) -> Result<Option<NaiveDate>, PayloadError> {
    let raw = value.to_string();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| PayloadError::InvalidDate {
            attribute: attribute.to_string(),
            value: raw.to_string(),
        })
}

/// Render-ready projection of a row, rebuilt on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeView {
    pub key: RowKey,
    pub record: AttributeRecord,
    pub definition: AttributeDefinition,
    pub edit_value: EditValue,
    pub is_editing: bool,
    pub is_text: bool,
    pub is_long_text: bool,
    pub is_number: bool,
    pub is_date: bool,
    pub is_checkbox: bool,
    pub is_picklist: bool,
    pub checkbox_icon_name: &'static str,
    pub picklist_options: Vec<PicklistOption>,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    rows: Vec<AttributeRow>,
}

impl Snapshot {
    fn row(&self, key: &RowKey) -> Option<&AttributeRow> {
        self.rows.iter().find(|row| &row.key == key)
    }

    fn stored_value(&self, key: &RowKey) -> Option<EditValue> {
        self.row(key).map(AttributeRow::stored_value)
    }

    fn replace(&mut self, row: AttributeRow) {
        match self.rows.iter_mut().find(|existing| existing.key == row.key) {
            Some(existing) => *existing = row,
            None => self.rows.push(row),
        }
    }
}

pub struct AttributeFormController {
    source: Arc<dyn AttributeSource>,
    sink: Arc<dyn AttributeSink>,
    notifier: Arc<dyn Notifier>,
    options: FormOptions,
    parent_id: Option<ParentId>,
    rows: Vec<AttributeRow>,
    snapshot: Snapshot,
    editing_rows: HashSet<RowKey>,
    table_editing: bool,
    dirty: bool,
    loading: bool,
    revision: u64,
    last_error: Option<FormError>,
}

impl AttributeFormController {
    pub fn new(options: FormOptions) -> Self {
        Self::new_with_dependencies(
            options,
            Arc::new(MissingAttributeSource),
            Arc::new(MissingAttributeSink),
            Arc::new(TracingNotifier),
        )
    }

    /// Controller whose fetches and saves both go to `backend`.
    pub fn with_backend<B>(options: FormOptions, backend: Arc<B>, notifier: Arc<dyn Notifier>) -> Self
    where
        B: AttributeSource + AttributeSink + 'static,
    {
        let source: Arc<dyn AttributeSource> = backend.clone();
        Self::new_with_dependencies(options, source, backend, notifier)
    }

    pub fn new_with_dependencies(
        options: FormOptions,
        source: Arc<dyn AttributeSource>,
        sink: Arc<dyn AttributeSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            sink,
            notifier,
            options,
            parent_id: None,
            rows: Vec::new(),
            snapshot: Snapshot::default(),
            editing_rows: HashSet::new(),
            table_editing: false,
            dirty: false,
            loading: false,
            revision: 0,
            last_error: None,
        }
    }

    pub fn options(&self) -> &FormOptions {
        &self.options
    }

    pub fn card_title(&self) -> &str {
        &self.options.card_title
    }

    pub fn parent_id(&self) -> Option<ParentId> {
        self.parent_id
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn has_attributes(&self) -> bool {
        !self.rows.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        self.dirty
    }

    pub fn is_changes_missing(&self) -> bool {
        !self.dirty
    }

    pub fn is_edit_mode(&self) -> bool {
        self.table_editing || !self.editing_rows.is_empty()
    }

    pub fn is_editing(&self, key: &RowKey) -> bool {
        self.table_editing || self.editing_rows.contains(key)
    }

    /// Bumped by every state change, for hosts that detect changes by
    /// identity rather than by value.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_error(&self) -> Option<&FormError> {
        self.last_error.as_ref()
    }

    pub fn rows(&self) -> &[AttributeRow] {
        &self.rows
    }

    pub fn row(&self, key: &RowKey) -> Option<&AttributeRow> {
        self.rows.iter().find(|row| &row.key == key)
    }

    /// Last loaded or saved value for `key`.
    pub fn snapshot_value(&self, key: &RowKey) -> Option<EditValue> {
        self.snapshot.stored_value(key)
    }

    pub fn attributes(&self) -> Vec<AttributeView> {
        self.rows
            .iter()
            .map(|row| {
                let data_type = row.data_type();
                AttributeView {
                    key: row.key.clone(),
                    record: row.record.clone(),
                    definition: row.definition.clone(),
                    edit_value: row.edit_value.clone(),
                    is_editing: self.is_editing(&row.key),
                    is_text: data_type == DataType::Text,
                    is_long_text: data_type == DataType::LongText,
                    is_number: data_type == DataType::Number,
                    is_date: data_type == DataType::Date,
                    is_checkbox: data_type == DataType::Checkbox,
                    is_picklist: data_type == DataType::Picklist,
                    checkbox_icon_name: if row.edit_value.is_truthy() {
                        CHECKBOX_CHECKED_ICON
                    } else {
                        CHECKBOX_UNCHECKED_ICON
                    },
                    picklist_options: picklist_options(&row.definition),
                }
            })
            .collect()
    }

    /// Replaces the form contents with the attributes of `parent_id`. On
    /// failure the form keeps its previous rows and snapshot.
    pub async fn load(&mut self, parent_id: ParentId) -> Result<(), FormError> {
        self.loading = true;
        self.touch();

        let fetched = self.source.fetch_attributes(parent_id).await;
        let wrappers = match fetched {
            Ok(wrappers) => wrappers,
            Err(err) => {
                warn!(parent_id = parent_id.0, error = %err, "attribute load failed");
                return self.fail(FormError::Load {
                    message: user_facing_message(&err),
                });
            }
        };

        self.rows = wrappers
            .into_iter()
            .enumerate()
            .map(|(index, wrapper)| AttributeRow::from_wrapper(wrapper, index))
            .collect();
        self.snapshot = Snapshot {
            rows: self.rows.clone(),
        };
        self.parent_id = Some(parent_id);
        self.editing_rows.clear();
        self.table_editing = false;
        self.dirty = false;
        self.loading = false;
        self.last_error = None;
        self.touch();

        info!(parent_id = parent_id.0, rows = self.rows.len(), "loaded attributes");
        Ok(())
    }

    /// Loads the current parent again. Does nothing before the first load.
    pub async fn reload(&mut self) -> Result<(), FormError> {
        match self.parent_id {
            Some(parent_id) => self.load(parent_id).await,
            None => Ok(()),
        }
    }

    /// Puts `key` into edit mode, or the whole form for table granularity.
    /// Returns `false` for an unknown row.
    pub fn edit(&mut self, key: &RowKey) -> bool {
        if self.row(key).is_none() {
            return false;
        }
        match self.options.granularity {
            EditGranularity::Row => {
                self.editing_rows.insert(key.clone());
            }
            EditGranularity::Table => self.table_editing = true,
        }
        self.touch();
        debug!(%key, "entered edit mode");
        true
    }

    pub fn edit_all(&mut self) {
        self.table_editing = true;
        self.touch();
    }

    /// Reverts one row to its snapshot value and leaves its edit mode. Table
    /// granularity has a single edit mode, so cancelling any row cancels the
    /// whole form.
    pub fn cancel(&mut self, key: &RowKey) -> bool {
        if self.row(key).is_none() {
            return false;
        }
        if self.options.granularity == EditGranularity::Table {
            self.cancel_all();
            return true;
        }

        let original = self.snapshot.stored_value(key);
        let Some(row) = self.rows.iter_mut().find(|row| &row.key == key) else {
            return false;
        };
        if let Some(original) = original {
            row.edit_value = original;
        }
        self.editing_rows.remove(key);
        self.recompute_dirty();
        self.touch();
        true
    }

    /// Leaves edit mode everywhere and restores every row from the snapshot.
    pub fn cancel_all(&mut self) {
        self.rows = self
            .snapshot
            .rows
            .iter()
            .cloned()
            .map(|mut row| {
                row.edit_value = row.stored_value();
                row
            })
            .collect();
        self.editing_rows.clear();
        self.table_editing = false;
        self.dirty = false;
        self.touch();
    }

    /// Sets the working value of `key`, coerced to the row's data type.
    /// Returns `false` for an unknown row.
    pub fn set_value(&mut self, key: &RowKey, value: impl Into<EditValue>) -> bool {
        let Some(index) = self.rows.iter().position(|row| &row.key == key) else {
            return false;
        };
        let data_type = self.rows[index].data_type();
        self.rows[index].edit_value = value.into().coerce(data_type);
        self.recompute_dirty();
        self.touch();
        true
    }

    /// String input variant of [`set_value`](Self::set_value) for text-based
    /// front ends.
    pub fn set_raw(&mut self, key: &RowKey, raw: &str) -> bool {
        let Some(data_type) = self.row(key).map(AttributeRow::data_type) else {
            return false;
        };
        let value = match data_type {
            DataType::Number => EditValue::Number(parse_number(raw)),
            _ => EditValue::Text(raw.to_string()),
        };
        self.set_value(key, value)
    }

    /// Payloads a whole-form save would send, rendered with the configured
    /// field mapping.
    pub fn preview_payloads(&self) -> Result<Vec<serde_json::Value>, PayloadError> {
        self.rows
            .iter()
            .map(|row| {
                row.to_payload(self.options.granularity)
                    .map(|payload| self.options.field_mapping.render(&payload))
            })
            .collect()
    }

    pub async fn save(&mut self) -> Result<(), FormError> {
        let keys: Vec<RowKey> = self.rows.iter().map(|row| row.key.clone()).collect();
        self.save_rows(&keys).await
    }

    pub async fn save_row(&mut self, key: &RowKey) -> Result<(), FormError> {
        self.save_rows(std::slice::from_ref(key)).await
    }

    /// Persists the given rows as one batch. On success their snapshot entries
    /// take the saved values and they leave edit mode; on failure nothing but
    /// the loading flag changes.
    pub async fn save_rows(&mut self, keys: &[RowKey]) -> Result<(), FormError> {
        self.loading = true;
        self.touch();

        let payloads = match self.build_payloads(keys) {
            Ok(payloads) => payloads,
            Err(err) => {
                return self.fail(FormError::Save {
                    message: err.to_string(),
                })
            }
        };

        let persisted = self.sink.persist_attributes(&payloads).await;
        if let Err(err) = persisted {
            warn!(rows = payloads.len(), error = %err, "attribute save failed");
            return self.fail(FormError::Save {
                message: user_facing_message(&err),
            });
        }

        for (key, payload) in keys.iter().zip(&payloads) {
            if let Some(row) = self.rows.iter_mut().find(|row| &row.key == key) {
                row.record.apply_payload(payload);
                row.edit_value = row.stored_value();
                self.snapshot.replace(row.clone());
            }
            self.editing_rows.remove(key);
        }
        let saved_all = self.rows.iter().all(|row| keys.contains(&row.key));
        if saved_all {
            self.table_editing = false;
            self.editing_rows.clear();
        }

        self.recompute_dirty();
        self.loading = false;
        self.last_error = None;
        self.touch();

        info!(rows = payloads.len(), "saved attributes");
        self.notifier
            .notify("Success", SAVE_SUCCESS_MESSAGE, NotifyLevel::Success);
        Ok(())
    }

    fn build_payloads(&self, keys: &[RowKey]) -> Result<Vec<AttributePayload>, PayloadError> {
        keys.iter()
            .map(|key| {
                self.row(key)
                    .ok_or_else(|| PayloadError::UnknownRow(key.clone()))?
                    .to_payload(self.options.granularity)
            })
            .collect()
    }

    fn recompute_dirty(&mut self) {
        self.dirty = self.rows.iter().any(|row| {
            self.snapshot
                .stored_value(&row.key)
                .is_some_and(|original| original != row.edit_value)
        });
    }

    fn fail(&mut self, error: FormError) -> Result<(), FormError> {
        self.loading = false;
        self.notifier
            .notify("Error", error.message(), NotifyLevel::Error);
        self.last_error = Some(error.clone());
        self.touch();
        Err(error)
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
