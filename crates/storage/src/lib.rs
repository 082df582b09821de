use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{
        AttributeDefinition, AttributeId, AttributeRecord, DataType, DefinitionId, ParentId,
    },
    error::{ApiException, ErrorCode},
    protocol::{AttributePayload, AttributeWrapper},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct NewDefinition {
    pub name: String,
    pub data_type: DataType,
    pub required: bool,
    pub default_value: Option<String>,
    pub picklist_choices: Option<String>,
}

impl NewDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
            default_value: None,
            picklist_choices: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn with_choices(mut self, picklist_choices: impl Into<String>) -> Self {
        self.picklist_choices = Some(picklist_choices.into());
        self
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every in-memory connection is its own database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open attribute store at '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn create_definition(&self, definition: NewDefinition) -> Result<DefinitionId> {
        let rec = sqlx::query(
            "INSERT INTO attribute_definitions
                (name, data_type, required, default_value, picklist_choices)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&definition.name)
        .bind(definition.data_type.as_str())
        .bind(definition.required)
        .bind(&definition.default_value)
        .bind(&definition.picklist_choices)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to create attribute definition '{}'", definition.name))?;
        Ok(DefinitionId(rec.get::<i64, _>(0)))
    }

    pub async fn list_definitions(&self) -> Result<Vec<AttributeDefinition>> {
        let rows = sqlx::query(
            "SELECT id AS definition_id, name, data_type, required, default_value, picklist_choices
             FROM attribute_definitions
             ORDER BY name COLLATE NOCASE, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(definition_from_row).collect()
    }

    /// Returns one entry per definition for `parent_id`. Definitions without a
    /// stored value come back as unsaved records seeded from their default.
    pub async fn fetch_attributes(&self, parent_id: ParentId) -> Result<Vec<AttributeWrapper>> {
        let rows = sqlx::query(
            "SELECT d.id AS definition_id, d.name, d.data_type, d.required, d.default_value,
                    d.picklist_choices,
                    v.id AS attribute_id, v.text_value, v.number_value, v.date_value,
                    v.checkbox_value, v.picklist_value
             FROM attribute_definitions d
             LEFT JOIN attribute_values v
                    ON v.definition_id = d.id AND v.parent_id = ?
             ORDER BY d.name COLLATE NOCASE, d.id",
        )
        .bind(parent_id.0)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to fetch attributes for parent {}", parent_id.0))?;

        let mut wrappers = Vec::with_capacity(rows.len());
        for row in &rows {
            let definition = definition_from_row(row)?;
            let attribute = match row.try_get::<Option<i64>, _>("attribute_id")? {
                Some(id) => AttributeRecord {
                    id: Some(AttributeId(id)),
                    parent_id,
                    definition_id: definition.id,
                    text_value: row.try_get("text_value")?,
                    number_value: row.try_get("number_value")?,
                    date_value: row.try_get::<Option<NaiveDate>, _>("date_value")?,
                    checkbox_value: row.try_get("checkbox_value")?,
                    picklist_value: row.try_get("picklist_value")?,
                },
                None => AttributeRecord::seeded_from_default(parent_id, &definition),
            };
            wrappers.push(AttributeWrapper {
                attribute,
                definition,
            });
        }
        debug!(parent_id = parent_id.0, rows = wrappers.len(), "fetched attributes");
        Ok(wrappers)
    }

    /// Writes all payloads in one transaction. Payloads with an id update that
    /// row; payloads without one upsert on (parent, definition). The populated
    /// slot must match the definition's data type, and references sent with an
    /// id must match the stored row.
    pub async fn persist_attributes(&self, payloads: &[AttributePayload]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for payload in payloads {
            if payload.populated_slots() > 1 {
                return Err(ApiException::new(
                    ErrorCode::Validation,
                    "attribute payload populates more than one typed value",
                )
                .into());
            }

            match payload.id {
                Some(attribute_id) => {
                    let stored = sqlx::query(
                        "SELECT v.parent_id, v.definition_id, d.data_type
                         FROM attribute_values v
                         JOIN attribute_definitions d ON d.id = v.definition_id
                         WHERE v.id = ?",
                    )
                    .bind(attribute_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
                    let Some(stored) = stored else {
                        return Err(ApiException::new(
                            ErrorCode::NotFound,
                            format!("attribute {} does not exist", attribute_id.0),
                        )
                        .into());
                    };

                    let stored_parent = ParentId(stored.try_get("parent_id")?);
                    let stored_definition = DefinitionId(stored.try_get("definition_id")?);
                    if payload.parent_id.is_some_and(|parent_id| parent_id != stored_parent)
                        || payload
                            .definition_id
                            .is_some_and(|definition_id| definition_id != stored_definition)
                    {
                        return Err(ApiException::new(
                            ErrorCode::Conflict,
                            format!(
                                "attribute {} belongs to parent {} definition {}",
                                attribute_id.0, stored_parent.0, stored_definition.0
                            ),
                        )
                        .into());
                    }
                    ensure_slot_matches(payload, data_type_from_row(&stored)?)?;

                    sqlx::query(
                        "UPDATE attribute_values
                         SET text_value = ?, number_value = ?, date_value = ?,
                             checkbox_value = ?, picklist_value = ?,
                             updated_at = CURRENT_TIMESTAMP
                         WHERE id = ?",
                    )
                    .bind(&payload.text_value)
                    .bind(payload.number_value)
                    .bind(payload.date_value)
                    .bind(payload.checkbox_value)
                    .bind(&payload.picklist_value)
                    .bind(attribute_id.0)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    let (Some(parent_id), Some(definition_id)) =
                        (payload.parent_id, payload.definition_id)
                    else {
                        return Err(ApiException::new(
                            ErrorCode::Validation,
                            "new attributes need a parent and a definition reference",
                        )
                        .into());
                    };

                    let definition = sqlx::query(
                        "SELECT data_type FROM attribute_definitions WHERE id = ?",
                    )
                    .bind(definition_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
                    let Some(definition) = definition else {
                        return Err(ApiException::new(
                            ErrorCode::NotFound,
                            format!("attribute definition {} does not exist", definition_id.0),
                        )
                        .into());
                    };
                    ensure_slot_matches(payload, data_type_from_row(&definition)?)?;

                    sqlx::query(
                        "INSERT INTO attribute_values
                            (parent_id, definition_id, text_value, number_value, date_value,
                             checkbox_value, picklist_value)
                         VALUES (?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(parent_id, definition_id) DO UPDATE SET
                            text_value = excluded.text_value,
                            number_value = excluded.number_value,
                            date_value = excluded.date_value,
                            checkbox_value = excluded.checkbox_value,
                            picklist_value = excluded.picklist_value,
                            updated_at = CURRENT_TIMESTAMP",
                    )
                    .bind(parent_id.0)
                    .bind(definition_id.0)
                    .bind(&payload.text_value)
                    .bind(payload.number_value)
                    .bind(payload.date_value)
                    .bind(payload.checkbox_value)
                    .bind(&payload.picklist_value)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| {
                        format!(
                            "failed to store attribute for parent {} definition {}",
                            parent_id.0, definition_id.0
                        )
                    })?;
                }
            }
        }

        tx.commit().await?;
        debug!(rows = payloads.len(), "persisted attributes");
        Ok(())
    }
}

fn ensure_slot_matches(payload: &AttributePayload, data_type: DataType) -> Result<()> {
    if payload.populated_slots() == 0 {
        return Ok(());
    }
    let matches = match data_type {
        DataType::Text | DataType::LongText => payload.text_value.is_some(),
        DataType::Number => payload.number_value.is_some(),
        DataType::Date => payload.date_value.is_some(),
        DataType::Checkbox => payload.checkbox_value.is_some(),
        DataType::Picklist => payload.picklist_value.is_some(),
        DataType::Unknown => false,
    };
    if matches {
        return Ok(());
    }
    Err(ApiException::new(
        ErrorCode::Validation,
        format!("value does not fit a {data_type} attribute"),
    )
    .into())
}

fn data_type_from_row(row: &SqliteRow) -> Result<DataType> {
    let data_type: String = row.try_get("data_type")?;
    data_type
        .parse()
        .map_err(|_| anyhow!("invalid data type '{data_type}'"))
}

fn definition_from_row(row: &SqliteRow) -> Result<AttributeDefinition> {
    Ok(AttributeDefinition {
        id: DefinitionId(row.try_get("definition_id")?),
        name: row.try_get("name")?,
        data_type: data_type_from_row(row)?,
        required: row.try_get("required")?,
        default_value: row.try_get("default_value")?,
        picklist_choices: row.try_get("picklist_choices")?,
    })
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
