use std::{collections::HashMap, fs, path::Path};

use anyhow::{anyhow, Context};
use form_core::{EditGranularity, FieldMapping, FormOptions};

pub const DEFAULT_CONFIG_PATH: &str = "attrctl.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub card_title: String,
    pub edit_granularity: String,
    pub field_mapping: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/attributes.db".into(),
            card_title: "Attributes".into(),
            edit_granularity: "table".into(),
            field_mapping: "snake_case".into(),
        }
    }
}

impl Settings {
    pub fn form_options(&self) -> anyhow::Result<FormOptions> {
        let granularity = self
            .edit_granularity
            .parse::<EditGranularity>()
            .map_err(|err| anyhow!(err))?;
        let field_mapping = self
            .field_mapping
            .parse::<FieldMapping>()
            .with_context(|| format!("invalid field mapping '{}'", self.field_mapping))?;
        Ok(FormOptions {
            card_title: self.card_title.clone(),
            granularity,
            field_mapping,
        })
    }
}

/// Defaults, then the config file when present, then the environment.
pub fn load_settings(config_path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        tracing::warn!("ignoring unreadable attrctl config file");
        return;
    };

    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("card_title") {
        settings.card_title = v.clone();
    }
    if let Some(v) = file_cfg.get("edit_granularity") {
        settings.edit_granularity = v.clone();
    }
    if let Some(v) = file_cfg.get("field_mapping") {
        settings.field_mapping = v.clone();
    }
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__CARD_TITLE") {
        settings.card_title = v;
    }
    if let Some(v) = lookup("APP__EDIT_GRANULARITY") {
        settings.edit_granularity = v;
    }
    if let Some(v) = lookup("APP__FIELD_MAPPING") {
        settings.field_mapping = v;
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
