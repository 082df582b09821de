use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use form_core::{
    AttributeFormController, AttributeView, EditGranularity, FieldMapping, Notifier, NotifyLevel,
    RowKey,
};
use shared::domain::{DataType, ParentId};
use storage::{NewDefinition, Storage};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(about = "View and edit typed attributes attached to parent records")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    granularity: Option<EditGranularity>,
    #[arg(long)]
    field_mapping: Option<FieldMapping>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an attribute definition.
    Define {
        name: String,
        #[arg(long = "type")]
        data_type: DataType,
        #[arg(long)]
        required: bool,
        #[arg(long)]
        default: Option<String>,
        /// Semicolon separated picklist choices.
        #[arg(long)]
        choices: Option<String>,
    },
    /// List attribute definitions.
    Definitions,
    /// Show the attributes of a parent record.
    List { parent_id: i64 },
    /// Edit attributes of a parent record and save them.
    Set {
        parent_id: i64,
        /// Assignments of the form ROW_KEY=VALUE.
        #[arg(required = true)]
        assignments: Vec<String>,
    },
    /// Print the save payloads for a parent record without saving.
    Preview { parent_id: i64 },
}

struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Success => println!("{title}: {message}"),
            NotifyLevel::Error => eprintln!("{title}: {message}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(&cli.config);
    if let Some(database_url) = &cli.database_url {
        settings.database_url = normalize_database_url(database_url);
    }
    let mut options = settings.form_options()?;
    if let Some(granularity) = cli.granularity {
        options.granularity = granularity;
    }
    if let Some(field_mapping) = cli.field_mapping {
        options.field_mapping = field_mapping;
    }

    let storage = Storage::new(&settings.database_url).await?;

    match cli.command {
        Command::Define {
            name,
            data_type,
            required,
            default,
            choices,
        } => {
            if data_type == DataType::Unknown {
                return Err(anyhow!("unsupported data type for '{name}'"));
            }
            let mut definition = NewDefinition::new(&name, data_type).required(required);
            if let Some(default) = default {
                definition = definition.with_default(default);
            }
            if let Some(choices) = choices {
                definition = definition.with_choices(choices);
            }
            let definition_id = storage.create_definition(definition).await?;
            println!("created definition_id={}", definition_id.0);
        }
        Command::Definitions => {
            for definition in storage.list_definitions().await? {
                println!(
                    "{:>4}  {:<24} {:<9} {}",
                    definition.id.0,
                    definition.name,
                    definition.data_type,
                    if definition.required { "required" } else { "" }
                );
            }
        }
        Command::List { parent_id } => {
            let mut controller =
                AttributeFormController::with_backend(options, Arc::new(storage), Arc::new(ConsoleNotifier));
            if controller.load(ParentId(parent_id)).await.is_err() {
                return Ok(ExitCode::FAILURE);
            }
            print_attributes(controller.card_title(), &controller.attributes());
        }
        Command::Set {
            parent_id,
            assignments,
        } => {
            let assignments = assignments
                .iter()
                .map(|raw| parse_assignment(raw))
                .collect::<Result<Vec<_>>>()?;
            let mut controller =
                AttributeFormController::with_backend(options, Arc::new(storage), Arc::new(ConsoleNotifier));
            if controller.load(ParentId(parent_id)).await.is_err() {
                return Ok(ExitCode::FAILURE);
            }

            let granularity = controller.options().granularity;
            if granularity == EditGranularity::Table {
                controller.edit_all();
            }
            for (key, value) in &assignments {
                if granularity == EditGranularity::Row {
                    controller.edit(key);
                }
                if !controller.set_raw(key, value) {
                    return Err(anyhow!("parent {parent_id} has no attribute row {key}"));
                }
            }

            if !controller.has_changes() {
                println!("nothing to save");
                return Ok(ExitCode::SUCCESS);
            }

            let saved = match granularity {
                EditGranularity::Table => controller.save().await,
                EditGranularity::Row => {
                    let keys: Vec<RowKey> = assignments.iter().map(|(key, _)| key.clone()).collect();
                    controller.save_rows(&keys).await
                }
            };
            if saved.is_err() {
                return Ok(ExitCode::FAILURE);
            }
            print_attributes(controller.card_title(), &controller.attributes());
        }
        Command::Preview { parent_id } => {
            let mut controller =
                AttributeFormController::with_backend(options, Arc::new(storage), Arc::new(ConsoleNotifier));
            if controller.load(ParentId(parent_id)).await.is_err() {
                return Ok(ExitCode::FAILURE);
            }
            let payloads = controller.preview_payloads()?;
            println!("{}", serde_json::to_string_pretty(&payloads)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn parse_assignment(raw: &str) -> Result<(RowKey, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("assignment '{raw}' must look like ROW_KEY=VALUE"))?;
    let key = key.parse::<RowKey>().map_err(|err| anyhow!(err))?;
    Ok((key, value.to_string()))
}

fn print_attributes(title: &str, attributes: &[AttributeView]) {
    println!("{title}");
    if attributes.is_empty() {
        println!("  (no attributes defined)");
        return;
    }
    for view in attributes {
        let value = if view.is_checkbox {
            if view.edit_value.is_truthy() { "[x]" } else { "[ ]" }.to_string()
        } else {
            view.edit_value.to_string()
        };
        let choices = if view.is_picklist {
            let values: Vec<&str> = view
                .picklist_options
                .iter()
                .map(|option| option.value.as_str())
                .collect();
            format!("  ({})", values.join(" | "))
        } else {
            String::new()
        };
        println!(
            "  {:<12} {:<24} {:<9} {value}{choices}",
            view.key.to_string(),
            view.definition.name,
            view.definition.data_type.as_str(),
        );
    }
}
