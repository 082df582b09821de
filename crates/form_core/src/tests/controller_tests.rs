use super::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::error::{ApiException, ErrorCode};
use tokio::sync::Mutex;

use crate::Notification;

enum PersistFailure {
    Transport(String),
    Structured(String),
}

struct FakeBackend {
    wrappers: Vec<AttributeWrapper>,
    fetch_error: Option<String>,
    persist_failure: Option<PersistFailure>,
    fetch_calls: Mutex<u32>,
    persisted: Mutex<Vec<Vec<AttributePayload>>>,
}

impl FakeBackend {
    fn ok(wrappers: Vec<AttributeWrapper>) -> Self {
        Self {
            wrappers,
            fetch_error: None,
            persist_failure: None,
            fetch_calls: Mutex::new(0),
            persisted: Mutex::new(Vec::new()),
        }
    }

    fn failing_fetch(err: impl Into<String>) -> Self {
        let mut backend = Self::ok(Vec::new());
        backend.fetch_error = Some(err.into());
        backend
    }

    fn with_persist_failure(mut self, failure: PersistFailure) -> Self {
        self.persist_failure = Some(failure);
        self
    }
}

#[async_trait]
impl AttributeSource for FakeBackend {
    async fn fetch_attributes(&self, _parent_id: ParentId) -> Result<Vec<AttributeWrapper>> {
        *self.fetch_calls.lock().await += 1;
        if let Some(err) = &self.fetch_error {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.wrappers.clone())
    }
}

#[async_trait]
impl AttributeSink for FakeBackend {
    async fn persist_attributes(&self, payloads: &[AttributePayload]) -> Result<()> {
        match &self.persist_failure {
            Some(PersistFailure::Transport(err)) => Err(anyhow!(err.clone())),
            Some(PersistFailure::Structured(message)) => {
                Err(ApiException::new(ErrorCode::Validation, message.clone()).into())
            }
            None => {
                self.persisted.lock().await.push(payloads.to_vec());
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: std::sync::Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn all(&self) -> Vec<Notification> {
        self.seen.lock().expect("notifier lock").clone()
    }

    fn last(&self) -> Option<Notification> {
        self.all().pop()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str, level: NotifyLevel) {
        self.seen.lock().expect("notifier lock").push(Notification {
            title: title.to_string(),
            message: message.to_string(),
            level,
        });
    }
}

const PARENT: ParentId = ParentId(100);

fn definition(id: i64, name: &str, data_type: DataType) -> AttributeDefinition {
    AttributeDefinition {
        id: DefinitionId(id),
        name: name.to_string(),
        data_type,
        required: false,
        default_value: None,
        picklist_choices: None,
    }
}

fn stored(id: i64, definition: AttributeDefinition, fill: impl FnOnce(&mut AttributeRecord)) -> AttributeWrapper {
    let mut attribute = AttributeRecord::unsaved(PARENT, definition.id);
    attribute.id = Some(AttributeId(id));
    fill(&mut attribute);
    AttributeWrapper {
        attribute,
        definition,
    }
}

fn unsaved(definition: AttributeDefinition) -> AttributeWrapper {
    AttributeWrapper {
        attribute: AttributeRecord::unsaved(PARENT, definition.id),
        definition,
    }
}

fn gold_level() -> AttributeWrapper {
    stored(1, definition(10, "Level", DataType::Text), |r| {
        r.text_value = Some("Gold".into())
    })
}

fn seats() -> AttributeWrapper {
    stored(2, definition(11, "Seats", DataType::Number), |r| {
        r.number_value = Some(4.0)
    })
}

fn options(granularity: EditGranularity) -> FormOptions {
    FormOptions {
        granularity,
        ..FormOptions::default()
    }
}

fn controller(
    backend: FakeBackend,
    granularity: EditGranularity,
) -> (AttributeFormController, Arc<FakeBackend>, Arc<RecordingNotifier>) {
    let backend = Arc::new(backend);
    let notifier = Arc::new(RecordingNotifier::default());
    let controller =
        AttributeFormController::with_backend(options(granularity), backend.clone(), notifier.clone());
    (controller, backend, notifier)
}

async fn loaded(
    wrappers: Vec<AttributeWrapper>,
    granularity: EditGranularity,
) -> (AttributeFormController, Arc<FakeBackend>, Arc<RecordingNotifier>) {
    let (mut controller, backend, notifier) = controller(FakeBackend::ok(wrappers), granularity);
    controller.load(PARENT).await.expect("load");
    (controller, backend, notifier)
}

const LEVEL: RowKey = RowKey::Persisted(AttributeId(1));
const SEATS: RowKey = RowKey::Persisted(AttributeId(2));

#[tokio::test]
async fn load_projects_each_record_and_starts_clean() {
    let (controller, _, notifier) = loaded(vec![gold_level(), seats()], EditGranularity::Table).await;

    assert!(controller.has_attributes());
    assert!(!controller.is_loading());
    assert!(!controller.has_changes());
    assert!(controller.is_changes_missing());
    assert!(!controller.is_edit_mode());
    assert_eq!(controller.parent_id(), Some(PARENT));
    for row in controller.rows() {
        assert_eq!(row.edit_value, display_value(&row.record, row.data_type()));
    }
    assert_eq!(controller.row(&LEVEL).expect("row").edit_value, EditValue::from("Gold"));
    assert_eq!(controller.row(&SEATS).expect("row").edit_value, EditValue::Number(4.0));
    assert!(notifier.all().is_empty());
}

#[tokio::test]
async fn unsaved_rows_get_temporary_keys() {
    let (controller, _, _) = loaded(
        vec![gold_level(), unsaved(definition(12, "Renewal", DataType::Date))],
        EditGranularity::Table,
    )
    .await;

    let key = &controller.rows()[1].key;
    assert_eq!(
        key,
        &RowKey::Temporary {
            definition_id: DefinitionId(12),
            index: 1
        }
    );
    assert_eq!(key.to_string(), "temp_12_1");
    assert_eq!(key.to_string().parse::<RowKey>().expect("parse"), *key);
    assert_eq!("1".parse::<RowKey>().expect("parse"), LEVEL);
    assert!("temp_x".parse::<RowKey>().is_err());
}

#[tokio::test]
async fn edit_then_save_moves_the_snapshot() {
    let (mut controller, backend, notifier) = loaded(vec![gold_level()], EditGranularity::Table).await;

    controller.edit_all();
    assert!(controller.set_value(&LEVEL, "Platinum"));
    assert!(controller.has_changes());

    controller.save().await.expect("save");

    assert!(!controller.has_changes());
    assert!(!controller.is_edit_mode());
    assert!(!controller.is_loading());
    assert_eq!(controller.snapshot_value(&LEVEL), Some(EditValue::from("Platinum")));
    assert_eq!(
        notifier.last(),
        Some(Notification {
            title: "Success".into(),
            message: "Attributes updated successfully".into(),
            level: NotifyLevel::Success,
        })
    );

    let batches = backend.persisted.lock().await;
    assert_eq!(batches.len(), 1);
    let payload = &batches[0][0];
    assert_eq!(payload.id, Some(AttributeId(1)));
    assert_eq!(payload.parent_id, Some(PARENT));
    assert_eq!(payload.definition_id, Some(DefinitionId(10)));
    assert_eq!(payload.text_value.as_deref(), Some("Platinum"));
    assert_eq!(payload.populated_slots(), 1);
}

#[tokio::test]
async fn load_failure_reports_and_keeps_empty_list() {
    let (mut controller, _, notifier) =
        controller(FakeBackend::failing_fetch("network unreachable"), EditGranularity::Table);

    let err = controller.load(PARENT).await.expect_err("load must fail");

    assert_eq!(
        err,
        FormError::Load {
            message: "network unreachable".into()
        }
    );
    assert!(!controller.is_loading());
    assert!(!controller.has_attributes());
    assert_eq!(controller.parent_id(), None);
    assert_eq!(controller.last_error(), Some(&err));
    let notification = notifier.last().expect("notification");
    assert_eq!(notification.title, "Error");
    assert_eq!(notification.level, NotifyLevel::Error);
    assert_eq!(notification.message, "network unreachable");
}

#[tokio::test]
async fn failed_reload_keeps_previous_rows_and_edits() {
    let backend = Arc::new(FakeBackend::ok(vec![gold_level()]));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut controller = AttributeFormController::new_with_dependencies(
        options(EditGranularity::Table),
        backend.clone(),
        Arc::new(FakeBackend::ok(Vec::new())),
        notifier.clone(),
    );
    controller.load(PARENT).await.expect("load");
    controller.set_value(&LEVEL, "Silver");

    controller.source = Arc::new(FakeBackend::failing_fetch("timeout"));
    controller.reload().await.expect_err("reload must fail");

    assert_eq!(controller.rows().len(), 1);
    assert_eq!(controller.row(&LEVEL).expect("row").edit_value, EditValue::from("Silver"));
    assert!(controller.has_changes());
    assert_eq!(controller.snapshot_value(&LEVEL), Some(EditValue::from("Gold")));
    assert_eq!(*backend.fetch_calls.lock().await, 1);
}

#[tokio::test]
async fn reload_before_first_load_does_nothing() {
    let (mut controller, backend, _) = controller(FakeBackend::ok(vec![gold_level()]), EditGranularity::Table);
    controller.reload().await.expect("noop");
    assert_eq!(*backend.fetch_calls.lock().await, 0);

    controller.load(PARENT).await.expect("load");
    controller.reload().await.expect("reload");
    assert_eq!(*backend.fetch_calls.lock().await, 2);
}

#[tokio::test]
async fn cancel_restores_the_snapshot_value() {
    let (mut controller, _, _) = loaded(vec![gold_level(), seats()], EditGranularity::Row).await;

    controller.edit(&LEVEL);
    controller.set_value(&LEVEL, "Bronze");
    assert!(controller.has_changes());

    assert!(controller.cancel(&LEVEL));

    assert_eq!(controller.row(&LEVEL).expect("row").edit_value, EditValue::from("Gold"));
    assert!(!controller.is_editing(&LEVEL));
    assert!(!controller.has_changes());
}

#[tokio::test]
async fn cancel_keeps_dirty_when_another_row_changed() {
    let (mut controller, _, _) = loaded(vec![gold_level(), seats()], EditGranularity::Row).await;

    controller.set_value(&LEVEL, "Bronze");
    controller.set_value(&SEATS, 9.0);
    controller.cancel(&LEVEL);

    assert!(controller.has_changes());
    controller.cancel(&SEATS);
    assert!(!controller.has_changes());
}

#[tokio::test]
async fn restoring_the_original_value_clears_dirty() {
    let (mut controller, _, _) = loaded(vec![gold_level(), seats()], EditGranularity::Table).await;

    controller.set_raw(&SEATS, "5");
    assert!(controller.has_changes());
    controller.set_raw(&SEATS, "4");
    assert!(!controller.has_changes());

    controller.set_value(&LEVEL, "Gold ");
    assert!(controller.has_changes());
    controller.set_value(&LEVEL, String::from("Gold"));
    assert!(!controller.has_changes());
}

#[tokio::test]
async fn unparsable_numbers_become_zero_in_value_and_payload() {
    let (mut controller, backend, _) = loaded(vec![seats()], EditGranularity::Table).await;

    controller.set_raw(&SEATS, "several");
    assert_eq!(controller.row(&SEATS).expect("row").edit_value, EditValue::Number(0.0));

    controller.save().await.expect("save");
    let batches = backend.persisted.lock().await;
    let payload = &batches[0][0];
    assert_eq!(payload.number_value, Some(0.0));
    assert!(payload.text_value.is_none());
    assert!(payload.date_value.is_none());
    assert!(payload.checkbox_value.is_none());
    assert!(payload.picklist_value.is_none());
}

#[tokio::test]
async fn number_payload_carries_parsed_value() {
    let (mut controller, _, _) = loaded(vec![seats()], EditGranularity::Table).await;
    controller.set_raw(&SEATS, " 12.5 ");

    let payload = controller
        .row(&SEATS)
        .expect("row")
        .to_payload(EditGranularity::Table)
        .expect("payload");
    assert_eq!(payload.number_value, Some(12.5));
    assert_eq!(payload.populated_slots(), 1);
}

#[tokio::test]
async fn row_mode_saves_only_the_requested_row() {
    let (mut controller, backend, _) = loaded(vec![gold_level(), seats()], EditGranularity::Row).await;

    assert!(controller.edit(&LEVEL));
    assert!(controller.edit(&SEATS));
    controller.set_value(&LEVEL, "Platinum");
    controller.set_value(&SEATS, 6.0);

    controller.save_row(&LEVEL).await.expect("save row");

    assert!(!controller.is_editing(&LEVEL));
    assert!(controller.is_editing(&SEATS));
    assert!(controller.has_changes(), "seats is still unsaved");
    assert_eq!(controller.snapshot_value(&LEVEL), Some(EditValue::from("Platinum")));
    assert_eq!(controller.snapshot_value(&SEATS), Some(EditValue::Number(4.0)));

    let batches = backend.persisted.lock().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    let payload = &batches[0][0];
    assert_eq!(payload.id, Some(AttributeId(1)));
    assert_eq!(payload.parent_id, None);
    assert_eq!(payload.definition_id, None);
}

#[tokio::test]
async fn row_mode_sends_references_for_unsaved_rows() {
    let key = RowKey::Temporary {
        definition_id: DefinitionId(13),
        index: 0,
    };
    let (mut controller, backend, _) = loaded(
        vec![unsaved(definition(13, "Active", DataType::Checkbox))],
        EditGranularity::Row,
    )
    .await;

    controller.edit(&key);
    controller.set_raw(&key, "true");
    controller.save_row(&key).await.expect("save row");

    let batches = backend.persisted.lock().await;
    let payload = &batches[0][0];
    assert_eq!(payload.id, None);
    assert_eq!(payload.parent_id, Some(PARENT));
    assert_eq!(payload.definition_id, Some(DefinitionId(13)));
    assert_eq!(payload.checkbox_value, Some(true));
    assert!(!controller.has_changes());
}

#[tokio::test]
async fn table_mode_edit_applies_to_every_row() {
    let (mut controller, _, _) = loaded(vec![gold_level(), seats()], EditGranularity::Table).await;

    assert!(controller.edit(&LEVEL));

    assert!(controller.is_edit_mode());
    assert!(controller.attributes().iter().all(|view| view.is_editing));
}

#[tokio::test]
async fn table_mode_cancel_leaves_edit_mode() {
    let (mut controller, _, _) = loaded(vec![gold_level(), seats()], EditGranularity::Table).await;

    controller.edit(&LEVEL);
    controller.set_value(&LEVEL, "Platinum");
    controller.set_raw(&SEATS, "40");
    assert!(controller.cancel(&LEVEL));

    assert!(!controller.is_editing(&LEVEL));
    assert!(!controller.is_edit_mode());
    assert!(!controller.has_changes());
    assert_eq!(controller.row(&LEVEL).expect("row").edit_value, EditValue::from("Gold"));
    assert_eq!(controller.row(&SEATS).expect("row").edit_value, EditValue::Number(4.0));
}

#[tokio::test]
async fn cancel_all_restores_the_whole_list() {
    let (mut controller, _, _) = loaded(vec![gold_level(), seats()], EditGranularity::Table).await;
    let before = controller.rows().to_vec();

    controller.edit_all();
    controller.set_value(&LEVEL, "Platinum");
    controller.set_raw(&SEATS, "40");
    controller.cancel_all();

    assert_eq!(controller.rows(), before.as_slice());
    assert!(!controller.is_edit_mode());
    assert!(!controller.has_changes());
}

#[tokio::test]
async fn failed_save_keeps_edits_and_edit_mode() {
    let backend =
        FakeBackend::ok(vec![gold_level()]).with_persist_failure(PersistFailure::Structured(
            "Level must be one of Gold, Silver".into(),
        ));
    let (mut controller, _, notifier) = controller(backend, EditGranularity::Table);
    controller.load(PARENT).await.expect("load");

    controller.edit_all();
    controller.set_value(&LEVEL, "Platinum");
    let err = controller.save().await.expect_err("save must fail");

    assert_eq!(err.message(), "Level must be one of Gold, Silver");
    assert!(controller.is_edit_mode());
    assert!(controller.has_changes());
    assert!(!controller.is_loading());
    assert_eq!(
        controller.row(&LEVEL).expect("row").edit_value,
        EditValue::from("Platinum")
    );
    assert_eq!(controller.snapshot_value(&LEVEL), Some(EditValue::from("Gold")));
    let notification = notifier.last().expect("notification");
    assert_eq!(notification.level, NotifyLevel::Error);
    assert_eq!(notification.message, "Level must be one of Gold, Silver");
}

#[tokio::test]
async fn transport_failure_message_is_surfaced_verbatim() {
    let backend = FakeBackend::ok(vec![gold_level()])
        .with_persist_failure(PersistFailure::Transport("connection reset".into()));
    let (mut controller, _, notifier) = controller(backend, EditGranularity::Row);
    controller.load(PARENT).await.expect("load");

    controller.edit(&LEVEL);
    controller.save_row(&LEVEL).await.expect_err("save must fail");

    assert!(controller.is_editing(&LEVEL));
    assert_eq!(notifier.last().expect("notification").message, "connection reset");
}

#[tokio::test]
async fn invalid_date_fails_before_persisting() {
    let key = RowKey::Persisted(AttributeId(3));
    let (mut controller, backend, notifier) = loaded(
        vec![stored(3, definition(12, "Renewal", DataType::Date), |r| {
            r.date_value = chrono::NaiveDate::from_ymd_opt(2024, 1, 31)
        })],
        EditGranularity::Table,
    )
    .await;
    assert_eq!(controller.row(&key).expect("row").edit_value, EditValue::from("2024-01-31"));

    controller.set_raw(&key, "31/01/2024");
    let err = controller.save().await.expect_err("bad date");

    assert!(matches!(err, FormError::Save { .. }));
    assert!(err.message().contains("not a valid date for Renewal"));
    assert!(backend.persisted.lock().await.is_empty());
    assert_eq!(notifier.last().expect("notification").level, NotifyLevel::Error);
}

#[tokio::test]
async fn empty_date_saves_as_null() {
    let key = RowKey::Persisted(AttributeId(3));
    let (mut controller, backend, _) = loaded(
        vec![stored(3, definition(12, "Renewal", DataType::Date), |r| {
            r.date_value = chrono::NaiveDate::from_ymd_opt(2024, 1, 31)
        })],
        EditGranularity::Table,
    )
    .await;

    controller.set_raw(&key, "");
    controller.save().await.expect("save");

    let batches = backend.persisted.lock().await;
    assert_eq!(batches[0][0].date_value, None);
    assert_eq!(batches[0][0].populated_slots(), 0);
    assert!(!controller.has_changes());
}

#[tokio::test]
async fn save_row_of_unknown_key_is_a_save_failure() {
    let (mut controller, backend, _) = loaded(vec![gold_level()], EditGranularity::Row).await;
    let err = controller
        .save_row(&RowKey::Persisted(AttributeId(404)))
        .await
        .expect_err("unknown row");
    assert_eq!(
        err,
        FormError::Save {
            message: "no attribute row 404".into()
        }
    );
    assert!(backend.persisted.lock().await.is_empty());
}

#[tokio::test]
async fn unknown_keys_are_ignored_by_edits() {
    let (mut controller, _, _) = loaded(vec![gold_level()], EditGranularity::Row).await;
    let missing = RowKey::Persisted(AttributeId(404));
    let revision = controller.revision();

    assert!(!controller.set_value(&missing, "x"));
    assert!(!controller.set_raw(&missing, "x"));
    assert!(!controller.edit(&missing));
    assert!(!controller.cancel(&missing));
    assert_eq!(controller.revision(), revision);
}

#[tokio::test]
async fn every_mutation_bumps_the_revision() {
    let (mut controller, _, _) = loaded(vec![gold_level()], EditGranularity::Row).await;
    let start = controller.revision();

    controller.edit(&LEVEL);
    let after_edit = controller.revision();
    controller.set_value(&LEVEL, "Silver");
    let after_set = controller.revision();

    assert!(after_edit > start);
    assert!(after_set > after_edit);
}

#[tokio::test]
async fn views_expose_type_flags_icons_and_options() {
    let mut tier = definition(14, "Tier", DataType::Picklist);
    tier.picklist_choices = Some(" A; B ;C".into());
    let (controller, _, _) = loaded(
        vec![
            stored(5, definition(13, "Active", DataType::Checkbox), |r| {
                r.checkbox_value = Some(true)
            }),
            stored(6, tier, |r| r.picklist_value = Some("B".into())),
            stored(7, definition(15, "Archived", DataType::Checkbox), |_| {}),
        ],
        EditGranularity::Row,
    )
    .await;

    let views = controller.attributes();
    assert!(views[0].is_checkbox && !views[0].is_text);
    assert_eq!(views[0].checkbox_icon_name, "utility:check");
    assert!(views[0].picklist_options.is_empty());
    assert!(views[1].is_picklist);
    let values: Vec<_> = views[1]
        .picklist_options
        .iter()
        .map(|option| option.value.as_str())
        .collect();
    assert_eq!(values, vec!["A", "B", "C"]);
    assert_eq!(views[2].checkbox_icon_name, "utility:close");
    assert!(views.iter().all(|view| !view.is_editing));
}

#[tokio::test]
async fn preview_uses_configured_field_mapping() {
    let backend = Arc::new(FakeBackend::ok(vec![seats()]));
    let mut controller = AttributeFormController::with_backend(
        FormOptions {
            field_mapping: FieldMapping::sponsorable(),
            ..FormOptions::default()
        },
        backend,
        Arc::new(RecordingNotifier::default()),
    );
    controller.load(PARENT).await.expect("load");

    let preview = controller.preview_payloads().expect("preview");
    assert_eq!(preview[0]["Id"], 2);
    assert_eq!(preview[0]["Sponsorable__c"], 100);
    assert_eq!(preview[0]["Number_Value__c"], 4.0);
    assert_eq!(preview[0]["Text_Value__c"], serde_json::Value::Null);
}

#[tokio::test]
async fn default_controller_reports_missing_source() {
    let mut controller = AttributeFormController::new(FormOptions::default());
    let err = controller.load(PARENT).await.expect_err("no source");
    assert!(err.message().contains("unavailable"));
    assert_eq!(controller.card_title(), "Attributes");
}
