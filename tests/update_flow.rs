use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use mvc_bootstrap::config::AppConfig;
use mvc_bootstrap::seed::{
    build_engine, category_relations, load_seed_data, Category, CategoryViewModel, TagViewModel,
};
use mvc_bootstrap::{
    build_app, EntityViewModel, FlashKind, FormBinder, MappingEngine, MemoryStore, ModelState,
    PostedValues, UnitOfWork, UpdateError, UpdateOrchestrator, UpdateOutcome,
};

const TOOLS: i64 = 4;
const POWER_TOOLS: i64 = 5;
const GARDEN: i64 = 6;

fn seeded() -> (Arc<MemoryStore>, MappingEngine) {
    let store = Arc::new(MemoryStore::new());
    load_seed_data(&store);
    let relations = category_relations(store.clone()).unwrap();
    let engine = build_engine(&relations, 1).unwrap();
    (store, engine)
}

fn edit(store: &Arc<MemoryStore>, engine: &MappingEngine, id: i64) -> CategoryViewModel {
    let mut uow = UnitOfWork::new(store.clone());
    UpdateOrchestrator::new(engine)
        .edit::<Category, CategoryViewModel>(&mut uow, id)
        .unwrap()
}

/// Posts `form` the way a fresh request would: new unit of work, valid model state
fn post(
    store: &Arc<MemoryStore>,
    engine: &MappingEngine,
    form: CategoryViewModel,
    state: ModelState,
) -> UpdateOutcome<CategoryViewModel> {
    let mut uow = UnitOfWork::new(store.clone());
    UpdateOrchestrator::new(engine)
        .update::<Category, CategoryViewModel>(&mut uow, form, state)
        .unwrap()
}

fn option_ids(form: &CategoryViewModel) -> Vec<i64> {
    form.parent.options().iter().filter_map(|o| o.id()).collect()
}

#[test]
fn test_successful_update_redirects_with_flash() {
    let (store, engine) = seeded();
    let before = store.find::<Category>(POWER_TOOLS).unwrap();

    let mut form = edit(&store, &engine, POWER_TOOLS);
    assert_eq!(option_ids(&form), vec![TOOLS, GARDEN]);
    form.name = "Cordless Tools".to_string();

    match post(&store, &engine, form, ModelState::new()) {
        UpdateOutcome::Redirect { flash } => {
            assert_eq!(flash.message, "Category \"Cordless Tools\" Updated");
            assert_eq!(flash.kind, FlashKind::Success);
        }
        other => panic!("expected redirect, got {:?}", other),
    }

    let after = store.find::<Category>(POWER_TOOLS).unwrap();
    assert_eq!(after.name, "Cordless Tools");
    assert_ne!(after.meta.version, before.meta.version);
    assert_eq!(after.meta.created, before.meta.created);
    assert!(after.meta.modified >= before.meta.modified);
    assert_eq!(after.parent.as_ref().map(|p| p.meta.id), Some(TOOLS));
    assert_eq!(after.tags[0].name, "power");
}

#[test]
fn test_stale_token_drives_concurrency_conflict() {
    let (store, engine) = seeded();

    let mut first = edit(&store, &engine, POWER_TOOLS);
    let mut second = edit(&store, &engine, POWER_TOOLS);
    let t0 = second.meta.version.clone().unwrap();

    first.name = "Cordless Tools".to_string();
    assert!(post(&store, &engine, first, ModelState::new()).is_redirect());
    let t1 = store.find::<Category>(POWER_TOOLS).unwrap().meta.version;
    assert_ne!(t0, t1);

    second.name = "Sanders".to_string();
    let retry = match post(&store, &engine, second, ModelState::new()) {
        UpdateOutcome::Redisplay {
            view_model,
            model_state,
            flash,
        } => {
            assert_eq!(view_model.meta.version.as_ref(), Some(&t1));
            let current = view_model.meta.concurrently_edited.as_deref().unwrap();
            assert_eq!(current.name, "Cordless Tools");
            assert_eq!(current.meta.version.as_ref(), Some(&t1));

            assert_eq!(view_model.name, "Sanders");
            assert_eq!(option_ids(&view_model), vec![TOOLS, GARDEN]);
            assert!(model_state.non_field_errors()[0]
                .starts_with("The Category has been edited since you requested it."));
            let flash = flash.unwrap();
            assert_eq!(flash.message, "An edit conflict occurred.");
            assert_eq!(flash.css_class(), "alert-error");
            view_model
        }
        other => panic!("expected redisplay, got {:?}", other),
    };
    assert_eq!(store.find::<Category>(POWER_TOOLS).unwrap().name, "Cordless Tools");

    assert!(post(&store, &engine, retry, ModelState::new()).is_redirect());
    assert_eq!(store.find::<Category>(POWER_TOOLS).unwrap().name, "Sanders");
}

#[test]
fn test_store_validation_becomes_field_errors() {
    let (store, engine) = seeded();
    let mut form = edit(&store, &engine, POWER_TOOLS);
    form.name = "x".repeat(65);

    match post(&store, &engine, form, ModelState::new()) {
        UpdateOutcome::Redisplay {
            view_model,
            model_state,
            flash,
        } => {
            assert_eq!(
                model_state.errors_for("Name"),
                ["The field Name must be a string with a maximum length of 64.".to_string()]
            );
            let original = view_model.meta.original_values.as_deref().unwrap();
            assert_eq!(original.name, "Power Tools");
            assert!(view_model.meta.concurrently_edited.is_none());
            assert_eq!(
                flash.unwrap().message,
                format!("Failed to save Category \"{}\"", "x".repeat(65))
            );
        }
        other => panic!("expected redisplay, got {:?}", other),
    }
    assert_eq!(store.find::<Category>(POWER_TOOLS).unwrap().name, "Power Tools");
}

#[test]
fn test_selecting_self_as_parent_is_rejected_by_the_store() {
    let (store, engine) = seeded();
    let form = edit(&store, &engine, POWER_TOOLS);
    let version = form.meta.version.clone().unwrap();

    let posted = PostedValues::from_pairs([
        ("Id", POWER_TOOLS.to_string()),
        ("Name", "Power Tools".to_string()),
        ("Parent.Id", POWER_TOOLS.to_string()),
        ("Timestamp", version.to_hex()),
    ]);
    let mut state = ModelState::new();
    let bound: CategoryViewModel = FormBinder::new(&posted).bind_model(&mut state);
    assert!(state.is_valid());

    match post(&store, &engine, bound, state) {
        UpdateOutcome::Redisplay { model_state, .. } => {
            assert_eq!(
                model_state.errors_for("Parent"),
                ["A category cannot be its own parent.".to_string()]
            );
        }
        other => panic!("expected redisplay, got {:?}", other),
    }
    let stored = store.find::<Category>(POWER_TOOLS).unwrap();
    assert_eq!(stored.parent.as_ref().map(|p| p.meta.id), Some(TOOLS));
}

#[test]
fn test_binding_errors_skip_the_save_and_refresh_options() {
    let (store, engine) = seeded();
    let version = store.find::<Category>(POWER_TOOLS).unwrap().meta.version;

    let posted = PostedValues::from_pairs([
        ("Id", POWER_TOOLS.to_string()),
        ("Name", "Renamed".to_string()),
        ("Parent.Id", "abc".to_string()),
        ("Tags.Id", "1".to_string()),
        ("Tags.Id", "3".to_string()),
        ("Timestamp", version.to_hex()),
    ]);
    let mut state = ModelState::new();
    let bound: CategoryViewModel = FormBinder::new(&posted).bind_model(&mut state);
    assert!(bound.parent.options().is_empty());
    assert!(bound.tags.options().is_empty());

    match post(&store, &engine, bound, state) {
        UpdateOutcome::Redisplay {
            view_model,
            model_state,
            flash,
        } => {
            assert!(flash.is_none());
            assert_eq!(model_state.errors_for("Parent").len(), 1);
            assert_eq!(view_model.name, "Renamed");
            assert!(view_model.parent.selection().is_none());
            assert_eq!(option_ids(&view_model), vec![TOOLS, GARDEN]);
            assert_eq!(view_model.tags.selected_ids(), vec![1, 3]);
            assert_eq!(view_model.tags.options().len(), 3);
        }
        other => panic!("expected redisplay, got {:?}", other),
    }

    let stored = store.find::<Category>(POWER_TOOLS).unwrap();
    assert_eq!(stored.name, "Power Tools");
    assert_eq!(stored.meta.version, version);
}

#[test]
fn test_new_parent_is_saved_from_an_id_only_stub() {
    let (store, engine) = seeded();
    let mut form = edit(&store, &engine, POWER_TOOLS);
    form.parent = mvc_bootstrap::Choice::selected(CategoryViewModel::with_id(GARDEN));
    form.tags = mvc_bootstrap::Choices::selected(vec![]);

    assert!(post(&store, &engine, form, ModelState::new()).is_redirect());

    let stored = store.find::<Category>(POWER_TOOLS).unwrap();
    assert_eq!(stored.parent.as_ref().map(|p| p.meta.id), Some(GARDEN));
    assert!(stored.tags.is_empty());
    assert_eq!(store.find::<Category>(GARDEN).unwrap().name, "Garden");
}

#[test]
fn test_stub_relations_read_back_as_stored_rows() {
    let (store, engine) = seeded();
    let mut form = edit(&store, &engine, POWER_TOOLS);
    form.parent = mvc_bootstrap::Choice::selected(CategoryViewModel::with_id(GARDEN));
    form.tags = mvc_bootstrap::Choices::selected(vec![TagViewModel::with_id(1)]);

    assert!(post(&store, &engine, form, ModelState::new()).is_redirect());

    let form = edit(&store, &engine, POWER_TOOLS);
    let parent = form.parent.selection().unwrap();
    assert_eq!(parent.id(), Some(GARDEN));
    assert_eq!(parent.name, "Garden");
    assert!(parent.meta.version.is_some());
    let tags: Vec<_> = form
        .tags
        .selections()
        .iter()
        .map(|tag| (tag.id(), tag.name.clone()))
        .collect();
    assert_eq!(tags, vec![(Some(1), "hand".to_string())]);

    // A later rename of the parent shows through
    let mut garden = edit(&store, &engine, GARDEN);
    garden.name = "Yard".to_string();
    assert!(post(&store, &engine, garden, ModelState::new()).is_redirect());
    let form = edit(&store, &engine, POWER_TOOLS);
    assert_eq!(form.parent.selection().unwrap().name, "Yard");
}

#[test]
fn test_missing_version_token_is_treated_as_stale() {
    let (store, engine) = seeded();

    let mut first = edit(&store, &engine, POWER_TOOLS);
    let mut second = edit(&store, &engine, POWER_TOOLS);

    first.name = "From First".to_string();
    assert!(post(&store, &engine, first, ModelState::new()).is_redirect());
    let current = store.find::<Category>(POWER_TOOLS).unwrap().meta.version;

    second.name = "From Second".to_string();
    second.meta.version = None;
    let retry = match post(&store, &engine, second, ModelState::new()) {
        UpdateOutcome::Redisplay {
            view_model, flash, ..
        } => {
            assert_eq!(flash.unwrap().message, "An edit conflict occurred.");
            assert_eq!(view_model.meta.version.as_ref(), Some(&current));
            assert_eq!(
                view_model.meta.concurrently_edited.as_deref().map(|c| c.name.as_str()),
                Some("From First")
            );
            view_model
        }
        other => panic!("expected redisplay, got {:?}", other),
    };
    assert_eq!(store.find::<Category>(POWER_TOOLS).unwrap().name, "From First");

    assert!(post(&store, &engine, retry, ModelState::new()).is_redirect());
    assert_eq!(store.find::<Category>(POWER_TOOLS).unwrap().name, "From Second");
}

#[test]
fn test_missing_version_token_never_saves_first_time() {
    let (store, engine) = seeded();
    let mut form = edit(&store, &engine, POWER_TOOLS);
    form.meta.version = None;
    form.name = "Blind Write".to_string();

    assert!(!post(&store, &engine, form, ModelState::new()).is_redirect());
    assert_eq!(store.find::<Category>(POWER_TOOLS).unwrap().name, "Power Tools");
}

#[test]
fn test_unknown_id_is_not_found() {
    let (store, engine) = seeded();
    let mut uow = UnitOfWork::new(store.clone());
    let orchestrator = UpdateOrchestrator::new(&engine);

    let result = orchestrator.update::<Category, CategoryViewModel>(
        &mut uow,
        CategoryViewModel::with_id(99),
        ModelState::new(),
    );
    assert!(matches!(result, Err(UpdateError::NotFound { id: 99, .. })));

    let result = orchestrator.update::<Category, CategoryViewModel>(
        &mut uow,
        CategoryViewModel::default(),
        ModelState::new(),
    );
    assert!(matches!(result, Err(UpdateError::MissingId("Category"))));
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn form_post(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_http_edit_and_update_round_trip() {
    let app = build_app(&AppConfig::default()).unwrap();

    let (status, health) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    let (status, form) = send(&app, get("/categories/5/edit")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(form["category"]["name"], "Power Tools");
    let parent_labels: Vec<_> = form["parent_options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(parent_labels, vec!["Tools", "Garden"]);
    let version = form["category"]["version"].as_str().unwrap().to_string();

    let body = format!(
        "Id=5&Name=Drills&Parent.Id=4&Tags.Id=1&Tags.Id=2&Timestamp={}",
        version
    );
    let response = app
        .clone()
        .oneshot(form_post("/categories/5", body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/categories/5/edit"
    );

    let (status, form) = send(&app, get("/categories/5/edit")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(form["category"]["name"], "Drills");
    let selected_tags: Vec<_> = form["tag_options"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|row| row["selected"] == true)
        .map(|row| row["id"].as_i64().unwrap())
        .collect();
    assert_eq!(selected_tags, vec![1, 2]);

    // Replaying the old token is an edit conflict
    let (status, conflict) = send(&app, form_post("/categories/5", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(conflict["flash"]["message"], "An edit conflict occurred.");
    assert_eq!(conflict["flash_class"], "alert-error");
    assert_eq!(conflict["category"]["concurrently_edited"]["name"], "Drills");
    assert_ne!(conflict["category"]["version"], Value::String(version));
}

#[tokio::test]
async fn test_http_errors() {
    let app = build_app(&AppConfig::default()).unwrap();

    let (status, body) = send(&app, get("/categories/99/edit")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Category 99 not found");

    let (status, _) = send(&app, form_post("/categories/99", "Name=Nope".to_string())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, form_post("/categories/5", "Id=6&Name=Wrong".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, form_post("/categories/5", "Id=five&Name=Ok".to_string())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["model_state"]["errors"]["Id"][0], "The value 'five' is not valid for Id.");
    assert_eq!(body["category"]["id"], 5);

    // Posting without the Timestamp the form was rendered with is an edit conflict
    let (status, body) = send(&app, form_post("/categories/5", "Id=5&Name=Blind".to_string())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["flash"]["message"], "An edit conflict occurred.");
    assert_eq!(body["category"]["concurrently_edited"]["name"], "Power Tools");

    let (status, body) = send(&app, form_post("/categories/5", "Name=&Parent.Id=x".to_string())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["model_state"]["errors"]["Name"][0], "The Name field is required.");
    assert_eq!(body["model_state"]["errors"]["Parent"].as_array().unwrap().len(), 1);
}
