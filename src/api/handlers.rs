use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::form_extractor::PostedForm;
use crate::binding::FormBinder;
use crate::logic::{UpdateError, UpdateOrchestrator, UpdateOutcome};
use crate::mapping::{MappingEngine, RelationsConfig};
use crate::model::{EntityId, EntityViewModel, FlashMessage, ModelState, OptionRow};
use crate::seed::{Category, CategoryViewModel};
use crate::store::{MemoryStore, UnitOfWork};

/// Process-wide state: the shared store plus the registry and mapping table,
/// both read-only once built
pub struct AppContext {
    pub store: Arc<MemoryStore>,
    pub engine: MappingEngine,
    pub relations: RelationsConfig<Category>,
}

pub type AppState = Arc<AppContext>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

/// Everything an edit form needs to render
#[derive(Debug, Serialize)]
pub struct EditFormResponse {
    pub category: CategoryViewModel,
    pub parent_options: Vec<OptionRow>,
    pub tag_options: Vec<OptionRow>,
    pub model_state: ModelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<FlashMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_class: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub location: String,
    pub flash: FlashMessage,
    pub flash_class: &'static str,
}

impl AppContext {
    fn edit_form(
        &self,
        category: CategoryViewModel,
        model_state: ModelState,
        flash: Option<FlashMessage>,
    ) -> EditFormResponse {
        EditFormResponse {
            parent_options: self.relations.choice_rows("Parent", &category.parent),
            tag_options: self.relations.choices_rows("Tags", &category.tags),
            flash_class: flash.as_ref().map(FlashMessage::css_class),
            category,
            model_state,
            flash,
        }
    }
}

fn edit_location(id: EntityId) -> String {
    format!("/categories/{}/edit", id)
}

fn error_response(error: UpdateError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        UpdateError::NotFound { .. } => StatusCode::NOT_FOUND,
        UpdateError::MissingId(_) => StatusCode::BAD_REQUEST,
        UpdateError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        log::error!("Update failed: {}", error);
    }
    (status, Json(ErrorResponse::new(&error.to_string())))
}

pub async fn edit_category(
    State(ctx): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<Json<EditFormResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut uow = UnitOfWork::new(ctx.store.clone());
    let category = UpdateOrchestrator::new(&ctx.engine)
        .edit::<Category, CategoryViewModel>(&mut uow, id)
        .map_err(error_response)?;

    Ok(Json(ctx.edit_form(category, ModelState::new(), None)))
}

pub async fn update_category(
    State(ctx): State<AppState>,
    Path(id): Path<EntityId>,
    PostedForm(posted): PostedForm,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let mut model_state = ModelState::new();
    let mut category: CategoryViewModel = FormBinder::new(&posted).bind_model(&mut model_state);

    match category.id() {
        Some(posted_id) if posted_id != id => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(&format!(
                    "Posted Id {} does not match category {}",
                    posted_id, id
                ))),
            ));
        }
        Some(_) => {}
        None => category.meta.identify(id),
    }

    let mut uow = UnitOfWork::new(ctx.store.clone());
    let outcome = UpdateOrchestrator::new(&ctx.engine)
        .update::<Category, CategoryViewModel>(&mut uow, category, model_state)
        .map_err(error_response)?;

    let response = match outcome {
        UpdateOutcome::Redirect { flash } => {
            let location = edit_location(id);
            (
                StatusCode::SEE_OTHER,
                [(header::LOCATION, location.clone())],
                Json(RedirectResponse {
                    location,
                    flash_class: flash.css_class(),
                    flash,
                }),
            )
                .into_response()
        }
        UpdateOutcome::Redisplay {
            view_model,
            model_state,
            flash,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ctx.edit_form(view_model, model_state, flash)),
        )
            .into_response(),
    };
    Ok(response)
}
