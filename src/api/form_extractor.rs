use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    Form, Json,
};

use crate::api::handlers::ErrorResponse;
use crate::binding::PostedValues;

/// Axum extractor for `application/x-www-form-urlencoded` bodies.
///
/// Values posted more than once under the same key (multi-selects) are
/// joined with `,` before binding.
#[derive(Debug, Clone)]
pub struct PostedForm(pub PostedValues);

#[async_trait]
impl<S> FromRequest<S> for PostedForm
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
            .await
            .map_err(|rejection| {
                log::debug!("Rejected form body: {}", rejection.body_text());
                (
                    rejection.status(),
                    Json(ErrorResponse::new(&rejection.body_text())),
                )
            })?;

        Ok(PostedForm(PostedValues::from_pairs(pairs)))
    }
}
