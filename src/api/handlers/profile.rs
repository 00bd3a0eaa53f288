use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::IntoParams;

use super::inbound;
use crate::{
    account::{AgeUnit, Profile},
    api::{error::ApiError, error::ErrorBody, AppState},
};

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProfileParams {
    /// `years` (default), `months`, `weeks` or `days`; unknown units count days.
    pub age_unit: Option<String>,
}

#[utoipa::path(
    get,
    path= "/profile",
    params(ProfileParams),
    responses (
        (status = 200, description = "Profile of the authenticated user", body = Profile),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn profile(
    Extension(state): Extension<AppState>,
    Query(params): Query<ProfileParams>,
    headers: HeaderMap,
) -> Result<Json<Profile>, ApiError> {
    let request = inbound(&headers, &axum::body::Bytes::new())?;
    let principal = state.resolver.require(&request).await?.principal;

    let mut profile = principal.profile();
    if let Some(unit) = params.age_unit.as_deref() {
        profile.age = principal.age(AgeUnit::parse(unit));
    }
    Ok(Json(profile))
}
