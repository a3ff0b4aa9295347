//! Section view and field edit endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::auth::Viewer;
use crate::errors::AppError;
use crate::models::Section;
use crate::sections::SectionView;
use crate::AppState;

fn parse_section(name: &str) -> Result<Section, AppError> {
    Section::parse(name).ok_or_else(|| AppError::NotFound(format!("Section {} not found", name)))
}

/// GET /api/members/:id/sections/:section - Show a section.
///
/// Edit controls are only offered to approved staff.
pub async fn get_section(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((id, section)): Path<(String, String)>,
) -> ApiResult<SectionView> {
    viewer.require_access(&id)?;
    let section = parse_section(&section)?;
    let session = state.sessions.get(&id).await?;
    success(session.show_section(section, viewer.privileged).await?)
}

#[derive(Debug, Deserialize)]
pub struct SaveFieldRequest {
    pub value: String,
}

/// PUT /api/members/:id/sections/:section/fields/:field - Save one field.
pub async fn save_field(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((id, section, field)): Path<(String, String, String)>,
    Json(request): Json<SaveFieldRequest>,
) -> ApiResult<SectionView> {
    viewer.require_privileged()?;
    let section = parse_section(&section)?;
    let session = state.sessions.get(&id).await?;

    session.save_field(section, &field, &request.value).await?;
    success(session.show_section(section, true).await?)
}
