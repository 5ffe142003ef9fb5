//! Invoice numbering administration.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::authorize,
    models::invoice::{InvoiceFormat, InvoiceFormatRequest},
    models::principal::{Capability, Principal},
    services::invoice_service,
};

/// Create or replace the school's invoice format.
///
/// # Request Body
///
/// ```json
/// { "prefix": "INV", "format": "monthly" }
/// ```
///
/// `format` is one of `unscoped`, `yearly`, `monthly`, `daily`.
pub async fn put_invoice_format(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(school_id): Path<Uuid>,
    Json(request): Json<InvoiceFormatRequest>,
) -> Result<Json<InvoiceFormat>, AppError> {
    authorize(&principal, Capability::ManageInvoiceFormat, school_id)?;

    let saved = invoice_service::save_format(
        state.repo.as_ref(),
        school_id,
        request,
        Utc::now(),
        state.settings.invoice_offset,
    )
    .await?;

    Ok(Json(saved))
}

pub async fn get_invoice_format(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(school_id): Path<Uuid>,
) -> Result<Json<InvoiceFormat>, AppError> {
    authorize(&principal, Capability::ManageInvoiceFormat, school_id)?;

    let format = invoice_service::get_format(state.repo.as_ref(), school_id).await?;

    Ok(Json(format))
}
