//! HTTP handlers for installment plans, term payments and contracts.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::contracts::ContractService;
use crate::errors::AppError;
use crate::forms::{MultipartForm, CONTRACT_FILE, PRODUCT_IMAGE_FILES, SIGNATURE_FILE, SLIP_FILE};
use crate::handlers::{discard_on_error, present_customer, present_product, today, AppState};
use crate::installments::{InstallmentListParams, InstallmentService};
use crate::models::*;
use crate::payments::PaymentService;
use crate::storage::{FileKind, FileStore};

/// Nulls out file references in a plan view whose files are gone.
async fn present_detail(files: &FileStore, mut detail: InstallmentDetail) -> InstallmentDetail {
    detail.contract_path = files.existing(detail.contract_path.as_deref()).await;
    detail.customer = present_customer(files, detail.customer).await;
    detail.product = present_product(files, detail.product).await;
    for payment in detail.payment_schedule.iter_mut() {
        payment.slip_image = files.existing(payment.slip_image.as_deref()).await;
    }
    detail
}

/// GET /api/installments
///
/// Supports `status` in {all, today_duedate, over_due, active, non-active, completed},
/// a `startDate`/`endDate` window on the plan start date, search, sort and paging.
pub async fn list_installments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InstallmentListParams>,
) -> Result<Json<InstallmentListResponse>, AppError> {
    let (installments, total_installments) = InstallmentService::new(state.db.clone())
        .list(&params, today())
        .await?;
    Ok(Json(InstallmentListResponse {
        installments,
        total_installments,
    }))
}

/// GET /api/installments/:id
pub async fn get_installment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<InstallmentDetail>, AppError> {
    let detail = InstallmentService::new(state.db.clone())
        .get_detail(id)
        .await?;
    Ok(Json(present_detail(&state.files, detail).await))
}

/// POST /api/installments
///
/// Creates the product and a `non-active` plan in one transaction.
pub async fn create_installment(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Installment>), AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let input = PlanInput::from_form(&form)?;
    tracing::info!(
        "POST /installments - customer {:?}, card {}, {} over {} months",
        input.customer_id,
        input.credit_card_id,
        input.product.price,
        input.term_months
    );

    let saved = state
        .files
        .save_all(FileKind::Image, &form.files(PRODUCT_IMAGE_FILES))
        .await?;

    let result = InstallmentService::new(state.db.clone())
        .create_plan(&input, &saved, today())
        .await;
    let installment = discard_on_error(&state.files, &saved, result).await?;
    Ok((StatusCode::CREATED, Json(installment)))
}

/// PUT /api/installments/:id
///
/// Rewrites the plan terms, activates it and regenerates the payment schedule.
pub async fn update_installment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<Json<InstallmentDetail>, AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let input = PlanInput::from_form(&form)?;
    tracing::info!("PUT /installments/{}", id);

    let saved = state
        .files
        .save_all(FileKind::Image, &form.files(PRODUCT_IMAGE_FILES))
        .await?;
    let images = (!saved.is_empty()).then_some(saved.as_slice());

    let service = InstallmentService::new(state.db.clone());
    let result = service.update_plan(id, &input, images).await;
    discard_on_error(&state.files, &saved, result).await?;

    let detail = service.get_detail(id).await?;
    Ok(Json(present_detail(&state.files, detail).await))
}

/// DELETE /api/installments/:id
pub async fn delete_installment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    let installment = InstallmentService::new(state.db.clone())
        .delete_plan(id)
        .await?;
    Ok(Json(json!({
        "message": "Installment deleted",
        "installment": installment,
    })))
}

/// PUT /api/installment-payments/:id/mark-paid
///
/// Multipart with optional `installment_id`, `paid_amount` and `slip_image`.
pub async fn mark_payment_paid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<Json<MarkPaidResponse>, AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let mut input = PaymentInput::from_form(&form)?;
    tracing::info!("PUT /installment-payments/{}/mark-paid", id);

    let mut saved = Vec::new();
    if let Some(file) = form.file(SLIP_FILE) {
        saved.push(state.files.save(FileKind::Image, file, None).await?);
    }
    input.slip_image = saved.first().cloned();

    let result = PaymentService::new(state.db.clone())
        .mark_paid(id, &input)
        .await;
    let response = discard_on_error(&state.files, &saved, result).await?;
    Ok(Json(response))
}

/// POST /api/installments/:id/contract
///
/// Multipart with `contractPdf`, `customerId` and an optional `signature` image.
pub async fn upload_contract(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Contract>), AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let pdf = form
        .file(CONTRACT_FILE)
        .ok_or_else(|| AppError::BadRequest("Missing contract file (contractPdf)".to_string()))?;
    let customer_id: i32 = form.required_number(&["customerId", "customer_id"])?;
    tracing::info!(
        "POST /installments/{}/contract - customer {}, {} bytes",
        id,
        customer_id,
        pdf.bytes.len()
    );

    let service = ContractService::new(state.db.clone());
    let owner = service.ensure_owner(id, customer_id).await?;

    let stamp = chrono::Utc::now().timestamp_millis();
    let mut saved = vec![
        state
            .files
            .save(FileKind::Contract, pdf, Some(format!("contract_{}_{}", id, stamp)))
            .await?,
    ];
    if let Some(signature) = form.file(SIGNATURE_FILE) {
        let result = state
            .files
            .save(FileKind::Image, signature, Some(format!("signature_{}_{}", id, stamp)))
            .await;
        let signature_path = discard_on_error(&state.files, &saved, result).await?;
        saved.push(signature_path);
    }

    let result = service
        .create(owner, &saved[0], saved.get(1).map(String::as_str))
        .await;
    let contract = discard_on_error(&state.files, &saved, result).await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

/// GET /api/installments/:id/contracts
pub async fn list_contracts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<Contract>>, AppError> {
    let contracts = ContractService::new(state.db.clone()).list(id).await?;
    Ok(Json(contracts))
}
