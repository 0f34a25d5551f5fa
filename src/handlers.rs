use crate::config::Config;
use crate::credit_cards::CreditCardService;
use crate::customers::CustomerService;
use crate::errors::AppError;
use crate::forms::{MultipartForm, ID_CARD_FILE, PRODUCT_IMAGE_FILES};
use crate::models::*;
use crate::pagination::ListParams;
use crate::products::ProductService;
use crate::storage::{FileKind, FileStore};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Public file store for images and contracts.
    pub files: FileStore,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Self {
        let files = FileStore::new(config.public_dir.clone(), config.max_upload_bytes);
        Self { db, config, files }
    }
}

/// Local calendar date used for defaults and due-date filters.
pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Removes files written for a request whose database write failed.
pub(crate) async fn discard_on_error<T>(
    files: &FileStore,
    saved: &[String],
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    if result.is_err() && !saved.is_empty() {
        tracing::warn!(
            "Database write failed; discarding {} uploaded file(s)",
            saved.len()
        );
        files.remove_all(saved).await;
    }
    result
}

/// Replaces references to files that are gone from the store with `None`.
pub(crate) async fn present_customer(files: &FileStore, mut customer: Customer) -> Customer {
    customer.id_card_image = files.existing(customer.id_card_image.as_deref()).await;
    customer
}

/// Drops image paths whose files are gone from the store.
pub(crate) async fn present_product(files: &FileStore, mut product: Product) -> Product {
    let mut images = Vec::with_capacity(product.images.len());
    for image in product.images {
        if files.exists(&image).await {
            images.push(image);
        }
    }
    product.images = images;
    product
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "OK" })))
}

// ============ Customers ============

/// GET /api/customers
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<CustomerListResponse>, AppError> {
    let (customers, total_customers) = CustomerService::new(state.db.clone()).list(&params).await?;
    Ok(Json(CustomerListResponse {
        customers,
        total_customers,
    }))
}

/// GET /api/customers/:id
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Customer>, AppError> {
    let customer = CustomerService::new(state.db.clone()).get(id).await?;
    Ok(Json(present_customer(&state.files, customer).await))
}

/// POST /api/customers
///
/// Multipart with the customer fields and an optional `idCard` image.
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let mut input = CustomerInput::from_form(&form)?;
    tracing::info!("POST /customers - {}", input.name);

    let mut saved = Vec::new();
    if let Some(file) = form.file(ID_CARD_FILE) {
        saved.push(state.files.save(FileKind::Image, file, None).await?);
    }
    input.id_card_image = saved.first().cloned();

    let result = CustomerService::new(state.db.clone()).create(&input).await;
    let customer = discard_on_error(&state.files, &saved, result).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

/// PUT /api/customers/:id
///
/// The stored ID card image is kept unless a new one is uploaded.
pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<Json<Customer>, AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let mut input = CustomerInput::from_form(&form)?;
    tracing::info!("PUT /customers/{}", id);

    let mut saved = Vec::new();
    if let Some(file) = form.file(ID_CARD_FILE) {
        saved.push(state.files.save(FileKind::Image, file, None).await?);
    }
    input.id_card_image = saved.first().cloned();

    let result = CustomerService::new(state.db.clone()).update(id, &input).await;
    let customer = discard_on_error(&state.files, &saved, result).await?;
    Ok(Json(present_customer(&state.files, customer).await))
}

/// DELETE /api/customers/:id
pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    let customer = CustomerService::new(state.db.clone()).delete(id).await?;
    Ok(Json(json!({
        "message": "Customer deleted",
        "customer": customer,
    })))
}

// ============ Products ============

/// GET /api/products
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ProductListResponse>, AppError> {
    let (products, total_products) = ProductService::new(state.db.clone()).list(&params).await?;
    Ok(Json(ProductListResponse {
        products,
        total_products,
    }))
}

/// GET /api/products/:id
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Product>, AppError> {
    let product = ProductService::new(state.db.clone()).get(id).await?;
    Ok(Json(present_product(&state.files, product).await))
}

/// POST /api/products
///
/// Multipart with the product fields and any number of `images[]`.
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let input = ProductInput::from_form(&form)?;
    tracing::info!("POST /products - {}", input.name);

    let saved = state
        .files
        .save_all(FileKind::Image, &form.files(PRODUCT_IMAGE_FILES))
        .await?;

    let result = ProductService::new(state.db.clone()).create(&input, &saved).await;
    let product = discard_on_error(&state.files, &saved, result).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /api/products/:id
///
/// Uploaded images replace the stored list; without uploads it is kept.
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<Json<Product>, AppError> {
    let form = MultipartForm::from_multipart(multipart).await?;
    let input = ProductInput::from_form(&form)?;
    tracing::info!("PUT /products/{}", id);

    let saved = state
        .files
        .save_all(FileKind::Image, &form.files(PRODUCT_IMAGE_FILES))
        .await?;
    let images = (!saved.is_empty()).then_some(saved.as_slice());

    let result = ProductService::new(state.db.clone())
        .update(id, &input, images)
        .await;
    let product = discard_on_error(&state.files, &saved, result).await?;
    Ok(Json(present_product(&state.files, product).await))
}

/// DELETE /api/products/:id
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    let product = ProductService::new(state.db.clone()).delete(id).await?;
    Ok(Json(json!({
        "message": "Product deleted",
        "product": product,
    })))
}

// ============ Credit cards ============

/// GET /api/credit-cards
pub async fn list_credit_cards(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<CreditCardListResponse>, AppError> {
    let (credit_cards, total_credit_cards) =
        CreditCardService::new(state.db.clone()).list(&params).await?;
    Ok(Json(CreditCardListResponse {
        credit_cards,
        total_credit_cards,
    }))
}

/// GET /api/credit-cards/:id
pub async fn get_credit_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<CreditCard>, AppError> {
    let card = CreditCardService::new(state.db.clone()).get(id).await?;
    Ok(Json(card))
}

/// POST /api/credit-cards
pub async fn create_credit_card(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreditCardRequest>,
) -> Result<(StatusCode, Json<CreditCard>), AppError> {
    tracing::info!("POST /credit-cards - {}", request.name);
    let card = CreditCardService::new(state.db.clone())
        .create(&request)
        .await?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// PUT /api/credit-cards/:id
pub async fn update_credit_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(request): Json<CreditCardRequest>,
) -> Result<Json<CreditCard>, AppError> {
    tracing::info!("PUT /credit-cards/{}", id);
    let card = CreditCardService::new(state.db.clone())
        .update(id, &request)
        .await?;
    Ok(Json(card))
}

/// DELETE /api/credit-cards/:id
///
/// Refused with 409 while the card still finances a live plan.
pub async fn delete_credit_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    let card = CreditCardService::new(state.db.clone()).delete(id).await?;
    Ok(Json(json!({
        "message": "Credit card deleted",
        "creditCard": card,
    })))
}

/// GET /api/credit-cards/:id/installments
pub async fn get_credit_card_installments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<CreditCardInstallmentsResponse>, AppError> {
    let summary = CreditCardService::new(state.db.clone())
        .installments_summary(id)
        .await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use crate::forms::UploadedFile;
    use uuid::Uuid;

    fn temp_store() -> FileStore {
        let dir = std::env::temp_dir().join(format!("installment-handlers-{}", Uuid::new_v4()));
        FileStore::new(dir, 1024)
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let (status, Json(body)) = health().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "OK" }));
    }

    #[tokio::test]
    async fn test_discard_on_error_removes_saved_files() {
        let store = temp_store();
        let file = UploadedFile {
            field: "idCard".to_string(),
            file_name: "card.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(b"png"),
        };
        let path = store.save(FileKind::Image, &file, None).await.unwrap();
        let saved = vec![path.clone()];

        let ok: Result<i32, AppError> =
            discard_on_error(&store, &saved, Ok(1)).await;
        assert_eq!(ok.unwrap(), 1);
        assert!(store.exists(&path).await);

        let failed: Result<i32, AppError> = discard_on_error(
            &store,
            &saved,
            Err(AppError::Conflict("duplicate".to_string())),
        )
        .await;
        assert!(matches!(failed, Err(AppError::Conflict(_))));
        assert!(!store.exists(&path).await);

        let _ = tokio::fs::remove_dir_all(store.root()).await;
    }
}
