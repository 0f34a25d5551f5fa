use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer};

use crate::docs;
use crate::handlers::{self, AppState};
use crate::installment_handler;

/// Builds the full application router.
///
/// API routes sit behind the body limit and a per-IP rate limiter; the health
/// check and the public file directories bypass both.
pub fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );
    let body_limit = state.config.max_upload_bytes;

    let api_routes = Router::new()
        // API Documentation
        .route("/docs", get(docs::serve_swagger_ui))
        .route("/api-docs/openapi.yml", get(docs::serve_openapi_spec))
        // Customers
        .route(
            "/api/customers",
            get(handlers::list_customers).post(handlers::create_customer),
        )
        .route(
            "/api/customers/:id",
            get(handlers::get_customer)
                .put(handlers::update_customer)
                .delete(handlers::delete_customer),
        )
        // Products
        .route(
            "/api/products",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route(
            "/api/products/:id",
            get(handlers::get_product)
                .put(handlers::update_product)
                .delete(handlers::delete_product),
        )
        // Credit cards
        .route(
            "/api/credit-cards",
            get(handlers::list_credit_cards).post(handlers::create_credit_card),
        )
        .route(
            "/api/credit-cards/:id",
            get(handlers::get_credit_card)
                .put(handlers::update_credit_card)
                .delete(handlers::delete_credit_card),
        )
        .route(
            "/api/credit-cards/:id/installments",
            get(handlers::get_credit_card_installments),
        )
        // Installment plans
        .route(
            "/api/installments",
            get(installment_handler::list_installments)
                .post(installment_handler::create_installment),
        )
        .route(
            "/api/installments/:id",
            get(installment_handler::get_installment)
                .put(installment_handler::update_installment)
                .delete(installment_handler::delete_installment),
        )
        .route(
            "/api/installments/:id/contract",
            post(installment_handler::upload_contract),
        )
        .route(
            "/api/installments/:id/contracts",
            get(installment_handler::list_contracts),
        )
        .route(
            "/api/installment-payments/:id/mark-paid",
            put(installment_handler::mark_payment_paid),
        )
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(RequestBodyLimitLayer::new(body_limit))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    let public_dir = state.config.public_dir.clone();

    let app = Router::new()
        .route("/api/health", get(handlers::health))
        .merge(api_routes)
        .nest_service("/uploads", ServeDir::new(public_dir.join("uploads")))
        .nest_service("/contracts", ServeDir::new(public_dir.join("contracts")))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Ok(app)
}
