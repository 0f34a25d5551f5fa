use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::errors::AppError;
use crate::models::{Product, ProductInput};
use crate::pagination::{push_search, sort_column, ListParams, SortOrder};

const SEARCH_COLUMNS: &[&str] = &["name", "serial_number", "description"];

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("createdAt", "created_at"),
    ("name", "name"),
    ("price", "price"),
];

/// Inserts a product inside the caller's transaction.
pub async fn insert_product(
    conn: &mut PgConnection,
    input: &ProductInput,
    images: &[String],
) -> Result<Product, AppError> {
    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (name, price, serial_number, description, images)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(input.name.trim())
    .bind(&input.price)
    .bind(&input.serial_number)
    .bind(&input.description)
    .bind(images)
    .fetch_one(&mut *conn)
    .await?;
    Ok(product)
}

/// Updates a product inside the caller's transaction. `images = None` keeps the stored list.
pub async fn update_product(
    conn: &mut PgConnection,
    id: i32,
    input: &ProductInput,
    images: Option<&[String]>,
) -> Result<Product, AppError> {
    sqlx::query_as::<_, Product>(
        r#"
        UPDATE products
        SET name = $1,
            price = $2,
            serial_number = $3,
            description = $4,
            images = COALESCE($5, images),
            updated_at = now()
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(input.name.trim())
    .bind(&input.price)
    .bind(&input.serial_number)
    .bind(&input.description)
    .bind(images)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Product with id {} not found", id)))
}

pub struct ProductService {
    pool: PgPool,
}

impl ProductService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, params: &ListParams) -> Result<(Vec<Product>, i64), AppError> {
        let page = params.page()?;
        let pattern = params.pattern();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products");
        let mut rows = QueryBuilder::<Postgres>::new("SELECT * FROM products");
        if let Some(ref pattern) = pattern {
            push_search(&mut count, " WHERE ", SEARCH_COLUMNS, pattern);
            push_search(&mut rows, " WHERE ", SEARCH_COLUMNS, pattern);
        }

        let column = sort_column(params.sort_by.as_deref(), SORT_COLUMNS);
        let order = SortOrder::parse_or(params.sort_order.as_deref(), SortOrder::Desc);
        rows.push(" ORDER BY ")
            .push(column)
            .push(" ")
            .push(order.as_sql())
            .push(", id ")
            .push(order.as_sql());
        page.push(&mut rows);

        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        let products = rows
            .build_query_as::<Product>()
            .fetch_all(&self.pool)
            .await?;

        Ok((products, total))
    }

    pub async fn get(&self, id: i32) -> Result<Product, AppError> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product with id {} not found", id)))
    }

    pub async fn create(&self, input: &ProductInput, images: &[String]) -> Result<Product, AppError> {
        let mut conn = self.pool.acquire().await?;
        let product = insert_product(&mut conn, input, images).await?;
        tracing::info!(
            "Created product {} ({}) with {} image(s)",
            product.id,
            product.name,
            product.images.len()
        );
        Ok(product)
    }

    /// Edits a product on its own.
    ///
    /// The price of a product financed by a plan is fixed here; it changes through the
    /// plan update, which also rewrites the schedule and the card utilization.
    pub async fn update(
        &self,
        id: i32,
        input: &ProductInput,
        images: Option<&[String]>,
    ) -> Result<Product, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product with id {} not found", id)))?;

        if current.price != input.price {
            let financed: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM installments WHERE product_id = $1 AND status <> 'deleted')",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            if financed {
                return Err(AppError::Conflict(format!(
                    "Product {} is financed by an installment plan; change its price through the plan",
                    id
                )));
            }
        }

        let product = update_product(&mut tx, id, input, images).await?;
        tx.commit().await?;
        tracing::info!("Updated product {}", product.id);
        Ok(product)
    }

    /// Deletes a product. A product still referenced by a plan fails on the foreign key
    /// and surfaces as a database error.
    pub async fn delete(&self, id: i32) -> Result<Product, AppError> {
        let product = sqlx::query_as::<_, Product>("DELETE FROM products WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product with id {} not found", id)))?;

        tracing::info!("Deleted product {} ({})", product.id, product.name);
        Ok(product)
    }
}
