use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::errors::AppError;
use crate::models::{Customer, CustomerInput};
use crate::pagination::{push_search, sort_column, ListParams, SortOrder};
use crate::utilization::{lock_credit_cards, recompute_credit_card};
use crate::validation::{normalize_id_card, normalize_phone};

const SEARCH_COLUMNS: &[&str] = &["name", "phone", "id_card_number"];

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("createdAt", "created_at"),
    ("name", "name"),
];

/// Customer records: CRUD plus duplicate-identity detection.
pub struct CustomerService {
    pool: PgPool,
}

impl CustomerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, params: &ListParams) -> Result<(Vec<Customer>, i64), AppError> {
        let page = params.page()?;
        let pattern = params.pattern();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM customers");
        let mut rows = QueryBuilder::<Postgres>::new("SELECT * FROM customers");
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
        let customers = rows
            .build_query_as::<Customer>()
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(
            "Listed {} of {} customers (search: {:?})",
            customers.len(),
            total,
            params.search
        );
        Ok((customers, total))
    }

    pub async fn get(&self, id: i32) -> Result<Customer, AppError> {
        sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Customer with id {} not found", id)))
    }

    /// Rejects the write if another customer already uses the phone or id card number.
    async fn ensure_unique(
        &self,
        phone: &str,
        id_card_number: &str,
        exclude_id: Option<i32>,
    ) -> Result<(), AppError> {
        let existing = sqlx::query_as::<_, (i32, String, String)>(
            r#"
            SELECT id, phone, id_card_number
            FROM customers
            WHERE (phone = $1 OR id_card_number = $2)
              AND ($3::int IS NULL OR id <> $3)
            LIMIT 1
            "#,
        )
        .bind(phone)
        .bind(id_card_number)
        .bind(exclude_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some((id, existing_phone, _)) if existing_phone == phone => Err(AppError::Conflict(
                format!("Phone number already registered to customer {}", id),
            )),
            Some((id, _, _)) => Err(AppError::Conflict(format!(
                "ID card number already registered to customer {}",
                id
            ))),
            None => Ok(()),
        }
    }

    fn normalized(input: &CustomerInput) -> Result<(String, String), AppError> {
        Ok((
            normalize_phone(&input.phone)?,
            normalize_id_card(&input.id_card_number)?,
        ))
    }

    pub async fn create(&self, input: &CustomerInput) -> Result<Customer, AppError> {
        let (phone, id_card_number) = Self::normalized(input)?;
        self.ensure_unique(&phone, &id_card_number, None).await?;

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (
                name, nickname, phone, address, id_card_number,
                facebook, line_id, id_card_image
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(input.name.trim())
        .bind(&input.nickname)
        .bind(&phone)
        .bind(input.address.trim())
        .bind(&id_card_number)
        .bind(&input.facebook)
        .bind(&input.line_id)
        .bind(&input.id_card_image)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_violation_as_conflict)?;

        tracing::info!("Created customer {} ({})", customer.id, customer.name);
        Ok(customer)
    }

    /// Updates every field; the ID card image is only replaced when a new one is given.
    pub async fn update(&self, id: i32, input: &CustomerInput) -> Result<Customer, AppError> {
        let (phone, id_card_number) = Self::normalized(input)?;
        self.ensure_unique(&phone, &id_card_number, Some(id)).await?;

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            UPDATE customers
            SET name = $1,
                nickname = $2,
                phone = $3,
                address = $4,
                id_card_number = $5,
                facebook = $6,
                line_id = $7,
                id_card_image = COALESCE($8, id_card_image),
                updated_at = now()
            WHERE id = $9
            RETURNING *
            "#,
        )
        .bind(input.name.trim())
        .bind(&input.nickname)
        .bind(&phone)
        .bind(input.address.trim())
        .bind(&id_card_number)
        .bind(&input.facebook)
        .bind(&input.line_id)
        .bind(&input.id_card_image)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unique_violation_as_conflict)?
        .ok_or_else(|| AppError::NotFound(format!("Customer with id {} not found", id)))?;

        tracing::info!("Updated customer {}", customer.id);
        Ok(customer)
    }

    /// Deletes the customer; their plans, payments and contracts go with them.
    ///
    /// Cards that financed those plans are recomputed in the same transaction.
    /// Plans are locked before cards, matching payment and plan updates.
    pub async fn delete(&self, id: i32) -> Result<Customer, AppError> {
        let mut tx = self.pool.begin().await?;

        let plans: Vec<(i32, i32)> = sqlx::query_as(
            "SELECT id, credit_card_id FROM installments WHERE customer_id = $1 ORDER BY id FOR UPDATE",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        let mut card_ids: Vec<i32> = plans.iter().map(|(_, card_id)| *card_id).collect();
        card_ids.sort_unstable();
        card_ids.dedup();
        lock_credit_cards(&mut tx, &card_ids).await?;

        let customer =
            sqlx::query_as::<_, Customer>("DELETE FROM customers WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Customer with id {} not found", id)))?;

        for card_id in &card_ids {
            recompute_credit_card(&mut tx, *card_id).await?;
        }

        tx.commit().await?;
        tracing::info!(
            "Deleted customer {} ({}), released {} credit card(s)",
            customer.id,
            customer.name,
            card_ids.len()
        );
        Ok(customer)
    }
}

/// The (phone, id_card_number) constraint can still fire when two requests race.
fn unique_violation_as_conflict(err: sqlx::Error) -> AppError {
    let is_unique = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    if is_unique {
        AppError::Conflict("Customer with this phone and ID card number already exists".to_string())
    } else {
        AppError::DatabaseError(err)
    }
}
