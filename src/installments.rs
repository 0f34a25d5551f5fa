//! Installment plan lifecycle: creation, activation, soft delete, listing and
//! overdue marking.
//!
//! Every write runs in one transaction that locks the affected credit card rows
//! and finishes by recomputing card utilization and the customer flag, so a
//! failure at any step leaves no partial state behind.

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::str::FromStr;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    Contract, CreditCard, Customer, Installment, InstallmentDetail, InstallmentPayment,
    InstallmentStatus, InstallmentSummary, PlanInput, Product,
};
use crate::pagination::{push_search, sort_column, ListParams, SortOrder};
use crate::products::{insert_product, update_product};
use crate::schedule::{amortize, generate_schedule, ScheduledTerm};
use crate::utilization::{
    lock_credit_card, lock_credit_cards, recompute_credit_card, refresh_customer_status,
};

const SEARCH_COLUMNS: &[&str] = &["c.name", "p.name", "p.serial_number"];

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "i.created_at"),
    ("createdAt", "i.created_at"),
    ("start_date", "i.start_date"),
    ("startDate", "i.start_date"),
    ("customer_name", "c.name"),
    ("customerName", "c.name"),
    ("product_name", "p.name"),
    ("productName", "p.name"),
    ("total_amount", "i.total_amount"),
    ("totalAmount", "i.total_amount"),
    ("monthly_payment", "i.monthly_payment"),
    ("monthlyPayment", "i.monthly_payment"),
    ("status", "i.status"),
    ("next_due_date", "s.next_due_date"),
    ("nextDueDate", "s.next_due_date"),
];

const SUMMARY_COLUMNS: &str = r#"
    SELECT
        i.*,
        c.name AS customer_name,
        c.phone AS customer_phone,
        p.name AS product_name,
        p.serial_number,
        p.price AS product_price,
        cc.name AS credit_card_name,
        COALESCE(s.paid_terms, 0) AS paid_terms,
        s.next_due_date
"#;

const SUMMARY_FROM: &str = r#"
    FROM installments i
    JOIN customers c ON c.id = i.customer_id
    JOIN products p ON p.id = i.product_id
    JOIN credit_cards cc ON cc.id = i.credit_card_id
    LEFT JOIN (
        SELECT
            installment_id,
            COUNT(*) FILTER (WHERE is_paid) AS paid_terms,
            MIN(due_date) FILTER (WHERE NOT is_paid) AS next_due_date
        FROM installment_payments
        GROUP BY installment_id
    ) s ON s.installment_id = i.id
    WHERE i.status <> 'deleted'
"#;

/// Status filter accepted by the installment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    /// Plans with an unpaid term due today.
    DueToday,
    /// Plans marked overdue or holding an unpaid term past its due date.
    OverDue,
    Is(InstallmentStatus),
}

impl FromStr for StatusFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all" => Ok(StatusFilter::All),
            "today_duedate" => Ok(StatusFilter::DueToday),
            "over_due" | "overdue" => Ok(StatusFilter::OverDue),
            "active" => Ok(StatusFilter::Is(InstallmentStatus::Active)),
            "non-active" => Ok(StatusFilter::Is(InstallmentStatus::NonActive)),
            "completed" => Ok(StatusFilter::Is(InstallmentStatus::Completed)),
            other => Err(AppError::BadRequest(format!(
                "Unsupported status filter '{}'. Supported: all, today_duedate, over_due, active, non-active, completed",
                other
            ))),
        }
    }
}

/// Query parameters of `GET /api/installments`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentListParams {
    #[serde(flatten)]
    pub list: ListParams,
    pub status: Option<String>,
    #[serde(alias = "start_date")]
    pub start_date: Option<String>,
    #[serde(alias = "end_date")]
    pub end_date: Option<String>,
}

/// Parsed and validated list filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentFilter {
    pub status: StatusFilter,
    pub pattern: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

fn optional_date(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => crate::forms::parse_date(value, field).map(Some),
        None => Ok(None),
    }
}

impl InstallmentListParams {
    pub fn filter(&self) -> Result<InstallmentFilter, AppError> {
        let status = match self.status.as_deref() {
            Some(raw) => raw.parse()?,
            None => StatusFilter::All,
        };
        let start_date = optional_date(self.start_date.as_deref(), "startDate")?;
        let end_date = optional_date(self.end_date.as_deref(), "endDate")?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(AppError::BadRequest(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }
        Ok(InstallmentFilter {
            status,
            pattern: self.list.pattern(),
            start_date,
            end_date,
        })
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &InstallmentFilter, today: NaiveDate) {
    match filter.status {
        StatusFilter::All => {}
        StatusFilter::DueToday => {
            qb.push(
                " AND EXISTS (SELECT 1 FROM installment_payments ip \
                 WHERE ip.installment_id = i.id AND NOT ip.is_paid AND ip.due_date = ",
            )
            .push_bind(today)
            .push(")");
        }
        StatusFilter::OverDue => {
            qb.push(
                " AND (i.status = 'overdue' OR (i.status = 'active' AND EXISTS (\
                 SELECT 1 FROM installment_payments ip \
                 WHERE ip.installment_id = i.id AND NOT ip.is_paid AND ip.due_date < ",
            )
            .push_bind(today)
            .push(")))");
        }
        StatusFilter::Is(status) => {
            qb.push(" AND i.status = ").push_bind(status.as_str());
        }
    }

    if let Some(ref pattern) = filter.pattern {
        push_search(qb, " AND ", SEARCH_COLUMNS, pattern);
    }
    if let Some(start) = filter.start_date {
        qb.push(" AND i.start_date >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        qb.push(" AND i.start_date <= ").push_bind(end);
    }
}

async fn lock_installment(conn: &mut PgConnection, id: i32) -> Result<Installment, AppError> {
    sqlx::query_as::<_, Installment>("SELECT * FROM installments WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Installment with id {} not found", id)))
}

async fn insert_schedule(
    conn: &mut PgConnection,
    installment_id: i32,
    schedule: &[ScheduledTerm],
) -> Result<u64, AppError> {
    if schedule.is_empty() {
        return Ok(0);
    }

    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO installment_payments (installment_id, term_number, due_date, amount, is_paid) ",
    );
    qb.push_values(schedule, |mut row, term| {
        row.push_bind(installment_id)
            .push_bind(term.term_number)
            .push_bind(term.due_date)
            .push_bind(term.amount.clone())
            .push_bind(term.is_paid);
    });

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub struct InstallmentService {
    pool: PgPool,
}

impl InstallmentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a plan for a new product. The plan starts `non-active` with no schedule.
    pub async fn create_plan(
        &self,
        input: &PlanInput,
        images: &[String],
        today: NaiveDate,
    ) -> Result<Installment, AppError> {
        input.validate()?;
        let customer_id = input
            .customer_id
            .ok_or_else(|| AppError::BadRequest("Missing required field: customer_id".to_string()))?;
        let start_date = input.start_date.unwrap_or(today);
        let amounts = amortize(
            &input.product.price,
            &input.down_payment,
            &input.interest_rate,
            input.term_months,
        )?;

        let mut tx = self.pool.begin().await?;

        lock_credit_card(&mut tx, input.credit_card_id).await?;
        let product = insert_product(&mut tx, &input.product, images).await?;

        // The card row is locked and present, so a foreign key failure here
        // can only come from the customer.
        let installment = sqlx::query_as::<_, Installment>(
            r#"
            INSERT INTO installments (
                customer_id, product_id, credit_card_id, total_amount, down_payment,
                monthly_payment, interest_rate, term_months, status, late_fee,
                start_date, due_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(customer_id)
        .bind(product.id)
        .bind(input.credit_card_id)
        .bind(&amounts.total_amount)
        .bind(&input.down_payment)
        .bind(&amounts.monthly_payment)
        .bind(&input.interest_rate)
        .bind(input.term_months)
        .bind(InstallmentStatus::NonActive.as_str())
        .bind(&input.late_fee)
        .bind(start_date)
        .bind(input.due_day)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let err = AppError::from(e);
            if err.is_foreign_key_violation() {
                AppError::NotFound(format!("Customer with id {} not found", customer_id))
            } else {
                err
            }
        })?;

        let card = recompute_credit_card(&mut tx, input.credit_card_id).await?;
        refresh_customer_status(&mut tx, customer_id).await?;

        tx.commit().await?;
        tracing::info!(
            "Created installment {} for customer {}: product {} on card {} (used_amount now {})",
            installment.id,
            customer_id,
            product.id,
            card.id,
            card.used_amount
        );
        Ok(installment)
    }

    /// Updates the plan terms, activates it and regenerates its schedule.
    ///
    /// Refused once any term has been paid. The schedule stays anchored at the
    /// original start date.
    pub async fn update_plan(
        &self,
        id: i32,
        input: &PlanInput,
        images: Option<&[String]>,
    ) -> Result<Installment, AppError> {
        input.validate()?;
        let amounts = amortize(
            &input.product.price,
            &input.down_payment,
            &input.interest_rate,
            input.term_months,
        )?;

        let mut tx = self.pool.begin().await?;

        let current = lock_installment(&mut tx, id).await?;
        if !current.status.can_transition_to(InstallmentStatus::Active) {
            return Err(AppError::Conflict(format!(
                "Installment {} is {} and cannot be activated",
                id, current.status
            )));
        }

        let paid_terms: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM installment_payments WHERE installment_id = $1 AND is_paid",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if paid_terms > 0 {
            return Err(AppError::Conflict(format!(
                "Installment {} already has {} paid term(s); its terms can no longer change",
                id, paid_terms
            )));
        }

        let card_ids = [current.credit_card_id, input.credit_card_id];
        lock_credit_cards(&mut tx, &card_ids).await?;

        update_product(&mut tx, current.product_id, &input.product, images).await?;

        let installment = sqlx::query_as::<_, Installment>(
            r#"
            UPDATE installments
            SET credit_card_id = $1,
                total_amount = $2,
                down_payment = $3,
                monthly_payment = $4,
                interest_rate = $5,
                term_months = $6,
                status = $7,
                late_fee = $8,
                due_date = $9,
                updated_at = now()
            WHERE id = $10
            RETURNING *
            "#,
        )
        .bind(input.credit_card_id)
        .bind(&amounts.total_amount)
        .bind(&input.down_payment)
        .bind(&amounts.monthly_payment)
        .bind(&input.interest_rate)
        .bind(input.term_months)
        .bind(InstallmentStatus::Active.as_str())
        .bind(&input.late_fee)
        .bind(input.due_day)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM installment_payments WHERE installment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let schedule = generate_schedule(
            installment.start_date,
            installment.due_date,
            installment.term_months,
            &installment.monthly_payment,
        )?;
        let inserted = insert_schedule(&mut tx, id, &schedule).await?;

        recompute_credit_card(&mut tx, current.credit_card_id).await?;
        if input.credit_card_id != current.credit_card_id {
            recompute_credit_card(&mut tx, input.credit_card_id).await?;
        }
        refresh_customer_status(&mut tx, installment.customer_id).await?;

        tx.commit().await?;
        tracing::info!(
            "Activated installment {}: {} terms of {} due on day {}",
            id,
            inserted,
            installment.monthly_payment,
            installment.due_date
        );
        Ok(installment)
    }

    /// Marks the plan deleted and releases its credit. Payment history is kept.
    pub async fn delete_plan(&self, id: i32) -> Result<Installment, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = lock_installment(&mut tx, id).await?;
        if !current.status.can_transition_to(InstallmentStatus::Deleted) {
            return Err(AppError::Conflict(format!(
                "Installment {} is {} and cannot be deleted",
                id, current.status
            )));
        }
        lock_credit_card(&mut tx, current.credit_card_id).await?;

        let installment = sqlx::query_as::<_, Installment>(
            "UPDATE installments SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(InstallmentStatus::Deleted.as_str())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let card = recompute_credit_card(&mut tx, installment.credit_card_id).await?;
        refresh_customer_status(&mut tx, installment.customer_id).await?;

        tx.commit().await?;
        tracing::info!(
            "Deleted installment {} (was {}); card {} used_amount now {}",
            id,
            current.status,
            card.id,
            card.used_amount
        );
        Ok(installment)
    }

    pub async fn list(
        &self,
        params: &InstallmentListParams,
        today: NaiveDate,
    ) -> Result<(Vec<InstallmentSummary>, i64), AppError> {
        let page = params.list.page()?;
        let filter = params.filter()?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        count.push(SUMMARY_FROM);
        push_filters(&mut count, &filter, today);

        let mut rows = QueryBuilder::<Postgres>::new(SUMMARY_COLUMNS);
        rows.push(SUMMARY_FROM);
        push_filters(&mut rows, &filter, today);

        let column = sort_column(params.list.sort_by.as_deref(), SORT_COLUMNS);
        let order = SortOrder::parse_or(params.list.sort_order.as_deref(), SortOrder::Desc);
        rows.push(" ORDER BY ")
            .push(column)
            .push(" ")
            .push(order.as_sql())
            .push(" NULLS LAST, i.id ")
            .push(order.as_sql());
        page.push(&mut rows);

        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        let installments = rows
            .build_query_as::<InstallmentSummary>()
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(
            "Listed {} of {} installments (filter: {:?})",
            installments.len(),
            total,
            filter.status
        );
        Ok((installments, total))
    }

    /// The plan with its product, customer, card, schedule and newest contract.
    ///
    /// `contract_path` is the stored reference; callers check it against the file store.
    pub async fn get_detail(&self, id: i32) -> Result<InstallmentDetail, AppError> {
        let installment = sqlx::query_as::<_, Installment>("SELECT * FROM installments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Installment with id {} not found", id)))?;

        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(installment.product_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Loading product of installment {}", id))?;
        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(installment.customer_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Loading customer of installment {}", id))?;
        let credit_card = sqlx::query_as::<_, CreditCard>("SELECT * FROM credit_cards WHERE id = $1")
            .bind(installment.credit_card_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Loading credit card of installment {}", id))?;

        let payment_schedule = sqlx::query_as::<_, InstallmentPayment>(
            "SELECT * FROM installment_payments WHERE installment_id = $1 ORDER BY term_number",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let contract = sqlx::query_as::<_, Contract>(
            r#"
            SELECT * FROM contracts
            WHERE installment_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(InstallmentDetail {
            installment,
            product,
            customer,
            credit_card,
            payment_schedule,
            contract_path: contract.map(|c| c.pdf_path),
        })
    }

    /// Moves active plans with a missed term to overdue and caught-up overdue
    /// plans back to active. Returns `(marked_overdue, restored_active)`.
    pub async fn refresh_overdue(&self, today: NaiveDate) -> Result<(u64, u64), AppError> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE installments i
            SET status = 'overdue', updated_at = now()
            WHERE i.status = 'active'
              AND EXISTS (
                  SELECT 1 FROM installment_payments ip
                  WHERE ip.installment_id = i.id AND NOT ip.is_paid AND ip.due_date < $1
              )
            "#,
        )
        .bind(today)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let restored = sqlx::query(
            r#"
            UPDATE installments i
            SET status = 'active', updated_at = now()
            WHERE i.status = 'overdue'
              AND NOT EXISTS (
                  SELECT 1 FROM installment_payments ip
                  WHERE ip.installment_id = i.id AND NOT ip.is_paid AND ip.due_date < $1
              )
            "#,
        )
        .bind(today)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        tracing::info!(
            "Overdue refresh for {}: {} marked overdue, {} restored to active",
            today,
            marked,
            restored
        );
        Ok((marked, restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> InstallmentListParams {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        serde_urlencoded::from_str(&query).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_status_filter_parsing() {
        assert_eq!("all".parse::<StatusFilter>().unwrap(), StatusFilter::All);
        assert_eq!("".parse::<StatusFilter>().unwrap(), StatusFilter::All);
        assert_eq!(
            "today_duedate".parse::<StatusFilter>().unwrap(),
            StatusFilter::DueToday
        );
        assert_eq!(
            "over_due".parse::<StatusFilter>().unwrap(),
            StatusFilter::OverDue
        );
        assert_eq!(
            "non-active".parse::<StatusFilter>().unwrap(),
            StatusFilter::Is(InstallmentStatus::NonActive)
        );
        assert!(matches!(
            "deleted".parse::<StatusFilter>(),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_list_params_from_query() {
        let p = params(&[
            ("search", "iphone"),
            ("status", "active"),
            ("sortBy", "customer_name"),
            ("sortOrder", "ASC"),
            ("limit", "20"),
            ("startDate", "2024-01-01"),
            ("endDate", "2024-12-31"),
        ]);
        let filter = p.filter().unwrap();
        assert_eq!(filter.status, StatusFilter::Is(InstallmentStatus::Active));
        assert_eq!(filter.pattern.as_deref(), Some("%iphone%"));
        assert_eq!(filter.start_date, Some(date(2024, 1, 1)));
        assert_eq!(filter.end_date, Some(date(2024, 12, 31)));
        assert_eq!(p.list.page().unwrap().limit, 20);
        assert_eq!(
            sort_column(p.list.sort_by.as_deref(), SORT_COLUMNS),
            "c.name"
        );
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let p = params(&[("startDate", "2024-06-01"), ("endDate", "2024-01-01")]);
        assert!(matches!(p.filter(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_filters_bind_values() {
        let filter = InstallmentFilter {
            status: StatusFilter::DueToday,
            pattern: Some("%a%".to_string()),
            start_date: Some(date(2024, 1, 1)),
            end_date: None,
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        qb.push(SUMMARY_FROM);
        push_filters(&mut qb, &filter, date(2024, 5, 5));
        let sql = qb.sql();

        assert!(sql.contains("ip.due_date = $1"));
        assert!(sql.contains("c.name ILIKE $2 OR p.name ILIKE $3 OR p.serial_number ILIKE $4"));
        assert!(sql.contains("i.start_date >= $5"));
        assert!(!sql.contains("i.start_date <="));
        assert!(sql.contains("i.status <> 'deleted'"));
    }
}
