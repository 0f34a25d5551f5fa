use bigdecimal::BigDecimal;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::errors::AppError;
use crate::models::{
    CardInstallmentSummary, CreditCard, CreditCardInstallmentsResponse, CreditCardRequest,
};
use crate::pagination::{push_search, sort_column, ListParams, SortOrder};
use crate::utilization::lock_credit_card;

const SEARCH_COLUMNS: &[&str] = &["name"];

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("createdAt", "created_at"),
    ("name", "name"),
    ("credit_limit", "credit_limit"),
    ("creditLimit", "credit_limit"),
    ("used_amount", "used_amount"),
    ("usedAmount", "used_amount"),
];

fn validate_request(request: &CreditCardRequest) -> Result<(), AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if request.credit_limit < BigDecimal::from(0) {
        return Err(AppError::BadRequest(
            "credit_limit cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// Credit cards and the plans they finance.
///
/// `used_amount` and `installment_status` are owned by the utilization
/// bookkeeping; create and update never touch them.
pub struct CreditCardService {
    pool: PgPool,
}

impl CreditCardService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, params: &ListParams) -> Result<(Vec<CreditCard>, i64), AppError> {
        let page = params.page()?;
        let pattern = params.pattern();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM credit_cards");
        let mut rows = QueryBuilder::<Postgres>::new("SELECT * FROM credit_cards");
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
        let cards = rows
            .build_query_as::<CreditCard>()
            .fetch_all(&self.pool)
            .await?;

        Ok((cards, total))
    }

    pub async fn get(&self, id: i32) -> Result<CreditCard, AppError> {
        sqlx::query_as::<_, CreditCard>("SELECT * FROM credit_cards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credit card with id {} not found", id)))
    }

    pub async fn create(&self, request: &CreditCardRequest) -> Result<CreditCard, AppError> {
        validate_request(request)?;

        let card = sqlx::query_as::<_, CreditCard>(
            r#"
            INSERT INTO credit_cards (name, credit_limit, color)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(request.name.trim())
        .bind(&request.credit_limit)
        .bind(&request.color)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Created credit card {} ({})", card.id, card.name);
        Ok(card)
    }

    pub async fn update(&self, id: i32, request: &CreditCardRequest) -> Result<CreditCard, AppError> {
        validate_request(request)?;

        let card = sqlx::query_as::<_, CreditCard>(
            r#"
            UPDATE credit_cards
            SET name = $1,
                credit_limit = $2,
                color = $3,
                updated_at = now()
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(request.name.trim())
        .bind(&request.credit_limit)
        .bind(&request.color)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Credit card with id {} not found", id)))?;

        tracing::info!("Updated credit card {}", card.id);
        Ok(card)
    }

    /// Deletes a card with no live plans. Its finished plans go with it.
    pub async fn delete(&self, id: i32) -> Result<CreditCard, AppError> {
        let mut tx = self.pool.begin().await?;

        let card = lock_credit_card(&mut tx, id).await?;
        if card.installment_status {
            return Err(AppError::Conflict(format!(
                "Credit card {} is still financing active installments",
                id
            )));
        }

        sqlx::query("DELETE FROM credit_cards WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Deleted credit card {} ({})", card.id, card.name);
        Ok(card)
    }

    /// The card plus one summary row per plan it finances, newest first.
    pub async fn installments_summary(
        &self,
        id: i32,
    ) -> Result<CreditCardInstallmentsResponse, AppError> {
        let credit_card = self.get(id).await?;

        // Plans that were never activated have no schedule; their whole
        // financed amount is still owed.
        let installments = sqlx::query_as::<_, CardInstallmentSummary>(
            r#"
            SELECT
                i.id AS installment_id,
                i.customer_id,
                c.name AS customer_name,
                p.name AS product_name,
                i.status,
                i.total_amount,
                i.monthly_payment,
                i.term_months,
                i.start_date,
                COALESCE(s.paid_terms, 0) AS paid_terms,
                CASE
                    WHEN s.scheduled_terms IS NULL THEN i.monthly_payment * i.term_months
                    ELSE s.unpaid_amount
                END AS outstanding_debt
            FROM installments i
            JOIN customers c ON c.id = i.customer_id
            JOIN products p ON p.id = i.product_id
            LEFT JOIN (
                SELECT
                    installment_id,
                    COUNT(*) AS scheduled_terms,
                    COUNT(*) FILTER (WHERE is_paid) AS paid_terms,
                    COALESCE(SUM(amount) FILTER (WHERE NOT is_paid), 0) AS unpaid_amount
                FROM installment_payments
                GROUP BY installment_id
            ) s ON s.installment_id = i.id
            WHERE i.credit_card_id = $1
              AND i.status <> 'deleted'
            ORDER BY i.created_at DESC, i.id DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            "Credit card {} finances {} installment(s)",
            id,
            installments.len()
        );
        Ok(CreditCardInstallmentsResponse {
            credit_card,
            installments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn request(name: &str, limit: &str) -> CreditCardRequest {
        CreditCardRequest {
            name: name.to_string(),
            credit_limit: BigDecimal::from_str(limit).unwrap(),
            color: None,
        }
    }

    #[test]
    fn test_validate_request() {
        assert!(validate_request(&request("KBank Platinum", "50000")).is_ok());
        assert!(validate_request(&request("Zero limit", "0")).is_ok());
        assert!(matches!(
            validate_request(&request("  ", "100")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            validate_request(&request("Card", "-1")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_request_accepts_camel_case_limit() {
        let parsed: CreditCardRequest =
            serde_json::from_str(r##"{"name":"SCB","creditLimit":"30000.50","color":"#ff0000"}"##)
                .unwrap();
        assert_eq!(parsed.credit_limit, BigDecimal::from_str("30000.50").unwrap());
        assert_eq!(parsed.color.as_deref(), Some("#ff0000"));
    }
}
