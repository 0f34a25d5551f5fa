//! Credit-card utilization bookkeeping.
//!
//! `used_amount` is always rewritten from a live SUM inside the caller's
//! transaction, never adjusted by deltas:
//!
//! ```text
//! used_amount = Σ price × (term_months − paid_terms) / term_months
//! ```
//!
//! over the card's plans that are not deleted or cancelled. Settling one term
//! therefore lowers the total by exactly `price / term_months`, independent of
//! the amount actually paid. Callers lock the card row first with
//! [`lock_credit_card`] so concurrent writers against one card are serialized.

use bigdecimal::BigDecimal;
use sqlx::PgConnection;

use crate::errors::AppError;
use crate::models::CreditCard;

/// Statuses whose plans no longer hold any credit.
const RELEASED_STATUSES: &str = "('deleted', 'cancelled')";

/// Statuses that keep the card/customer `installment_status` flag raised.
const LIVE_STATUSES: &str = "('non-active', 'active', 'overdue')";

fn remaining_principal_sql() -> String {
    format!(
        r#"
        SELECT COALESCE(SUM(
            p.price * (i.term_months - COALESCE(paid.paid_terms, 0))::numeric / i.term_months
        ), 0)::numeric
        FROM installments i
        JOIN products p ON p.id = i.product_id
        LEFT JOIN (
            SELECT installment_id, COUNT(*) AS paid_terms
            FROM installment_payments
            WHERE is_paid
            GROUP BY installment_id
        ) paid ON paid.installment_id = i.id
        WHERE i.credit_card_id = $1
          AND i.status NOT IN {}
        "#,
        RELEASED_STATUSES
    )
}

/// Locks the card row for the rest of the transaction.
pub async fn lock_credit_card(conn: &mut PgConnection, id: i32) -> Result<CreditCard, AppError> {
    sqlx::query_as::<_, CreditCard>("SELECT * FROM credit_cards WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Credit card with id {} not found", id)))
}

/// Locks several cards in ascending id order so concurrent callers never deadlock.
pub async fn lock_credit_cards(
    conn: &mut PgConnection,
    ids: &[i32],
) -> Result<Vec<CreditCard>, AppError> {
    let mut ordered = ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    let mut cards = Vec::with_capacity(ordered.len());
    for id in ordered {
        cards.push(lock_credit_card(conn, id).await?);
    }
    Ok(cards)
}

/// Remaining unpaid principal financed through the card.
pub async fn remaining_principal(
    conn: &mut PgConnection,
    credit_card_id: i32,
) -> Result<BigDecimal, AppError> {
    let total: BigDecimal = sqlx::query_scalar(&remaining_principal_sql())
        .bind(credit_card_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(total)
}

/// Rewrites `used_amount` and `installment_status` of a card from its plans.
pub async fn recompute_credit_card(
    conn: &mut PgConnection,
    credit_card_id: i32,
) -> Result<CreditCard, AppError> {
    let used_amount = remaining_principal(conn, credit_card_id).await?;

    let card = sqlx::query_as::<_, CreditCard>(&format!(
        r#"
        UPDATE credit_cards
        SET used_amount = ROUND($2::numeric, 2),
            installment_status = EXISTS (
                SELECT 1 FROM installments
                WHERE credit_card_id = $1 AND status IN {}
            ),
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
        LIVE_STATUSES
    ))
    .bind(credit_card_id)
    .bind(&used_amount)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!("Credit card with id {} not found", credit_card_id))
    })?;

    tracing::debug!(
        "Credit card {} utilization recomputed: used_amount={}, in_use={}",
        card.id,
        card.used_amount,
        card.installment_status
    );
    Ok(card)
}

/// Rewrites the customer's `installment_status` from their plans.
pub async fn refresh_customer_status(
    conn: &mut PgConnection,
    customer_id: i32,
) -> Result<bool, AppError> {
    let status: Option<bool> = sqlx::query_scalar(&format!(
        r#"
        UPDATE customers
        SET installment_status = EXISTS (
                SELECT 1 FROM installments
                WHERE customer_id = $1 AND status IN {}
            ),
            updated_at = now()
        WHERE id = $1
        RETURNING installment_status
        "#,
        LIVE_STATUSES
    ))
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await?;

    status.ok_or_else(|| AppError::NotFound(format!("Customer with id {} not found", customer_id)))
}
