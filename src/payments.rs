use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::{
    Installment, InstallmentPayment, InstallmentStatus, MarkPaidResponse, PaymentInput,
};
use crate::utilization::{lock_credit_card, recompute_credit_card, refresh_customer_status};

/// Settlement of scheduled terms.
pub struct PaymentService {
    pool: PgPool,
}

impl PaymentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Marks one term paid and releases `price / term_months` of principal on the card.
    ///
    /// `principal_credited` is the change in the card's stored `used_amount`. The card
    /// keeps a rounded total, so for prices that do not divide evenly by the term the
    /// individual releases differ by a cent while still summing to the price.
    /// Locks run plan, then term, then card, the same order plan activation uses.
    /// The plan completes when its last term is settled.
    pub async fn mark_paid(
        &self,
        payment_id: i32,
        input: &PaymentInput,
    ) -> Result<MarkPaidResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        let installment_id: i32 =
            sqlx::query_scalar("SELECT installment_id FROM installment_payments WHERE id = $1")
                .bind(payment_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Payment with id {} not found", payment_id))
                })?;

        if let Some(expected) = input.installment_id {
            if expected != installment_id {
                return Err(AppError::BadRequest(format!(
                    "Payment {} does not belong to installment {}",
                    payment_id, expected
                )));
            }
        }

        let installment =
            sqlx::query_as::<_, Installment>("SELECT * FROM installments WHERE id = $1 FOR UPDATE")
                .bind(installment_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Installment with id {} not found", installment_id))
                })?;

        if !matches!(
            installment.status,
            InstallmentStatus::Active | InstallmentStatus::Overdue
        ) {
            return Err(AppError::Conflict(format!(
                "Installment {} is {} and does not accept payments",
                installment.id, installment.status
            )));
        }

        let current = sqlx::query_as::<_, InstallmentPayment>(
            "SELECT * FROM installment_payments WHERE id = $1 AND installment_id = $2 FOR UPDATE",
        )
        .bind(payment_id)
        .bind(installment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment with id {} not found", payment_id)))?;

        if current.is_paid {
            return Err(AppError::Conflict(format!(
                "Payment {} (term {}) is already paid",
                payment_id, current.term_number
            )));
        }

        let card_before = lock_credit_card(&mut tx, installment.credit_card_id).await?;

        let payment = sqlx::query_as::<_, InstallmentPayment>(
            r#"
            UPDATE installment_payments
            SET is_paid = true,
                paid_date = now(),
                paid_amount = COALESCE($2, amount),
                slip_image = COALESCE($3, slip_image)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(&input.paid_amount)
        .bind(&input.slip_image)
        .fetch_one(&mut *tx)
        .await?;

        let unpaid_terms: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM installment_payments WHERE installment_id = $1 AND NOT is_paid",
        )
        .bind(installment_id)
        .fetch_one(&mut *tx)
        .await?;

        let installment_status = if unpaid_terms == 0
            && installment.status.can_transition_to(InstallmentStatus::Completed)
        {
            sqlx::query("UPDATE installments SET status = $1, updated_at = now() WHERE id = $2")
                .bind(InstallmentStatus::Completed.as_str())
                .bind(installment_id)
                .execute(&mut *tx)
                .await?;
            InstallmentStatus::Completed
        } else {
            installment.status
        };

        let card = recompute_credit_card(&mut tx, installment.credit_card_id).await?;
        refresh_customer_status(&mut tx, installment.customer_id).await?;

        tx.commit().await?;
        tracing::info!(
            "Payment {} (installment {}, term {}) settled; card {} used_amount now {}, plan {}",
            payment.id,
            installment_id,
            payment.term_number,
            card.id,
            card.used_amount,
            installment_status
        );

        Ok(MarkPaidResponse {
            payment,
            installment_status,
            principal_credited: &card_before.used_amount - &card.used_amount,
            credit_card_used_amount: card.used_amount,
        })
    }
}
