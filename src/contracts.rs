use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::Contract;

/// A plan/customer pair whose ownership has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractOwner {
    installment_id: i32,
    customer_id: i32,
}

impl ContractOwner {
    pub fn installment_id(&self) -> i32 {
        self.installment_id
    }

    pub fn customer_id(&self) -> i32 {
        self.customer_id
    }
}

/// Signed contract documents attached to installment plans.
pub struct ContractService {
    pool: PgPool,
}

impl ContractService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fails with NotFound for an unknown plan and BadRequest when the plan
    /// belongs to a different customer.
    pub async fn ensure_owner(
        &self,
        installment_id: i32,
        customer_id: i32,
    ) -> Result<ContractOwner, AppError> {
        let owner_id: i32 = sqlx::query_scalar("SELECT customer_id FROM installments WHERE id = $1")
            .bind(installment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Installment with id {} not found", installment_id))
            })?;

        if owner_id != customer_id {
            return Err(AppError::BadRequest(format!(
                "Installment {} does not belong to customer {}",
                installment_id, customer_id
            )));
        }
        Ok(ContractOwner {
            installment_id,
            customer_id,
        })
    }

    /// Records an uploaded contract. The files must already be in the file store.
    pub async fn create(
        &self,
        owner: ContractOwner,
        pdf_path: &str,
        signature_image: Option<&str>,
    ) -> Result<Contract, AppError> {
        let contract = sqlx::query_as::<_, Contract>(
            r#"
            INSERT INTO contracts (customer_id, installment_id, pdf_path, signature_image)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(owner.customer_id)
        .bind(owner.installment_id)
        .bind(pdf_path)
        .bind(signature_image)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let err = AppError::from(e);
            if err.is_foreign_key_violation() {
                AppError::NotFound(format!(
                    "Installment with id {} not found",
                    owner.installment_id
                ))
            } else {
                err
            }
        })?;

        tracing::info!(
            "Stored contract {} for installment {} at {}",
            contract.id,
            owner.installment_id,
            contract.pdf_path
        );
        Ok(contract)
    }

    /// Contract history of a plan, newest first.
    pub async fn list(&self, installment_id: i32) -> Result<Vec<Contract>, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM installments WHERE id = $1)")
                .bind(installment_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(AppError::NotFound(format!(
                "Installment with id {} not found",
                installment_id
            )));
        }

        let contracts = sqlx::query_as::<_, Contract>(
            r#"
            SELECT * FROM contracts
            WHERE installment_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(installment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(contracts)
    }
}
