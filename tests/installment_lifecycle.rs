//! End-to-end plan lifecycle against a real database.
//! Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use rust_installment_api::contracts::ContractService;
use rust_installment_api::credit_cards::CreditCardService;
use rust_installment_api::customers::CustomerService;
use rust_installment_api::db::Database;
use rust_installment_api::errors::AppError;
use rust_installment_api::installments::InstallmentService;
use rust_installment_api::models::{
    CreditCard, CreditCardRequest, Customer, CustomerInput, InstallmentStatus, PaymentInput,
    PlanInput, ProductInput,
};
use rust_installment_api::payments::PaymentService;
use rust_installment_api::products::ProductService;

async fn pool() -> anyhow::Result<PgPool> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;
    let db = Database::with_max_connections(&db_url, 5).await?;
    Ok(db.pool)
}

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Unique, valid Thai mobile number and ID card number so repeated runs never collide.
fn unique_identity() -> (String, String) {
    let n = Uuid::new_v4().as_u128();
    (
        format!("081{:07}", n % 10_000_000),
        format!("{:013}", (n >> 32) % 10_000_000_000_000),
    )
}

async fn new_customer(pool: &PgPool) -> anyhow::Result<Customer> {
    let (phone, id_card_number) = unique_identity();
    let customer = CustomerService::new(pool.clone())
        .create(&CustomerInput {
            name: "Somchai Jaidee".to_string(),
            phone,
            address: "99 Sukhumvit Rd, Bangkok".to_string(),
            id_card_number,
            ..Default::default()
        })
        .await?;
    Ok(customer)
}

async fn new_card(pool: &PgPool) -> anyhow::Result<CreditCard> {
    let card = CreditCardService::new(pool.clone())
        .create(&CreditCardRequest {
            name: format!("Test card {}", Uuid::new_v4().simple()),
            credit_limit: dec("100000"),
            color: None,
        })
        .await?;
    Ok(card)
}

fn plan(customer_id: i32, credit_card_id: i32, serial: &str) -> PlanInput {
    PlanInput {
        customer_id: Some(customer_id),
        credit_card_id,
        product: ProductInput {
            name: "iPhone 15".to_string(),
            price: dec("12000"),
            serial_number: Some(serial.to_string()),
            description: None,
        },
        down_payment: dec("2000"),
        interest_rate: dec("5"),
        term_months: 10,
        due_day: 5,
        late_fee: dec("0"),
        start_date: Some(date(2024, 3, 20)),
    }
}

#[tokio::test]
#[ignore]
async fn create_activate_and_pay_plan() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());
    let cards = CreditCardService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let created = installments
        .create_plan(&plan(customer.id, card.id, &serial), &[], date(2024, 3, 20))
        .await?;
    assert_eq!(created.status, InstallmentStatus::NonActive);
    assert_eq!(created.total_amount, dec("10000"));
    assert_eq!(created.monthly_payment, dec("1050"));

    let card_after_create = cards.get(card.id).await?;
    assert!(card_after_create.installment_status);
    assert_eq!(card_after_create.used_amount, dec("12000"));
    let customer_after_create = CustomerService::new(pool.clone()).get(customer.id).await?;
    assert!(customer_after_create.installment_status);

    let activated = installments
        .update_plan(created.id, &plan(customer.id, card.id, &serial), None)
        .await?;
    assert_eq!(activated.status, InstallmentStatus::Active);

    let detail = installments.get_detail(created.id).await?;
    assert_eq!(detail.payment_schedule.len(), 10);
    assert_eq!(detail.payment_schedule[0].due_date, date(2024, 4, 5));
    assert_eq!(detail.payment_schedule[9].due_date, date(2025, 1, 5));
    assert!(detail
        .payment_schedule
        .iter()
        .all(|p| p.amount == dec("1050") && !p.is_paid));
    assert!(detail.contract_path.is_none());

    // A partial amount still releases exactly price / term of principal.
    let first = &detail.payment_schedule[0];
    let paid = PaymentService::new(pool.clone())
        .mark_paid(
            first.id,
            &PaymentInput {
                installment_id: Some(created.id),
                paid_amount: Some(dec("500")),
                slip_image: None,
            },
        )
        .await?;
    assert!(paid.payment.is_paid);
    assert_eq!(paid.payment.paid_amount, Some(dec("500")));
    assert_eq!(paid.principal_credited, dec("1200"));
    assert_eq!(paid.credit_card_used_amount, dec("10800"));
    assert_eq!(paid.installment_status, InstallmentStatus::Active);

    // Paying twice conflicts, and terms can no longer be rewritten.
    let again = PaymentService::new(pool.clone())
        .mark_paid(first.id, &PaymentInput::default())
        .await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
    let rewrite = installments
        .update_plan(created.id, &plan(customer.id, card.id, &serial), None)
        .await;
    assert!(matches!(rewrite, Err(AppError::Conflict(_))));

    Ok(())
}

#[tokio::test]
#[ignore]
async fn mismatched_installment_id_is_rejected() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let created = installments
        .create_plan(&plan(customer.id, card.id, &serial), &[], date(2024, 1, 1))
        .await?;
    installments
        .update_plan(created.id, &plan(customer.id, card.id, &serial), None)
        .await?;
    let detail = installments.get_detail(created.id).await?;

    let result = PaymentService::new(pool.clone())
        .mark_paid(
            detail.payment_schedule[0].id,
            &PaymentInput {
                installment_id: Some(created.id + 1_000_000),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let missing = PaymentService::new(pool.clone())
        .mark_paid(i32::MAX, &PaymentInput::default())
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn failed_creation_leaves_no_product_and_no_card_change() -> anyhow::Result<()> {
    let pool = pool().await?;
    let card = new_card(&pool).await?;

    // A customer id that does not exist fails after the product insert.
    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let result = InstallmentService::new(pool.clone())
        .create_plan(&plan(i32::MAX, card.id, &serial), &[], date(2024, 1, 1))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE serial_number = $1")
        .bind(&serial)
        .fetch_one(&pool)
        .await?;
    assert_eq!(products, 0);

    let card_after = CreditCardService::new(pool.clone()).get(card.id).await?;
    assert_eq!(card_after.used_amount, card.used_amount);
    assert!(!card_after.installment_status);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn duplicate_phone_conflicts() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let (_, other_id_card) = unique_identity();

    let result = CustomerService::new(pool.clone())
        .create(&CustomerInput {
            name: "Somsri".to_string(),
            phone: customer.phone.clone(),
            address: "Chiang Mai".to_string(),
            id_card_number: other_id_card,
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn card_delete_conflicts_until_plans_finish() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());
    let cards = CreditCardService::new(pool.clone());
    let payments = PaymentService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let mut input = plan(customer.id, card.id, &serial);
    input.term_months = 2;
    let created = installments.create_plan(&input, &[], date(2024, 1, 1)).await?;
    installments.update_plan(created.id, &input, None).await?;

    assert!(matches!(cards.delete(card.id).await, Err(AppError::Conflict(_))));

    let summary = cards.installments_summary(card.id).await?;
    assert_eq!(summary.installments.len(), 1);
    assert_eq!(summary.installments[0].paid_terms, 0);
    assert_eq!(summary.installments[0].outstanding_debt, dec("10500"));

    let detail = installments.get_detail(created.id).await?;
    let mut last = None;
    for payment in &detail.payment_schedule {
        last = Some(payments.mark_paid(payment.id, &PaymentInput::default()).await?);
    }
    let last = last.expect("two terms were scheduled");
    assert_eq!(last.installment_status, InstallmentStatus::Completed);
    assert_eq!(last.credit_card_used_amount, dec("0"));

    let card_after = cards.get(card.id).await?;
    assert!(!card_after.installment_status);
    cards.delete(card.id).await?;
    assert!(matches!(cards.get(card.id).await, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn soft_delete_releases_credit_and_overdue_refresh() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let input = plan(customer.id, card.id, &serial);
    let created = installments.create_plan(&input, &[], date(2024, 3, 20)).await?;
    installments.update_plan(created.id, &input, None).await?;

    // First term is due 2024-04-05; a day later the plan is overdue.
    installments.refresh_overdue(date(2024, 4, 6)).await?;
    let detail = installments.get_detail(created.id).await?;
    assert_eq!(detail.installment.status, InstallmentStatus::Overdue);

    let deleted = installments.delete_plan(created.id).await?;
    assert_eq!(deleted.status, InstallmentStatus::Deleted);

    let card_after = CreditCardService::new(pool.clone()).get(card.id).await?;
    assert_eq!(card_after.used_amount, dec("0"));
    assert!(!card_after.installment_status);
    let customer_after = CustomerService::new(pool.clone()).get(customer.id).await?;
    assert!(!customer_after.installment_status);

    // Payment history is retained on soft delete.
    let schedule: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM installment_payments WHERE installment_id = $1")
            .bind(created.id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(schedule, 10);

    let again = installments.delete_plan(created.id).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn customer_delete_releases_card() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    InstallmentService::new(pool.clone())
        .create_plan(&plan(customer.id, card.id, &serial), &[], date(2024, 1, 1))
        .await?;

    CustomerService::new(pool.clone()).delete(customer.id).await?;

    let card_after = CreditCardService::new(pool.clone()).get(card.id).await?;
    assert_eq!(card_after.used_amount, dec("0"));
    assert!(!card_after.installment_status);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn moving_plan_to_another_card_moves_utilization() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let old_card = new_card(&pool).await?;
    let new_card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());
    let cards = CreditCardService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let input = plan(customer.id, old_card.id, &serial);
    let created = installments.create_plan(&input, &[], date(2024, 3, 20)).await?;
    assert_eq!(cards.get(old_card.id).await?.used_amount, dec("12000"));

    let moved = installments
        .update_plan(created.id, &plan(customer.id, new_card.id, &serial), None)
        .await?;
    assert_eq!(moved.credit_card_id, new_card.id);

    let old_after = cards.get(old_card.id).await?;
    assert_eq!(old_after.used_amount, dec("0"));
    assert!(!old_after.installment_status);

    let new_after = cards.get(new_card.id).await?;
    assert_eq!(new_after.used_amount, dec("12000"));
    assert!(new_after.installment_status);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn financed_product_price_is_fixed_outside_the_plan() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());
    let products = ProductService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let input = plan(customer.id, card.id, &serial);
    let created = installments.create_plan(&input, &[], date(2024, 3, 20)).await?;

    let mut repriced = input.product.clone();
    repriced.price = dec("30000");
    let result = products.update(created.product_id, &repriced, None).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let card_after = CreditCardService::new(pool.clone()).get(card.id).await?;
    assert_eq!(card_after.used_amount, dec("12000"));
    assert_eq!(products.get(created.product_id).await?.price, dec("12000"));

    // Other fields stay editable.
    let mut renamed = input.product.clone();
    renamed.name = "iPhone 15 Pro".to_string();
    let updated = products.update(created.product_id, &renamed, None).await?;
    assert_eq!(updated.name, "iPhone 15 Pro");

    // Once the plan is deleted the product is free to change.
    installments.delete_plan(created.id).await?;
    let updated = products.update(created.product_id, &repriced, None).await?;
    assert_eq!(updated.price, dec("30000"));
    assert_eq!(
        CreditCardService::new(pool.clone()).get(card.id).await?.used_amount,
        dec("0")
    );
    Ok(())
}

#[tokio::test]
#[ignore]
async fn uneven_principal_releases_sum_to_price() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());
    let payments = PaymentService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let mut input = plan(customer.id, card.id, &serial);
    input.product.price = dec("1000");
    input.down_payment = dec("0");
    input.term_months = 3;
    let created = installments.create_plan(&input, &[], date(2024, 1, 1)).await?;
    installments.update_plan(created.id, &input, None).await?;

    let detail = installments.get_detail(created.id).await?;
    let mut used = CreditCardService::new(pool.clone()).get(card.id).await?.used_amount;
    let mut released = BigDecimal::from(0);
    for payment in &detail.payment_schedule {
        let paid = payments.mark_paid(payment.id, &PaymentInput::default()).await?;
        assert_eq!(paid.principal_credited, &used - &paid.credit_card_used_amount);
        used = paid.credit_card_used_amount.clone();
        released += paid.principal_credited;
    }
    assert_eq!(released, dec("1000"));
    assert_eq!(used, dec("0"));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn customer_delete_waits_behind_plan_lock() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let card = new_card(&pool).await?;
    let installments = InstallmentService::new(pool.clone());

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let input = plan(customer.id, card.id, &serial);
    let created = installments.create_plan(&input, &[], date(2024, 1, 1)).await?;
    installments.update_plan(created.id, &input, None).await?;

    // Same lock sequence as a payment: plan first, card second.
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT id FROM installments WHERE id = $1 FOR UPDATE")
        .bind(created.id)
        .execute(&mut *tx)
        .await?;

    let delete = tokio::spawn({
        let pool = pool.clone();
        let customer_id = customer.id;
        async move { CustomerService::new(pool).delete(customer_id).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    sqlx::query("SELECT id FROM credit_cards WHERE id = $1 FOR UPDATE")
        .bind(card.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let deleted = delete.await??;
    assert_eq!(deleted.id, customer.id);

    let card_after = CreditCardService::new(pool.clone()).get(card.id).await?;
    assert_eq!(card_after.used_amount, dec("0"));
    assert!(!card_after.installment_status);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn contract_is_recorded_for_checked_owner() -> anyhow::Result<()> {
    let pool = pool().await?;
    let customer = new_customer(&pool).await?;
    let stranger = new_customer(&pool).await?;
    let card = new_card(&pool).await?;

    let serial = format!("SN-{}", Uuid::new_v4().simple());
    let created = InstallmentService::new(pool.clone())
        .create_plan(&plan(customer.id, card.id, &serial), &[], date(2024, 1, 1))
        .await?;

    let contracts = ContractService::new(pool.clone());
    assert!(matches!(
        contracts.ensure_owner(created.id, stranger.id).await,
        Err(AppError::BadRequest(_))
    ));
    assert!(matches!(
        contracts.ensure_owner(i32::MAX, customer.id).await,
        Err(AppError::NotFound(_))
    ));

    let owner = contracts.ensure_owner(created.id, customer.id).await?;
    assert_eq!(owner.installment_id(), created.id);
    assert_eq!(owner.customer_id(), customer.id);

    let contract = contracts
        .create(owner, "contracts/contract_test.pdf", None)
        .await?;
    assert_eq!(contract.installment_id, created.id);
    assert_eq!(contract.customer_id, customer.id);

    let history = contracts.list(created.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, contract.id);
    Ok(())
}
