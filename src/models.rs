use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// ============ Database Models ============

/// A buyer who finances purchases through installment plans.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Customer {
    pub id: i32,
    pub name: String,
    pub nickname: Option<String>,
    /// National-format digits, e.g. "0812345678".
    pub phone: String,
    pub address: String,
    /// 13-digit national ID number.
    pub id_card_number: String,
    pub facebook: Option<String>,
    pub line_id: Option<String>,
    /// Relative path of the ID card photo in the file store.
    pub id_card_image: Option<String>,
    /// True while the customer has any live installment plan.
    pub installment_status: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A financed item.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub price: BigDecimal,
    pub serial_number: Option<String>,
    pub description: Option<String>,
    /// Ordered relative paths of product photos.
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A credit card used to finance installment plans.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: i32,
    pub name: String,
    pub credit_limit: BigDecimal,
    /// Remaining unpaid principal across all live plans on this card.
    pub used_amount: BigDecimal,
    /// True while any live plan references this card.
    pub installment_status: bool,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of an installment plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallmentStatus {
    NonActive,
    Active,
    Completed,
    Deleted,
    Paid,
    Overdue,
    Cancelled,
}

impl InstallmentStatus {
    pub const ALL: [InstallmentStatus; 7] = [
        InstallmentStatus::NonActive,
        InstallmentStatus::Active,
        InstallmentStatus::Completed,
        InstallmentStatus::Deleted,
        InstallmentStatus::Paid,
        InstallmentStatus::Overdue,
        InstallmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::NonActive => "non-active",
            InstallmentStatus::Active => "active",
            InstallmentStatus::Completed => "completed",
            InstallmentStatus::Deleted => "deleted",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
            InstallmentStatus::Cancelled => "cancelled",
        }
    }

    /// Live plans hold credit on their card and keep the card/customer flags raised.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            InstallmentStatus::NonActive | InstallmentStatus::Active | InstallmentStatus::Overdue
        )
    }

    /// Allowed lifecycle moves. Anything not listed here is rejected.
    pub fn can_transition_to(&self, next: InstallmentStatus) -> bool {
        use InstallmentStatus::*;
        matches!(
            (self, next),
            (NonActive, Active)
                | (Active, Active)
                | (Overdue, Active)
                | (Active, Completed)
                | (Overdue, Completed)
                | (Active, Overdue)
                | (NonActive, Deleted)
                | (Active, Deleted)
                | (Overdue, Deleted)
        )
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a stored or submitted status is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown installment status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for InstallmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstallmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl TryFrom<String> for InstallmentStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An installment plan: one customer buying one product through one credit card.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Installment {
    pub id: i32,
    pub customer_id: i32,
    pub product_id: i32,
    pub credit_card_id: i32,
    /// Financed principal (price minus down payment).
    pub total_amount: BigDecimal,
    pub down_payment: BigDecimal,
    pub monthly_payment: BigDecimal,
    /// Flat interest, in percent.
    pub interest_rate: BigDecimal,
    pub term_months: i32,
    #[sqlx(try_from = "String")]
    pub status: InstallmentStatus,
    pub late_fee: BigDecimal,
    pub start_date: NaiveDate,
    /// Billing day of month (1-31).
    pub due_date: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One scheduled term of an installment plan.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InstallmentPayment {
    pub id: i32,
    pub installment_id: i32,
    pub term_number: i32,
    pub due_date: NaiveDate,
    pub amount: BigDecimal,
    pub paid_amount: Option<BigDecimal>,
    pub is_paid: bool,
    pub paid_date: Option<DateTime<Utc>>,
    pub slip_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A signed contract document. Several may exist per plan; the newest wins.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contract {
    pub id: i32,
    pub customer_id: i32,
    pub installment_id: i32,
    pub pdf_path: String,
    pub signature_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Installment row joined with the names shown in list views.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InstallmentSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub installment: Installment,
    pub customer_name: String,
    pub customer_phone: String,
    pub product_name: String,
    pub serial_number: Option<String>,
    pub product_price: BigDecimal,
    pub credit_card_name: String,
    pub paid_terms: i64,
    pub next_due_date: Option<NaiveDate>,
}

/// Per-plan summary for a credit card.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CardInstallmentSummary {
    pub installment_id: i32,
    pub customer_id: i32,
    pub customer_name: String,
    pub product_name: String,
    #[sqlx(try_from = "String")]
    pub status: InstallmentStatus,
    pub total_amount: BigDecimal,
    pub monthly_payment: BigDecimal,
    pub term_months: i32,
    pub start_date: NaiveDate,
    pub paid_terms: i64,
    /// Scheduled amount still unpaid (full financed amount before activation).
    pub outstanding_debt: BigDecimal,
}

// ============ Service Inputs ============

/// Customer fields accepted on create and update.
#[derive(Debug, Clone, Default)]
pub struct CustomerInput {
    pub name: String,
    pub nickname: Option<String>,
    pub phone: String,
    pub address: String,
    pub id_card_number: String,
    pub facebook: Option<String>,
    pub line_id: Option<String>,
    /// New ID card image; `None` on update keeps the stored one.
    pub id_card_image: Option<String>,
}

/// Product fields accepted on create and update (images travel separately).
#[derive(Debug, Clone)]
pub struct ProductInput {
    pub name: String,
    pub price: BigDecimal,
    pub serial_number: Option<String>,
    pub description: Option<String>,
}

/// Everything needed to open or re-activate an installment plan.
#[derive(Debug, Clone)]
pub struct PlanInput {
    /// Required on create; ignored on update.
    pub customer_id: Option<i32>,
    pub credit_card_id: i32,
    pub product: ProductInput,
    pub down_payment: BigDecimal,
    pub interest_rate: BigDecimal,
    pub term_months: i32,
    /// Billing day of month.
    pub due_day: i32,
    pub late_fee: BigDecimal,
    /// Defaults to today on create; ignored on update.
    pub start_date: Option<NaiveDate>,
}

/// Settlement of one scheduled term.
#[derive(Debug, Clone, Default)]
pub struct PaymentInput {
    /// When present, must match the payment's parent plan.
    pub installment_id: Option<i32>,
    /// Defaults to the scheduled amount.
    pub paid_amount: Option<BigDecimal>,
    pub slip_image: Option<String>,
}

// ============ API Request/Response Models ============

/// JSON body for creating or updating a credit card.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditCardRequest {
    pub name: String,
    #[serde(alias = "creditLimit")]
    pub credit_limit: BigDecimal,
    pub color: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerListResponse {
    pub customers: Vec<Customer>,
    pub total_customers: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListResponse {
    pub products: Vec<Product>,
    pub total_products: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCardListResponse {
    pub credit_cards: Vec<CreditCard>,
    pub total_credit_cards: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentListResponse {
    pub installments: Vec<InstallmentSummary>,
    pub total_installments: i64,
}

/// A credit card together with the plans it finances.
#[derive(Debug, Serialize)]
pub struct CreditCardInstallmentsResponse {
    pub credit_card: CreditCard,
    pub installments: Vec<CardInstallmentSummary>,
}

/// Full view of one plan.
#[derive(Debug, Serialize)]
pub struct InstallmentDetail {
    #[serde(flatten)]
    pub installment: Installment,
    pub product: Product,
    pub customer: Customer,
    pub credit_card: CreditCard,
    pub payment_schedule: Vec<InstallmentPayment>,
    /// Newest contract PDF, `None` when absent or missing from the file store.
    pub contract_path: Option<String>,
}

/// Result of settling a term.
#[derive(Debug, Serialize)]
pub struct MarkPaidResponse {
    pub payment: InstallmentPayment,
    pub installment_status: InstallmentStatus,
    /// Decrease of the card's used amount caused by this payment.
    pub principal_credited: BigDecimal,
    pub credit_card_used_amount: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in InstallmentStatus::ALL {
            assert_eq!(status.as_str().parse::<InstallmentStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert_eq!(
            "pending".parse::<InstallmentStatus>(),
            Err(UnknownStatus("pending".to_string()))
        );
        assert!(InstallmentStatus::try_from("Active".to_string()).is_err());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&InstallmentStatus::NonActive).unwrap();
        assert_eq!(json, "\"non-active\"");
        let parsed: InstallmentStatus = serde_json::from_str("\"overdue\"").unwrap();
        assert_eq!(parsed, InstallmentStatus::Overdue);
    }

    #[test]
    fn test_transitions() {
        use InstallmentStatus::*;
        assert!(NonActive.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Overdue.can_transition_to(Completed));
        assert!(Active.can_transition_to(Deleted));

        assert!(!NonActive.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Deleted));
    }

    #[test]
    fn test_live_statuses() {
        let live: Vec<_> = InstallmentStatus::ALL
            .into_iter()
            .filter(|s| s.is_live())
            .collect();
        assert_eq!(
            live,
            vec![
                InstallmentStatus::NonActive,
                InstallmentStatus::Active,
                InstallmentStatus::Overdue
            ]
        );
    }
}
