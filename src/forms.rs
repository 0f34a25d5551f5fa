//! Multipart form decoding.
//!
//! The browser client posts every write as `multipart/form-data`, mixing text
//! fields with optional files. `MultipartForm` drains the stream once and then
//! offers typed lookups. Lookups take several accepted names because the client
//! sends both snake_case and camelCase keys.

use axum::body::Bytes;
use axum::extract::Multipart;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::{CustomerInput, PaymentInput, PlanInput, ProductInput};

/// A file part of a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: Vec<UploadedFile>,
}

impl MultipartForm {
    /// Reads every part. Parts with a file name become files; empty file parts are skipped.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = MultipartForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(|s| s.to_string()) {
                Some(file_name) => {
                    let content_type = field.content_type().map(|s| s.to_string());
                    let bytes = field.bytes().await?;
                    if file_name.is_empty() || bytes.is_empty() {
                        tracing::debug!("Skipping empty file part '{}'", name);
                        continue;
                    }
                    form.files.push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        bytes,
                    });
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }

        tracing::debug!(
            "Parsed multipart form: {} field(s), {} file(s)",
            form.fields.len(),
            form.files.len()
        );
        Ok(form)
    }

    /// Builds a form from already-decoded parts.
    pub fn from_parts(fields: HashMap<String, String>, files: Vec<UploadedFile>) -> Self {
        Self { fields, files }
    }

    /// First non-blank value among `names`, trimmed. The string "null" counts as blank.
    pub fn text(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .map(|value| value.trim())
            .find(|value| !value.is_empty() && *value != "null" && *value != "undefined")
    }

    pub fn optional_string(&self, names: &[&str]) -> Option<String> {
        self.text(names).map(str::to_string)
    }

    pub fn required(&self, names: &[&str]) -> Result<&str, AppError> {
        self.text(names)
            .ok_or_else(|| AppError::BadRequest(format!("Missing required field '{}'", names[0])))
    }

    pub fn number<T: FromStr>(&self, names: &[&str]) -> Result<Option<T>, AppError> {
        self.text(names)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| {
                    AppError::BadRequest(format!("Field '{}' must be a number", names[0]))
                })
            })
            .transpose()
    }

    pub fn required_number<T: FromStr>(&self, names: &[&str]) -> Result<T, AppError> {
        self.number(names)?
            .ok_or_else(|| AppError::BadRequest(format!("Missing required field '{}'", names[0])))
    }

    /// Decimal money or rate field; must not be negative.
    pub fn decimal(&self, names: &[&str]) -> Result<Option<BigDecimal>, AppError> {
        let value = self
            .text(names)
            .map(|raw| {
                BigDecimal::from_str(&raw.replace(',', "")).map_err(|_| {
                    AppError::BadRequest(format!("Field '{}' must be a decimal number", names[0]))
                })
            })
            .transpose()?;

        if let Some(ref v) = value {
            if v < &BigDecimal::from(0) {
                return Err(AppError::BadRequest(format!(
                    "Field '{}' cannot be negative",
                    names[0]
                )));
            }
        }
        Ok(value)
    }

    pub fn required_decimal(&self, names: &[&str]) -> Result<BigDecimal, AppError> {
        self.decimal(names)?
            .ok_or_else(|| AppError::BadRequest(format!("Missing required field '{}'", names[0])))
    }

    /// ISO date (`YYYY-MM-DD`), also accepting a full RFC 3339 timestamp.
    pub fn date(&self, names: &[&str]) -> Result<Option<NaiveDate>, AppError> {
        self.text(names)
            .map(|raw| parse_date(raw, names[0]))
            .transpose()
    }

    pub fn file(&self, names: &[&str]) -> Option<&UploadedFile> {
        self.files
            .iter()
            .find(|f| names.contains(&f.field.as_str()))
    }

    pub fn files(&self, names: &[&str]) -> Vec<&UploadedFile> {
        self.files
            .iter()
            .filter(|f| names.contains(&f.field.as_str()))
            .collect()
    }
}

/// Parses `YYYY-MM-DD` or an RFC 3339 timestamp into a date.
pub fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, AppError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| AppError::BadRequest(format!("Field '{}' must be a date (YYYY-MM-DD)", field)))
}

// ============ Form field names ============

pub const ID_CARD_FILE: &[&str] = &["idCard", "id_card_image", "idCardImage"];
pub const PRODUCT_IMAGE_FILES: &[&str] = &["images[]", "images"];
pub const SLIP_FILE: &[&str] = &["slip_image", "slipImage"];
pub const CONTRACT_FILE: &[&str] = &["contractPdf", "contract_pdf"];
pub const SIGNATURE_FILE: &[&str] = &["signature", "signature_image", "signatureImage"];

impl CustomerInput {
    /// Reads customer fields; phone and id card are normalized by the service.
    pub fn from_form(form: &MultipartForm) -> Result<Self, AppError> {
        Ok(Self {
            name: form.required(&["name"])?.to_string(),
            nickname: form.optional_string(&["nickname"]),
            phone: form.required(&["phone"])?.to_string(),
            address: form.required(&["address"])?.to_string(),
            id_card_number: form
                .required(&["id_card_number", "idCardNumber"])?
                .to_string(),
            facebook: form.optional_string(&["facebook"]),
            line_id: form.optional_string(&["line_id", "lineId"]),
            id_card_image: None,
        })
    }
}

impl ProductInput {
    /// Product fields; the plan form sends the same values under `product*` names.
    pub fn from_form(form: &MultipartForm) -> Result<Self, AppError> {
        Ok(Self {
            name: form
                .required(&["name", "product_name", "productName"])?
                .to_string(),
            price: form.required_decimal(&["price", "product_price", "productPrice"])?,
            serial_number: form.optional_string(&["serial_number", "serialNumber"]),
            description: form.optional_string(&["description", "product_description"]),
        })
    }
}

impl PlanInput {
    pub fn from_form(form: &MultipartForm) -> Result<Self, AppError> {
        let plan = Self {
            customer_id: form.number(&["customer_id", "customerId"])?,
            credit_card_id: form.required_number(&["credit_card_id", "creditCardId"])?,
            product: ProductInput::from_form(form)?,
            down_payment: form
                .decimal(&["down_payment", "downPayment"])?
                .unwrap_or_else(|| BigDecimal::from(0)),
            interest_rate: form
                .decimal(&["interest_rate", "interestRate"])?
                .unwrap_or_else(|| BigDecimal::from(0)),
            term_months: form.required_number(&["term_months", "termMonths"])?,
            due_day: form.required_number(&["due_date", "dueDate", "due_day", "dueDay"])?,
            late_fee: form
                .decimal(&["late_fee", "lateFee"])?
                .unwrap_or_else(|| BigDecimal::from(0)),
            start_date: form.date(&["start_date", "startDate"])?,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Rejects inputs the amortization cannot handle.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.term_months <= 0 {
            return Err(AppError::BadRequest(
                "term_months must be greater than zero".to_string(),
            ));
        }
        if !(1..=31).contains(&self.due_day) {
            return Err(AppError::BadRequest(
                "due_date must be a day of month between 1 and 31".to_string(),
            ));
        }
        if self.down_payment > self.product.price {
            return Err(AppError::BadRequest(
                "down_payment cannot exceed the product price".to_string(),
            ));
        }
        Ok(())
    }
}

impl PaymentInput {
    pub fn from_form(form: &MultipartForm) -> Result<Self, AppError> {
        Ok(Self {
            installment_id: form.number(&["installment_id", "installmentId"])?,
            paid_amount: form.decimal(&["paid_amount", "paidAmount", "amount"])?,
            slip_image: None,
        })
    }
}
