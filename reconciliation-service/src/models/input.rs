//! Parsing of user-supplied dates and money amounts.
//!
//! Everything here runs before any storage access so malformed requests are
//! rejected without side effects.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use std::str::FromStr;
use thiserror::Error;

use super::{MAX_AMOUNT, MONEY_SCALE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} '{value}' is not a valid date (expected YYYY-MM-DD or RFC 3339)")]
    InvalidDate { field: &'static str, value: String },

    #[error("{field} '{value}' is not a number")]
    InvalidAmount { field: &'static str, value: String },

    #[error("{field} has more than two decimal places")]
    TooPrecise { field: &'static str },

    #[error("{field} must be smaller than 10^18 in magnitude")]
    TooLarge { field: &'static str },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        AppError::BadRequest(anyhow::Error::new(err))
    }
}

/// A money amount as it arrives in JSON: `"1500.25"` or `1500.25`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl From<&str> for AmountInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Parse a business date. Timestamps keep the calendar date they were
/// written in; the time of day is irrelevant because a checkpoint always
/// covers its entire day.
pub fn parse_business_date(field: &'static str, raw: &str) -> Result<NaiveDate, InputError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(InputError::Missing { field });
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date()))
        .map_err(|_| InputError::InvalidDate {
            field,
            value: value.to_string(),
        })
}

/// Parse a signed balance (declared statement balances may be negative).
pub fn parse_balance(field: &'static str, input: &AmountInput) -> Result<Decimal, InputError> {
    let raw = match input {
        AmountInput::Text(s) => s.trim().to_string(),
        AmountInput::Number(n) => n.to_string(),
    };
    if raw.is_empty() {
        return Err(InputError::Missing { field });
    }

    let parsed = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| InputError::InvalidAmount {
            field,
            value: raw.clone(),
        })?;

    if parsed.normalize().scale() > MONEY_SCALE {
        return Err(InputError::TooPrecise { field });
    }
    if parsed.abs() >= MAX_AMOUNT {
        return Err(InputError::TooLarge { field });
    }

    let mut amount = parsed;
    amount.rescale(MONEY_SCALE);
    Ok(amount)
}

/// Parse a strictly positive transaction amount.
pub fn parse_amount(field: &'static str, input: &AmountInput) -> Result<Decimal, InputError> {
    let amount = parse_balance(field, input)?;
    if amount <= Decimal::ZERO {
        return Err(InputError::NotPositive { field });
    }
    Ok(amount)
}
