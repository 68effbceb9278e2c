//! Income statement record parsing
//!
//! Turns raw API records into [`NewFinancialStatement`] rows. Amounts are read
//! from the JSON number's text (serde_json keeps it with `arbitrary_precision`)
//! and never pass through a float.

use crate::errors::RecordError;
use chrono::NaiveDate;
use finvantage_common::db::models::{Currency, NewFinancialStatement, Period};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;

/// Scale of the monetary columns
const AMOUNT_SCALE: u32 = 2;

/// Digits allowed left of the decimal point in `numeric(20, 2)`
const AMOUNT_INTEGER_DIGITS: usize = 18;

/// Known currencies by upper-case ISO code
#[derive(Debug, Clone, Default)]
pub struct CurrencyIndex {
    by_code: HashMap<String, i64>,
}

impl CurrencyIndex {
    pub fn new(currencies: &[Currency]) -> Self {
        Self {
            by_code: currencies
                .iter()
                .map(|c| (c.code.trim().to_ascii_uppercase(), c.id))
                .collect(),
        }
    }

    pub fn resolve(&self, code: &str) -> Option<i64> {
        self.by_code.get(&code.trim().to_ascii_uppercase()).copied()
    }
}

/// Parse one income statement record of `company_id`
pub fn parse_statement(
    company_id: i64,
    record: &Value,
    currencies: &CurrencyIndex,
) -> Result<NewFinancialStatement, RecordError> {
    let record = record.as_object().ok_or(RecordError::NotAnObject)?;

    let code = text_field(record, "reportedCurrency")?;
    let currency_id = currencies
        .resolve(&code)
        .ok_or_else(|| RecordError::UnknownCurrency(code.clone()))?;

    let date = text_field(record, "date")?;
    let date_reported = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| RecordError::InvalidDate(date.clone()))?;

    let period_label = text_field(record, "period")?;
    let period =
        Period::parse(&period_label).ok_or_else(|| RecordError::InvalidPeriod(period_label))?;

    let calendar_year = match record.get("calendarYear") {
        Some(Value::Null) | None => return Err(RecordError::MissingField("calendarYear")),
        Some(value) => {
            let text = scalar_text(value);
            text.trim()
                .parse::<i32>()
                .map_err(|_| RecordError::InvalidYear(text))?
        }
    };

    Ok(NewFinancialStatement {
        company_id,
        date_reported,
        calendar_year,
        period,
        currency_id,
        revenue: amount(record, "revenue")?,
        net_income: amount(record, "netIncome")?,
        gross_profit: amount(record, "grossProfit")?,
        operating_income: amount(record, "operatingIncome")?,
        income_before_tax: amount(record, "incomeBeforeTax")?,
        operating_expenses: amount(record, "operatingExpenses")?,
        cash_and_equivalents: amount(record, "cashAndCashEquivalents")?,
        research_and_development_expenses: amount(record, "researchAndDevelopmentExpenses")?,
    })
}

/// Parse a monetary amount from its textual form.
///
/// Rounds half-to-even to two decimals and keeps scale 2, so `1234.5` becomes
/// `1234.50`. Accepts scientific notation.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let text = text.trim();
    let value = Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()?;

    let mut value =
        value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointNearestEven);
    value.rescale(AMOUNT_SCALE);

    let integer_digits = value.trunc().abs().to_string().trim_start_matches('0').len();
    if integer_digits > AMOUNT_INTEGER_DIGITS {
        return None;
    }

    Some(value)
}

fn amount(record: &Map<String, Value>, field: &'static str) -> Result<Option<Decimal>, RecordError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value @ (Value::Number(_) | Value::String(_))) => {
            let text = scalar_text(value);
            parse_amount(&text)
                .map(Some)
                .ok_or(RecordError::InvalidAmount { field, value: text })
        }
        Some(other) => Err(RecordError::InvalidAmount {
            field,
            value: other.to_string(),
        }),
    }
}

fn text_field(record: &Map<String, Value>, field: &'static str) -> Result<String, RecordError> {
    match record.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(RecordError::MissingField(field)),
    }
}

/// Text of a string or number without quotes
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
