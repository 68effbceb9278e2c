//! Statement sentence rendering

use finvantage_common::db::models::{Company, FinancialStatement};
use rust_decimal::Decimal;

const NOT_REPORTED: &str = "not reported";

/// Render the four summary sentences of one statement, joined by a space.
///
/// Pure: the same company and statement always give byte-identical output.
pub fn generate_sentence(company: &Company, statement: &FinancialStatement) -> String {
    format!(
        "The company {name}, with the symbol {symbol}, for the year {year}, has a total revenue of {revenue}. \
         The net income is {net_income}, the gross profit is {gross_profit}, and the operating income is {operating_income}. \
         The income before tax is {income_before_tax}, the operating expenses are {operating_expenses}, \
         and the research and development expenses are {research}. \
         The financial statement was reported on {reported} and the reported period is {period}.",
        name = company.name,
        symbol = company.symbol,
        year = statement.calendar_year,
        revenue = amount(statement.revenue),
        net_income = amount(statement.net_income),
        gross_profit = amount(statement.gross_profit),
        operating_income = amount(statement.operating_income),
        income_before_tax = amount(statement.income_before_tax),
        operating_expenses = amount(statement.operating_expenses),
        research = amount(statement.research_and_development_expenses),
        reported = statement.date_reported,
        period = statement.period,
    )
}

fn amount(value: Option<Decimal>) -> String {
    value.map_or_else(|| NOT_REPORTED.to_string(), |v| v.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use finvantage_common::db::models::Period;
    use std::str::FromStr;

    pub(crate) fn company() -> Company {
        Company {
            id: 1,
            name: "Apple Inc.".to_string(),
            symbol: "AAPL".to_string(),
            cik: None,
            image: None,
            sector: None,
            industry: None,
            description: None,
            ipo_date: None,
        }
    }

    pub(crate) fn statement(id: i64, year: i32) -> FinancialStatement {
        FinancialStatement {
            id,
            company_id: 1,
            date_reported: NaiveDate::from_ymd_opt(year, 9, 30).unwrap(),
            calendar_year: year,
            period: Period::FY,
            currency_id: 1,
            revenue: Some(Decimal::from_str("383285000000.00").unwrap()),
            net_income: Some(Decimal::from_str("96995000000.00").unwrap()),
            gross_profit: Some(Decimal::from_str("169148000000.00").unwrap()),
            operating_income: Some(Decimal::from_str("114301000000.00").unwrap()),
            income_before_tax: Some(Decimal::from_str("113736000000.00").unwrap()),
            operating_expenses: Some(Decimal::from_str("54847000000.00").unwrap()),
            cash_and_equivalents: None,
            research_and_development_expenses: Some(Decimal::from_str("29915000000.00").unwrap()),
        }
    }

    #[test]
    fn test_renders_full_template() {
        let text = generate_sentence(&company(), &statement(7, 2023));

        assert_eq!(
            text,
            "The company Apple Inc., with the symbol AAPL, for the year 2023, has a total revenue of 383285000000.00. \
             The net income is 96995000000.00, the gross profit is 169148000000.00, and the operating income is 114301000000.00. \
             The income before tax is 113736000000.00, the operating expenses are 54847000000.00, and the research and development expenses are 29915000000.00. \
             The financial statement was reported on 2023-09-30 and the reported period is FY."
        );
    }

    #[test]
    fn test_missing_amounts_render_as_not_reported() {
        let mut s = statement(7, 2023);
        s.revenue = None;
        s.research_and_development_expenses = None;

        let text = generate_sentence(&company(), &s);
        assert!(text.contains("has a total revenue of not reported."));
        assert!(text.contains("research and development expenses are not reported."));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let c = company();
        let s = statement(7, 2022);
        assert_eq!(generate_sentence(&c, &s), generate_sentence(&c, &s));
    }

    #[test]
    fn test_decimals_are_not_rounded() {
        let mut s = statement(7, 2023);
        s.net_income = Some(Decimal::from_str("-0.05").unwrap());

        let text = generate_sentence(&company(), &s);
        assert!(text.contains("The net income is -0.05,"));
    }
}
