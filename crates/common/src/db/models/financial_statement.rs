//! Financial statement entity

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reporting period of a statement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum Period {
    #[sea_orm(string_value = "Q1")]
    Q1,
    #[sea_orm(string_value = "Q2")]
    Q2,
    #[sea_orm(string_value = "Q3")]
    Q3,
    #[sea_orm(string_value = "Q4")]
    Q4,
    #[sea_orm(string_value = "FY")]
    FY,
}

impl Period {
    /// Parse the period label used by the financial data API
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "Q1" => Some(Period::Q1),
            "Q2" => Some(Period::Q2),
            "Q3" => Some(Period::Q3),
            "Q4" => Some(Period::Q4),
            "FY" => Some(Period::FY),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Q1 => "Q1",
            Period::Q2 => "Q2",
            Period::Q3 => "Q3",
            Period::Q4 => "Q4",
            Period::FY => "FY",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique on (company_id, date_reported, calendar_year, period, currency_id).
/// Rows are inserted once and never updated.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "financial_statements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub company_id: i64,

    pub date_reported: Date,

    pub calendar_year: i32,

    pub period: Period,

    pub currency_id: i64,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub revenue: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub net_income: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub gross_profit: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub operating_income: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub income_before_tax: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub operating_expenses: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub cash_and_equivalents: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((20, 2)))", nullable)]
    pub research_and_development_expenses: Option<Decimal>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::company::Entity",
        from = "Column::CompanyId",
        to = "super::company::Column::Id",
        on_delete = "Cascade"
    )]
    Company,

    #[sea_orm(
        belongs_to = "super::currency::Entity",
        from = "Column::CurrencyId",
        to = "super::currency::Column::Id"
    )]
    Currency,

    #[sea_orm(has_one = "super::financial_statement_analysis::Entity")]
    Analysis,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl Related<super::currency::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Currency.def()
    }
}

impl Related<super::financial_statement_analysis::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Analysis.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// A parsed statement waiting to be inserted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFinancialStatement {
    pub company_id: i64,
    pub date_reported: Date,
    pub calendar_year: i32,
    pub period: Period,
    pub currency_id: i64,
    pub revenue: Option<Decimal>,
    pub net_income: Option<Decimal>,
    pub gross_profit: Option<Decimal>,
    pub operating_income: Option<Decimal>,
    pub income_before_tax: Option<Decimal>,
    pub operating_expenses: Option<Decimal>,
    pub cash_and_equivalents: Option<Decimal>,
    pub research_and_development_expenses: Option<Decimal>,
}

/// Columns of the uniqueness constraint
pub type StatementKey = (i64, Date, i32, Period, i64);

impl NewFinancialStatement {
    pub fn key(&self) -> StatementKey {
        (
            self.company_id,
            self.date_reported,
            self.calendar_year,
            self.period,
            self.currency_id,
        )
    }

    pub fn into_active_model(self) -> ActiveModel {
        use sea_orm::{ActiveValue::NotSet, Set};

        ActiveModel {
            id: NotSet,
            company_id: Set(self.company_id),
            date_reported: Set(self.date_reported),
            calendar_year: Set(self.calendar_year),
            period: Set(self.period),
            currency_id: Set(self.currency_id),
            revenue: Set(self.revenue),
            net_income: Set(self.net_income),
            gross_profit: Set(self.gross_profit),
            operating_income: Set(self.operating_income),
            income_before_tax: Set(self.income_before_tax),
            operating_expenses: Set(self.operating_expenses),
            cash_and_equivalents: Set(self.cash_and_equivalents),
            research_and_development_expenses: Set(self.research_and_development_expenses),
        }
    }
}

impl Model {
    pub fn key(&self) -> StatementKey {
        (
            self.company_id,
            self.date_reported,
            self.calendar_year,
            self.period,
            self.currency_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parse() {
        assert_eq!(Period::parse("FY"), Some(Period::FY));
        assert_eq!(Period::parse(" q3 "), Some(Period::Q3));
        assert_eq!(Period::parse("H1"), None);
        assert_eq!(Period::Q2.to_string(), "Q2");
    }
}
