//! SeaORM entity models
//!
//! Database entities for the FinVantage pipeline

mod api_usage;
mod company;
mod company_data_tracker;
mod currency;
mod financial_statement;
mod financial_statement_analysis;

pub use company::{
    Entity as CompanyEntity,
    Model as Company,
    ActiveModel as CompanyActiveModel,
    Column as CompanyColumn,
};

pub use currency::{
    Entity as CurrencyEntity,
    Model as Currency,
    ActiveModel as CurrencyActiveModel,
    Column as CurrencyColumn,
};

pub use company_data_tracker::{
    Entity as CompanyDataTrackerEntity,
    Model as CompanyDataTracker,
    ActiveModel as CompanyDataTrackerActiveModel,
    Column as CompanyDataTrackerColumn,
};

pub use api_usage::{
    Entity as ApiUsageEntity,
    Model as ApiUsage,
    ActiveModel as ApiUsageActiveModel,
    Column as ApiUsageColumn,
};

pub use financial_statement::{
    Entity as FinancialStatementEntity,
    Model as FinancialStatement,
    ActiveModel as FinancialStatementActiveModel,
    Column as FinancialStatementColumn,
    Relation as FinancialStatementRelation,
    NewFinancialStatement,
    Period,
    StatementKey,
};

pub use financial_statement_analysis::{
    Entity as AnalysisEntity,
    Model as FinancialStatementAnalysis,
    ActiveModel as AnalysisActiveModel,
    Column as AnalysisColumn,
    NewAnalysis,
    parse_vector_literal,
    to_vector_literal,
};
