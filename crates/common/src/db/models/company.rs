//! Company entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "companies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub name: String,

    #[sea_orm(unique)]
    pub symbol: String,

    #[sea_orm(unique, nullable)]
    pub cik: Option<String>,

    // Enrichment fields, filled after creation
    pub image: Option<String>,

    pub sector: Option<String>,

    pub industry: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub ipo_date: Option<Date>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::financial_statement::Entity")]
    FinancialStatements,

    #[sea_orm(has_one = "super::company_data_tracker::Entity")]
    DataTracker,
}

impl Related<super::financial_statement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FinancialStatements.def()
    }
}

impl Related<super::company_data_tracker::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DataTracker.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
