//! Currency reference data

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "currencies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// ISO 4217 code, e.g. "USD"
    #[sea_orm(unique)]
    pub code: String,

    pub name: String,

    pub symbol: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::financial_statement::Entity")]
    FinancialStatements,
}

impl Related<super::financial_statement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FinancialStatements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
