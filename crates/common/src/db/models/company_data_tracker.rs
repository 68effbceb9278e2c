//! Per-company freshness tracker

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "company_data_trackers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub company_id: i64,

    /// Day of the last fetch batch that included this company
    pub last_financial_report_fetch: Option<Date>,
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
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the company is due for a fetch given the staleness cutoff.
    pub fn is_due(&self, cutoff: Date) -> bool {
        self.last_financial_report_fetch
            .map_or(true, |fetched| fetched < cutoff)
    }
}
