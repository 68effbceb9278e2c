//! Sentence + embedding analysis of one financial statement

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "financial_statement_analyses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub financial_statement_id: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub analysis_text: Option<String>,

    /// pgvector `vector(1024)` column, exchanged as its text literal.
    /// Writes go through raw SQL with a `::vector` cast.
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    pub last_modified: Option<Date>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::financial_statement::Entity",
        from = "Column::FinancialStatementId",
        to = "super::financial_statement::Column::Id",
        on_delete = "Cascade"
    )]
    FinancialStatement,
}

impl Related<super::financial_statement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FinancialStatement.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Format a vector as a pgvector literal, e.g. "[0.1,0.2]"
pub fn to_vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Parse a pgvector literal back into floats
pub fn parse_vector_literal(literal: &str) -> Option<Vec<f32>> {
    let inner = literal.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|v| v.trim().parse::<f32>().ok())
        .collect()
}

/// Analysis record produced by the embedding worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAnalysis {
    pub financial_statement_id: i64,
    pub analysis_text: String,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_roundtrip() {
        let literal = to_vector_literal(&[0.5, -1.25, 3.0]);
        assert_eq!(literal, "[0.5,-1.25,3]");
        assert_eq!(parse_vector_literal(&literal), Some(vec![0.5, -1.25, 3.0]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_vector_literal("[1.0,abc]"), None);
        assert_eq!(parse_vector_literal("[]"), Some(vec![]));
    }
}
