use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "consents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub granter: String,
    pub requester: String,
    pub data_types: String, // JSON-encoded Vec<String>
    pub purpose: String,
    pub status: String, // "pending" | "active" | "revoked" | "expired" | "declined"
    pub created_at: i64,
    pub granted_at: Option<i64>,
    pub expires_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
