use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One category of a user's personal data, stored as a JSON document.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profile_attributes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub owner: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub category: String, // "personal-info" | "location-data" | "browser-data"
    pub document: String, // JSON object
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
