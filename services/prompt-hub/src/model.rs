//! SeaORM entity definitions for prompts, their join tables, tags, version
//! history, usage events and relations.

use sea_orm::entity::prelude::*;

/* ---------- PROMPTS ---------- */

pub mod prompt {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "prompts")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub title: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub description: Option<String>,
        #[sea_orm(column_type = "Text")]
        pub content: String,
        /// `PromptType` text.
        #[sea_orm(column_name = "type")]
        pub prompt_type: String,
        /// `PromptStatus` text.
        pub status: String,
        pub is_favorite: bool,
        pub use_count: i32,
        pub version: i32,
        pub created_by: String,
        pub created_at: DateTimeUtc,
        pub updated_at: Option<DateTimeUtc>,
        pub last_used_at: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/* ---------- ASSOCIATIONS ---------- */

pub mod prompt_interface {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "prompt_interfaces")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub prompt_id: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub interface: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::prompt::Entity",
            from = "Column::PromptId",
            to = "super::prompt::Column::Id",
            on_delete = "Cascade"
        )]
        Prompt,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod prompt_domain {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "prompt_domains")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub prompt_id: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub domain: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::prompt::Entity",
            from = "Column::PromptId",
            to = "super::prompt::Column::Id",
            on_delete = "Cascade"
        )]
        Prompt,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/* ---------- TAGS ---------- */

pub mod tag {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "tags")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        #[sea_orm(unique)]
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod prompt_tag {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "prompt_tags")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub prompt_id: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub tag_id: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::prompt::Entity",
            from = "Column::PromptId",
            to = "super::prompt::Column::Id",
            on_delete = "Cascade"
        )]
        Prompt,
        #[sea_orm(
            belongs_to = "super::tag::Entity",
            from = "Column::TagId",
            to = "super::tag::Column::Id",
            on_delete = "Cascade"
        )]
        Tag,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/* ---------- HISTORY & USAGE ---------- */

pub mod prompt_version {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "prompt_versions")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub prompt_id: String,
        pub version: i32,
        /// Content snapshot at this version.
        #[sea_orm(column_type = "Text")]
        pub content: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub change_notes: Option<String>,
        pub changed_by: Option<String>,
        pub changed_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::prompt::Entity",
            from = "Column::PromptId",
            to = "super::prompt::Column::Id",
            on_delete = "Cascade"
        )]
        Prompt,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod prompt_usage {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "prompt_usage")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub prompt_id: String,
        pub version: i32,
        pub user_id: Option<String>,
        pub context: Option<Json>,
        #[sea_orm(column_type = "Text", nullable)]
        pub result: Option<String>,
        pub used_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::prompt::Entity",
            from = "Column::PromptId",
            to = "super::prompt::Column::Id",
            on_delete = "Cascade"
        )]
        Prompt,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/* ---------- RELATIONS ---------- */

pub mod prompt_relation {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "prompt_relations")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub source_prompt_id: String,
        pub target_prompt_id: String,
        pub relation_type: String,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::prompt::Entity",
            from = "Column::SourcePromptId",
            to = "super::prompt::Column::Id",
            on_delete = "Cascade"
        )]
        Source,
        #[sea_orm(
            belongs_to = "super::prompt::Entity",
            from = "Column::TargetPromptId",
            to = "super::prompt::Column::Id",
            on_delete = "Cascade"
        )]
        Target,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/* ---------- Re-exports ---------- */

pub use prompt::{ActiveModel as PromptActiveModel, Entity as PromptEntity, Model as PromptModel};
pub use prompt_domain::{ActiveModel as PromptDomainActiveModel, Entity as PromptDomainEntity};
pub use prompt_interface::{
    ActiveModel as PromptInterfaceActiveModel, Entity as PromptInterfaceEntity,
};
pub use prompt_relation::{
    ActiveModel as PromptRelationActiveModel, Entity as PromptRelationEntity,
};
pub use prompt_tag::{ActiveModel as PromptTagActiveModel, Entity as PromptTagEntity};
pub use prompt_usage::{ActiveModel as PromptUsageActiveModel, Entity as PromptUsageEntity};
pub use prompt_version::{
    ActiveModel as PromptVersionActiveModel, Entity as PromptVersionEntity,
};
pub use tag::{ActiveModel as TagActiveModel, Entity as TagEntity};
