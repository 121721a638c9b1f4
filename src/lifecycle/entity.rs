//! `sea_orm` entity definitions for the two lifecycle tables (spec §6
//! "Persisted layout"). Kept deliberately thin: the richer
//! [`super::BundleRecord`]/[`super::NotifEmail`] DTOs are what the rest of
//! the crate works with, these exist only at the storage boundary.

pub mod bundle {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
    #[sea_orm(table_name = "vault_bundle")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub bundle_type: String,
        /// 20 raw bytes, hex-decoded on the way in/out.
        pub object_id: Vec<u8>,
        pub task_handle: Option<String>,
        pub status: String,
        pub sticky: bool,
        pub progress_msg: Option<String>,
        pub ts_created: DateTimeUtc,
        pub ts_done: Option<DateTimeUtc>,
        pub ts_last_access: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::notif_email::Entity")]
        NotifEmail,
    }

    impl Related<super::notif_email::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::NotifEmail.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod notif_email {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
    #[sea_orm(table_name = "vault_notif_email")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub bundle_id: i64,
        pub email: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::bundle::Entity",
            from = "Column::BundleId",
            to = "super::bundle::Column::Id"
        )]
        Bundle,
    }

    impl Related<super::bundle::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Bundle.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
