use serde::{Deserialize, Serialize};
pub mod bank_question;
pub mod extraction_job;
pub mod law;
pub mod record;

/// A struct persisted as one record of `table_name()`, keyed by `get_id()`.
pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Declares a record struct with `id`, `created_at` and `updated_at` in
/// front of the given fields, and implements [`StoredObject`] for it.
///
/// The datetime adapters from [`record`] are brought into scope so fields can
/// name them in `serialize_with`/`deserialize_with`.
#[macro_export]
macro_rules! stored_object {
    ($(#[$meta:meta])* $name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
        use serde::{Deserialize, Serialize};
        use surrealdb::sql::Thing;
        use chrono::{DateTime, Utc};
        use $crate::storage::types::StoredObject;
        #[allow(unused_imports)]
        use $crate::storage::types::record::{
            deserialize_datetime, deserialize_option_datetime, deserialize_record_id,
            serialize_datetime, serialize_option_datetime,
        };

        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "deserialize_record_id")]
            pub id: String,
            #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
            pub created_at: DateTime<Utc>,
            #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
            pub updated_at: DateTime<Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
