// ============================================================================
// Declarative mappings
// ============================================================================

/// Implements [`Entity`](crate::entity::Entity) for a plain struct.
///
/// The key field comes first in the column list; the remaining fields follow
/// in the order given. Every field type must convert into
/// [`Value`](crate::core::Value) and implement
/// [`FromValue`](crate::core::FromValue).
///
/// ```
/// use rustuow::impl_entity;
///
/// #[derive(Debug, Clone)]
/// struct Blog {
///     id: i64,
///     url: String,
///     rating: Option<i64>,
/// }
///
/// impl_entity!(Blog, table = "Blogs", key = id, columns { url, rating });
/// ```
#[macro_export]
macro_rules! impl_entity {
    ($ty:ty, table = $table:literal, key = $key:ident, columns { $($field:ident),* $(,)? }) => {
        impl $crate::entity::Entity for $ty {
            const TABLE: &'static str = $table;
            const COLUMNS: &'static [&'static str] = &[stringify!($key) $(, stringify!($field))*];

            fn id(&self) -> i64 {
                self.$key
            }

            fn set_id(&mut self, id: i64) {
                self.$key = id;
            }

            fn to_values(&self) -> $crate::core::Row {
                vec![
                    $crate::core::Value::from(self.$key)
                    $(, $crate::core::Value::from(self.$field.clone()))*
                ]
            }

            fn from_record(record: &$crate::core::Record) -> $crate::core::Result<Self> {
                Ok(Self {
                    $key: record.get_as(stringify!($key))?,
                    $($field: record.get_as(stringify!($field))?,)*
                })
            }
        }
    };
}

/// Implements [`FromRecord`](crate::uow::FromRecord) for a `Default` struct
/// returned by stored procedures.
///
/// Only the listed fields take part in column matching.
#[macro_export]
macro_rules! impl_from_record {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::uow::FromRecord for $ty {
            fn fields() -> &'static [&'static str] {
                &[$(stringify!($field)),*]
            }

            #[allow(unused_variables)]
            fn assign(&mut self, field: &str, value: $crate::core::Value) -> $crate::core::Result<()> {
                $(
                    if field == stringify!($field) {
                        self.$field = $crate::core::FromValue::from_value(value)?;
                        return Ok(());
                    }
                )*
                Err($crate::core::DbError::Mapping(format!(
                    "{} has no field '{}'",
                    stringify!($ty),
                    field
                )))
            }
        }
    };
}
