use std::borrow::Cow;

use crate::workbook::CellValue;

/// A field value read from a [`Record`], before cell coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    /// Every numeric type widens to `f64`.
    Number(f64),
    Bool(bool),
    /// Anything else, already rendered through its `Display` form.
    Other(String),
}

impl From<FieldValue> for CellValue {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => CellValue::Text(String::new()),
            FieldValue::Text(s) | FieldValue::Other(s) => CellValue::Text(s),
            FieldValue::Number(n) => CellValue::Number(n),
            FieldValue::Bool(b) => CellValue::Bool(b),
        }
    }
}

/// A record that can describe itself as ordered `name → value` pairs.
///
/// `field_names` fixes the column order used when a spec is inferred.
/// `field` returns `None` when the name is unknown or unreadable; writers
/// turn that into a blank cell instead of failing the row.
pub trait Record {
    fn field_names(&self) -> Vec<Cow<'_, str>>;

    fn field(&self, name: &str) -> Option<FieldValue>;
}

impl<R: Record + ?Sized> Record for &R {
    fn field_names(&self) -> Vec<Cow<'_, str>> {
        (**self).field_names()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        (**self).field(name)
    }
}

/// Implement [`Record`] for a struct from an explicit, ordered field list.
///
/// ```rust
/// use tabport_core::impl_record;
///
/// struct Employee { first_name: String, age: u32 }
///
/// impl_record!(Employee {
///     "firstName" => first_name,
///     "age" => age,
/// });
/// ```
#[macro_export]
macro_rules! impl_record {
    ($ty:ty { $($name:literal => $field:ident),+ $(,)? }) => {
        impl $crate::mapper::Record for $ty {
            fn field_names(&self) -> ::std::vec::Vec<::std::borrow::Cow<'_, str>> {
                ::std::vec![$(::std::borrow::Cow::Borrowed($name)),+]
            }

            fn field(&self, name: &str) -> ::std::option::Option<$crate::mapper::FieldValue> {
                match name {
                    $($name => ::std::option::Option::Some(
                        $crate::mapper::FieldValue::from(::std::clone::Clone::clone(&self.$field)),
                    ),)+
                    _ => ::std::option::Option::None,
                }
            }
        }
    };
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_owned())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

macro_rules! numeric_field_value {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(n: $t) -> Self {
                FieldValue::Number(n as f64)
            }
        })*
    };
}

numeric_field_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

impl From<chrono::NaiveDate> for FieldValue {
    fn from(d: chrono::NaiveDate) -> Self {
        FieldValue::Other(d.to_string())
    }
}

impl From<chrono::NaiveDateTime> for FieldValue {
    fn from(d: chrono::NaiveDateTime) -> Self {
        FieldValue::Other(d.to_string())
    }
}

impl<Tz: chrono::TimeZone> From<chrono::DateTime<Tz>> for FieldValue
where
    Tz::Offset: std::fmt::Display,
{
    fn from(d: chrono::DateTime<Tz>) -> Self {
        FieldValue::Other(d.to_rfc3339())
    }
}

impl From<uuid::Uuid> for FieldValue {
    fn from(id: uuid::Uuid) -> Self {
        FieldValue::Other(id.to_string())
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FieldValue::Null,
            Value::String(s) => FieldValue::Text(s),
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Number)
                .unwrap_or_else(|| FieldValue::Other(n.to_string())),
            other => FieldValue::Other(other.to_string()),
        }
    }
}

// ── JSON records ──────────────────────────────────────────────────────────────

/// A record backed by a JSON object; field order is the object's key order.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecord(pub serde_json::Map<String, serde_json::Value>);

impl JsonRecord {
    /// Wrap `value` if it is a JSON object.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }
}

impl Record for JsonRecord {
    fn field_names(&self) -> Vec<Cow<'_, str>> {
        self.0.keys().map(|k| Cow::Borrowed(k.as_str())).collect()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.0.get(name).cloned().map(FieldValue::from)
    }
}
