use std::collections::btree_map::{self, BTreeMap};

use chrono::{DateTime, TimeZone, Utc};

use crate::value::Value;

/// One decoded sample: a mapping from field name to [`Value`].
///
/// Field names are unique per record, insertion order is irrelevant. A record
/// that represents a plottable sample always carries a `"time"` field holding
/// the sample time in integer seconds.
///
/// # Examples
///
/// ```rust
/// use luxtronik::{Record, Value};
///
/// let mut record = Record::new();
/// record.insert("time", 1485688933);
/// record.insert("TVL", 35.2);
/// record.insert("VD1", true);
///
/// assert_eq!(Some(&Value::Number(35.2)), record.get("TVL"));
/// assert_eq!(Some(1485688933), record.time());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Construct an empty `Record`.
    pub fn new() -> Record {
        Record {
            fields: BTreeMap::new(),
        }
    }

    /// Store a field, replacing any existing field of the same name.
    pub fn insert<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) {
        self.fields.insert(name.into(), value.into());
    }

    /// Return the value of the named field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Return whether the named field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Remove the named field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Return the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Return whether this record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Return the sample time in seconds, if a numeric `"time"` field exists.
    pub fn time(&self) -> Option<i64> {
        match self.fields.get("time") {
            Some(&Value::Number(value)) if value.is_finite() => Some(value as i64),
            _ => None,
        }
    }

    /// Return the sample time as a UTC timestamp, if a `"time"` field exists.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.time()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Return an iterator over the fields, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Record {
        Record {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
