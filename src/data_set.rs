use std::slice::Iter;

use crate::record::Record;

/// An ordered sequence of [`Record`] values.
///
/// Once finalized (after [`DataSet::sort_by_time`]) the records are ordered
/// by ascending `"time"`. Mutually unique `"time"` values are an invariant
/// enforced by [`DataSet::merge`], not at construction time.
///
/// # Examples
///
/// ```rust
/// use luxtronik::{DataSet, Record};
///
/// let mut record = Record::new();
/// record.insert("time", 100);
/// record.insert("TVL", 35.2);
///
/// let mut existing = DataSet::new();
/// existing.push(record.clone());
///
/// let mut incoming = DataSet::new();
/// incoming.push(record);
///
/// // Merging is idempotent: the record's timestamp is already known.
/// existing.merge(incoming);
/// assert_eq!(1, existing.len());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataSet {
    records: Vec<Record>,
}

impl DataSet {
    /// Construct an empty `DataSet`.
    pub fn new() -> DataSet {
        DataSet {
            records: Vec::new(),
        }
    }

    /// Construct a `DataSet` from a list of `Record` objects.
    pub fn from_records(records: Vec<Record>) -> DataSet {
        DataSet { records }
    }

    /// Return the `Record` objects contained in this `DataSet`.
    pub fn as_record_slice(&self) -> &[Record] {
        &self.records[..]
    }

    /// Append a `Record` without checking timestamp uniqueness.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Return whether this `DataSet` contains no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns an iterator over the `Record` values.
    pub fn iter(&self) -> Iter<'_, Record> {
        self.records.iter()
    }

    /// Merge all records of `incoming` into this `DataSet`.
    ///
    /// An incoming record is appended only if it carries a `"time"` field
    /// and no existing record has the same `"time"` value. Existing records
    /// are never updated, so merging is first-write-wins and idempotent.
    pub fn merge(&mut self, incoming: DataSet) {
        for record in incoming.records {
            let Some(time) = record.time() else {
                continue;
            };
            let known = self.records.iter().any(|r| r.time() == Some(time));
            if !known {
                self.records.push(record);
            }
        }
    }

    /// Sort the records by ascending `"time"`.
    ///
    /// Records without a `"time"` field sort first, keeping their relative
    /// order.
    pub fn sort_by_time(&mut self) {
        self.records.sort_by_key(|r| r.time().unwrap_or(i64::MIN));
    }
}

impl AsRef<[Record]> for DataSet {
    fn as_ref(&self) -> &[Record] {
        &self.records
    }
}

impl IntoIterator for DataSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a DataSet {
    type Item = &'a Record;
    type IntoIter = Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: i64, tvl: f64) -> Record {
        let mut record = Record::new();
        record.insert("time", time);
        record.insert("TVL", tvl);
        record
    }

    #[test]
    fn test_merge_appends_unknown_timestamps() {
        let mut existing = DataSet::from_records(vec![record(100, 35.2)]);

        let incoming = DataSet::from_records(vec![record(100, 99.9), record(160, 35.4)]);
        existing.merge(incoming);

        assert_eq!(2, existing.len());
        // First write wins: the record at time 100 keeps its original value.
        assert_eq!(Some(35.2), existing.as_record_slice()[0].get("TVL").unwrap().as_f64());
        assert_eq!(Some(160), existing.as_record_slice()[1].time());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut existing = DataSet::from_records(vec![record(100, 35.2), record(160, 35.4)]);
        let copy = existing.clone();

        existing.merge(copy.clone());

        assert_eq!(copy, existing);
    }

    #[test]
    fn test_merge_skips_records_without_time() {
        let mut untimed = Record::new();
        untimed.insert("TVL", 35.2);

        let mut existing = DataSet::new();
        existing.merge(DataSet::from_records(vec![untimed]));

        assert!(existing.is_empty());
    }

    #[test]
    fn test_sort_by_time() {
        let mut data_set =
            DataSet::from_records(vec![record(160, 35.4), record(100, 35.2), record(130, 35.3)]);

        data_set.sort_by_time();

        let times = data_set.iter().map(|r| r.time().unwrap()).collect::<Vec<_>>();
        assert_eq!(vec![100, 130, 160], times);
    }
}
