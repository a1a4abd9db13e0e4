//! Persistent storage of decoded telemetry as JSON time-series files.
//!
//! A repository file is a JSON array of records. Each record is an object
//! mapping channel names to their values; the `"time"` channel carries the
//! record's Unix timestamp. Files written here can be re-loaded losslessly
//! and merged with freshly read data, so a repository file can be grown
//! incrementally over months of readouts.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use crate::{
    data_set::DataSet,
    error::{Error, Result},
    log_file_decoder,
    record::Record,
    value::Value,
};

fn value_to_json(name: &str, value: &Value) -> Result<serde_json::Value> {
    match *value {
        Value::Number(number) => serde_json::Number::from_f64(number)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                Error::Format(format!(
                    "non-finite number {} in field {} cannot be stored as JSON",
                    number, name
                ))
            }),
        Value::Bool(flag) => Ok(serde_json::Value::Bool(flag)),
        Value::Str(ref text) => Ok(serde_json::Value::String(text.clone())),
        Value::BoolArray(ref flags) => Ok(serde_json::Value::Array(
            flags.iter().map(|&flag| serde_json::Value::Bool(flag)).collect(),
        )),
    }
}

fn value_from_json(name: &str, json: &serde_json::Value) -> Result<Option<Value>> {
    let value = match *json {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Bool(flag) => Value::Bool(flag),
        serde_json::Value::Number(ref number) => {
            let number = number.as_f64().ok_or_else(|| {
                Error::Format(format!("number {} in field {} overflows", number, name))
            })?;
            Value::Number(number)
        }
        serde_json::Value::String(ref text) => Value::Str(text.clone()),
        serde_json::Value::Array(ref items) => {
            let mut flags = Vec::with_capacity(items.len());
            for item in items {
                match *item {
                    serde_json::Value::Bool(flag) => flags.push(flag),
                    _ => {
                        return Err(Error::Format(format!(
                            "array field {} contains a non-boolean element",
                            name
                        )))
                    }
                }
            }
            Value::BoolArray(flags)
        }
        serde_json::Value::Object(_) => Value::Str(json.to_string()),
    };

    Ok(Some(value))
}

fn record_from_json(json: &serde_json::Value) -> Result<Record> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::Format(format!("expected a record object, found {}", json)))?;

    let mut record = Record::new();
    for (name, value) in object {
        if let Some(value) = value_from_json(name, value)? {
            record.insert(name.clone(), value);
        }
    }

    Ok(record)
}

/// Load a [`DataSet`] from a JSON reader.
///
/// Accepts either an array of record objects or a single record object.
/// `null` fields are skipped.
pub fn load<R: Read>(reader: R) -> Result<DataSet> {
    let json: serde_json::Value =
        serde_json::from_reader(reader).map_err(|err| Error::Format(err.to_string()))?;

    let records = match json {
        serde_json::Value::Array(ref items) => items
            .iter()
            .map(record_from_json)
            .collect::<Result<Vec<_>>>()?,
        serde_json::Value::Object(_) => vec![record_from_json(&json)?],
        _ => {
            return Err(Error::Format(format!(
                "expected an array of records, found {}",
                json
            )))
        }
    };

    Ok(DataSet::from_records(records))
}

/// Save a [`DataSet`] to a JSON writer.
pub fn save<W: Write>(writer: W, data_set: &DataSet) -> Result<()> {
    let mut records = Vec::with_capacity(data_set.len());
    for record in data_set.iter() {
        let mut object = serde_json::Map::new();
        for (name, value) in record.iter() {
            object.insert(name.to_owned(), value_to_json(name, value)?);
        }
        records.push(serde_json::Value::Object(object));
    }

    serde_json::to_writer_pretty(writer, &serde_json::Value::Array(records))
        .map_err(|err| Error::Format(err.to_string()))
}

/// Load a [`DataSet`] from a JSON repository file.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<DataSet> {
    load(BufReader::new(File::open(path)?))
}

/// Save a [`DataSet`] to a JSON repository file, replacing its contents.
pub fn save_file<P: AsRef<Path>>(path: P, data_set: &DataSet) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    save(&mut writer, data_set)?;
    writer.flush()?;
    Ok(())
}

/// Merge freshly read data into a JSON repository file.
///
/// A missing file counts as an empty repository. Records whose `"time"` is
/// already stored are left untouched, so appending the same readout twice is
/// harmless. The file ends up sorted by time.
pub fn append<P: AsRef<Path>>(path: P, incoming: DataSet) -> Result<()> {
    let path = path.as_ref();

    let mut data_set = if path.exists() {
        load_file(path)?
    } else {
        DataSet::new()
    };

    data_set.merge(incoming);
    data_set.sort_by_time();

    save_file(path, &data_set)
}

/// Decode an in-memory file of unknown format into a [`DataSet`].
///
/// JSON content is recognized by its leading `[` or `{`; anything else is
/// treated as an on-device binary log file.
pub fn open_bytes(buf: &[u8]) -> Result<DataSet> {
    let first = buf.iter().find(|byte| !byte.is_ascii_whitespace());

    match first {
        Some(b'[') | Some(b'{') => load(buf),
        _ => log_file_decoder::data_set_from_bytes(buf),
    }
}

/// Open a repository or log file, dispatching on its extension.
///
/// `.json` files are loaded as repositories and `.dta` files as binary
/// device logs; any other name falls back to content sniffing via
/// [`open_bytes`].
pub fn open_file<P: AsRef<Path>>(path: P) -> Result<DataSet> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());

    match extension.as_deref() {
        Some("json") => load_file(path),
        Some("dta") => {
            let mut buf = Vec::new();
            File::open(path)?.read_to_end(&mut buf)?;
            log_file_decoder::data_set_from_bytes(&buf)
        }
        _ => {
            let mut buf = Vec::new();
            File::open(path)?.read_to_end(&mut buf)?;
            open_bytes(&buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};

    use super::*;

    fn example_data_set() -> DataSet {
        let mut first = Record::new();
        first.insert("time", 1485688933.0);
        first.insert("TVL", 42.5);
        first.insert("VD1", true);
        first.insert("BetriebsartHz", "Auto");
        first.insert("Fehlerspeicher", vec![false, true, false]);

        let mut second = Record::new();
        second.insert("time", 1485688993.0);
        second.insert("TVL", 42.7);
        second.insert("VD1", false);

        DataSet::from_records(vec![first, second])
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let data_set = example_data_set();

        let mut buf = Vec::new();
        save(&mut buf, &data_set).unwrap();

        let loaded = load(buf.as_slice()).unwrap();
        assert_eq!(2, loaded.len());

        let records = loaded.as_record_slice();
        assert_eq!(Some(1485688933), records[0].time());
        assert_eq!(Some(&Value::Number(42.5)), records[0].get("TVL"));
        assert_eq!(Some(&Value::Bool(true)), records[0].get("VD1"));
        assert_eq!(
            Some(&Value::Str("Auto".to_owned())),
            records[0].get("BetriebsartHz")
        );
        assert_eq!(
            Some(&Value::BoolArray(vec![false, true, false])),
            records[0].get("Fehlerspeicher")
        );
        assert_eq!(Some(&Value::Number(42.7)), records[1].get("TVL"));
    }

    #[test]
    fn test_load_skips_null_fields_and_accepts_single_objects() {
        let loaded = load(br#"{"time": 100, "TVL": null, "VD1": true}"#.as_slice()).unwrap();

        assert_eq!(1, loaded.len());
        let record = &loaded.as_record_slice()[0];
        assert_eq!(Some(100), record.time());
        assert!(!record.contains("TVL"));
        assert_eq!(Some(&Value::Bool(true)), record.get("VD1"));
    }

    #[test]
    fn test_load_rejects_malformed_content() {
        assert!(load(br#"42"#.as_slice()).is_err());
        assert!(load(br#"[42]"#.as_slice()).is_err());
        assert!(load(br#"[{"flags": [true, 1]}]"#.as_slice()).is_err());
        assert!(load(br#"[{"time": 1"#.as_slice()).is_err());
    }

    #[test]
    fn test_save_rejects_non_finite_numbers() {
        let mut record = Record::new();
        record.insert("time", f64::NAN);
        let data_set = DataSet::from_records(vec![record]);

        let mut buf = Vec::new();
        assert!(save(&mut buf, &data_set).is_err());
    }

    #[test]
    fn test_open_bytes_sniffs_the_format() {
        let json = br#"  [{"time": 100, "TVL": 42.5}]"#;
        let loaded = open_bytes(json).unwrap();
        assert_eq!(1, loaded.len());

        // A binary log header is anything that does not look like JSON.
        let mut log = vec![0u8; 8];
        LittleEndian::write_u32(&mut log[0..4], 8208);
        let loaded = open_bytes(&log).unwrap();
        assert!(loaded.is_empty());

        assert!(open_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_append_merges_by_time() {
        let path = std::env::temp_dir().join(format!(
            "luxtronik-repository-test-{}.json",
            std::process::id()
        ));

        let mut first = Record::new();
        first.insert("time", 200.0);
        first.insert("TVL", 42.5);
        save_file(&path, &DataSet::from_records(vec![first])).unwrap();

        let mut older = Record::new();
        older.insert("time", 100.0);
        older.insert("TVL", 41.9);
        let mut duplicate = Record::new();
        duplicate.insert("time", 200.0);
        duplicate.insert("TVL", 99.9);
        append(&path, DataSet::from_records(vec![older, duplicate])).unwrap();

        let loaded = load_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(2, loaded.len());
        let records = loaded.as_record_slice();
        assert_eq!(Some(100), records[0].time());
        assert_eq!(Some(200), records[1].time());
        // The duplicate readout for time 200 was not allowed to overwrite.
        assert_eq!(Some(&Value::Number(42.5)), records[1].get("TVL"));
    }
}
