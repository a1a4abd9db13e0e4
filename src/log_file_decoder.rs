//! Functions in this module allow to decode the controller's on-device
//! binary log files.
//!
//! A log file consists of an 8-byte header followed by fixed-size records.
//! The header's leading little-endian version word selects the record
//! layout: two known format generations use 168-byte and 188-byte records,
//! where the longer layout merely reserves 20 trailing bytes that the
//! shorter one lacks. Records are decoded field-by-field at fixed byte
//! offsets; the 16-bit temperature channels pass through the shared
//! [calibration curves](crate::calibration).
//!
//! After decoding, channels that never change across the whole file are
//! pruned (a constant channel carries no information) and the records are
//! sorted by ascending `"time"`.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    calibration::{self, SensorCurve},
    data_set::DataSet,
    error::{Error, Result},
    record::Record,
    value::Value,
};

const FILE_HEADER_LENGTH: usize = 8;

/// One named bit of a status register.
struct BitSpec {
    name: &'static str,
    bit: u8,
    /// Some inputs are wired active-low and are inverted at the protocol
    /// level.
    inverted: bool,
}

/// A 16-bit temperature channel calibrated through a shared sensor curve.
struct TemperatureSpec {
    name: &'static str,
    offset: usize,
    curve: SensorCurve,
}

/// A 32-bit setpoint stored as two 16-bit halves (low half first).
struct SetpointSpec {
    name: &'static str,
    offset: usize,
    precision: i32,
}

/// A directly-scaled analogue channel: `raw × numerator ÷ divisor`.
struct AnalogSpec {
    name: &'static str,
    offset: usize,
    numerator: i32,
    divisor: i32,
}

/// The byte layout of one log record, selected once per file from the
/// version discriminator.
struct RecordLayout {
    record_length: usize,
    bit_registers: &'static [(usize, &'static [BitSpec])],
    temperatures: &'static [TemperatureSpec],
    setpoints: &'static [SetpointSpec],
    analogs: &'static [AnalogSpec],
}

const fn bit(name: &'static str, bit: u8) -> BitSpec {
    BitSpec {
        name,
        bit,
        inverted: false,
    }
}

const fn inverted_bit(name: &'static str, bit: u8) -> BitSpec {
    BitSpec {
        name,
        bit,
        inverted: true,
    }
}

const fn temperature(name: &'static str, offset: usize, curve: SensorCurve) -> TemperatureSpec {
    TemperatureSpec {
        name,
        offset,
        curve,
    }
}

static OUTPUT_BITS: [BitSpec; 10] = [
    bit("HUP", 0),
    bit("ZUP", 1),
    bit("BUP", 2),
    bit("ZIP", 3),
    bit("VEN", 4),
    bit("VBO", 5),
    bit("VD1", 6),
    bit("VD2", 7),
    bit("ZWE1", 8),
    bit("ZWE2", 9),
];

static INPUT_BITS: [BitSpec; 5] = [
    inverted_bit("HD", 0),
    inverted_bit("ND", 1),
    inverted_bit("MOT", 2),
    bit("ASD", 3),
    bit("EVU", 4),
];

static BIT_REGISTERS: [(usize, &[BitSpec]); 2] = [(4, &OUTPUT_BITS), (6, &INPUT_BITS)];

static TEMPERATURES: [TemperatureSpec; 9] = [
    temperature("TVL", 8, SensorCurve::Heating),
    temperature("TRL", 10, SensorCurve::Heating),
    temperature("TBW", 12, SensorCurve::Heating),
    temperature("TA", 14, SensorCurve::Ambient),
    temperature("TWQein", 16, SensorCurve::Ambient),
    temperature("TWQaus", 18, SensorCurve::Ambient),
    temperature("THG", 20, SensorCurve::HotGas),
    temperature("TFB1", 22, SensorCurve::Mixer),
    temperature("TSK", 24, SensorCurve::Solar),
];

static SETPOINTS: [SetpointSpec; 3] = [
    SetpointSpec {
        name: "TRLsoll",
        offset: 26,
        precision: 10,
    },
    SetpointSpec {
        name: "TBWsoll",
        offset: 30,
        precision: 10,
    },
    SetpointSpec {
        name: "TMK1soll",
        offset: 34,
        precision: 10,
    },
];

static ANALOGS: [AnalogSpec; 2] = [
    AnalogSpec {
        name: "AI1",
        offset: 38,
        numerator: 100,
        divisor: 1023,
    },
    AnalogSpec {
        name: "AO1",
        offset: 40,
        numerator: 10,
        divisor: 100,
    },
];

static LAYOUT_V1: RecordLayout = RecordLayout {
    record_length: 168,
    bit_registers: &BIT_REGISTERS,
    temperatures: &TEMPERATURES,
    setpoints: &SETPOINTS,
    analogs: &ANALOGS,
};

// The second generation appends 20 reserved bytes; the decoded fields are
// identical.
static LAYOUT_V2: RecordLayout = RecordLayout {
    record_length: 188,
    bit_registers: &BIT_REGISTERS,
    temperatures: &TEMPERATURES,
    setpoints: &SETPOINTS,
    analogs: &ANALOGS,
};

fn layout_from_version(version: u32) -> Option<&'static RecordLayout> {
    match version {
        8208 | 8209 => Some(&LAYOUT_V1),
        9000 | 9001 => Some(&LAYOUT_V2),
        _ => None,
    }
}

/// Return the record length in bytes used by the given log file version.
pub fn record_length_from_version(version: u32) -> Option<usize> {
    layout_from_version(version).map(|layout| layout.record_length)
}

/// Decode a complete in-memory log file into a [`DataSet`].
///
/// Structural faults (unknown version, truncated trailing record) fail with
/// [`Error::Decode`] rather than silently truncating; they are not expected
/// in well-formed files.
pub fn data_set_from_bytes(buf: &[u8]) -> Result<DataSet> {
    if buf.len() < FILE_HEADER_LENGTH {
        return Err(Error::Decode(format!(
            "log file of {} bytes is shorter than its header",
            buf.len()
        )));
    }

    let version = LittleEndian::read_u32(&buf[0..4]);
    let layout = layout_from_version(version)
        .ok_or_else(|| Error::Decode(format!("unknown log file version {}", version)))?;

    let payload = &buf[FILE_HEADER_LENGTH..];
    let remainder = payload.len() % layout.record_length;
    if remainder != 0 {
        return Err(Error::Decode(format!(
            "truncated log file: {} bytes left after the last record",
            remainder
        )));
    }

    let mut records = payload
        .chunks_exact(layout.record_length)
        .map(|chunk| record_from_checked_bytes(chunk, layout))
        .collect::<Vec<_>>();

    prune_constant_fields(&mut records);

    let mut data_set = DataSet::from_records(records);
    data_set.sort_by_time();

    Ok(data_set)
}

/// Decode one record. The caller guarantees that `buf` spans exactly one
/// record of the given layout.
fn record_from_checked_bytes(buf: &[u8], layout: &RecordLayout) -> Record {
    let mut record = Record::new();

    record.insert("time", f64::from(LittleEndian::read_u32(&buf[0..4])));

    for &(offset, bits) in layout.bit_registers {
        let register = LittleEndian::read_u16(&buf[offset..]);
        for spec in bits {
            let mut on = register & (1 << spec.bit) != 0;
            if spec.inverted {
                on = !on;
            }
            record.insert(spec.name, on);
        }
    }

    for spec in layout.temperatures {
        let raw = i32::from(LittleEndian::read_u16(&buf[spec.offset..]));
        record.insert(spec.name, calibration::curve(spec.curve).interpolate(raw));
    }

    for spec in layout.setpoints {
        let low = u32::from(LittleEndian::read_u16(&buf[spec.offset..]));
        let high = u32::from(LittleEndian::read_u16(&buf[spec.offset + 2..]));
        let combined = ((high << 16) | low) as i32;
        record.insert(spec.name, f64::from(combined) / f64::from(spec.precision));
    }

    for spec in layout.analogs {
        let raw = i32::from(LittleEndian::read_u16(&buf[spec.offset..]));
        record.insert(
            spec.name,
            f64::from(raw * spec.numerator) / f64::from(spec.divisor),
        );
    }

    record
}

/// Drop every field (except `"time"`) that has at most one distinct value
/// across the whole file.
fn prune_constant_fields(records: &mut [Record]) {
    let names = records
        .iter()
        .flat_map(|record| record.iter().map(|(name, _)| name.to_owned()))
        .collect::<std::collections::BTreeSet<_>>();

    for name in names {
        if name == "time" {
            continue;
        }

        let mut distinct: Vec<Value> = Vec::new();
        for record in records.iter() {
            if let Some(value) = record.get(&name) {
                if !distinct.contains(value) {
                    distinct.push(value.clone());
                    if distinct.len() > 1 {
                        break;
                    }
                }
            }
        }

        if distinct.len() <= 1 {
            for record in records.iter_mut() {
                record.remove(&name);
            }
        }
    }
}
