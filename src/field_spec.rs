use crate::{
    error::{Error, Result},
    value::Value,
};

/// The bidirectional raw-integer codec of one field.
///
/// The controller transmits every field as a raw `i32`; the codec maps it to
/// a typed [`Value`] and back. The set of codecs is closed: per-field
/// behaviour is selected by variant, with `Custom` as the escape hatch for
/// the few fields that need a hand-written conversion pair.
#[derive(Clone, Debug)]
pub enum FieldCodec {
    /// The raw value is an index into a fixed string table.
    Selection(Vec<String>),
    /// The raw value is multiplied by a scale factor.
    Scaling(f64),
    /// The raw value is interpreted as `raw != 0`.
    Bool,
    /// The raw value is passed through unchanged.
    Raw,
    /// A caller-supplied conversion pair.
    Custom {
        /// Convert a raw wire value into a `Value`.
        decode: fn(i32) -> Value,
        /// Convert a `Value` back into its raw wire representation.
        encode: fn(&Value) -> Result<i32>,
    },
}

/// Identifies one field of the TCP protocol: its name, writability, unit and
/// codec.
///
/// # Examples
///
/// ```rust
/// use luxtronik::{FieldCodec, FieldSpec, Value};
///
/// let field = FieldSpec::new("TBWsoll", FieldCodec::Scaling(0.1))
///     .writable()
///     .with_unit("°C");
///
/// assert_eq!(Value::Number(48.5), field.decode(485));
/// assert_eq!(485, field.encode(&Value::Number(48.5)).unwrap());
/// ```
#[derive(Clone, Debug)]
pub struct FieldSpec {
    name: String,
    writable: bool,
    unit: String,
    codec: FieldCodec,
}

impl FieldSpec {
    /// Construct a new read-only `FieldSpec` without a unit.
    pub fn new<N: Into<String>>(name: N, codec: FieldCodec) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            writable: false,
            unit: String::new(),
            codec,
        }
    }

    /// Mark this field as writable.
    pub fn writable(mut self) -> FieldSpec {
        self.writable = true;
        self
    }

    /// Attach a unit string to this field.
    pub fn with_unit<U: Into<String>>(mut self, unit: U) -> FieldSpec {
        self.unit = unit.into();
        self
    }

    /// Return the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return whether this field may be written to the device.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Return the unit string of this field.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Decode a raw wire value into a [`Value`].
    pub fn decode(&self, raw: i32) -> Value {
        match self.codec {
            FieldCodec::Selection(ref options) => match options.get(raw as usize) {
                Some(option) => Value::Str(option.clone()),
                None => {
                    log::debug!(
                        "Raw value {} of field {} is outside its selection table",
                        raw,
                        self.name
                    );
                    Value::Str(raw.to_string())
                }
            },
            FieldCodec::Scaling(scale) => Value::Number(f64::from(raw) * scale),
            FieldCodec::Bool => Value::Bool(raw != 0),
            FieldCodec::Raw => Value::Number(f64::from(raw)),
            FieldCodec::Custom { decode, .. } => decode(raw),
        }
    }

    /// Encode a [`Value`] into its raw wire representation.
    ///
    /// Fails with [`Error::Protocol`] if the value's variant does not match
    /// the codec, or if a selection string is not part of the table.
    pub fn encode(&self, value: &Value) -> Result<i32> {
        match self.codec {
            FieldCodec::Selection(ref options) => {
                let text = value.as_str().ok_or_else(|| self.encode_mismatch(value))?;
                options
                    .iter()
                    .position(|option| option == text)
                    .map(|index| index as i32)
                    .ok_or_else(|| {
                        Error::Protocol(format!(
                            "value {:?} is not part of the selection table of field {}",
                            text, self.name
                        ))
                    })
            }
            FieldCodec::Scaling(scale) => {
                let number = value.as_f64().ok_or_else(|| self.encode_mismatch(value))?;
                Ok((number / scale).round() as i32)
            }
            FieldCodec::Bool => {
                let flag = value.as_bool().ok_or_else(|| self.encode_mismatch(value))?;
                Ok(i32::from(flag))
            }
            FieldCodec::Raw => {
                let number = value.as_f64().ok_or_else(|| self.encode_mismatch(value))?;
                Ok(number.round() as i32)
            }
            FieldCodec::Custom { encode, .. } => encode(value),
        }
    }

    fn encode_mismatch(&self, value: &Value) -> Error {
        Error::Protocol(format!(
            "cannot encode {:?} with the {:?} codec of field {}",
            value, self.codec, self.name
        ))
    }
}

/// An ordered collection of [`FieldSpec`] values.
///
/// The TCP protocol identifies a field purely by its position in this
/// registry, so registry order is part of the wire contract and must mirror
/// the device firmware's field ordering exactly. Registries are versioned
/// artifacts supplied by the caller, never inferred at runtime.
///
/// # Examples
///
/// ```rust
/// use luxtronik::{FieldCodec, FieldRegistry, FieldSpec, Value};
///
/// let registry = FieldRegistry::new(vec![
///     FieldSpec::new("BetriebsartHz", FieldCodec::Selection(vec![
///         "Auto".into(),
///         "Aus".into(),
///     ])),
///     FieldSpec::new("TBWsoll", FieldCodec::Scaling(0.1)).writable(),
/// ]);
///
/// assert_eq!(Some(("TBWsoll", Value::Number(48.5))), registry.decode_at(1, 485));
/// assert_eq!(Some(1), registry.index_of("TBWsoll"));
/// assert_eq!(None, registry.index_of("TVL"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldSpec>,
}

impl FieldRegistry {
    /// Construct a `FieldRegistry` from an ordered list of fields.
    pub fn new(fields: Vec<FieldSpec>) -> FieldRegistry {
        FieldRegistry { fields }
    }

    /// Return the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Return whether this registry contains no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Return the field at the given wire index.
    pub fn get(&self, index: usize) -> Option<&FieldSpec> {
        self.fields.get(index)
    }

    /// Return the wire index of the named field.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Decode the raw value transmitted at the given wire index.
    ///
    /// Returns `None` if the index is beyond the registry, which happens
    /// when the device firmware is newer than the registry artifact.
    pub fn decode_at(&self, index: usize, raw: i32) -> Option<(&str, Value)> {
        self.fields
            .get(index)
            .map(|field| (field.name(), field.decode(raw)))
    }

    /// Encode a value for the field at the given wire index.
    pub fn encode_at(&self, index: usize, value: &Value) -> Result<i32> {
        let field = self.fields.get(index).ok_or_else(|| {
            Error::Protocol(format!("no field definition at index {}", index))
        })?;
        field.encode(value)
    }

    /// Returns an iterator over the fields in wire order.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldSpec> {
        self.fields.iter()
    }
}
