use std::{
    net::{Shutdown, TcpStream},
    thread,
    time::Duration,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;

use crate::{
    data_set::DataSet,
    device_discovery::DeviceAddress,
    error::{Error, Result},
    field_spec::FieldRegistry,
    record::Record,
};

/// Write one parameter: `(index, raw value)`.
const CMD_WRITE_PARAMETERS: i32 = 3002;
/// Read all parameters: `(length, i32[length])`.
const CMD_READ_PARAMETERS: i32 = 3003;
/// Read all calculations: `(stat, length, i32[length])`.
const CMD_READ_CALCULATIONS: i32 = 3004;
/// Read all visibilities: `(length, u8[length])`.
const CMD_READ_VISIBILITIES: i32 = 3005;

/// Delay between issuing parameter writes and re-reading the confirmed state.
const WRITE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound accepted for response lengths. Real firmwares report at most
/// a few thousand fields per area; a larger claim indicates a misbehaving
/// peer and fails fast instead of consuming the stream until EOF.
const MAX_RESPONSE_LENGTH: usize = 10_000;

/// The versioned field registries of one firmware's TCP protocol.
///
/// The three protocol areas carry independent registries; each one's order
/// must mirror the firmware's field ordering exactly, because fields are
/// identified purely by position on the wire.
#[derive(Clone, Debug, Default)]
pub struct ProtocolSpec {
    /// The registry of the parameters area.
    pub parameters: FieldRegistry,
    /// The registry of the calculations area.
    pub calculations: FieldRegistry,
    /// The registry of the visibilities area.
    pub visibilities: FieldRegistry,
}

/// A connected session of the binary TCP protocol.
///
/// Each session owns its socket exclusively; dropping or [`TcpClient::close`]
/// ends the session. The read operations swallow I/O failures by design:
/// they log the failure and return an empty [`Record`], so callers must
/// treat an all-empty result as a possible failure signal rather than as
/// "device reports no data". No operation is retried automatically.
///
/// # Examples
///
/// ```rust,no_run
/// use luxtronik::{DeviceAddress, ProtocolSpec, TcpClient};
///
/// let address: DeviceAddress = "192.168.2.10:8889".parse().unwrap();
/// let mut client = TcpClient::connect(&address, ProtocolSpec::default()).unwrap();
///
/// let parameters = client.read_parameters();
/// let calculations = client.read_calculations();
/// client.close();
/// ```
#[derive(Debug)]
pub struct TcpClient {
    stream: TcpStream,
    spec: ProtocolSpec,
    parameters_seen: Option<usize>,
}

impl TcpClient {
    /// Open a connection to the given address.
    pub fn connect(address: &DeviceAddress, spec: ProtocolSpec) -> Result<TcpClient> {
        let stream = TcpStream::connect((address.host(), address.port()))?;

        Ok(TcpClient::from_stream(stream, spec))
    }

    /// Construct a `TcpClient` over an already connected stream.
    pub fn from_stream(stream: TcpStream, spec: ProtocolSpec) -> TcpClient {
        TcpClient {
            stream,
            spec,
            parameters_seen: None,
        }
    }

    /// Close the session.
    ///
    /// Consumes the client, so closing is unconditional and can happen only
    /// once per connection.
    pub fn close(self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("Shutting down the connection failed: {}", err);
        }
    }

    /// Read all parameters into one [`Record`].
    ///
    /// The length of the response is retained as the session's field-order
    /// reference for subsequent [`TcpClient::write_parameters`] calls.
    pub fn read_parameters(&mut self) -> Record {
        match self.try_read_parameters() {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Parameter read failed: {}", err);
                Record::new()
            }
        }
    }

    /// Read all calculations into one [`Record`].
    pub fn read_calculations(&mut self) -> Record {
        match self.try_read_calculations() {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Calculation read failed: {}", err);
                Record::new()
            }
        }
    }

    /// Read all visibility flags into one [`Record`].
    pub fn read_visibilities(&mut self) -> Record {
        match self.try_read_visibilities() {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Visibility read failed: {}", err);
                Record::new()
            }
        }
    }

    /// Write target values to the device and return its confirmed state.
    ///
    /// For every writable field of the parameter registry that `targets`
    /// carries a value for, one write command is issued. The batch is
    /// best-effort, not atomic: a failure on one field is logged and the
    /// remaining fields are still written. After all writes a settle delay
    /// passes and the full parameter set is re-read; the returned record is
    /// the device's confirmed state, which is not verified field-by-field
    /// against the requested values.
    ///
    /// Writing requires a prior successful [`TcpClient::read_parameters`]
    /// on this session; without one, nothing is written.
    pub fn write_parameters(&mut self, targets: &Record) -> Record {
        let Some(seen) = self.parameters_seen else {
            log::warn!("Refusing to write parameters before a parameter read");
            return Record::new();
        };

        let count = seen.min(self.spec.parameters.len());
        for index in 0..count {
            let field = match self.spec.parameters.get(index) {
                Some(field) => field,
                None => continue,
            };
            let Some(target) = targets.get(field.name()) else {
                continue;
            };
            if !field.is_writable() {
                log::warn!("Skipping write to read-only field {}", field.name());
                continue;
            }

            let name = field.name().to_owned();
            match self.spec.parameters.encode_at(index, target) {
                Ok(raw) => {
                    if let Err(err) = self.write_parameter(index, raw) {
                        log::warn!("Writing parameter {} failed: {}", name, err);
                    }
                }
                Err(err) => log::warn!("Encoding parameter {} failed: {}", name, err),
            }
        }

        thread::sleep(WRITE_SETTLE_DELAY);

        self.read_parameters()
    }

    fn write_parameter(&mut self, index: usize, raw: i32) -> Result<()> {
        self.stream.write_i32::<BigEndian>(CMD_WRITE_PARAMETERS)?;
        self.stream.write_i32::<BigEndian>(index as i32)?;
        self.stream.write_i32::<BigEndian>(raw)?;

        Ok(())
    }

    fn send_read_command(&mut self, command: i32) -> Result<()> {
        self.stream.write_i32::<BigEndian>(command)?;
        self.stream.write_i32::<BigEndian>(0)?;

        Ok(())
    }

    fn read_response_header(&mut self, command: i32) -> Result<usize> {
        let echoed = self.stream.read_i32::<BigEndian>()?;
        if echoed != command {
            return Err(Error::Protocol(format!(
                "unexpected response command {} to request {}",
                echoed, command
            )));
        }

        if command == CMD_READ_CALCULATIONS {
            let stat = self.stream.read_i32::<BigEndian>()?;
            log::debug!("Calculations status word: {}", stat);
        }

        let length = self.stream.read_i32::<BigEndian>()?;
        let length = usize::try_from(length)
            .map_err(|_| Error::Protocol(format!("negative response length {}", length)))?;
        if length > MAX_RESPONSE_LENGTH {
            return Err(Error::Protocol(format!(
                "implausible response length {}",
                length
            )));
        }

        Ok(length)
    }

    fn try_read_parameters(&mut self) -> Result<Record> {
        self.send_read_command(CMD_READ_PARAMETERS)?;
        let length = self.read_response_header(CMD_READ_PARAMETERS)?;

        let mut record = Record::new();
        for index in 0..length {
            let raw = self.stream.read_i32::<BigEndian>()?;
            match self.spec.parameters.decode_at(index, raw) {
                Some((name, value)) => record.insert(name, value),
                None => log::debug!("No parameter definition at index {}, raw {}", index, raw),
            }
        }

        self.parameters_seen = Some(length);

        Ok(record)
    }

    fn try_read_calculations(&mut self) -> Result<Record> {
        self.send_read_command(CMD_READ_CALCULATIONS)?;
        let length = self.read_response_header(CMD_READ_CALCULATIONS)?;

        let mut record = Record::new();
        for index in 0..length {
            let raw = self.stream.read_i32::<BigEndian>()?;
            match self.spec.calculations.decode_at(index, raw) {
                Some((name, value)) => record.insert(name, value),
                None => log::debug!("No calculation definition at index {}, raw {}", index, raw),
            }
        }

        Ok(record)
    }

    fn try_read_visibilities(&mut self) -> Result<Record> {
        self.send_read_command(CMD_READ_VISIBILITIES)?;
        let length = self.read_response_header(CMD_READ_VISIBILITIES)?;

        let mut record = Record::new();
        for index in 0..length {
            let raw = self.stream.read_u8()?;
            match self.spec.visibilities.decode_at(index, i32::from(raw)) {
                Some((name, value)) => record.insert(name, value),
                None => log::debug!("No visibility definition at index {}, raw {}", index, raw),
            }
        }

        Ok(record)
    }
}

/// Connect to a controller, read its current state and return it as a
/// one-record [`DataSet`].
///
/// Parameters and calculations are merged into a single record stamped with
/// the current epoch second as `"time"`, ready to be merged into persisted
/// history.
pub fn connect_and_read(address: &DeviceAddress, spec: ProtocolSpec) -> Result<DataSet> {
    let mut client = TcpClient::connect(address, spec)?;

    let mut record = Record::new();
    for (name, value) in client.read_parameters() {
        record.insert(name, value);
    }
    for (name, value) in client.read_calculations() {
        record.insert(name, value);
    }
    record.insert("time", Utc::now().timestamp());

    client.close();

    let mut data_set = DataSet::new();
    data_set.push(record);

    Ok(data_set)
}

#[cfg(test)]
mod tests {
    use std::{io::Write, net::TcpListener};

    use crate::{
        field_spec::{FieldCodec, FieldSpec},
        value::Value,
    };

    use super::*;

    /// Makes the swallowed-error logging visible under `--nocapture`.
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn test_spec() -> ProtocolSpec {
        ProtocolSpec {
            parameters: FieldRegistry::new(vec![
                FieldSpec::new("A", FieldCodec::Bool).writable(),
                FieldSpec::new("B", FieldCodec::Bool),
            ]),
            calculations: FieldRegistry::new(vec![
                FieldSpec::new("TVL", FieldCodec::Scaling(0.1)),
                FieldSpec::new("TRL", FieldCodec::Scaling(0.1)),
            ]),
            visibilities: FieldRegistry::new(vec![
                FieldSpec::new("SichtbarTVL", FieldCodec::Bool),
                FieldSpec::new("SichtbarTRL", FieldCodec::Bool),
            ]),
        }
    }

    fn expect_read_request(stream: &mut TcpStream, command: i32) {
        assert_eq!(command, stream.read_i32::<BigEndian>().unwrap());
        assert_eq!(0, stream.read_i32::<BigEndian>().unwrap());
    }

    #[test]
    fn test_read_parameters() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let t = thread::spawn(move || {
            let address = DeviceAddress::new(addr.ip().to_string(), addr.port());
            let mut client = TcpClient::connect(&address, test_spec()).unwrap();

            let record = client.read_parameters();
            assert_eq!(2, record.len());
            assert_eq!(Some(&Value::Bool(true)), record.get("A"));
            assert_eq!(Some(&Value::Bool(false)), record.get("B"));

            client.close();
        });

        let (mut stream, _) = listener.accept().unwrap();

        expect_read_request(&mut stream, 3003);
        stream.write_i32::<BigEndian>(3003).unwrap();
        stream.write_i32::<BigEndian>(2).unwrap();
        stream.write_i32::<BigEndian>(1).unwrap();
        stream.write_i32::<BigEndian>(0).unwrap();

        t.join().unwrap();
    }

    #[test]
    fn test_read_calculations() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let t = thread::spawn(move || {
            let address = DeviceAddress::new(addr.ip().to_string(), addr.port());
            let mut client = TcpClient::connect(&address, test_spec()).unwrap();

            let record = client.read_calculations();
            assert_eq!(Some(&Value::Number(35.2)), record.get("TVL"));
            assert_eq!(Some(&Value::Number(30.1)), record.get("TRL"));

            client.close();
        });

        let (mut stream, _) = listener.accept().unwrap();

        expect_read_request(&mut stream, 3004);
        stream.write_i32::<BigEndian>(3004).unwrap();
        stream.write_i32::<BigEndian>(0).unwrap(); // status word
        stream.write_i32::<BigEndian>(2).unwrap();
        stream.write_i32::<BigEndian>(352).unwrap();
        stream.write_i32::<BigEndian>(301).unwrap();

        t.join().unwrap();
    }

    #[test]
    fn test_read_visibilities() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let t = thread::spawn(move || {
            let address = DeviceAddress::new(addr.ip().to_string(), addr.port());
            let mut client = TcpClient::connect(&address, test_spec()).unwrap();

            let record = client.read_visibilities();
            assert_eq!(Some(&Value::Bool(true)), record.get("SichtbarTVL"));
            assert_eq!(Some(&Value::Bool(false)), record.get("SichtbarTRL"));

            client.close();
        });

        let (mut stream, _) = listener.accept().unwrap();

        expect_read_request(&mut stream, 3005);
        stream.write_i32::<BigEndian>(3005).unwrap();
        stream.write_i32::<BigEndian>(2).unwrap();
        stream.write_all(&[1u8, 0u8]).unwrap();

        t.join().unwrap();
    }

    #[test]
    fn test_write_parameters() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let t = thread::spawn(move || {
            let address = DeviceAddress::new(addr.ip().to_string(), addr.port());
            let mut client = TcpClient::connect(&address, test_spec()).unwrap();

            client.read_parameters();

            let mut targets = Record::new();
            targets.insert("A", true);

            let confirmed = client.write_parameters(&targets);
            assert_eq!(Some(&Value::Bool(true)), confirmed.get("A"));
            assert_eq!(Some(&Value::Bool(false)), confirmed.get("B"));

            client.close();
        });

        let (mut stream, _) = listener.accept().unwrap();

        // Initial read establishing the field-order reference.
        expect_read_request(&mut stream, 3003);
        stream.write_i32::<BigEndian>(3003).unwrap();
        stream.write_i32::<BigEndian>(2).unwrap();
        stream.write_i32::<BigEndian>(0).unwrap();
        stream.write_i32::<BigEndian>(0).unwrap();

        // The write command for field "A".
        assert_eq!(3002, stream.read_i32::<BigEndian>().unwrap());
        assert_eq!(0, stream.read_i32::<BigEndian>().unwrap());
        assert_eq!(1, stream.read_i32::<BigEndian>().unwrap());

        // The confirming re-read.
        expect_read_request(&mut stream, 3003);
        stream.write_i32::<BigEndian>(3003).unwrap();
        stream.write_i32::<BigEndian>(2).unwrap();
        stream.write_i32::<BigEndian>(1).unwrap();
        stream.write_i32::<BigEndian>(0).unwrap();

        t.join().unwrap();
    }

    #[test]
    fn test_write_parameters_requires_prior_read() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let address = DeviceAddress::new(addr.ip().to_string(), addr.port());
        let mut client = TcpClient::connect(&address, test_spec()).unwrap();

        let mut targets = Record::new();
        targets.insert("A", true);

        let confirmed = client.write_parameters(&targets);
        assert!(confirmed.is_empty());

        client.close();
        drop(listener);
    }

    #[test]
    fn test_read_failure_yields_empty_record() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let t = thread::spawn(move || {
            let address = DeviceAddress::new(addr.ip().to_string(), addr.port());
            let mut client = TcpClient::connect(&address, test_spec()).unwrap();

            // The peer closes without answering; the failure is swallowed.
            let record = client.read_parameters();
            assert!(record.is_empty());

            client.close();
        });

        let (stream, _) = listener.accept().unwrap();
        drop(stream);

        t.join().unwrap();
    }

    #[test]
    fn test_implausible_response_length_fails_fast() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let t = thread::spawn(move || {
            let address = DeviceAddress::new(addr.ip().to_string(), addr.port());
            let mut client = TcpClient::connect(&address, test_spec()).unwrap();

            // The claimed length is rejected before any value is read, so
            // this returns without waiting for a million values.
            let record = client.read_parameters();
            assert!(record.is_empty());

            client.close();
        });

        let (mut stream, _) = listener.accept().unwrap();

        expect_read_request(&mut stream, 3003);
        stream.write_i32::<BigEndian>(3003).unwrap();
        stream.write_i32::<BigEndian>(1_000_000).unwrap();

        t.join().unwrap();
    }
}
