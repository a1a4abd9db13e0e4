//! Piecewise-linear calibration of raw sensor readings.
//!
//! The controller's temperature probes are not linear. Their raw ADC counts
//! are mapped to physical readings through fixed-step calibration tables that
//! the firmware itself uses; this module reconstructs the curve between the
//! stored samples by linear interpolation.
//!
//! Five shared curves cover all temperature channels of the log file format,
//! selected by [`SensorCurve`]. Heating flow, return and domestic hot water
//! probes share one curve; outdoor and brine (source) probes share another.

/// A piecewise-linear raw-to-physical curve evaluator.
///
/// The table stores integer samples of a monotonically-varying physical
/// quantity taken at fixed steps of the raw domain: sample `k` corresponds to
/// the raw value `offset + k * delta`. The final interpolated result is
/// rounded half-up and divided by `precision`.
///
/// # Examples
///
/// ```rust
/// use luxtronik::CalibrationTable;
///
/// let table = CalibrationTable::new(0, 10, 10, &[0, 50]);
/// assert_eq!(0.0, table.interpolate(0));
/// assert_eq!(2.5, table.interpolate(5));
/// assert_eq!(5.0, table.interpolate(10));
/// ```
#[derive(Debug)]
pub struct CalibrationTable {
    offset: i32,
    delta: i32,
    precision: i32,
    samples: &'static [i32],
}

impl CalibrationTable {
    /// Construct a new `CalibrationTable`.
    ///
    /// # Panics
    ///
    /// Panics if fewer than two samples are given or if `delta` or
    /// `precision` is not positive. Tables are fixed artifacts, so this is
    /// a programming error rather than a runtime condition.
    pub const fn new(
        offset: i32,
        delta: i32,
        precision: i32,
        samples: &'static [i32],
    ) -> CalibrationTable {
        assert!(samples.len() >= 2);
        assert!(delta > 0);
        assert!(precision > 0);

        CalibrationTable {
            offset,
            delta,
            precision,
            samples,
        }
    }

    /// Evaluate the curve at the raw value `v`.
    ///
    /// Raw values outside the sampled domain are extrapolated along the
    /// first or last segment. The interpolated product is rounded half-up
    /// before the precision division, matching the firmware's integer
    /// rounding bit-for-bit.
    pub fn interpolate(&self, v: i32) -> f64 {
        let n = self.samples.len() as i32;
        let idx = (v - self.offset).div_euclid(self.delta).clamp(0, n - 2);

        let x1 = f64::from(idx * self.delta + self.offset);
        let x2 = x1 + f64::from(self.delta);
        let y1 = f64::from(self.samples[idx as usize]);
        let y2 = f64::from(self.samples[idx as usize + 1]);

        let m = (y2 - y1) / (x2 - x1);
        let b = y1 - m * x1;

        (m * f64::from(v) + b + 0.5).floor() / f64::from(self.precision)
    }
}

/// Identifies one of the five calibration curves shared by the temperature
/// channels of the binary log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SensorCurve {
    /// Heating flow, heating return and domestic hot water probes.
    Heating,
    /// Outdoor and brine (heat source) probes.
    Ambient,
    /// The hot gas probe at the compressor outlet.
    HotGas,
    /// Mixing circuit probes.
    Mixer,
    /// The solar collector probe.
    Solar,
}

/// Return the built-in calibration table for the given curve.
pub fn curve(curve: SensorCurve) -> &'static CalibrationTable {
    match curve {
        SensorCurve::Heating => &HEATING,
        SensorCurve::Ambient => &AMBIENT,
        SensorCurve::HotGas => &HOT_GAS,
        SensorCurve::Mixer => &MIXER,
        SensorCurve::Solar => &SOLAR,
    }
}

static HEATING_SAMPLES: [i32; 24] = [
    -150, -100, -53, -10, 30, 70, 110, 152, 195, 240, 288, 340, 395, 455, 520, 590, 667, 752, 846,
    950, 1065, 1194, 1338, 1500,
];

static HEATING: CalibrationTable = CalibrationTable::new(0, 50, 10, &HEATING_SAMPLES);

static AMBIENT_SAMPLES: [i32; 20] = [
    -350, -298, -248, -200, -155, -112, -70, -30, 8, 45, 81, 116, 150, 184, 217, 250, 283, 316,
    349, 382,
];

static AMBIENT: CalibrationTable = CalibrationTable::new(0, 40, 10, &AMBIENT_SAMPLES);

static HOT_GAS_SAMPLES: [i32; 20] = [
    -100, -20, 56, 130, 202, 272, 340, 407, 473, 538, 602, 666, 730, 794, 858, 923, 989, 1056,
    1125, 1196,
];

static HOT_GAS: CalibrationTable = CalibrationTable::new(0, 50, 10, &HOT_GAS_SAMPLES);

static MIXER_SAMPLES: [i32; 16] = [
    -120, -70, -22, 24, 69, 113, 156, 199, 242, 286, 331, 378, 427, 479, 534, 593,
];

static MIXER: CalibrationTable = CalibrationTable::new(0, 50, 10, &MIXER_SAMPLES);

static SOLAR_SAMPLES: [i32; 16] = [
    -300, -180, -62, 54, 168, 280, 390, 498, 604, 708, 810, 910, 1008, 1104, 1198, 1290,
];

static SOLAR: CalibrationTable = CalibrationTable::new(0, 64, 10, &SOLAR_SAMPLES);

#[cfg(test)]
mod tests {
    use super::*;

    fn built_in_curves() -> [(&'static CalibrationTable, i32, i32, &'static [i32]); 5] {
        [
            (&HEATING, 0, 50, &HEATING_SAMPLES),
            (&AMBIENT, 0, 40, &AMBIENT_SAMPLES),
            (&HOT_GAS, 0, 50, &HOT_GAS_SAMPLES),
            (&MIXER, 0, 50, &MIXER_SAMPLES),
            (&SOLAR, 0, 64, &SOLAR_SAMPLES),
        ]
    }

    #[test]
    fn test_reproduces_stored_samples_exactly() {
        for (table, offset, delta, samples) in built_in_curves() {
            for (k, &sample) in samples.iter().enumerate() {
                let v = offset + k as i32 * delta;
                assert_eq!(
                    f64::from(sample) / 10.0,
                    table.interpolate(v),
                    "curve sample {} at raw value {}",
                    k,
                    v
                );
            }
        }
    }

    #[test]
    fn test_is_continuous_at_segment_boundaries() {
        for (table, offset, delta, samples) in built_in_curves() {
            let domain_end = offset + (samples.len() as i32 - 1) * delta;
            let mut previous = table.interpolate(offset);
            for v in offset + 1..=domain_end {
                let current = table.interpolate(v);
                assert!(
                    (current - previous).abs() < 0.5,
                    "discontinuity at raw value {}: {} -> {}",
                    v,
                    previous,
                    current
                );
                previous = current;
            }
        }
    }

    #[test]
    fn test_interpolates_between_samples() {
        // Heating segment 0 has slope 1.0: (-100 - -150) / 50.
        assert_eq!(-12.5, HEATING.interpolate(25));
        // Segment 1 has slope 0.94: raw 49 and 51 straddle the boundary.
        assert_eq!(-10.1, HEATING.interpolate(49));
        assert_eq!(-10.0, HEATING.interpolate(50));
        assert_eq!(-9.9, HEATING.interpolate(51));
    }

    #[test]
    fn test_rounds_half_up() {
        let table = CalibrationTable::new(0, 10, 10, &[0, 5]);

        // 0.5 rounds up to 1, not to the even neighbour 0.
        assert_eq!(0.1, table.interpolate(1));
        // -0.5 rounds up to 0, not away from zero to -1.
        let negative = CalibrationTable::new(0, 10, 10, &[-5, 0]);
        assert_eq!(0.0, negative.interpolate(9));
    }

    #[test]
    fn test_clamps_to_outermost_segments() {
        let table = CalibrationTable::new(0, 10, 10, &[0, 5]);

        // Below the domain: extrapolated along the first segment.
        assert_eq!(-0.1, table.interpolate(-3));
        // Above the domain: extrapolated along the last segment.
        assert_eq!(5.0, table.interpolate(100));
    }
}
