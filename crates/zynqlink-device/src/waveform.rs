//! Telemetry parsing and ADC sample decoding.
//!
//! In scope mode the device streams frames shaped like
//! `{"waveform": [<int>, ...], "sample_rate": <Hz>}`. The integers are raw
//! 12-bit ADC codes; [`WaveformDecoder`] scales them to volts.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use zynqlink_core::error::{Error, Result};
use zynqlink_core::types::{DEFAULT_SAMPLE_RATE_HZ, Waveform};

/// Voltage represented by one zero-code span.
pub const FULL_SCALE_VOLTS: f64 = 5.0;

/// ADC code that divides the scale (half of 4096).
pub const ZERO_CODE: u16 = 2048;

/// How raw codes map onto the voltage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleCoding {
    /// Two's-complement codes: `v / zero_code * full_scale`. Code 0 is 0 V.
    #[default]
    Signed,
    /// Unsigned codes centred on `zero_code`:
    /// `(v - zero_code) / zero_code * full_scale`. Code 2048 is 0 V, code 0
    /// is `-full_scale`.
    OffsetBinary,
}

/// Converts raw ADC codes to volts.
///
/// The conversion is affine, keeps order and length, and does not clamp:
/// out-of-range codes produce out-of-range voltages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformDecoder {
    full_scale_volts: f64,
    zero_code: u16,
    coding: SampleCoding,
}

impl WaveformDecoder {
    /// 5 V full scale, zero code 2048, signed coding.
    pub fn new() -> Self {
        WaveformDecoder {
            full_scale_volts: FULL_SCALE_VOLTS,
            zero_code: ZERO_CODE,
            coding: SampleCoding::Signed,
        }
    }

    /// A decoder with a custom scale. `zero_code` must be non-zero.
    pub fn with_scale(full_scale_volts: f64, zero_code: u16) -> Result<Self> {
        if zero_code == 0 {
            return Err(Error::Validation("zero code must be non-zero".into()));
        }
        if !full_scale_volts.is_finite() {
            return Err(Error::Validation(format!(
                "full scale must be finite, got {full_scale_volts}"
            )));
        }
        Ok(WaveformDecoder {
            full_scale_volts,
            zero_code,
            coding: SampleCoding::Signed,
        })
    }

    /// Switch the sample coding.
    pub fn coding(mut self, coding: SampleCoding) -> Self {
        self.coding = coding;
        self
    }

    pub fn sample_coding(&self) -> SampleCoding {
        self.coding
    }

    pub fn full_scale_volts(&self) -> f64 {
        self.full_scale_volts
    }

    pub fn zero_code(&self) -> u16 {
        self.zero_code
    }

    /// Decode one code.
    pub fn volts(&self, code: i64) -> f64 {
        let zero = f64::from(self.zero_code);
        let centred = match self.coding {
            SampleCoding::Signed => code as f64,
            SampleCoding::OffsetBinary => code as f64 - zero,
        };
        centred / zero * self.full_scale_volts
    }

    /// Decode a sequence of codes.
    pub fn decode(&self, raw: &[i64]) -> Vec<f64> {
        raw.iter().map(|&code| self.volts(code)).collect()
    }

    /// Decode a telemetry message into a [`Waveform`].
    pub fn decode_telemetry(&self, message: &TelemetryMessage) -> Waveform {
        Waveform::new(self.decode(&message.waveform), message.sample_rate_hz())
    }
}

impl Default for WaveformDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// An inbound telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    /// Raw ADC codes in capture order.
    pub waveform: Vec<i64>,
    /// Capture rate in hertz, when the device reports a usable one.
    #[serde(
        default,
        deserialize_with = "lenient_sample_rate",
        skip_serializing_if = "Option::is_none"
    )]
    pub sample_rate: Option<u64>,
}

/// A `sample_rate` that is not a positive integer is treated as absent, so
/// the samples in the frame are still shown.
fn lenient_sample_rate<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let rate = value.as_u64().filter(|rate| *rate > 0);
    if rate.is_none() && !value.is_null() {
        tracing::warn!(
            sample_rate = %value,
            default = DEFAULT_SAMPLE_RATE_HZ,
            "Unusable sample_rate in telemetry, using default"
        );
    }
    Ok(rate)
}

impl TelemetryMessage {
    /// Interpret a frame as telemetry.
    ///
    /// Frames without a `waveform` key are not telemetry and yield
    /// `Ok(None)`. A `waveform` key with the wrong shape is
    /// [`Error::Decode`].
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let is_telemetry = value
            .as_object()
            .is_some_and(|object| object.contains_key("waveform"));
        if !is_telemetry {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Decode(format!("malformed telemetry: {e}")))
    }

    /// The reported sample rate, or 64 MHz when the field is absent or unusable.
    pub fn sample_rate_hz(&self) -> u64 {
        match self.sample_rate {
            Some(rate) => rate,
            None => {
                tracing::debug!(
                    default = DEFAULT_SAMPLE_RATE_HZ,
                    "telemetry without sample_rate, using default"
                );
                DEFAULT_SAMPLE_RATE_HZ
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EPS: f64 = 1e-12;

    #[test]
    fn signed_decode_points() {
        let decoder = WaveformDecoder::new();
        assert_eq!(decoder.decode(&[0]), vec![0.0]);
        assert_eq!(decoder.decode(&[2048]), vec![5.0]);
        assert_eq!(decoder.decode(&[-2048]), vec![-5.0]);

        let v = decoder.decode(&[4095])[0];
        assert!((v - 4095.0 / 2048.0 * 5.0).abs() < EPS);
        assert!((v - 9.998).abs() < 1e-3);
    }

    #[test]
    fn offset_binary_decode_points() {
        let decoder = WaveformDecoder::new().coding(SampleCoding::OffsetBinary);
        assert_eq!(decoder.sample_coding(), SampleCoding::OffsetBinary);
        assert_eq!(decoder.decode(&[2048]), vec![0.0]);
        assert_eq!(decoder.decode(&[0]), vec![-5.0]);
        let v = decoder.decode(&[4095])[0];
        assert!((v - 2047.0 / 2048.0 * 5.0).abs() < EPS);
    }

    #[test]
    fn decode_is_affine_and_order_preserving() {
        let decoder = WaveformDecoder::new();
        let raw: Vec<i64> = vec![17, -300, 4095, 0, 2048, -2048, 1, 999];
        let volts = decoder.decode(&raw);
        assert_eq!(volts.len(), raw.len());

        let slope = decoder.volts(1) - decoder.volts(0);
        let offset = decoder.volts(0);
        for (code, v) in raw.iter().zip(&volts) {
            assert!((v - (offset + slope * *code as f64)).abs() < EPS);
        }
    }

    #[test]
    fn decode_does_not_clamp() {
        let decoder = WaveformDecoder::new();
        assert_eq!(decoder.decode(&[8192]), vec![20.0]);
        assert!(decoder.decode(&[]).is_empty());
    }

    #[test]
    fn custom_scale() {
        let decoder = WaveformDecoder::with_scale(3.3, 1024).unwrap();
        assert_eq!(decoder.full_scale_volts(), 3.3);
        assert_eq!(decoder.zero_code(), 1024);
        assert!((decoder.volts(512) - 1.65).abs() < EPS);

        assert!(matches!(
            WaveformDecoder::with_scale(5.0, 0),
            Err(Error::Validation(_))
        ));
        assert!(WaveformDecoder::with_scale(f64::NAN, 2048).is_err());
    }

    #[test]
    fn telemetry_with_sample_rate() {
        let msg = TelemetryMessage::from_value(json!({"waveform": [2048, -2048], "sample_rate": 1000}))
            .unwrap()
            .unwrap();
        assert_eq!(msg.sample_rate_hz(), 1000);

        let waveform = WaveformDecoder::new().decode_telemetry(&msg);
        assert_eq!(waveform.volts, vec![5.0, -5.0]);
        assert_eq!(waveform.sample_rate_hz, 1000);
        assert_eq!(waveform.peak_to_peak(), Some(10.0));
    }

    #[test]
    fn telemetry_sample_rate_defaults() {
        let msg = TelemetryMessage::from_value(json!({"waveform": [1]}))
            .unwrap()
            .unwrap();
        assert_eq!(msg.sample_rate, None);
        assert_eq!(msg.sample_rate_hz(), DEFAULT_SAMPLE_RATE_HZ);
    }

    #[test]
    fn non_telemetry_frames() {
        assert_eq!(TelemetryMessage::from_value(json!({"ok": true})).unwrap(), None);
        assert_eq!(TelemetryMessage::from_value(json!([1, 2])).unwrap(), None);
        assert_eq!(TelemetryMessage::from_value(json!("ack")).unwrap(), None);
    }

    #[test]
    fn unusable_sample_rate_falls_back() {
        for rate in [json!(-1), json!(1.5), json!("fast"), json!(0), json!(null)] {
            let msg = TelemetryMessage::from_value(json!({"waveform": [1, 2], "sample_rate": rate}))
                .unwrap()
                .unwrap();
            assert_eq!(msg.sample_rate, None, "sample_rate {rate}");
            assert_eq!(msg.waveform, vec![1, 2]);

            let waveform = WaveformDecoder::new().decode_telemetry(&msg);
            assert_eq!(waveform.len(), 2);
            assert_eq!(waveform.sample_rate_hz, DEFAULT_SAMPLE_RATE_HZ);
        }
    }

    #[test]
    fn malformed_telemetry() {
        let err = TelemetryMessage::from_value(json!({"waveform": "abc"})).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let err = TelemetryMessage::from_value(json!({"waveform": [1.5]})).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
