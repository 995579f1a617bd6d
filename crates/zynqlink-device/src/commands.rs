//! Outbound command payloads.
//!
//! The device understands three commands, told apart by a `cmd_type` field:
//!
//! ```text
//! {"cmd_type": "switch",  "instrument": "scope" | "generator"}
//! {"cmd_type": "update",  "waveform": 0..=3, "frequency": <Hz>, "amplitude": <see below>}
//! {"cmd_type": "exitins"}
//! ```
//!
//! `amplitude` selects one of five attenuation steps of a 3 V reference.
//! Two client generations disagree on its encoding: one sends the step
//! index (`0`..=`4`), the other the ratio text (`"1"`, `"1/2"`, ...).
//! [`AmplitudeFormat`] picks which one [`CommandBuilder`] emits; the index
//! form is the default.
//!
//! Everything here is pure; validation failures never reach the network.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use zynqlink_core::error::{Error, Result};
use zynqlink_core::types::Instrument;

/// Lowest frequency the generator accepts.
pub const MIN_FREQUENCY_HZ: u64 = 1;

/// Highest frequency the generator accepts (62.5 MHz).
pub const MAX_FREQUENCY_HZ: u64 = 62_500_000;

/// Voltage the amplitude steps divide.
pub const AMPLITUDE_REFERENCE_VOLTS: f64 = 3.0;

// ---------------------------------------------------------------------------
// Waveform shape
// ---------------------------------------------------------------------------

/// Generator output shape, sent as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WaveformShape {
    Sine = 0,
    Triangle = 1,
    Sawtooth = 2,
    Square = 3,
}

impl WaveformShape {
    /// All shapes in ordinal order.
    pub const ALL: [WaveformShape; 4] = [
        WaveformShape::Sine,
        WaveformShape::Triangle,
        WaveformShape::Sawtooth,
        WaveformShape::Square,
    ];

    /// Wire ordinal.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            WaveformShape::Sine => "sine",
            WaveformShape::Triangle => "triangle",
            WaveformShape::Sawtooth => "sawtooth",
            WaveformShape::Square => "square",
        }
    }
}

impl From<WaveformShape> for u8 {
    fn from(shape: WaveformShape) -> u8 {
        shape.ordinal()
    }
}

impl TryFrom<u8> for WaveformShape {
    type Error = Error;

    fn try_from(ordinal: u8) -> Result<Self> {
        WaveformShape::ALL
            .get(ordinal as usize)
            .copied()
            .ok_or_else(|| Error::Validation(format!("waveform ordinal {ordinal} not in 0..=3")))
    }
}

impl fmt::Display for WaveformShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WaveformShape {
    type Err = Error;

    /// Accepts a shape name (`sine`, `triangle`, `sawtooth`/`saw`, `square`)
    /// or its ordinal.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" | "sin" => Ok(WaveformShape::Sine),
            "triangle" | "tri" => Ok(WaveformShape::Triangle),
            "sawtooth" | "saw" => Ok(WaveformShape::Sawtooth),
            "square" | "sq" => Ok(WaveformShape::Square),
            other => other
                .parse::<u8>()
                .map_err(|_| Error::Validation(format!("unknown waveform: {s:?}")))
                .and_then(WaveformShape::try_from),
        }
    }
}

// ---------------------------------------------------------------------------
// Amplitude
// ---------------------------------------------------------------------------

/// Output amplitude as a fraction of the 3 V reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Amplitude {
    #[default]
    Full,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl Amplitude {
    /// All steps in index order.
    pub const ALL: [Amplitude; 5] = [
        Amplitude::Full,
        Amplitude::Half,
        Amplitude::Quarter,
        Amplitude::Eighth,
        Amplitude::Sixteenth,
    ];

    /// Step for a wire index `0..=4`.
    pub fn from_index(index: u8) -> Result<Self> {
        Amplitude::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::Validation(format!("amplitude index {index} not in 0..=4")))
    }

    /// Wire index.
    pub fn index(self) -> u8 {
        match self {
            Amplitude::Full => 0,
            Amplitude::Half => 1,
            Amplitude::Quarter => 2,
            Amplitude::Eighth => 3,
            Amplitude::Sixteenth => 4,
        }
    }

    /// Ratio text, as shown to the user and sent by the ratio format.
    pub fn ratio(self) -> &'static str {
        match self {
            Amplitude::Full => "1",
            Amplitude::Half => "1/2",
            Amplitude::Quarter => "1/4",
            Amplitude::Eighth => "1/8",
            Amplitude::Sixteenth => "1/16",
        }
    }

    /// Peak output voltage for this step.
    pub fn volts(self) -> f64 {
        AMPLITUDE_REFERENCE_VOLTS / f64::from(1u8 << self.index())
    }

    /// The wire value for `format`.
    pub fn to_wire(self, format: AmplitudeFormat) -> AmplitudeValue {
        match format {
            AmplitudeFormat::Index => AmplitudeValue::Index(self.index()),
            AmplitudeFormat::Ratio => AmplitudeValue::Ratio(self.ratio().to_string()),
        }
    }
}

impl fmt::Display for Amplitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ratio())
    }
}

impl FromStr for Amplitude {
    type Err = Error;

    /// Parses ratio text (`"1"`, `"1/2"`, `"1/4"`, `"1/8"`, `"1/16"`).
    /// Indices are not accepted here because `"1"` would be ambiguous; use
    /// [`Amplitude::from_index`].
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Amplitude::ALL
            .into_iter()
            .find(|a| a.ratio() == s)
            .ok_or_else(|| Error::Validation(format!("unknown amplitude ratio: {s:?}")))
    }
}

/// Which encoding of the amplitude step goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AmplitudeFormat {
    /// Step index `0..=4`.
    #[default]
    Index,
    /// Ratio text such as `"1/4"`.
    Ratio,
}

impl FromStr for AmplitudeFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "index" => Ok(AmplitudeFormat::Index),
            "ratio" => Ok(AmplitudeFormat::Ratio),
            other => Err(Error::Validation(format!("unknown amplitude format: {other}"))),
        }
    }
}

/// The `amplitude` field as serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmplitudeValue {
    Index(u8),
    Ratio(String),
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A command payload, serialized as a JSON object tagged by `cmd_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd_type", rename_all = "lowercase")]
pub enum Command {
    /// Switch the device into an instrument mode.
    Switch { instrument: Instrument },
    /// Reprogram the generator output.
    Update {
        waveform: WaveformShape,
        frequency: u64,
        amplitude: AmplitudeValue,
    },
    /// Leave the current instrument mode.
    #[serde(rename = "exitins")]
    ExitInstrument,
}

impl Command {
    /// The `cmd_type` discriminator.
    pub fn cmd_type(&self) -> &'static str {
        match self {
            Command::Switch { .. } => "switch",
            Command::Update { .. } => "update",
            Command::ExitInstrument => "exitins",
        }
    }
}

/// Builds validated [`Command`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuilder {
    amplitude_format: AmplitudeFormat,
}

impl CommandBuilder {
    /// A builder emitting the index amplitude format.
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose the amplitude wire format.
    pub fn amplitude_format(mut self, format: AmplitudeFormat) -> Self {
        self.amplitude_format = format;
        self
    }

    /// `{"cmd_type": "switch", "instrument": ...}`
    pub fn switch_instrument(&self, instrument: Instrument) -> Command {
        Command::Switch { instrument }
    }

    /// `{"cmd_type": "update", ...}` after checking the frequency range.
    ///
    /// Fails with [`Error::Validation`] unless
    /// `MIN_FREQUENCY_HZ <= frequency_hz <= MAX_FREQUENCY_HZ`.
    pub fn update_generator(
        &self,
        waveform: WaveformShape,
        frequency_hz: u64,
        amplitude: Amplitude,
    ) -> Result<Command> {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&frequency_hz) {
            return Err(Error::Validation(format!(
                "frequency {frequency_hz} Hz outside {MIN_FREQUENCY_HZ}..={MAX_FREQUENCY_HZ} Hz"
            )));
        }
        Ok(Command::Update {
            waveform,
            frequency: frequency_hz,
            amplitude: amplitude.to_wire(self.amplitude_format),
        })
    }

    /// `{"cmd_type": "exitins"}`
    pub fn exit_instrument(&self) -> Command {
        Command::ExitInstrument
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(command: &Command) -> serde_json::Value {
        serde_json::to_value(command).unwrap()
    }

    #[test]
    fn switch_wire_shape() {
        let builder = CommandBuilder::new();
        assert_eq!(
            to_json(&builder.switch_instrument(Instrument::Scope)),
            json!({"cmd_type": "switch", "instrument": "scope"})
        );
        assert_eq!(
            to_json(&builder.switch_instrument(Instrument::Generator)),
            json!({"cmd_type": "switch", "instrument": "generator"})
        );
    }

    #[test]
    fn exit_wire_shape() {
        let command = CommandBuilder::new().exit_instrument();
        assert_eq!(command.cmd_type(), "exitins");
        assert_eq!(to_json(&command), json!({"cmd_type": "exitins"}));
    }

    #[test]
    fn update_wire_shape_index_format() {
        let command = CommandBuilder::new()
            .update_generator(WaveformShape::Sawtooth, 1_000, Amplitude::Quarter)
            .unwrap();
        assert_eq!(
            to_json(&command),
            json!({"cmd_type": "update", "waveform": 2, "frequency": 1000, "amplitude": 2})
        );
    }

    #[test]
    fn update_wire_shape_ratio_format() {
        let command = CommandBuilder::new()
            .amplitude_format(AmplitudeFormat::Ratio)
            .update_generator(WaveformShape::Square, 440, Amplitude::Sixteenth)
            .unwrap();
        assert_eq!(
            to_json(&command),
            json!({"cmd_type": "update", "waveform": 3, "frequency": 440, "amplitude": "1/16"})
        );
    }

    #[test]
    fn update_frequency_boundaries() {
        let builder = CommandBuilder::new();
        let ok = |f| builder.update_generator(WaveformShape::Sine, f, Amplitude::Full);

        assert!(ok(1).is_ok());
        assert!(ok(62_500_000).is_ok());
        assert!(matches!(ok(0), Err(Error::Validation(_))));
        assert!(matches!(ok(62_500_001), Err(Error::Validation(_))));
    }

    #[test]
    fn command_deserializes_from_wire() {
        let command: Command =
            serde_json::from_value(json!({"cmd_type": "switch", "instrument": "generator"}))
                .unwrap();
        assert_eq!(
            command,
            Command::Switch {
                instrument: Instrument::Generator
            }
        );

        let command: Command = serde_json::from_value(
            json!({"cmd_type": "update", "waveform": 1, "frequency": 5, "amplitude": "1/2"}),
        )
        .unwrap();
        assert_eq!(
            command,
            Command::Update {
                waveform: WaveformShape::Triangle,
                frequency: 5,
                amplitude: AmplitudeValue::Ratio("1/2".into()),
            }
        );
    }

    #[test]
    fn command_rejects_bad_waveform_ordinal() {
        let result: std::result::Result<Command, _> = serde_json::from_value(
            json!({"cmd_type": "update", "waveform": 4, "frequency": 5, "amplitude": 0}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn waveform_shape_parsing() {
        assert_eq!("sine".parse::<WaveformShape>().unwrap(), WaveformShape::Sine);
        assert_eq!("Saw".parse::<WaveformShape>().unwrap(), WaveformShape::Sawtooth);
        assert_eq!("3".parse::<WaveformShape>().unwrap(), WaveformShape::Square);
        assert!(matches!("4".parse::<WaveformShape>(), Err(Error::Validation(_))));
        assert!(matches!("noise".parse::<WaveformShape>(), Err(Error::Validation(_))));
    }

    #[test]
    fn amplitude_steps() {
        assert_eq!(Amplitude::default(), Amplitude::Full);
        assert_eq!(Amplitude::from_index(3).unwrap(), Amplitude::Eighth);
        assert!(matches!(Amplitude::from_index(5), Err(Error::Validation(_))));

        assert_eq!("1/4".parse::<Amplitude>().unwrap(), Amplitude::Quarter);
        assert!("1/3".parse::<Amplitude>().is_err());

        assert_eq!(Amplitude::Full.volts(), 3.0);
        assert_eq!(Amplitude::Sixteenth.volts(), 0.1875);
        for (i, a) in Amplitude::ALL.iter().enumerate() {
            assert_eq!(a.index() as usize, i);
        }
    }

    #[test]
    fn amplitude_format_parsing() {
        assert_eq!(
            "Ratio".parse::<AmplitudeFormat>().unwrap(),
            AmplitudeFormat::Ratio
        );
        assert_eq!(AmplitudeFormat::default(), AmplitudeFormat::Index);
        assert!("text".parse::<AmplitudeFormat>().is_err());
    }
}
