//! Parameter table of the Büchi temperature controller (firmware V7)
//!
//! Every regular parameter has a base name (e.g. `sp_00`). The controller
//! derives two commands from it:
//!
//! - get form: `in_<base>` (answered with `<value>\r\n`)
//! - set form: `out_<base> <value>` (never answered)
//!
//! `version`, `status` and `REMOTE` do not follow this convention and are
//! modelled as their own [`Command`] variants.

use crate::error::{AppResult, BtcError};
use std::fmt;
use std::str::FromStr;

/// Prefix of the get form of a parameter command.
pub const GET_PREFIX: &str = "in_";
/// Prefix of the set form of a parameter command.
pub const SET_PREFIX: &str = "out_";

/// How a parameter's value is represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// Decimal number, sent with one fractional digit (`12.4`).
    Decimal,
    /// Whole number within an inclusive range.
    Integer {
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// Small integer code indexing the listed meanings.
    Choice(&'static [&'static str]),
}

const UNBOUNDED: ValueKind = ValueKind::Integer {
    min: i64::MIN,
    max: i64::MAX,
};
const PERCENT: ValueKind = ValueKind::Integer { min: 0, max: 100 };

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Decimal reading or setpoint
    Decimal(f64),
    /// Integer reading or setting
    Integer(i64),
    /// Enumerated mode code
    Choice(u8),
}

impl Value {
    /// Numeric view of the value.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Decimal(v) => v,
            Value::Integer(v) => v as f64,
            Value::Choice(v) => f64::from(v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Choice(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

/// Static description of one controller parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParameterDescriptor {
    /// Parameter this entry describes
    pub parameter: Parameter,
    /// Property name (e.g. `temp_t1`)
    pub name: &'static str,
    /// Base command name (e.g. `sp_00`)
    pub base: &'static str,
    /// Short label shown on the controller (e.g. `T1`)
    pub label: Option<&'static str>,
    /// Human-readable meaning
    pub description: &'static str,
    /// Wire representation
    pub kind: ValueKind,
    /// Unit of the value, empty if dimensionless
    pub unit: &'static str,
    /// Whether a set form exists
    pub writable: bool,
}

impl ParameterDescriptor {
    /// Command name of the get form.
    pub fn get_command(&self) -> String {
        format!("{}{}", GET_PREFIX, self.base)
    }

    /// Command name of the set form, if the parameter is writable.
    pub fn set_command(&self) -> Option<String> {
        self.writable
            .then(|| format!("{}{}", SET_PREFIX, self.base))
    }

    /// Parse a response payload according to the parameter's kind.
    pub fn parse(&self, payload: &str) -> AppResult<Value> {
        let text = payload.trim();
        let malformed = |reason: String| BtcError::Protocol {
            command: self.get_command(),
            reason,
        };
        match self.kind {
            ValueKind::Decimal => text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::Decimal)
                .ok_or_else(|| malformed(format!("expected a decimal number, got '{}'", text))),
            ValueKind::Integer { .. } => text
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| malformed(format!("expected an integer, got '{}'", text))),
            ValueKind::Choice(choices) => {
                let code = text
                    .parse::<u8>()
                    .map_err(|_| malformed(format!("expected a mode code, got '{}'", text)))?;
                if usize::from(code) < choices.len() {
                    Ok(Value::Choice(code))
                } else {
                    Err(malformed(format!(
                        "mode code {} outside 0..{}",
                        code,
                        choices.len()
                    )))
                }
            }
        }
    }

    /// Format a value as the parameter of the set command.
    ///
    /// Values of the wrong kind or outside the documented range are
    /// rejected.
    pub fn format(&self, value: Value) -> AppResult<String> {
        let invalid = |reason: String| BtcError::InvalidValue {
            parameter: self.name,
            reason,
        };
        match (self.kind, value) {
            (ValueKind::Decimal, Value::Decimal(_) | Value::Integer(_)) => {
                let v = value.as_f64();
                if !v.is_finite() {
                    return Err(invalid(format!("{} is not a finite number", v)));
                }
                Ok(format!("{:.1}", v))
            }
            (ValueKind::Integer { min, max }, Value::Integer(v)) => {
                if v < min || v > max {
                    return Err(invalid(format!("{} outside {}..={}", v, min, max)));
                }
                Ok(v.to_string())
            }
            (ValueKind::Choice(choices), Value::Choice(code)) => {
                if usize::from(code) >= choices.len() {
                    return Err(invalid(format!(
                        "mode code {} outside 0..{}",
                        code,
                        choices.len()
                    )));
                }
                Ok(code.to_string())
            }
            (kind, value) => Err(invalid(format!(
                "value {:?} does not match kind {:?}",
                value, kind
            ))),
        }
    }

    /// Meaning of a mode code, for choice parameters.
    pub fn choice_label(&self, code: u8) -> Option<&'static str> {
        match self.kind {
            ValueKind::Choice(choices) => choices.get(usize::from(code)).copied(),
            _ => None,
        }
    }
}

/// All parameters exposed by the controller.
///
/// Variant order matches [`Parameter::ALL`] and the descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Parameter {
    TempTj,
    HeatingPower,
    TempTr,
    TempTs,
    TempT1,
    TempT2,
    HighTempWarningLimit,
    LowTempWarningLimit,
    SetpointTemp,
    MaxCoolingPower,
    MaxHeatingPower,
    WorkingTemp,
    IdType,
    ProgInputType,
    TempControl,
    StartStop,
    ExtBathTimeConst,
    IntSlope,
    IntBathTimeConst,
    BandLimiting,
    MaxRatio,
    XpInt,
    TnInt,
    TvInt,
    XpCasc,
    ProportionalPortionCasc,
    TnCasc,
    TvCasc,
    XpcCasc,
    TncCasc,
    TvcCasc,
    MaxTemp,
    MinTemp,
}

const WORKING_TEMP_CHOICES: &[&str] = &["T1", "T2"];
const ID_TYPE_CHOICES: &[&str] = &[
    "no identification",
    "single identification",
    "continual identification",
];
const PROG_INPUT_CHOICES: &[&str] = &["voltage 0 V to 10 V", "current 0 mA to 20 mA"];
const TEMP_CONTROL_CHOICES: &[&str] = &["Pt100 sensor T-J", "Pt100 sensor T-R"];
const START_STOP_CHOICES: &[&str] = &["stop", "start"];

macro_rules! descriptor {
    (
        $param:ident, $name:literal, $base:literal, $label:expr,
        $kind:expr, $unit:literal, $writable:literal, $desc:literal
    ) => {
        ParameterDescriptor {
            parameter: Parameter::$param,
            name: $name,
            base: $base,
            label: $label,
            description: $desc,
            kind: $kind,
            unit: $unit,
            writable: $writable,
        }
    };
}

#[rustfmt::skip]
static DESCRIPTORS: [ParameterDescriptor; 33] = [
    descriptor!(TempTj, "temp_tj", "pv_00", Some("T-J"), ValueKind::Decimal, "°C", false, "Actual bath temperature"),
    descriptor!(HeatingPower, "heating_power", "pv_01", None, ValueKind::Decimal, "%", false, "Heating power being used"),
    descriptor!(TempTr, "temp_tr", "pv_02", Some("T-R"), ValueKind::Decimal, "°C", false, "Temperature of the Pt100 sensor T-R"),
    descriptor!(TempTs, "temp_ts", "pv_03", Some("T-S"), ValueKind::Decimal, "°C", false, "Temperature of the safety sensor T-S"),
    descriptor!(TempT1, "temp_t1", "sp_00", Some("T1"), ValueKind::Decimal, "°C", true, "Working temperature T1"),
    descriptor!(TempT2, "temp_t2", "sp_01", Some("T2"), ValueKind::Decimal, "°C", true, "Working temperature T2"),
    descriptor!(HighTempWarningLimit, "high_temp_warning_limit", "sp_03", None, ValueKind::Decimal, "°C", true, "High temperature warning limit"),
    descriptor!(LowTempWarningLimit, "low_temp_warning_limit", "sp_04", None, ValueKind::Decimal, "°C", true, "Low temperature warning limit"),
    descriptor!(SetpointTemp, "setpoint_temp", "sp_05", None, ValueKind::Decimal, "°C", false, "Setpoint temperature of the external programmer"),
    descriptor!(MaxCoolingPower, "max_cooling_power", "hil_00", None, PERCENT, "%", true, "Max. cooling power"),
    descriptor!(MaxHeatingPower, "max_heating_power", "hil_01", None, PERCENT, "%", true, "Max. heating power"),
    descriptor!(WorkingTemp, "working_temp", "mode_01", None, ValueKind::Choice(WORKING_TEMP_CHOICES), "", true, "Selected working temperature"),
    descriptor!(IdType, "id_type", "mode_02", None, ValueKind::Choice(ID_TYPE_CHOICES), "", true, "Identification type"),
    descriptor!(ProgInputType, "prog_input_type", "mode_03", None, ValueKind::Choice(PROG_INPUT_CHOICES), "", false, "Type of the programmer input"),
    descriptor!(TempControl, "temp_control", "mode_04", None, ValueKind::Choice(TEMP_CONTROL_CHOICES), "", true, "Sensor used for temperature control"),
    descriptor!(StartStop, "start_stop", "mode_05", None, ValueKind::Choice(START_STOP_CHOICES), "", true, "Circulator stop/start condition"),
    descriptor!(ExtBathTimeConst, "ext_bath_time_const", "par_01", None, UNBOUNDED, "", false, "Time constant of the external bath"),
    descriptor!(IntSlope, "int_slope", "par_02", None, UNBOUNDED, "", false, "Internal slope"),
    descriptor!(IntBathTimeConst, "int_bath_time_const", "par_03", None, UNBOUNDED, "", false, "Time constant of the internal bath"),
    descriptor!(BandLimiting, "band_limiting", "par_04", None, UNBOUNDED, "", true, "Max. difference between internal bath and external system"),
    descriptor!(MaxRatio, "max_ratio", "par_05", None, UNBOUNDED, "", true, "Ratio of max. cooling power to max. heating power"),
    descriptor!(XpInt, "xp_int", "par_06", None, UNBOUNDED, "", true, "Xp of the internal controller"),
    descriptor!(TnInt, "tn_int", "par_07", None, UNBOUNDED, "", true, "Tn of the internal controller"),
    descriptor!(TvInt, "tv_int", "par_08", None, UNBOUNDED, "", true, "Tv of the internal controller"),
    descriptor!(XpCasc, "xp_casc", "par_09", None, UNBOUNDED, "", true, "Xp of the cascade controller"),
    descriptor!(ProportionalPortionCasc, "proportional_portion_casc", "par_10", None, UNBOUNDED, "", true, "Proportional portion of the cascade controller"),
    descriptor!(TnCasc, "tn_casc", "par_11", None, UNBOUNDED, "", true, "Tn of the cascade controller"),
    descriptor!(TvCasc, "tv_casc", "par_12", None, UNBOUNDED, "", true, "Tv of the cascade controller"),
    descriptor!(XpcCasc, "xpc_casc", "par_13", None, UNBOUNDED, "", true, "XpC of the cascade controller"),
    descriptor!(TncCasc, "tnc_casc", "par_14", None, UNBOUNDED, "", true, "TnC of the cascade controller"),
    descriptor!(TvcCasc, "tvc_casc", "par_15", None, UNBOUNDED, "", true, "TvC of the cascade controller"),
    descriptor!(MaxTemp, "max_temp", "par_17", None, UNBOUNDED, "°C", true, "Max. temperature T-J when controlling to T-R"),
    descriptor!(MinTemp, "min_temp", "par_18", None, UNBOUNDED, "°C", true, "Min. temperature T-J when controlling to T-R"),
];

impl Parameter {
    /// Every parameter, in table order.
    pub const ALL: [Parameter; 33] = [
        Parameter::TempTj,
        Parameter::HeatingPower,
        Parameter::TempTr,
        Parameter::TempTs,
        Parameter::TempT1,
        Parameter::TempT2,
        Parameter::HighTempWarningLimit,
        Parameter::LowTempWarningLimit,
        Parameter::SetpointTemp,
        Parameter::MaxCoolingPower,
        Parameter::MaxHeatingPower,
        Parameter::WorkingTemp,
        Parameter::IdType,
        Parameter::ProgInputType,
        Parameter::TempControl,
        Parameter::StartStop,
        Parameter::ExtBathTimeConst,
        Parameter::IntSlope,
        Parameter::IntBathTimeConst,
        Parameter::BandLimiting,
        Parameter::MaxRatio,
        Parameter::XpInt,
        Parameter::TnInt,
        Parameter::TvInt,
        Parameter::XpCasc,
        Parameter::ProportionalPortionCasc,
        Parameter::TnCasc,
        Parameter::TvCasc,
        Parameter::XpcCasc,
        Parameter::TncCasc,
        Parameter::TvcCasc,
        Parameter::MaxTemp,
        Parameter::MinTemp,
    ];

    /// Descriptor entry of this parameter.
    pub fn descriptor(self) -> &'static ParameterDescriptor {
        &DESCRIPTORS[self as usize]
    }

    /// Property name (e.g. `temp_t1`).
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Whether the controller accepts a set for this parameter.
    pub fn is_writable(self) -> bool {
        self.descriptor().writable
    }

    /// Look up a parameter by its base command name (e.g. `sp_00`).
    pub fn from_base(base: &str) -> Option<Parameter> {
        DESCRIPTORS
            .iter()
            .find(|d| d.base == base)
            .map(|d| d.parameter)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = BtcError;

    /// Resolve a property name, base name or short label, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        DESCRIPTORS
            .iter()
            .find(|d| {
                d.name.eq_ignore_ascii_case(wanted)
                    || d.base.eq_ignore_ascii_case(wanted)
                    || d.label.is_some_and(|l| l.eq_ignore_ascii_case(wanted))
            })
            .map(|d| d.parameter)
            .ok_or_else(|| BtcError::UnknownParameter(s.to_string()))
    }
}

/// A request to the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Read a parameter (`in_<base>`)
    Get(Parameter),
    /// Write a parameter (`out_<base> <value>`)
    Set(Parameter, Value),
    /// Software version (`version`)
    Version,
    /// Status or error message (`status`)
    Status,
    /// Switch the controller to remote mode (`REMOTE`)
    Remote,
}

impl Command {
    /// Command name and optional parameter text as sent on the wire.
    pub fn encode(&self) -> AppResult<(String, Option<String>)> {
        match *self {
            Command::Get(p) => Ok((p.descriptor().get_command(), None)),
            Command::Set(p, value) => {
                let descriptor = p.descriptor();
                let command = descriptor
                    .set_command()
                    .ok_or(BtcError::ReadOnly(descriptor.name))?;
                Ok((command, Some(descriptor.format(value)?)))
            }
            Command::Version => Ok(("version".to_string(), None)),
            Command::Status => Ok(("status".to_string(), None)),
            Command::Remote => Ok(("REMOTE".to_string(), None)),
        }
    }

    /// Whether the controller answers this command with a line.
    pub fn expects_response(&self) -> bool {
        matches!(self, Command::Get(_) | Command::Version | Command::Status)
    }
}

macro_rules! mode_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $code),+
        }

        impl TryFrom<u8> for $name {
            type Error = u8;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(mode: $name) -> u8 {
                mode as u8
            }
        }

        impl From<$name> for Value {
            fn from(mode: $name) -> Value {
                Value::Choice(mode as u8)
            }
        }
    };
}

mode_enum! {
    /// Selected working temperature (`mode_01`).
    WorkingTemperature {
        /// Working temperature T1
        T1 = 0,
        /// Working temperature T2
        T2 = 1,
    }
}

mode_enum! {
    /// Identification type (`mode_02`).
    IdentificationType {
        /// No identification
        None = 0,
        /// Single identification
        Single = 1,
        /// Continual identification
        Continual = 2,
    }
}

mode_enum! {
    /// Type of the programmer input (`mode_03`).
    ProgrammerInput {
        /// Voltage 0 V to 10 V
        Voltage = 0,
        /// Current 0 mA to 20 mA
        Current = 1,
    }
}

mode_enum! {
    /// Pt100 sensor used for temperature control (`mode_04`).
    ControlSensor {
        /// Control with sensor T-J
        Tj = 0,
        /// Control with sensor T-R
        Tr = 1,
    }
}

mode_enum! {
    /// Circulator condition (`mode_05`).
    Circulation {
        /// Circulator stopped
        Stop = 0,
        /// Circulator running
        Start = 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_enum() {
        for (index, parameter) in Parameter::ALL.iter().enumerate() {
            assert_eq!(DESCRIPTORS[index].parameter, *parameter);
            assert_eq!(*parameter as usize, index);
        }
    }

    #[test]
    fn test_base_names_are_unique() {
        for d in DESCRIPTORS.iter() {
            assert_eq!(Parameter::from_base(d.base), Some(d.parameter));
        }
    }

    #[test]
    fn test_command_name_derivation() {
        let t1 = Parameter::TempT1.descriptor();
        assert_eq!(t1.get_command(), "in_sp_00");
        assert_eq!(t1.set_command().as_deref(), Some("out_sp_00"));

        let power = Parameter::HeatingPower.descriptor();
        assert_eq!(power.get_command(), "in_pv_01");
        assert_eq!(power.set_command(), None);
    }

    #[test]
    fn test_friendly_name_resolution() {
        assert_eq!("T2".parse::<Parameter>().unwrap(), Parameter::TempT2);
        assert_eq!("t-j".parse::<Parameter>().unwrap(), Parameter::TempTj);
        assert_eq!("temp_t1".parse::<Parameter>().unwrap(), Parameter::TempT1);
        assert_eq!("hil_01".parse::<Parameter>().unwrap(), Parameter::MaxHeatingPower);
        assert!(matches!(
            "pv_99".parse::<Parameter>(),
            Err(BtcError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_irregular_commands_are_sent_verbatim() {
        assert_eq!(Command::Version.encode().unwrap(), ("version".to_string(), None));
        assert_eq!(Command::Status.encode().unwrap(), ("status".to_string(), None));
        assert_eq!(Command::Remote.encode().unwrap(), ("REMOTE".to_string(), None));
        assert!(!Command::Remote.expects_response());
        assert!(Command::Status.expects_response());
    }

    #[test]
    fn test_set_formatting() {
        let cmd = Command::Set(Parameter::TempT1, Value::Decimal(12.4));
        assert_eq!(
            cmd.encode().unwrap(),
            ("out_sp_00".to_string(), Some("12.4".to_string()))
        );

        let cmd = Command::Set(Parameter::MaxHeatingPower, Value::Integer(80));
        assert_eq!(cmd.encode().unwrap().1.as_deref(), Some("80"));

        let cmd = Command::Set(Parameter::StartStop, Circulation::Start.into());
        assert_eq!(cmd.encode().unwrap().1.as_deref(), Some("1"));
    }

    #[test]
    fn test_set_rejects_read_only_and_invalid_values() {
        assert!(matches!(
            Command::Set(Parameter::HeatingPower, Value::Decimal(10.0)).encode(),
            Err(BtcError::ReadOnly("heating_power"))
        ));
        assert!(matches!(
            Command::Set(Parameter::MaxCoolingPower, Value::Integer(101)).encode(),
            Err(BtcError::InvalidValue { .. })
        ));
        assert!(matches!(
            Command::Set(Parameter::WorkingTemp, Value::Choice(2)).encode(),
            Err(BtcError::InvalidValue { .. })
        ));
        assert!(matches!(
            Command::Set(Parameter::TempT1, Value::Decimal(f64::NAN)).encode(),
            Err(BtcError::InvalidValue { .. })
        ));
        assert!(matches!(
            Command::Set(Parameter::XpInt, Value::Decimal(2.5)).encode(),
            Err(BtcError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_responses() {
        let t2 = Parameter::TempT2.descriptor();
        assert_eq!(t2.parse("24.04").unwrap(), Value::Decimal(24.04));
        assert_eq!(t2.parse(" -5.5 ").unwrap(), Value::Decimal(-5.5));
        assert!(t2.parse("abc").unwrap_err().is_protocol());

        let ratio = Parameter::MaxRatio.descriptor();
        assert_eq!(ratio.parse("3").unwrap(), Value::Integer(3));
        assert!(ratio.parse("3.5").is_err());

        let mode = Parameter::IdType.descriptor();
        assert_eq!(mode.parse("2").unwrap(), Value::Choice(2));
        assert_eq!(mode.choice_label(2), Some("continual identification"));
        assert!(mode.parse("3").is_err());
    }

    #[test]
    fn test_mode_enum_conversions() {
        assert_eq!(WorkingTemperature::try_from(1), Ok(WorkingTemperature::T2));
        assert_eq!(ControlSensor::try_from(7), Err(7));
        assert_eq!(u8::from(IdentificationType::Continual), 2);
    }
}
