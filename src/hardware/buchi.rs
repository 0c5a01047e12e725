//! Büchi Temperature Controller driver (firmware V7)
//!
//! RS-232 factory settings: 4800 baud, even parity, RTS/CTS hardware
//! handshake, 7 data bits, 1 stop bit.
//!
//! Protocol overview:
//! - Get: `in_<base>\r`, answered with `<value>\r\n`
//! - Set: `out_<base> <value>\r`, not answered
//! - Irregular: `version\r`, `status\r` (answered), `REMOTE\r` (not answered)
//!
//! # Example Usage
//!
//! ```no_run
//! use rust_btc::config::SerialConfig;
//! use rust_btc::hardware::buchi::BuchiController;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SerialConfig {
//!         port: "/dev/ttyUSB0".to_string(),
//!         ..SerialConfig::default()
//!     };
//!     let controller = BuchiController::open(&config)?;
//!
//!     controller.set_temp_t1(12.4).await?;
//!     println!("T-J: {:.2} °C", controller.temp_tj().await?);
//!
//!     Ok(())
//! }
//! ```

use crate::adapters::CommandTransport;
use crate::error::{AppResult, BtcError};
use crate::hardware::parameters::{
    Circulation, Command, ControlSensor, IdentificationType, Parameter, ProgrammerInput, Value,
    WorkingTemperature,
};
use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(feature = "tokio_serial")]
use crate::config::SerialConfig;
#[cfg(feature = "tokio_serial")]
use tokio_serial::SerialStream;
#[cfg(feature = "tokio_serial")]
use tracing::info;

/// Message returned by the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Raw status text
    pub message: String,
}

impl ControllerStatus {
    /// Error messages start with a minus sign.
    pub fn is_error(&self) -> bool {
        self.message.trim_start().starts_with('-')
    }

    /// Turn an error status into [`BtcError::Status`].
    pub fn into_result(self) -> AppResult<Self> {
        if self.is_error() {
            Err(BtcError::Status(self.message))
        } else {
            Ok(self)
        }
    }
}

/// One reading of every monitored quantity, each with its own outcome.
#[derive(Debug)]
pub struct Readings {
    /// Heating power being used (%)
    pub heating_power: AppResult<f64>,
    /// Bath temperature T-J (°C)
    pub temp_tj: AppResult<f64>,
    /// Pt100 sensor T-R (°C)
    pub temp_tr: AppResult<f64>,
    /// Safety sensor T-S (°C)
    pub temp_ts: AppResult<f64>,
}

/// Driver for a Büchi temperature controller.
///
/// Each parameter is available through the generic [`get`](Self::get) /
/// [`set`](Self::set) pair and through a typed accessor.
pub struct BuchiController<S> {
    transport: CommandTransport<S>,
}

#[cfg(feature = "tokio_serial")]
impl BuchiController<SerialStream> {
    /// Open the controller on a serial port.
    ///
    /// # Errors
    /// Returns error if serial port cannot be opened
    pub fn open(config: &SerialConfig) -> AppResult<Self> {
        info!("Connecting to Büchi temperature controller on {}", config.port);
        Ok(Self::new(CommandTransport::open(config)?))
    }
}

impl<S> BuchiController<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a driver on top of an existing transport.
    pub fn new(transport: CommandTransport<S>) -> Self {
        Self { transport }
    }

    /// Send a command and return its raw response, if it has one.
    pub async fn execute(&self, command: &Command) -> AppResult<Option<String>> {
        let (name, parameter) = command.encode()?;
        if command.expects_response() {
            self.transport.get(&name).await.map(Some)
        } else {
            self.transport.send(&name, parameter.as_deref()).await?;
            Ok(None)
        }
    }

    /// Read a parameter.
    pub async fn get(&self, parameter: Parameter) -> AppResult<Value> {
        let descriptor = parameter.descriptor();
        let payload = self.transport.get(&descriptor.get_command()).await?;
        descriptor.parse(&payload)
    }

    /// Write a parameter. Read-only parameters are rejected without
    /// touching the wire.
    pub async fn set(&self, parameter: Parameter, value: Value) -> AppResult<()> {
        self.execute(&Command::Set(parameter, value)).await?;
        Ok(())
    }

    /// Read a parameter by property name, base name or label.
    pub async fn get_by_name(&self, name: &str) -> AppResult<Value> {
        self.get(name.parse()?).await
    }

    /// Write a parameter by property name, base name or label.
    pub async fn set_by_name(&self, name: &str, value: Value) -> AppResult<()> {
        self.set(name.parse()?, value).await
    }

    /// Software version (V X.xx).
    pub async fn version(&self) -> AppResult<String> {
        let payload = self.execute(&Command::Version).await?;
        Ok(payload.unwrap_or_default().trim().to_string())
    }

    /// Status or error message.
    pub async fn status(&self) -> AppResult<ControllerStatus> {
        let payload = self.execute(&Command::Status).await?;
        Ok(ControllerStatus {
            message: payload.unwrap_or_default().trim().to_string(),
        })
    }

    /// Switch the controller to remote mode.
    pub async fn remote(&self) -> AppResult<()> {
        self.execute(&Command::Remote).await?;
        Ok(())
    }

    /// Read heating power and the three temperature sensors, in that order.
    pub async fn read_sample(&self) -> Readings {
        let heating_power = self.heating_power().await;
        let temp_tj = self.temp_tj().await;
        let temp_tr = self.temp_tr().await;
        let temp_ts = self.temp_ts().await;
        Readings {
            heating_power,
            temp_tj,
            temp_tr,
            temp_ts,
        }
    }

    async fn get_decimal(&self, parameter: Parameter) -> AppResult<f64> {
        Ok(self.get(parameter).await?.as_f64())
    }

    async fn get_integer(&self, parameter: Parameter) -> AppResult<i64> {
        match self.get(parameter).await? {
            Value::Integer(v) => Ok(v),
            other => Err(unexpected_kind(parameter, other)),
        }
    }

    async fn get_mode<T: TryFrom<u8>>(&self, parameter: Parameter) -> AppResult<T> {
        match self.get(parameter).await? {
            Value::Choice(code) => T::try_from(code).map_err(|_| BtcError::Protocol {
                command: parameter.descriptor().get_command(),
                reason: format!("unknown mode code {}", code),
            }),
            other => Err(unexpected_kind(parameter, other)),
        }
    }
}

fn unexpected_kind(parameter: Parameter, value: Value) -> BtcError {
    BtcError::Protocol {
        command: parameter.descriptor().get_command(),
        reason: format!("unexpected value {:?}", value),
    }
}

macro_rules! decimal_accessors {
    ($($(#[$doc:meta])* $param:ident => $get:ident $(, $set:ident)?;)*) => {
        impl<S> BuchiController<S>
        where
            S: AsyncRead + AsyncWrite + Unpin + Send,
        {
            $(
                $(#[$doc])*
                pub async fn $get(&self) -> AppResult<f64> {
                    self.get_decimal(Parameter::$param).await
                }

                $(
                    #[doc = concat!(
                        "Write [`", stringify!($get), "`](Self::", stringify!($get), ")."
                    )]
                    pub async fn $set(&self, value: f64) -> AppResult<()> {
                        self.set(Parameter::$param, Value::Decimal(value)).await
                    }
                )?
            )*
        }
    };
}

macro_rules! integer_accessors {
    ($($(#[$doc:meta])* $param:ident => $get:ident $(, $set:ident)?;)*) => {
        impl<S> BuchiController<S>
        where
            S: AsyncRead + AsyncWrite + Unpin + Send,
        {
            $(
                $(#[$doc])*
                pub async fn $get(&self) -> AppResult<i64> {
                    self.get_integer(Parameter::$param).await
                }

                $(
                    #[doc = concat!(
                        "Write [`", stringify!($get), "`](Self::", stringify!($get), ")."
                    )]
                    pub async fn $set(&self, value: i64) -> AppResult<()> {
                        self.set(Parameter::$param, Value::Integer(value)).await
                    }
                )?
            )*
        }
    };
}

macro_rules! mode_accessors {
    ($($(#[$doc:meta])* $param:ident: $mode:ty => $get:ident $(, $set:ident)?;)*) => {
        impl<S> BuchiController<S>
        where
            S: AsyncRead + AsyncWrite + Unpin + Send,
        {
            $(
                $(#[$doc])*
                pub async fn $get(&self) -> AppResult<$mode> {
                    self.get_mode(Parameter::$param).await
                }

                $(
                    #[doc = concat!(
                        "Write [`", stringify!($get), "`](Self::", stringify!($get), ")."
                    )]
                    pub async fn $set(&self, mode: $mode) -> AppResult<()> {
                        self.set(Parameter::$param, mode.into()).await
                    }
                )?
            )*
        }
    };
}

decimal_accessors! {
    /// Actual bath temperature T-J (°C).
    TempTj => temp_tj;
    /// Heating power being used (%).
    HeatingPower => heating_power;
    /// Temperature of the Pt100 sensor T-R (°C).
    TempTr => temp_tr;
    /// Temperature of the safety sensor T-S (°C).
    TempTs => temp_ts;
    /// Working temperature T1 (°C).
    TempT1 => temp_t1, set_temp_t1;
    /// Working temperature T2 (°C).
    TempT2 => temp_t2, set_temp_t2;
    /// High temperature warning limit (°C).
    HighTempWarningLimit => high_temp_warning_limit, set_high_temp_warning_limit;
    /// Low temperature warning limit (°C).
    LowTempWarningLimit => low_temp_warning_limit, set_low_temp_warning_limit;
    /// Setpoint temperature of the external programmer (°C).
    SetpointTemp => setpoint_temp;
}

integer_accessors! {
    /// Max. cooling power (%).
    MaxCoolingPower => max_cooling_power, set_max_cooling_power;
    /// Max. heating power (%).
    MaxHeatingPower => max_heating_power, set_max_heating_power;
    /// Time constant of the external bath.
    ExtBathTimeConst => ext_bath_time_const;
    /// Internal slope.
    IntSlope => int_slope;
    /// Time constant of the internal bath.
    IntBathTimeConst => int_bath_time_const;
    /// Max. difference between the internal bath and the external system.
    BandLimiting => band_limiting, set_band_limiting;
    /// Ratio of max. cooling power to max. heating power.
    MaxRatio => max_ratio, set_max_ratio;
    /// Xp control parameter of the internal controller.
    XpInt => xp_int, set_xp_int;
    /// Tn control parameter of the internal controller.
    TnInt => tn_int, set_tn_int;
    /// Tv control parameter of the internal controller.
    TvInt => tv_int, set_tv_int;
    /// Xp control parameter of the cascade controller.
    XpCasc => xp_casc, set_xp_casc;
    /// Proportional portion of the cascade controller.
    ProportionalPortionCasc => proportional_portion_casc, set_proportional_portion_casc;
    /// Tn control parameter of the cascade controller.
    TnCasc => tn_casc, set_tn_casc;
    /// Tv control parameter of the cascade controller.
    TvCasc => tv_casc, set_tv_casc;
    /// XpC control parameter of the cascade controller.
    XpcCasc => xpc_casc, set_xpc_casc;
    /// TnC control parameter of the cascade controller.
    TncCasc => tnc_casc, set_tnc_casc;
    /// TvC control parameter of the cascade controller.
    TvcCasc => tvc_casc, set_tvc_casc;
    /// Max. temperature T-J when controlling to T-R.
    MaxTemp => max_temp, set_max_temp;
    /// Min. temperature T-J when controlling to T-R.
    MinTemp => min_temp, set_min_temp;
}

mode_accessors! {
    /// Selected working temperature.
    WorkingTemp: WorkingTemperature => working_temp, set_working_temp;
    /// Identification type.
    IdType: IdentificationType => id_type, set_id_type;
    /// Type of the programmer input.
    ProgInputType: ProgrammerInput => prog_input_type;
    /// Sensor used for temperature control.
    TempControl: ControlSensor => temp_control, set_temp_control;
    /// Circulator stop/start condition.
    StartStop: Circulation => start_stop, set_start_stop;
}
