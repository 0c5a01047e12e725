//! Simulated Büchi temperature controller
//!
//! Speaks the controller's wire protocol over an in-memory duplex stream so
//! the transport, the facade and the sampler can be exercised without
//! hardware.
//!
//! # Behaviour
//!
//! - `in_<base>` is answered with the stored value and `\r\n`
//! - `out_<base> <value>` stores the value verbatim (ignored for read-only
//!   parameters) and is not answered
//! - `version` and `status` are answered, `REMOTE` switches to remote mode
//! - unknown commands are ignored
//!
//! Faults can be scheduled per request index to simulate a silent or
//! garbled controller.
//!
//! # Example
//!
//! ```rust,ignore
//! let sim = SimulatedController::new();
//! let transport = CommandTransport::new(sim.connect(), &SerialConfig::default());
//! assert_eq!(transport.get("in_pv_00").await?, "24.04");
//! ```

use crate::hardware::parameters::{Parameter, ValueKind, GET_PREFIX, SET_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Mutex;
use tracing::debug;

/// Firmware string reported by `version`.
pub const SIMULATED_VERSION: &str = "V7.01";

/// Misbehaviour applied to a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Do not answer at all.
    NoResponse,
    /// Answer with these raw bytes instead of the regular response.
    Respond(Vec<u8>),
    /// Send the regular response only after this delay.
    Delayed(Duration),
}

#[derive(Debug)]
struct SimState {
    values: HashMap<&'static str, String>,
    status: String,
    remote: bool,
    received: Vec<Vec<u8>>,
    faults: HashMap<usize, Fault>,
}

/// In-process controller simulation.
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// Create a controller holding factory-like values for every parameter.
    pub fn new() -> Self {
        let values = Parameter::ALL
            .iter()
            .map(|p| (p.descriptor().base, initial_value(*p).to_string()))
            .collect();
        Self {
            state: Arc::new(Mutex::new(SimState {
                values,
                status: "0 O.K.".to_string(),
                remote: false,
                received: Vec::new(),
                faults: HashMap::new(),
            })),
        }
    }

    /// Open a connection and serve it on a background task.
    ///
    /// Must be called from within a Tokio runtime. The task ends when the
    /// returned stream is dropped.
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(1024);
        let state = self.state.clone();
        tokio::spawn(serve(state, server));
        client
    }

    /// Schedule a fault for the request with this zero-based index.
    pub async fn inject_fault(&self, request_index: usize, fault: Fault) {
        self.state.lock().await.faults.insert(request_index, fault);
    }

    /// Replace the stored wire value of a parameter.
    pub async fn set_value(&self, parameter: Parameter, value: impl Into<String>) {
        self.state
            .lock()
            .await
            .values
            .insert(parameter.descriptor().base, value.into());
    }

    /// Stored wire value of a parameter.
    pub async fn value(&self, parameter: Parameter) -> Option<String> {
        self.state
            .lock()
            .await
            .values
            .get(parameter.descriptor().base)
            .cloned()
    }

    /// Replace the message returned by `status`.
    pub async fn set_status(&self, status: impl Into<String>) {
        self.state.lock().await.status = status.into();
    }

    /// Whether `REMOTE` has been received.
    pub async fn is_remote(&self) -> bool {
        self.state.lock().await.remote
    }

    /// Every transfer sequence received so far, terminator included.
    pub async fn received(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.received.clone()
    }
}

fn initial_value(parameter: Parameter) -> &'static str {
    match parameter {
        Parameter::TempTj => "24.04",
        Parameter::HeatingPower => "35.2",
        Parameter::TempTr => "23.87",
        Parameter::TempTs => "24.11",
        Parameter::MaxCoolingPower | Parameter::MaxHeatingPower => "100",
        p => match p.descriptor().kind {
            ValueKind::Decimal => "20.0",
            ValueKind::Integer { .. } => "10",
            ValueKind::Choice(_) => "0",
        },
    }
}

async fn serve(state: Arc<Mutex<SimState>>, stream: DuplexStream) {
    let mut stream = BufReader::new(stream);
    let mut index = 0usize;

    loop {
        let mut request = Vec::new();
        match stream.read_until(b'\r', &mut request).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if !request.ends_with(b"\r") {
            break;
        }

        let (reply, delay) = {
            let mut guard = state.lock().await;
            guard.received.push(request.clone());
            let fault = guard.faults.remove(&index);
            let regular = respond(&mut guard, &request[..request.len() - 1])
                .map(|payload| format!("{}\r\n", payload).into_bytes());
            match fault {
                Some(Fault::NoResponse) => (None, None),
                Some(Fault::Respond(bytes)) => (Some(bytes), None),
                Some(Fault::Delayed(delay)) => (regular, Some(delay)),
                None => (regular, None),
            }
        };
        index += 1;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reply) = reply {
            debug!("Simulated controller reply: {:?}", String::from_utf8_lossy(&reply));
            if stream.get_mut().write_all(&reply).await.is_err() {
                break;
            }
        }
    }
}

fn respond(state: &mut SimState, line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let (command, parameter) = match line.split_once(' ') {
        Some((command, parameter)) => (command, Some(parameter)),
        None => (&*line, None),
    };

    match (command, parameter) {
        ("version", None) => Some(SIMULATED_VERSION.to_string()),
        ("status", None) => Some(state.status.clone()),
        ("REMOTE", None) => {
            state.remote = true;
            None
        }
        (command, None) => {
            let base = command.strip_prefix(GET_PREFIX)?;
            let parameter = Parameter::from_base(base)?;
            state.values.get(parameter.descriptor().base).cloned()
        }
        (command, Some(value)) => {
            let base = command.strip_prefix(SET_PREFIX)?;
            let parameter = Parameter::from_base(base)?;
            if parameter.is_writable() {
                state
                    .values
                    .insert(parameter.descriptor().base, value.to_string());
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_answers_get_and_stores_set() {
        let sim = SimulatedController::new();
        let mut stream = sim.connect();

        stream.write_all(b"out_sp_00 12.4\r").await.unwrap();
        stream.write_all(b"in_sp_00\r").await.unwrap();

        let mut buf = [0u8; 6];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"12.4\r\n");
        assert_eq!(sim.value(Parameter::TempT1).await.as_deref(), Some("12.4"));
    }

    #[tokio::test]
    async fn test_ignores_set_on_read_only_parameter() {
        let sim = SimulatedController::new();
        let mut stream = sim.connect();

        stream.write_all(b"out_pv_01 99\r").await.unwrap();
        stream.write_all(b"in_pv_01\r").await.unwrap();

        let mut buf = [0u8; 6];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"35.2\r\n");
    }

    #[tokio::test]
    async fn test_remote_and_version() {
        let sim = SimulatedController::new();
        let mut stream = sim.connect();

        stream.write_all(b"REMOTE\r").await.unwrap();
        stream.write_all(b"version\r").await.unwrap();

        let mut buf = [0u8; 7];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"V7.01\r\n");
        assert!(sim.is_remote().await);
        assert_eq!(sim.received().await.len(), 2);
    }
}
