//! Line-oriented command transport for the controller's RS-232 port.
//!
//! Transfer sequences are ASCII lines of the form `<command>[ <parameter>]\r`.
//! Get commands are answered with `<value>\r\n`; set commands and actions
//! are never answered.
//!
//! The transport owns its byte stream instead of extending it, so any
//! `AsyncRead + AsyncWrite` implementation can stand in for the serial port
//! (scripted mocks, the simulated controller, a real `SerialStream`).

use crate::config::SerialConfig;
use crate::error::{AppResult, BtcError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[cfg(feature = "tokio_serial")]
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Terminator of every outbound transfer sequence.
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Terminator of every inbound response line.
pub const RESPONSE_TERMINATOR: &[u8] = b"\r\n";

/// Build the transfer sequence for a command and optional parameter.
///
/// The result ends with exactly one carriage return and contains no other
/// control bytes.
pub fn transfer_sequence(command: &str, parameter: Option<&str>) -> AppResult<Vec<u8>> {
    if command.is_empty() {
        return Err(BtcError::InvalidCommand("empty command".to_string()));
    }
    if !command.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(BtcError::InvalidCommand(format!(
            "command {:?} must be printable ASCII without spaces",
            command
        )));
    }

    let mut sequence = command.as_bytes().to_vec();
    if let Some(parameter) = parameter {
        if parameter.is_empty() || !parameter.bytes().all(|b| b == b' ' || b.is_ascii_graphic()) {
            return Err(BtcError::InvalidCommand(format!(
                "parameter {:?} must be printable ASCII",
                parameter
            )));
        }
        sequence.push(b' ');
        sequence.extend_from_slice(parameter.as_bytes());
    }
    sequence.push(COMMAND_TERMINATOR);
    Ok(sequence)
}

/// Strip the CR LF terminator from a response line and decode the payload.
pub fn decode_response(command: &str, line: &[u8]) -> AppResult<String> {
    let malformed = |reason: &str| BtcError::Protocol {
        command: command.to_string(),
        reason: reason.to_string(),
    };
    let payload = line
        .strip_suffix(RESPONSE_TERMINATOR)
        .ok_or_else(|| malformed("response not terminated by CR LF"))?;
    if !payload.iter().all(|b| *b == b' ' || b.is_ascii_graphic()) {
        return Err(malformed("response contains non-printable bytes"));
    }
    // All bytes are ASCII at this point.
    Ok(String::from_utf8_lossy(payload).into_owned())
}

/// Upper bound on draining late replies, in multiples of the timeout.
const RESYNC_LIMIT: u32 = 4;

/// Exclusive owner of one controller connection.
///
/// The stream sits behind an async mutex that is held for a full
/// request/response exchange, so at most one command is in flight.
///
/// After a read timeout the controller may still deliver the late reply.
/// The next exchange first discards everything that arrives until the line
/// has been quiet for one timeout, so that reply is never taken as the
/// answer to a later command.
pub struct CommandTransport<S> {
    stream: Mutex<BufReader<S>>,
    resync: AtomicBool,
    timeout: Duration,
    command_delay: Duration,
    verify_status: bool,
}

#[cfg(feature = "tokio_serial")]
impl CommandTransport<SerialStream> {
    /// Open the serial port with the controller's fixed line parameters.
    ///
    /// 7 data bits, even parity, 1 stop bit, RTS/CTS hardware handshake.
    ///
    /// # Errors
    /// Returns [`BtcError::PortOpen`] if the port cannot be opened.
    pub fn open(config: &SerialConfig) -> AppResult<Self> {
        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Seven)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::Hardware)
            .timeout(config.timeout())
            .open_native_async()
            .map_err(|e| BtcError::PortOpen {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        // Leftovers of an earlier session would be read as replies.
        if let Err(e) = port.clear(ClearBuffer::All) {
            warn!("Could not clear buffers of '{}': {}", config.port, e);
        }

        debug!(
            "Serial port '{}' opened at {} baud",
            config.port, config.baud_rate
        );
        Ok(Self::new(port, config))
    }
}

impl<S> CommandTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already opened stream.
    pub fn new(stream: S, config: &SerialConfig) -> Self {
        Self {
            stream: Mutex::new(BufReader::new(stream)),
            resync: AtomicBool::new(false),
            timeout: config.timeout(),
            command_delay: config.command_delay(),
            verify_status: config.verify_status,
        }
    }

    /// Send a command and, for get commands, return the response payload.
    ///
    /// Without a parameter the command is a get: the call blocks until a
    /// CR LF terminated line arrives and returns it without the terminator.
    /// With a parameter the command is a set and `None` is returned.
    pub async fn query(&self, command: &str, parameter: Option<&str>) -> AppResult<Option<String>> {
        self.exchange(command, parameter, parameter.is_none()).await
    }

    /// Send a get command and return its response payload.
    pub async fn get(&self, command: &str) -> AppResult<String> {
        self.exchange(command, None, true)
            .await?
            .ok_or(BtcError::UnexpectedEof)
    }

    /// Send a command that the controller does not answer.
    pub async fn send(&self, command: &str, parameter: Option<&str>) -> AppResult<()> {
        self.exchange(command, parameter, false).await.map(|_| ())
    }

    async fn exchange(
        &self,
        command: &str,
        parameter: Option<&str>,
        expect_response: bool,
    ) -> AppResult<Option<String>> {
        let sequence = transfer_sequence(command, parameter)?;
        let mut stream = self.stream.lock().await;
        if self.resync.swap(false, Ordering::AcqRel) {
            self.discard_stale_input(&mut *stream).await?;
        }

        write_sequence(&mut *stream, &sequence).await?;
        debug!("Tx: {:?}", String::from_utf8_lossy(&sequence));

        let response = if expect_response {
            let payload = self.read_line(&mut *stream, command).await?;
            debug!("Rx: {:?}", payload);
            Some(payload)
        } else {
            None
        };

        // The controller drops commands that follow each other too closely.
        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }

        if self.verify_status && command != "status" {
            self.check_status(&mut *stream).await?;
        }

        Ok(response)
    }

    async fn check_status(&self, stream: &mut BufReader<S>) -> AppResult<()> {
        let sequence = transfer_sequence("status", None)?;
        write_sequence(stream, &sequence).await?;
        let status = self.read_line(stream, "status").await?;
        debug!("Status: {:?}", status);
        if status.starts_with('-') {
            return Err(BtcError::Status(status));
        }
        Ok(())
    }

    /// Read one response line. A line cut short by the timeout is dropped
    /// and the connection is marked for resynchronisation.
    async fn read_line(&self, stream: &mut BufReader<S>, command: &str) -> AppResult<String> {
        let mut line = Vec::with_capacity(32);
        let read = match tokio::time::timeout(self.timeout, stream.read_until(b'\n', &mut line))
            .await
        {
            Ok(read) => read?,
            Err(_) => {
                self.resync.store(true, Ordering::Release);
                return Err(BtcError::Timeout(self.timeout));
            }
        };

        if read == 0 || !line.ends_with(b"\n") {
            return Err(BtcError::UnexpectedEof);
        }
        decode_response(command, &line)
    }

    /// Throw away buffered bytes and anything that arrives until the line
    /// stays quiet for one timeout.
    async fn discard_stale_input(&self, stream: &mut BufReader<S>) -> AppResult<()> {
        let mut discarded = stream.buffer().len();
        stream.consume(discarded);

        let deadline = Instant::now() + self.timeout * RESYNC_LIMIT;
        let mut scratch = [0u8; 64];
        while Instant::now() < deadline {
            match tokio::time::timeout(self.timeout, stream.get_mut().read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        if discarded > 0 {
            warn!("Discarded {} bytes of late controller output", discarded);
        }
        Ok(())
    }
}

async fn write_sequence<S>(stream: &mut BufReader<S>, sequence: &[u8]) -> AppResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let port = stream.get_mut();
    port.write_all(sequence).await?;
    port.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn fast_config() -> SerialConfig {
        SerialConfig {
            command_delay_ms: 0,
            timeout_ms: 200,
            ..SerialConfig::default()
        }
    }

    #[test]
    fn test_transfer_sequence() {
        assert_eq!(transfer_sequence("in_sp_01", None).unwrap(), b"in_sp_01\r");
        assert_eq!(
            transfer_sequence("out_sp_00", Some("12.4")).unwrap(),
            b"out_sp_00 12.4\r"
        );
        assert_eq!(transfer_sequence("REMOTE", None).unwrap(), b"REMOTE\r");
    }

    #[test]
    fn test_transfer_sequence_rejects_control_bytes() {
        assert!(transfer_sequence("", None).is_err());
        assert!(transfer_sequence("in_sp\r00", None).is_err());
        assert!(transfer_sequence("in sp", None).is_err());
        assert!(transfer_sequence("out_sp_00", Some("1\n2")).is_err());
        assert!(transfer_sequence("out_sp_00", Some("")).is_err());
    }

    #[test]
    fn test_every_sequence_has_exactly_one_carriage_return() {
        let cases = [
            ("in_pv_00", None),
            ("out_hil_00", Some("80")),
            ("version", None),
            ("status", None),
            ("out_mode_05", Some("1")),
        ];
        for (command, parameter) in cases {
            let sequence = transfer_sequence(command, parameter).unwrap();
            assert_eq!(sequence.last(), Some(&b'\r'));
            assert_eq!(sequence.iter().filter(|b| b.is_ascii_control()).count(), 1);
        }
    }

    #[test]
    fn test_decode_response() {
        assert_eq!(decode_response("in_sp_01", b"24.04\r\n").unwrap(), "24.04");
        assert!(decode_response("in_sp_01", b"24.04\n").unwrap_err().is_protocol());
        assert!(decode_response("in_sp_01", b"24.04").is_err());
        assert!(decode_response("in_sp_01", b"24\r.04\r\n").is_err());
    }

    #[tokio::test]
    async fn test_get_reads_one_line() {
        let mock = Builder::new()
            .write(b"in_pv_00\r")
            .read(b"21.30\r\n")
            .build();
        let transport = CommandTransport::new(mock, &fast_config());

        let response = transport.query("in_pv_00", None).await.unwrap();
        assert_eq!(response.as_deref(), Some("21.30"));
    }

    #[tokio::test]
    async fn test_set_does_not_read() {
        let mock = Builder::new().write(b"out_hil_01 50\r").build();
        let transport = CommandTransport::new(mock, &fast_config());

        let response = transport.query("out_hil_01", Some("50")).await.unwrap();
        assert_eq!(response, None);
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let mock = Builder::new()
            .write(b"version\r")
            .read(b"V7.")
            .read(b"01\r")
            .read(b"\n")
            .build();
        let transport = CommandTransport::new(mock, &fast_config());

        assert_eq!(transport.get("version").await.unwrap(), "V7.01");
    }

    #[tokio::test]
    async fn test_eof_while_waiting_for_response() {
        let mock = Builder::new().write(b"in_sp_00\r").read(b"12").build();
        let transport = CommandTransport::new(mock, &fast_config());

        let err = transport.get("in_sp_00").await.unwrap_err();
        assert!(matches!(err, BtcError::UnexpectedEof));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let mock = Builder::new()
            .write(b"in_sp_00\r")
            .wait(Duration::from_secs(1))
            .build();
        let transport = CommandTransport::new(mock, &fast_config());

        let err = transport.get("in_sp_00").await.unwrap_err();
        assert!(matches!(err, BtcError::Timeout(_)));
        assert!(err.is_transport());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_not_taken_for_next_answer() {
        let mock = Builder::new()
            .write(b"in_pv_00\r")
            .wait(Duration::from_millis(350))
            .read(b"24.04\r\n")
            .write(b"in_pv_02\r")
            .read(b"23.87\r\n")
            .build();
        let transport = CommandTransport::new(mock, &fast_config());

        let err = transport.get("in_pv_00").await.unwrap_err();
        assert!(matches!(err, BtcError::Timeout(_)));
        assert_eq!(transport.get("in_pv_02").await.unwrap(), "23.87");
    }

    #[tokio::test]
    async fn test_verify_status_reports_controller_error() {
        let mock = Builder::new()
            .write(b"out_sp_00 12.4\r")
            .write(b"status\r")
            .read(b"-E03 temperature limit\r\n")
            .build();
        let config = SerialConfig {
            verify_status: true,
            ..fast_config()
        };
        let transport = CommandTransport::new(mock, &config);

        let err = transport.send("out_sp_00", Some("12.4")).await.unwrap_err();
        match err {
            BtcError::Status(message) => assert!(message.starts_with("-E03")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_verify_status_passes_on_normal_status() {
        let mock = Builder::new()
            .write(b"in_sp_00\r")
            .read(b"12.4\r\n")
            .write(b"status\r")
            .read(b"0 O.K.\r\n")
            .build();
        let config = SerialConfig {
            verify_status: true,
            ..fast_config()
        };
        let transport = CommandTransport::new(mock, &config);

        assert_eq!(transport.get("in_sp_00").await.unwrap(), "12.4");
    }
}
