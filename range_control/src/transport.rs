/*!
Serial transport for scenario packets.

A transmit session is fully synchronous and owns the port for its whole
duration:

1. open the port (8N1, no flow control)
2. purge both buffers and drain any pending input
3. write the `7E AA` init sequence and let the device settle
4. purge again and write the scenario packet
5. poll for a response, then close the port
*/

use crate::config::{PortConfig, SessionConfig};
use range_core::protocol::INIT_SEQUENCE;
use range_core::storage::format_hex;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while talking to the device
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Port I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serial parameters for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub name: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl From<&PortConfig> for PortSettings {
    fn from(config: &PortConfig) -> Self {
        Self {
            name: config.name.clone(),
            baud_rate: config.baud_rate,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// An open link to the device. Dropping it closes the port.
pub trait PortLink: Send {
    /// Discard both input and output buffers
    fn purge(&mut self) -> Result<(), TransportError>;

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever is available; a timeout yields `Ok(0)`
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Opens links to the device
pub trait Transport: Send {
    fn open(&mut self, settings: &PortSettings) -> Result<Box<dyn PortLink>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, settings: &PortSettings) -> Result<Box<dyn PortLink>, TransportError> {
        (**self).open(settings)
    }
}

/// Real serial port
#[derive(Debug, Default)]
pub struct SerialTransport;

impl Transport for SerialTransport {
    fn open(&mut self, settings: &PortSettings) -> Result<Box<dyn PortLink>, TransportError> {
        let port = serialport::new(&settings.name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.timeout)
            .open()
            .map_err(|source| TransportError::Open {
                port: settings.name.clone(),
                source,
            })?;

        Ok(Box::new(SerialLink { port }))
    }
}

struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl PortLink for SerialLink {
    fn purge(&mut self) -> Result<(), TransportError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Logs every write instead of touching hardware
#[derive(Debug, Default)]
pub struct DryRunTransport;

impl Transport for DryRunTransport {
    fn open(&mut self, settings: &PortSettings) -> Result<Box<dyn PortLink>, TransportError> {
        info!("🧪 Dry run: pretending to open {} at {} baud", settings.name, settings.baud_rate);
        Ok(Box::new(DryRunLink))
    }
}

struct DryRunLink;

impl PortLink for DryRunLink {
    fn purge(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        info!("🧪 Dry run write ({} bytes): {}", data.len(), format_hex(data));
        Ok(data.len())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(0)
    }
}

/// Outcome of one transmit session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub bytes_written: usize,
    pub response: Option<Vec<u8>>,
}

/// Run one full transmit session for a scenario packet
pub fn send_scenario_packet(
    transport: &mut dyn Transport,
    port: &PortSettings,
    session: &SessionConfig,
    packet: &[u8],
) -> Result<SendReport, TransportError> {
    info!("🔌 Opening {} at {} baud", port.name, port.baud_rate);
    let mut link = transport.open(port)?;
    let mut buf = vec![0u8; session.read_buffer.max(1)];

    purge(link.as_mut());
    for _ in 0..session.drain_reads {
        match link.read(&mut buf) {
            Ok(n) if n > 0 => debug!("Drained {} stale bytes", n),
            Ok(_) => {}
            Err(e) => debug!("Drain read failed: {}", e),
        }
        thread::sleep(session.drain_interval());
    }

    let init_written = link.write(&INIT_SEQUENCE)?;
    debug!("Init sequence written ({} bytes)", init_written);
    thread::sleep(session.settle());
    purge(link.as_mut());

    let bytes_written = link.write(packet)?;
    if bytes_written != packet.len() {
        warn!("Short write: {} of {} bytes", bytes_written, packet.len());
    }
    info!("📤 Sent {} bytes: {}", bytes_written, format_hex(packet));

    let mut response = None;
    for _ in 0..session.response_polls {
        match link.read(&mut buf) {
            Ok(n) if n > 0 => {
                info!("📥 Response ({} bytes): {}", n, format_hex(&buf[..n]));
                response = Some(buf[..n].to_vec());
                break;
            }
            Ok(_) => {}
            Err(e) => debug!("Response read failed: {}", e),
        }
        thread::sleep(session.response_poll_interval());
    }

    if response.is_none() {
        debug!("No response from device");
    }

    Ok(SendReport {
        bytes_written,
        response,
    })
}

fn purge(link: &mut dyn PortLink) {
    if let Err(e) = link.purge() {
        warn!("Failed to purge port buffers: {}", e);
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{immediate_session, MockTransport};
    use super::*;

    fn settings() -> PortSettings {
        PortSettings::from(&PortConfig::default())
    }

    #[test]
    fn test_session_writes_init_then_packet() {
        let mut transport = MockTransport::default();
        let packet = vec![0x7E, 0x00, 0x01, 0x02, 0x74, 0x00];

        let report = send_scenario_packet(&mut transport, &settings(), &immediate_session(), &packet).unwrap();

        assert_eq!(report.bytes_written, packet.len());
        assert_eq!(report.response, None);
        assert_eq!(transport.opens(), 1);
        assert_eq!(transport.writes(), vec![INIT_SEQUENCE.to_vec(), packet]);
        assert_eq!(transport.state.lock().unwrap().purges, 2);
    }

    #[test]
    fn test_session_collects_response() {
        let mut transport = MockTransport::default();
        transport.state.lock().unwrap().responses.push_back(vec![0x7E, 0x01]);

        let report = send_scenario_packet(&mut transport, &settings(), &immediate_session(), &[0x7E, 0x00]).unwrap();
        assert_eq!(report.response, Some(vec![0x7E, 0x01]));
    }

    #[test]
    fn test_open_failure_is_reported() {
        let mut transport = MockTransport::failing();
        let result = send_scenario_packet(&mut transport, &settings(), &immediate_session(), &[0x7E]);

        assert!(matches!(result, Err(TransportError::Io(_))));
        assert_eq!(transport.opens(), 1);
        assert!(transport.writes().is_empty());
    }

    #[test]
    fn test_dry_run_accepts_writes() {
        let mut transport = DryRunTransport;
        let report = send_scenario_packet(&mut transport, &settings(), &immediate_session(), &[0x7E, 0x00, 0x05]).unwrap();
        assert_eq!(report.bytes_written, 3);
        assert!(report.response.is_none());
    }

    #[test]
    fn test_port_settings_from_config() {
        let settings = PortSettings::from(&PortConfig {
            name: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout_ms: 20,
        });
        assert_eq!(settings.name, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.timeout, Duration::from_millis(20));
    }
}
