//! Serial port byte source
//!
//! `serialport`-backed [`ByteSource`] with a short read timeout so the reader
//! task never blocks for long.

use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortInfo, SerialPortType};

use super::{ByteSource, DataBits, DeviceError, Parity, SerialParams, StopBits};

/// Read timeout of an open port
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn named(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::named(info.port_name),
        }
    }
}

/// Orders ttyACM* first, then ttyUSB*, each numerically, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        return (0, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        return (1, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let port = PortInfo::from(info);
                map.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => tracing::debug!("port enumeration failed: {}", e),
    }

    // USB CDC/serial adapters sometimes appear in /dev before udev reports them
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo::named(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

fn data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn stop_bits(bits: StopBits) -> Option<serialport::StopBits> {
    match bits {
        StopBits::One => Some(serialport::StopBits::One),
        StopBits::Two => Some(serialport::StopBits::Two),
        StopBits::OnePointFive => None,
    }
}

fn parity(parity: Parity) -> Option<serialport::Parity> {
    match parity {
        Parity::None => Some(serialport::Parity::None),
        Parity::Even => Some(serialport::Parity::Even),
        Parity::Odd => Some(serialport::Parity::Odd),
        Parity::Mark | Parity::Space => None,
    }
}

/// Byte source over a local serial port
#[derive(Default)]
pub struct SerialByteSource {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialByteSource {
    /// Closed source
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteSource for SerialByteSource {
    fn open(&mut self, params: &SerialParams) -> Result<(), DeviceError> {
        self.close();

        let unsupported = |what: &str| DeviceError::OpenFailed {
            port: params.port.clone(),
            reason: format!("{} not supported by this platform driver", what),
        };
        let stop = stop_bits(params.stop_bits).ok_or_else(|| unsupported("1.5 stop bits"))?;
        let parity = parity(params.parity).ok_or_else(|| unsupported("mark/space parity"))?;

        let port = serialport::new(&params.port, params.baud_rate)
            .data_bits(data_bits(params.data_bits))
            .stop_bits(stop)
            .parity(parity)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => DeviceError::PortNotFound(params.port.clone()),
                _ => DeviceError::OpenFailed {
                    port: params.port.clone(),
                    reason: e.to_string(),
                },
            })?;

        tracing::info!(
            "opened {} at {} baud ({:?}, {:?}, {:?})",
            params.port,
            params.baud_rate,
            params.data_bits,
            params.parity,
            params.stop_bits
        );
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            tracing::info!("closed {}", port.name().unwrap_or_default());
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_available(&mut self) -> Result<Vec<u8>, DeviceError> {
        let port = self.port.as_mut().ok_or(DeviceError::NotOpen)?;
        let available = port
            .bytes_to_read()
            .map_err(|e| DeviceError::Io(e.into()))? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(DeviceError::Io(e)),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let port = self.port.as_mut().ok_or(DeviceError::NotOpen)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn enumerate(&self) -> Vec<String> {
        list_ports().into_iter().map(|p| p.name).collect()
    }
}
