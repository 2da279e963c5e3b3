//! Serial device access used by the link worker
//!
//! [`SerialBackend`] is the seam between the reader loop and the platform:
//! the system implementation opens ports through `serialport`, tests plug in
//! scripted devices.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Reader and writer halves of an open port.
///
/// Dropping both closes the device.
pub struct PortHandles {
    /// Half owned by the reader loop
    pub reader: Box<dyn Read + Send>,
    /// Half shared by writers
    pub writer: Box<dyn Write + Send>,
}

/// An available serial device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Device identifier passed to `connect` (e.g. COM3, /dev/ttyUSB0)
    pub device: String,
    /// Human description, empty when unknown
    pub description: String,
}

impl PortInfo {
    /// Picker label, `device — description`
    pub fn display_name(&self) -> String {
        if self.description.is_empty() {
            self.device.clone()
        } else {
            format!("{} — {}", self.device, self.description)
        }
    }
}

/// Access to serial devices
#[cfg_attr(test, mockall::automock)]
pub trait SerialBackend: Send + Sync {
    /// Whether serial I/O is supported in this environment at all
    fn is_available(&self) -> bool {
        true
    }

    /// Open `port` at `baud_rate`. Reads on the returned handle give up after
    /// `read_timeout` with no data.
    fn open(&self, port: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<PortHandles>;

    /// Enumerate devices; an empty list is valid
    fn enumerate(&self) -> io::Result<Vec<PortInfo>>;
}

/// Serial ports of the host, via `serialport`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl SerialBackend for SystemBackend {
    fn open(&self, port: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<PortHandles> {
        let reader = serialport::new(port, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(io::Error::from)?;
        let writer = reader.try_clone().map_err(io::Error::from)?;
        Ok(PortHandles {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    fn enumerate(&self) -> io::Result<Vec<PortInfo>> {
        let listed = serialport::available_ports().map_err(io::Error::from)?;
        let nodes = device_nodes().into_iter().map(|device| PortInfo {
            device,
            description: String::new(),
        });

        let mut ports: Vec<PortInfo> = Vec::with_capacity(listed.len());
        for port in listed
            .into_iter()
            .map(|p| PortInfo {
                description: describe(&p.port_type),
                device: p.port_name,
            })
            .chain(nodes)
        {
            if !ports.iter().any(|p| p.device == port.device) {
                ports.push(port);
            }
        }
        Ok(ports)
    }
}

fn describe(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => usb
            .product
            .clone()
            .or_else(|| usb.manufacturer.clone())
            .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
        serialport::SerialPortType::PciPort => "PCI".to_string(),
        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        _ => String::new(),
    }
}

/// Device nodes the enumeration API misses (pseudo terminals, some USB CDC)
#[cfg(unix)]
fn device_nodes() -> Vec<String> {
    use std::path::Path;

    fn scan(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut found: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_str().is_some_and(&keep))
            .map(|e| e.path().to_string_lossy().into_owned())
            .collect();
        found.sort();
        found
    }

    let mut nodes = scan(Path::new("/dev/pts"), |name| name.chars().all(|c| c.is_ascii_digit()));
    nodes.extend(scan(Path::new("/dev"), |name| name.starts_with("tty.")));
    nodes.extend(scan(Path::new("/dev"), |name| name.starts_with("ttyUSB")));
    nodes.extend(scan(Path::new("/dev"), |name| name.starts_with("ttyACM")));
    nodes
}

#[cfg(not(unix))]
fn device_nodes() -> Vec<String> {
    Vec::new()
}
