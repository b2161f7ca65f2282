use crate::config::DeviceConfig;
use crate::error::DeviceError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::time::Duration;

/// Something that can buzz the participant.
pub trait VibrationDevice {
    /// Fire one pulse at the given intensity. Fire-and-forget: no acknowledgement.
    fn trigger(&mut self, intensity: u8) -> Result<(), DeviceError>;

    fn describe(&self) -> String;
}

/// Stand-in used when no hardware is attached. Every trigger fails, so trials
/// are logged as not delivered.
#[derive(Debug, Default)]
pub struct NullDevice;

impl VibrationDevice for NullDevice {
    fn trigger(&mut self, _intensity: u8) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable)
    }

    fn describe(&self) -> String {
        "no vibration device".to_string()
    }
}

/// Records pulses instead of sending them. Used for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct SimulatedDevice {
    pub pulses: Vec<u8>,
    pub fail: bool,
}

impl SimulatedDevice {
    pub fn failing() -> Self {
        Self {
            pulses: Vec::new(),
            fail: true,
        }
    }
}

impl VibrationDevice for SimulatedDevice {
    fn trigger(&mut self, intensity: u8) -> Result<(), DeviceError> {
        if self.fail {
            return Err(DeviceError::Unavailable);
        }
        tracing::trace!(intensity, "simulated vibration pulse");
        self.pulses.push(intensity);
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated vibration device".to_string()
    }
}

/// Motor controller on a serial line. The intensity is sent as ASCII digits.
#[derive(Debug)]
pub struct SerialDevice {
    port: String,
    file: File,
}

impl SerialDevice {
    pub fn open(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let baud = check_baud(config.baud_rate)?;
        let path = port_path(&config.port);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|cause| DeviceError::Open {
                port: config.port.clone(),
                cause,
            })?;

        configure_line(&file, baud).map_err(|cause| DeviceError::Configure {
            port: config.port.clone(),
            cause,
        })?;

        // The controller resets when the port opens.
        std::thread::sleep(Duration::from_millis(config.settle_ms));
        tracing::info!(port = %config.port, baud = config.baud_rate, "vibration device connected");
        Ok(Self {
            port: config.port.clone(),
            file,
        })
    }
}

impl VibrationDevice for SerialDevice {
    fn trigger(&mut self, intensity: u8) -> Result<(), DeviceError> {
        self.file.write_all(intensity.to_string().as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial vibration device on {}", self.port)
    }
}

/// Open the configured serial device, or fall back to [`NullDevice`] with a
/// warning. The session keeps running either way.
pub fn open_or_null(config: &DeviceConfig) -> Box<dyn VibrationDevice> {
    match SerialDevice::open(config) {
        Ok(device) => Box::new(device),
        Err(e) => {
            tracing::warn!(port = %config.port, error = %e, "could not open serial port, vibration disabled");
            Box::new(NullDevice)
        }
    }
}

fn port_path(port: &str) -> String {
    if cfg!(windows) && !port.starts_with(r"\\.\") {
        format!(r"\\.\{port}")
    } else {
        port.to_string()
    }
}

/// Line speeds the controller firmware can be flashed with.
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9_600, 19_200, 38_400, 57_600, 115_200];

fn check_baud(baud: u32) -> Result<u32, DeviceError> {
    if SUPPORTED_BAUD_RATES.contains(&baud) {
        Ok(baud)
    } else {
        Err(DeviceError::UnsupportedBaud(baud))
    }
}

/// Raw 8N1 at `baud`.
#[cfg(unix)]
fn configure_line(file: &File, baud: u32) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        _ => libc::B115200,
    };

    let fd = file.as_raw_fd();
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        libc::cfsetispeed(&mut tio, speed);
        libc::cfsetospeed(&mut tio, speed);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Binary 8N1 at `baud`, without parity checking.
#[cfg(windows)]
fn configure_line(file: &File, baud: u32) -> std::io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Devices::Communication::{
        GetCommState, SetCommState, DCB, NOPARITY, ONESTOPBIT,
    };
    use windows::Win32::Foundation::HANDLE;

    const F_BINARY: u32 = 1;
    const F_PARITY: u32 = 1 << 1;

    let handle = HANDLE(file.as_raw_handle());
    let mut dcb = DCB {
        DCBlength: std::mem::size_of::<DCB>() as u32,
        ..Default::default()
    };
    unsafe { GetCommState(handle, &mut dcb) }?;
    dcb.BaudRate = baud;
    dcb.ByteSize = 8;
    dcb.Parity = NOPARITY;
    dcb.StopBits = ONESTOPBIT;
    dcb._bitfield = (dcb._bitfield | F_BINARY) & !F_PARITY;
    unsafe { SetCommState(handle, &dcb) }?;
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn configure_line(_file: &File, baud: u32) -> std::io::Result<()> {
    tracing::warn!(baud, "serial line settings are not applied on this platform");
    Ok(())
}
