use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use nix::fcntl::OFlag;
use nix::sys::termios::{
    tcgetattr, tcsetattr, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
    Termios,
};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits, TTYPort};
use tracing::{debug, info};

use crate::domain::config::SerialConfig;
use crate::domain::error::ConnectError;

/// Time the target gets after DTR is raised again.
const DTR_SETTLE: Duration = Duration::from_millis(50);

/// Open and configure a serial device.
///
/// Failing to open is retryable since the device may simply not be plugged
/// in yet. Failing to configure an open device is not.
pub async fn open_serial(path: &Path, config: &SerialConfig) -> Result<OwnedFd, ConnectError> {
    let mut port = if config.native {
        open_native_settings(path, config.baud_rate)?
    } else {
        open_forced_settings(path, config.baud_rate)?
    };

    if config.toggle_dtr {
        debug!("toggling DTR on {}", path.display());
        pulse_dtr(&mut port)
            .await
            .map_err(|e| ConnectError::Fatal(e.into()))?;
    }

    // The port closes its own descriptor when dropped, the duplicate lives on.
    let fd = port_fd(&port)
        .try_clone_to_owned()
        .map_err(ConnectError::Fatal)?;
    info!("serial port {} opened", path.display());
    Ok(fd)
}

/// Force 8N1 at the configured rate, no flow control, parity errors ignored.
fn open_forced_settings(path: &Path, baud_rate: u32) -> Result<TTYPort, ConnectError> {
    let port = open_port(path, baud_rate).map_err(|e| ConnectError::Retryable(e.into()))?;

    let mut termios = tcgetattr(port_fd(&port)).map_err(|e| ConnectError::Fatal(e.into()))?;
    termios.input_flags = InputFlags::IGNPAR;
    tcsetattr(port_fd(&port), SetArg::TCSANOW, &termios)
        .map_err(|e| ConnectError::Fatal(e.into()))?;
    Ok(port)
}

/// Keep the device's line settings, only make sure input and output are raw.
///
/// The settings are read before the port is opened and written back over
/// whatever the open applied.
fn open_native_settings(path: &Path, baud_rate: u32) -> Result<TTYPort, ConnectError> {
    let mut termios = current_settings(path)?;
    termios.output_flags = OutputFlags::empty();
    termios.local_flags = LocalFlags::empty();
    termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    let port = open_port(path, baud_rate).map_err(|e| ConnectError::Fatal(e.into()))?;
    tcsetattr(port_fd(&port), SetArg::TCSANOW, &termios)
        .map_err(|e| ConnectError::Fatal(e.into()))?;
    Ok(port)
}

fn current_settings(path: &Path) -> Result<Termios, ConnectError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
        .open(path)
        .map_err(ConnectError::Retryable)?;
    tcgetattr(file.as_fd()).map_err(|e| ConnectError::Fatal(e.into()))
}

fn open_port(path: &Path, baud_rate: u32) -> serialport::Result<TTYPort> {
    serialport::new(path.to_string_lossy(), baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native()
}

/// The port's descriptor, borrowed for as long as the port lives.
fn port_fd(port: &TTYPort) -> BorrowedFd<'_> {
    // SAFETY: a TTYPort holds an open descriptor until it is dropped, and the
    // borrow is tied to `port`.
    unsafe { BorrowedFd::borrow_raw(port.as_raw_fd()) }
}

/// Drop DTR and raise it again to reset the target, then discard whatever
/// arrived meanwhile.
async fn pulse_dtr(port: &mut TTYPort) -> serialport::Result<()> {
    port.write_data_terminal_ready(false)?;
    port.write_data_terminal_ready(true)?;
    port.write_data_terminal_ready(true)?;
    tokio::time::sleep(DTR_SETTLE).await;
    port.clear(ClearBuffer::All)
}
