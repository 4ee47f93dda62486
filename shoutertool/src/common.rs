use std::io::{Read, Write};
use std::time::Duration;

#[derive(clap::Args, Debug, Clone)]
pub struct SerialPortArgs {
    #[arg(default_value_t = default_serial_port())]
    port: String,
    #[arg(short, long, default_value_t = shouterlib::protocol::BAUD_RATE)]
    baud: u32,
    /// Treat the port as a plain file instead of a serial device.
    #[arg(long)]
    plain_file: bool,
}

pub enum SerialPort {
    Serial(Box<dyn serialport::SerialPort>),
    File(std::fs::File),
}

pub fn default_serial_port() -> String {
    if let Ok(infos) = serialport::available_ports() {
        if let Some(info) = infos.first() {
            return info.port_name.clone();
        }
    }

    // not great, but reasonable fallback
    "/dev/ttyUSB0".to_owned()
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.read(buf),
            Self::File(port) => port.read(buf),
        }
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.write(buf),
            Self::File(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Serial(port) => port.flush(),
            Self::File(port) => port.flush(),
        }
    }
}

impl SerialPortArgs {
    fn open_with(&self, stop_bits: serialport::StopBits) -> anyhow::Result<SerialPort> {
        if self.plain_file {
            let port = std::fs::File::options()
                .read(true)
                .write(true)
                .open(&self.port)?;
            Ok(SerialPort::File(port))
        } else {
            let port = serialport::new(&self.port, self.baud)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(stop_bits)
                .timeout(Duration::from_millis(100))
                .open()?;
            Ok(SerialPort::Serial(port))
        }
    }

    /// Open for the control protocol: 115200 8N1.
    pub fn open(&self) -> anyhow::Result<SerialPort> {
        self.open_with(serialport::StopBits::One)
    }

    /// Open for the download console, which runs with two stop bits.
    pub fn open_download(&self) -> anyhow::Result<SerialPort> {
        self.open_with(serialport::StopBits::Two)
    }
}

pub fn upload_bar(size: u64) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(size);
    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "({spinner}) [{wide_bar}] ({percent:>3}%, {pos}/{len} frames)",
        )
        .unwrap()
        .progress_chars("=> "),
    );
    bar
}
