use shouterlib::protocol::options::{Category, ConfigBit, Opt16, Opt8, OptVar};
use shouterlib::Client;

/// Options addressable by name from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OptionName {
    Voltage,
    VoltageMeasured,
    PulseWidth,
    PulseWidthMeasured,
    PulseRepeat,
    PulseDeadtime,
    ArmTimeout,
    TemperatureMosfet,
    TemperatureXformer,
    TemperatureDiode,
    BooleanConfig1,
    Bootbits,
    Absenttemp,
}

impl OptionName {
    fn split(self) -> (Category, u8) {
        match self {
            Self::Voltage => (Category::U16, Opt16::Voltage.id()),
            Self::VoltageMeasured => (Category::U16, Opt16::VoltageMeasured.id()),
            Self::PulseWidth => (Category::U16, Opt16::PulseWidth.id()),
            Self::PulseWidthMeasured => (Category::U16, Opt16::MeasuredPulseWidth.id()),
            Self::PulseRepeat => (Category::U16, Opt16::PulseRepeat.id()),
            Self::PulseDeadtime => (Category::U16, Opt16::PulseDeadtime.id()),
            Self::ArmTimeout => (Category::U16, Opt16::ArmTimeout.id()),
            Self::TemperatureMosfet => (Category::U16, Opt16::TemperatureMosfet.id()),
            Self::TemperatureXformer => (Category::U16, Opt16::TemperatureXformer.id()),
            Self::TemperatureDiode => (Category::U16, Opt16::TemperatureDiode.id()),
            Self::BooleanConfig1 => (Category::U8, Opt8::BooleanConfig1.id()),
            Self::Bootbits => (Category::U8, Opt8::BootBits.id()),
            Self::Absenttemp => (Category::U8, Opt8::AbsentTemp.id()),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct StatusOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for StatusOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        client.request_all()?;
        let tables = client.tables();

        println!("board id: {}", tables.board_id());
        println!("state:    {}", tables.current_state());
        println!();
        for opt in Opt16::ALL {
            println!("{:24} {}", opt.name(), tables.get_u16(opt));
        }
        for opt in Opt8::ALL {
            println!("{:24} {}", opt.name(), tables.get_u8(opt));
        }
        println!();
        for bit in ConfigBit::ALL {
            println!("{:24} {}", bit.name(), tables.config_bit(bit));
        }

        let active = tables.faults(false);
        if !active.is_empty() {
            println!();
            println!("active faults: {:?}", active);
        }
        let latched = tables.faults(true);
        if !latched.is_empty() {
            println!("latched faults: {:?}", latched);
        }
        Ok(())
    }
}

#[derive(clap::Args, Debug)]
pub struct GetOpts {
    #[arg(value_enum)]
    option: OptionName,

    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for GetOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        let (category, id) = self.option.split();
        let value = match category {
            Category::U16 => {
                let opt = Opt16::from_id(id).unwrap();
                client.request_u16(&[opt])?[0]
            }
            _ => {
                let opt = Opt8::from_id(id).unwrap();
                client.request_u8(&[opt])?[0] as u16
            }
        };
        println!("{}", value);
        Ok(())
    }
}

#[derive(clap::Args, Debug)]
pub struct SetOpts {
    #[arg(value_enum)]
    option: OptionName,
    value: u16,

    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for SetOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        let (category, id) = self.option.split();
        client.send_set(&[id], category, &[self.value])?;
        Ok(())
    }
}

#[derive(clap::Args, Debug)]
pub struct StateOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for StateOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        println!("{}", client.state()?);
        Ok(())
    }
}

#[derive(clap::Args, Debug)]
pub struct FaultsOpts {
    /// Show the latched fault register instead of the active one.
    #[arg(long)]
    latched: bool,

    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for FaultsOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        let faults = client.faults(self.latched)?;
        if faults.is_empty() {
            println!("no faults");
        } else {
            for fault in faults {
                println!("{}", fault);
            }
        }
        Ok(())
    }
}

#[derive(clap::Args, Debug)]
pub struct BoardIdOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for BoardIdOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        client.request_var(&[OptVar::BoardId])?;
        println!("{}", client.tables().board_id());
        Ok(())
    }
}
