use shouterlib::Client;

#[derive(clap::Args, Debug)]
pub struct WaveGetOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for WaveGetOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        println!("{}", client.pattern_wave()?);
        Ok(())
    }
}

#[derive(clap::Args, Debug)]
pub struct WaveSetOpts {
    /// The wave as a string of '0' and '1' characters. Keep the final
    /// bit inactive if the pattern trigger will idle on it.
    wave: String,

    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for WaveSetOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        client.set_pattern_wave(&self.wave)?;
        Ok(())
    }
}
