use shouterlib::{Client, Error};

#[derive(clap::Args, Debug)]
pub struct ControlOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

/// Which command a control subcommand sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Arm,
    Disarm,
    Pulse,
    Reset,
    ClearFaults,
    ClearThenArm,
    Defaults,
}

impl ControlOpts {
    pub fn run(&self, action: ControlAction) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        let result = match action {
            ControlAction::Arm => client.arm(),
            ControlAction::Disarm => client.disarm(),
            ControlAction::Pulse => client.pulse(),
            ControlAction::Reset => client.reset(),
            ControlAction::ClearFaults => client.clear_faults(),
            ControlAction::ClearThenArm => client.clear_then_arm(),
            ControlAction::Defaults => client.restore_defaults(),
        };
        match result {
            Ok(status) => {
                println!("{:?}", status);
                Ok(())
            }
            Err(Error::HardwareFault(faults)) => {
                eprintln!("arm refused, faults present:");
                for fault in faults {
                    eprintln!("  {}", fault);
                }
                anyhow::bail!("hardware fault");
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct TriggerSafeOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for TriggerSafeOpts {
    fn run(&self) -> anyhow::Result<()> {
        let mut client = Client::new(self.port.open()?);
        if client.trigger_safe()? {
            println!("safe");
        } else {
            println!("not safe");
        }
        Ok(())
    }
}
