use clap::Parser;

mod common;
mod control;
mod download;
mod status;
mod wave;

trait ToolRun {
    fn run(&self) -> anyhow::Result<()>;
}

#[derive(Parser, Debug)]
#[command(about = "Drive an EMFI pulse generator over its serial protocol")]
struct ToolOptions {
    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(clap::Subcommand, Debug)]
enum ToolCommand {
    /// Read and print every option the device reports.
    Status(status::StatusOpts),
    /// Read one option.
    Get(status::GetOpts),
    /// Write one option.
    Set(status::SetOpts),
    /// Print the device's state string.
    State(status::StateOpts),
    /// Print the board id.
    BoardId(status::BoardIdOpts),
    /// List active (or latched) faults.
    Faults(status::FaultsOpts),
    /// Arm the output stage.
    Arm(control::ControlOpts),
    /// Disarm the output stage.
    Disarm(control::ControlOpts),
    /// Fire a pulse.
    Pulse(control::ControlOpts),
    /// Reset the device.
    Reset(control::ControlOpts),
    /// Clear latched faults.
    ClearFaults(control::ControlOpts),
    /// Clear faults, then arm.
    ClearArm(control::ControlOpts),
    /// Restore default option values.
    Defaults(control::ControlOpts),
    /// Ask whether the trigger input is safe.
    TriggerSafe(control::TriggerSafeOpts),
    /// Fetch the pattern wave.
    WaveGet(wave::WaveGetOpts),
    /// Upload a pattern wave.
    WaveSet(wave::WaveSetOpts),
    /// Download a firmware image [WARNING: reflashes the device].
    Download(download::DownloadOpts),
    /// Verify a firmware image without flashing it.
    Verify(download::VerifyOpts),
}

impl ToolRun for ToolCommand {
    fn run(&self) -> anyhow::Result<()> {
        use control::ControlAction;
        match self {
            Self::Status(o) => o.run(),
            Self::Get(o) => o.run(),
            Self::Set(o) => o.run(),
            Self::State(o) => o.run(),
            Self::BoardId(o) => o.run(),
            Self::Faults(o) => o.run(),
            Self::Arm(o) => o.run(ControlAction::Arm),
            Self::Disarm(o) => o.run(ControlAction::Disarm),
            Self::Pulse(o) => o.run(ControlAction::Pulse),
            Self::Reset(o) => o.run(ControlAction::Reset),
            Self::ClearFaults(o) => o.run(ControlAction::ClearFaults),
            Self::ClearArm(o) => o.run(ControlAction::ClearThenArm),
            Self::Defaults(o) => o.run(ControlAction::Defaults),
            Self::TriggerSafe(o) => o.run(),
            Self::WaveGet(o) => o.run(),
            Self::WaveSet(o) => o.run(),
            Self::Download(o) => o.run(),
            Self::Verify(o) => o.run(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    ToolOptions::parse().command.run()
}
