use shouterlib::download::{frame_count, Corruption, Downloader};

#[derive(clap::Args, Debug)]
pub struct DownloadOpts {
    /// Firmware image: a file of pre-framed download packets.
    image: String,

    /// Corrupt the CRC of every frame, to exercise the bootloader's
    /// error path.
    #[arg(long)]
    break_crc: bool,
    /// Drop the terminator of every frame.
    #[arg(long)]
    break_frame: bool,

    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl DownloadOpts {
    fn corruption(&self) -> anyhow::Result<Option<Corruption>> {
        match (self.break_crc, self.break_frame) {
            (true, true) => anyhow::bail!("choose one of --break-crc / --break-frame"),
            (true, false) => Ok(Some(Corruption::BreakCrc)),
            (false, true) => Ok(Some(Corruption::BreakFrame)),
            (false, false) => Ok(None),
        }
    }
}

impl crate::ToolRun for DownloadOpts {
    fn run(&self) -> anyhow::Result<()> {
        let path = std::path::Path::new(&self.image);
        let corruption = self.corruption()?;
        let total = frame_count(path)?;

        let mut downloader = Downloader::new(self.port.open_download()?);
        let bar = crate::common::upload_bar(total as u64);
        downloader.download(path, corruption, |done, _| bar.set_position(done as u64))?;
        bar.finish();
        Ok(())
    }
}

#[derive(clap::Args, Debug)]
pub struct VerifyOpts {
    /// Verification image; the device reports success instead of
    /// booting into it.
    image: String,

    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for VerifyOpts {
    fn run(&self) -> anyhow::Result<()> {
        let path = std::path::Path::new(&self.image);
        let total = frame_count(path)?;

        let mut downloader = Downloader::new(self.port.open_download()?);
        let bar = crate::common::upload_bar(total as u64);
        let verified = downloader.verify(path, |done, _| bar.set_position(done as u64))?;
        bar.finish();

        if verified {
            println!("image verified");
            Ok(())
        } else {
            anyhow::bail!("image did not verify");
        }
    }
}
