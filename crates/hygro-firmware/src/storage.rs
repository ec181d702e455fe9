use embedded_sdmmc::{Error, Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager};
use hygro_core::feedback::{LogStore, LogStoreError};

type LogFile<'a, S, D, T> = embedded_sdmmc::File<'a, SdCard<S, D>, T, 4, 4, 1>;

/// The log file on the first FAT volume of the SD card.
///
/// These operations are blocking. Log lines are short and the card sits on
/// its own SPI bus, so the stall per line is a few milliseconds.
pub struct SdCardLogStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    file_name: &'static str,
}

impl<S, D, T> SdCardLogStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T, file_name: &'static str) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
            file_name,
        }
    }

    fn with_file<R>(
        &self,
        mode: Mode,
        op: impl FnOnce(&LogFile<'_, S, D, T>) -> Result<R, Error<SdCardError>>,
    ) -> Result<R, Error<SdCardError>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(self.file_name, mode)?;

        let result = op(&file);

        // Close explicitly so errors surface instead of vanishing in Drop
        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        result
    }
}

fn unavailable(operation: &str, e: &Error<SdCardError>) -> LogStoreError {
    log::warn!("sd: {} failed: {:?}", operation, e);
    LogStoreError::Unavailable("SD card")
}

impl<S, D, T> LogStore for SdCardLogStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn len(&mut self) -> Result<u32, LogStoreError> {
        match self.with_file(Mode::ReadOnly, |file| Ok(file.length())) {
            Ok(len) => Ok(len),
            Err(Error::NotFound) => Ok(0),
            Err(e) => Err(unavailable("stat", &e)),
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), LogStoreError> {
        self.with_file(Mode::ReadWriteCreateOrAppend, |file| file.write(bytes))
            .map_err(|e| {
                log::warn!("sd: append failed: {:?}", e);
                LogStoreError::Write("append to log file")
            })
    }

    fn truncate(&mut self) -> Result<(), LogStoreError> {
        self.with_file(Mode::ReadWriteCreateOrTruncate, |_| Ok(()))
            .map_err(|e| {
                log::warn!("sd: truncate failed: {:?}", e);
                LogStoreError::Write("truncate log file")
            })
    }
}
