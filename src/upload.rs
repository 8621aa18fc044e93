//! Multi-packet transfers: NXT files and VEX firmware.
//!
//! A VEX upload that fails after the erase has started leaves the
//! controller's flash partly programmed. Nothing here retries; running the
//! whole upload again is the recovery.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use tracing::{debug, info, warn};

use crate::brick::program_mode::ProgramMode;
use crate::commands::file::MAX_WRITE_CHUNK;
use crate::devices::Channel;
use crate::errors::{BrickError, ProtocolError};
use crate::filename::Filename;
use crate::firmware::FirmwareImage;
use crate::protocol::{NxtProtocol, PicProtocol};

/// Played after a successful NXT upload
pub const CONFIRM_SOUND: &str = "! Attention";
/// Played after a failed NXT upload
pub const ERROR_SOUND: &str = "Woops";

bitflags! {
    /// Options for an NXT upload
    pub struct UploadFlags: u32 {
        const NONE = 0x000;
        /// Delete an existing brick-side file first
        const OVERWRITE = 0x100;
        /// Play a sound on the brick when the upload finishes
        const PLAY_SOUND = 0x400;
    }
}

/// An NXT file opened for a linear write. Closes its handle on drop if
/// `close` was never called.
pub struct NxtUploadSession<'a, C: Channel> {
    nxt: &'a mut NxtProtocol<C>,
    handle: u8,
    name: Filename,
    size: u32,
    written: u32,
    closed: bool,
}

impl<'a, C: Channel> NxtUploadSession<'a, C> {
    pub fn open(nxt: &'a mut NxtProtocol<C>, name: Filename, size: u32) -> Result<Self, BrickError> {
        let handle = nxt.open_write_linear(&name, size)?;
        debug!(%name, handle, size, "opened brick file");
        Ok(NxtUploadSession {
            nxt,
            handle,
            name,
            size,
            written: 0,
            closed: false,
        })
    }

    /// Writes at most 61 bytes.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), BrickError> {
        let accepted = self.nxt.write(self.handle, data)? as usize;
        if accepted != data.len() {
            return Err(ProtocolError::ShortWrite {
                expected: data.len(),
                actual: accepted,
            }
            .into());
        }
        self.written += data.len() as u32;
        Ok(())
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn close(mut self) -> Result<u32, BrickError> {
        self.closed = true;
        self.nxt.close_file(self.handle)?;
        debug!(name = %self.name, bytes = self.written, size = self.size, "closed brick file");
        Ok(self.written)
    }
}

impl<'a, C: Channel> Drop for NxtUploadSession<'a, C> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.nxt.close_file(self.handle) {
                warn!(name = %self.name, error = %e, "could not close abandoned brick file");
            }
        }
    }
}

/// Fills `buf` from `reader`, stopping early only at end of input.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn transfer<C: Channel, R: Read>(
    nxt: &mut NxtProtocol<C>,
    name: &Filename,
    reader: &mut R,
    size: u32,
    flags: UploadFlags,
) -> Result<u32, BrickError> {
    if flags.contains(UploadFlags::OVERWRITE) {
        nxt.delete_file(name)?;
    }

    let mut session = NxtUploadSession::open(nxt, name.clone(), size)?;
    let mut buf = [0u8; MAX_WRITE_CHUNK];
    loop {
        let read = read_chunk(reader, &mut buf).map_err(|e| BrickError::LocalFile {
            path: name.as_str().into(),
            source: e,
        })?;
        if read == 0 {
            break;
        }
        session.write_chunk(&buf[..read])?;
    }
    session.close()
}

/// Uploads `size` bytes from `reader` as `name`, then plays the feedback
/// sound if asked. A failing feedback sound never hides the upload result.
pub fn upload_nxt<C: Channel, R: Read>(
    nxt: &mut NxtProtocol<C>,
    name: &Filename,
    reader: &mut R,
    size: u32,
    flags: UploadFlags,
) -> Result<u32, BrickError> {
    let result = transfer(nxt, name, reader, size, flags);

    if flags.contains(UploadFlags::PLAY_SOUND) {
        let sound = if result.is_ok() { CONFIRM_SOUND } else { ERROR_SOUND };
        if let Err(e) = nxt.play_sound_file(sound, false) {
            warn!(sound, error = %e, "could not play upload feedback sound");
        }
    }

    match &result {
        Ok(bytes) => info!(%name, bytes, "upload complete"),
        Err(e) => warn!(%name, error = %e, "upload failed"),
    }
    result
}

/// Uploads a local file under its basename.
pub fn upload_nxt_file<C: Channel>(
    nxt: &mut NxtProtocol<C>,
    path: &Path,
    flags: UploadFlags,
) -> Result<u32, BrickError> {
    let name = Filename::from_local_path(path, None)?;
    let local_error = |e| BrickError::LocalFile {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(local_error)?;
    let len = file.metadata().map_err(local_error)?.len();
    let size = u32::try_from(len).map_err(|_| {
        local_error(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "file is too large for the brick",
        ))
    })?;

    upload_nxt(nxt, &name, &mut file, size, flags)
}

/// Outcome of a firmware upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadReport {
    pub bytes: usize,
    pub elapsed: Duration,
}

impl UploadReport {
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            self.bytes as f64
        }
    }
}

/// Flashes `image`: program mode, erase, write in 64 byte clusters, then
/// return to user code. `progress` sees `(clusters written, total)`.
pub fn upload_vex_firmware<C: Channel>(
    pic: &mut PicProtocol<C>,
    image: &FirmwareImage,
    program_mode: &mut dyn ProgramMode,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<UploadReport, BrickError> {
    program_mode.enter(pic.channel_mut())?;

    info!(start = image.start(), end = image.end(), "erasing program memory");
    pic.erase_program_memory(image.start(), image.end())?;

    let total = image.cluster_count();
    let started = Instant::now();
    for (i, (address, cluster)) in image.clusters().enumerate() {
        pic.write_program_memory(address, cluster)?;
        progress(i + 1, total);
    }
    let report = UploadReport {
        bytes: image.data().len(),
        elapsed: started.elapsed(),
    };
    info!(
        bytes = report.bytes,
        rate = %format!("{:.0} bytes/sec", report.bytes_per_second()),
        "program memory written"
    );

    pic.return_to_user_code()?;
    Ok(report)
}
