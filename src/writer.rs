// SPDX-License-Identifier: Apache-2.0 OR MIT
// Byte sinks for the output worker

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write as _};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Outcome of a sink write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// Every byte reached the sink.
    Success,
    /// Transient out-of-space condition; retry the same bytes later.
    TryLater,
    /// The sink is permanently broken; stop writing to it.
    GiveUp,
}

/// Abstract byte sink.
///
/// Implementations handle short writes and `EINTR` internally and map
/// their failures onto [`WriteResult`]. A returned `Err` is a failure
/// the sink cannot classify; the worker treats it as fatal. Dropping a
/// writer releases the underlying sink.
pub trait Writer: Send {
    fn write(&mut self, buffer: &[u8]) -> io::Result<WriteResult>;
}

/// File sink: created with mode 0644, positioned at the end.
pub struct FileWriter {
    file: File,
}

impl FileWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o644)
            .open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self { file })
    }
}

impl Writer for FileWriter {
    fn write(&mut self, mut buffer: &[u8]) -> io::Result<WriteResult> {
        while !buffer.is_empty() {
            match self.file.write(buffer) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buffer = &buffer[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return classify(e),
            }
        }
        Ok(WriteResult::Success)
    }
}

/// Map a write error onto the sink protocol. Out-of-space is worth
/// retrying; the listed errno values mean this descriptor will never
/// accept bytes again; anything else is the caller's fatal problem.
fn classify(err: io::Error) -> io::Result<WriteResult> {
    match err.raw_os_error() {
        Some(libc::ENOSPC) => Ok(WriteResult::TryLater),
        Some(
            libc::EFBIG | libc::EIO | libc::EPIPE | libc::ERANGE | libc::ECONNRESET
            | libc::EINVAL | libc::ENXIO | libc::EACCES | libc::ENETDOWN | libc::ENETUNREACH,
        ) => Ok(WriteResult::GiveUp),
        _ => Err(err),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Captures written bytes; optionally scripted to fail.
    pub(crate) struct CaptureWriter {
        pub data: Arc<Mutex<Vec<u8>>>,
        /// Results returned by successive writes; empty means Success.
        pub script: VecDeque<io::Result<WriteResult>>,
    }

    impl CaptureWriter {
        pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let data = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    data: Arc::clone(&data),
                    script: VecDeque::new(),
                },
                data,
            )
        }

        pub fn scripted(script: Vec<io::Result<WriteResult>>) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let (mut writer, data) = Self::new();
            writer.script = script.into();
            (writer, data)
        }
    }

    impl Writer for CaptureWriter {
        fn write(&mut self, buffer: &[u8]) -> io::Result<WriteResult> {
            match self.script.pop_front() {
                None | Some(Ok(WriteResult::Success)) => {
                    self.data.lock().unwrap().extend_from_slice(buffer);
                    Ok(WriteResult::Success)
                }
                Some(other) => other,
            }
        }
    }
}
