use super::BusTransport;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::RwLock;

pub const DEFAULT_BUS_PATH: &str = "/dev/padbus";

/// Argument block for one bus request. The driver reads `input` and writes at
/// most `output_len` bytes to `output`, returning the count from `ioctl`.
#[repr(C)]
struct BusIoctl {
    input: *const u8,
    input_len: u32,
    output: *mut u8,
    output_len: u32,
}

/// Bus driver reached through a character device node.
pub struct DeviceNodeTransport {
    path: PathBuf,
    file: RwLock<Option<File>>,
}

impl DeviceNodeTransport {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_BUS_PATH)),
            file: RwLock::new(None),
        }
    }
}

impl BusTransport for DeviceNodeTransport {
    fn open(&self) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                std::io::Error::new(e.kind(), format!("{}: {}", self.path.display(), e))
            })?;
        *self.file.write().unwrap_or_else(|e| e.into_inner()) = Some(file);
        Ok(())
    }

    fn close(&self) {
        self.file.write().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> std::io::Result<usize> {
        // Shared lock: several workers may be inside an ioctl at once.
        let guard = self.file.read().unwrap_or_else(|e| e.into_inner());
        let file = guard
            .as_ref()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "bus not open"))?;

        let mut request = BusIoctl {
            input: input.as_ptr(),
            input_len: input.len() as u32,
            output: output.as_mut_ptr(),
            output_len: output.len() as u32,
        };

        let result = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                code as _,
                &mut request as *mut BusIoctl,
            )
        };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok((result as usize).min(output.len()))
    }
}
