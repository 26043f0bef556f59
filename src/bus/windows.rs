use super::BusTransport;
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::PathBuf;
use std::sync::RwLock;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::IO::DeviceIoControl;

/// Interface path the bus driver registers under its class GUID
/// {F679F562-3164-42CE-A4DB-E7DDBE723909} on a default install.
pub const DEFAULT_BUS_PATH: &str =
    r"\\?\root#system#0001#{f679f562-3164-42ce-a4db-e7ddbe723909}";

/// Bus driver reached with `DeviceIoControl` on its interface path.
pub struct DeviceNodeTransport {
    path: PathBuf,
    // Raw handle value; HANDLE itself is not Send.
    handle: RwLock<Option<isize>>,
}

impl DeviceNodeTransport {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_BUS_PATH)),
            handle: RwLock::new(None),
        }
    }
}

impl BusTransport for DeviceNodeTransport {
    fn open(&self) -> std::io::Result<()> {
        let wide: Vec<u16> = self
            .path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        }
        .map_err(|e| std::io::Error::other(format!("{}: {}", self.path.display(), e)))?;

        let previous = self
            .handle
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle.0 as isize);
        if let Some(raw) = previous {
            unsafe {
                let _ = CloseHandle(HANDLE(raw as *mut c_void));
            }
        }
        Ok(())
    }

    fn close(&self) {
        if let Some(raw) = self.handle.write().unwrap_or_else(|e| e.into_inner()).take() {
            unsafe {
                let _ = CloseHandle(HANDLE(raw as *mut c_void));
            }
        }
    }

    fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> std::io::Result<usize> {
        let guard = self.handle.read().unwrap_or_else(|e| e.into_inner());
        let raw = guard
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "bus not open"))?;

        let mut transferred = 0u32;
        let output_ptr = if output.is_empty() {
            None
        } else {
            Some(output.as_mut_ptr() as *mut c_void)
        };
        unsafe {
            DeviceIoControl(
                HANDLE(raw as *mut c_void),
                code,
                Some(input.as_ptr() as *const c_void),
                input.len() as u32,
                output_ptr,
                output.len() as u32,
                Some(&mut transferred),
                None,
            )
        }
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(transferred as usize)
    }
}
