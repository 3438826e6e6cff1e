//! Native registry access through the Win32 API.

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr;

use windows_sys::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS,
    WIN32_ERROR,
};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegEnumValueW, RegOpenKeyExW, RegQueryValueExW, HKEY,
    HKEY_CLASSES_ROOT, HKEY_CURRENT_CONFIG, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS,
    KEY_READ,
};

use super::registry::{RegistryHive, RegistryPath, RegistryValue, RootKey};
use super::ResolveError;

// Value names may be up to 16383 characters; key names up to 255.
const MAX_NAME_CHARS: usize = 16_384;

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsHive;

/// An open key handle, closed on drop.
#[derive(Debug)]
pub struct OwnedKey(HKEY);

impl Drop for OwnedKey {
    fn drop(&mut self) {
        // SAFETY: the handle came from RegOpenKeyExW and is closed exactly once.
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

// SAFETY: registry handles are process-wide and may be used from any thread.
unsafe impl Send for OwnedKey {}
unsafe impl Sync for OwnedKey {}

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn predefined(root: RootKey) -> HKEY {
    match root {
        RootKey::ClassesRoot => HKEY_CLASSES_ROOT,
        RootKey::CurrentConfig => HKEY_CURRENT_CONFIG,
        RootKey::CurrentUser => HKEY_CURRENT_USER,
        RootKey::LocalMachine => HKEY_LOCAL_MACHINE,
        RootKey::Users => HKEY_USERS,
    }
}

fn resolve_error(code: WIN32_ERROR) -> ResolveError {
    match code {
        ERROR_FILE_NOT_FOUND => ResolveError::NotFound,
        ERROR_ACCESS_DENIED => ResolveError::AccessDenied,
        other => ResolveError::Other(io::Error::from_raw_os_error(other as i32).to_string()),
    }
}

fn io_error(code: WIN32_ERROR) -> io::Error {
    io::Error::from_raw_os_error(code as i32)
}

fn open(parent: HKEY, sub_key: &str) -> Result<OwnedKey, ResolveError> {
    let name = wide(sub_key);
    let mut handle: HKEY = 0;
    // SAFETY: `name` is NUL-terminated and `handle` is a valid out pointer.
    let status = unsafe { RegOpenKeyExW(parent, name.as_ptr(), 0, KEY_READ, &mut handle) };
    match status {
        ERROR_SUCCESS => Ok(OwnedKey(handle)),
        code => Err(resolve_error(code)),
    }
}

fn enumerate(mut next: impl FnMut(u32, &mut [u16], &mut u32) -> WIN32_ERROR) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut buffer = vec![0u16; MAX_NAME_CHARS];
    for index in 0u32.. {
        let mut len = buffer.len() as u32;
        match next(index, &mut buffer, &mut len) {
            ERROR_SUCCESS => names.push(String::from_utf16_lossy(&buffer[..len as usize])),
            ERROR_NO_MORE_ITEMS => break,
            code => return Err(io_error(code)),
        }
    }
    Ok(names)
}

impl RegistryHive for WindowsHive {
    type Key = OwnedKey;

    fn open_key(&self, path: &RegistryPath) -> Result<OwnedKey, ResolveError> {
        open(predefined(path.root), &path.sub_key)
    }

    fn open_sub_key(&self, parent: &OwnedKey, name: &str) -> Result<OwnedKey, ResolveError> {
        open(parent.0, name)
    }

    fn sub_key_names(&self, key: &OwnedKey) -> io::Result<Vec<String>> {
        enumerate(|index, buffer, len| {
            // SAFETY: `buffer` holds `len` UTF-16 units; optional outputs are null.
            unsafe {
                RegEnumKeyExW(
                    key.0,
                    index,
                    buffer.as_mut_ptr(),
                    len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            }
        })
    }

    fn value_names(&self, key: &OwnedKey) -> io::Result<Vec<String>> {
        enumerate(|index, buffer, len| {
            // SAFETY: as above; type and data outputs are not requested.
            unsafe {
                RegEnumValueW(
                    key.0,
                    index,
                    buffer.as_mut_ptr(),
                    len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            }
        })
    }

    fn value_exists(&self, key: &OwnedKey, name: &str) -> Result<bool, ResolveError> {
        let name = wide(name);
        // SAFETY: only existence is queried; all outputs are null.
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                name.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        match status {
            ERROR_SUCCESS => Ok(true),
            ERROR_FILE_NOT_FOUND => Ok(false),
            code => Err(resolve_error(code)),
        }
    }

    fn read_value(&self, key: &OwnedKey, name: &str) -> io::Result<RegistryValue> {
        let name = wide(name);
        let mut data = Vec::new();
        loop {
            let mut type_code = 0u32;
            let mut size = data.len() as u32;
            let data_ptr = if data.is_empty() {
                ptr::null_mut()
            } else {
                data.as_mut_ptr()
            };
            // SAFETY: `data` has room for `size` bytes, or is null to query the size.
            let status = unsafe {
                RegQueryValueExW(
                    key.0,
                    name.as_ptr(),
                    ptr::null(),
                    &mut type_code,
                    data_ptr,
                    &mut size,
                )
            };
            match status {
                ERROR_SUCCESS if data_ptr.is_null() && size > 0 => data.resize(size as usize, 0),
                ERROR_SUCCESS => {
                    data.truncate(size as usize);
                    return Ok(RegistryValue { type_code, data });
                }
                // The value grew between the size query and the read.
                ERROR_MORE_DATA => data.resize(size as usize, 0),
                code => return Err(io_error(code)),
            }
        }
    }
}
