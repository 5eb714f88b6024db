// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Opening files with an access-pattern hint applied.

use std::fs::{File, OpenOptions};
use std::io::Result;
use std::path::Path;

use crate::AccessHint;

/// Opens `path` for reading and passes `hint` on to the operating system.
///
/// The hint is advisory. If the operating system rejects it the file is still returned.
pub(crate) fn open_for_read(path: &Path, hint: AccessHint) -> Result<File> {
    let mut options = OpenOptions::new();
    let _ = options.read(true);

    #[cfg(windows)]
    if hint == AccessHint::Sequential {
        use std::os::windows::fs::OpenOptionsExt;
        let _ = options.custom_flags(windows_sys::Win32::Storage::FileSystem::FILE_FLAG_SEQUENTIAL_SCAN);
    }

    let file = options.open(path)?;

    if hint == AccessHint::Sequential {
        advise_sequential(&file);
    }

    Ok(file)
}

#[cfg(target_os = "linux")]
fn advise_sequential(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: The descriptor is owned by `file`, which outlives the call. The call is
    // advisory and does not touch any memory.
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL) };
    if rc != 0 {
        tracing::event!(
            tracing::Level::WARN,
            message = "sequential access hint rejected",
            error = %std::io::Error::from_raw_os_error(rc)
        );
    }
}

// Windows applies the hint through the open flags above.
#[cfg(not(target_os = "linux"))]
fn advise_sequential(_file: &File) {}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn hint_does_not_change_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hinted.blob");
        std::fs::write(&path, b"same either way").unwrap();

        for hint in AccessHint::ALL {
            let mut content = Vec::new();
            let _ = open_for_read(&path, hint).unwrap().read_to_end(&mut content).unwrap();
            assert_eq!(content, b"same either way");
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = open_for_read(&dir.path().join("absent.blob"), AccessHint::Sequential);

        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::NotFound);
    }
}
