//! Miscellaneous helpers.

use std::env;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
use std::path::PathBuf;


/// Check whether the file at `path` exists and is executable by the
/// current user.
pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(path) = CString::new(path.as_os_str().as_bytes()) else {
        return false
    };
    // SAFETY: `path` is a valid NUL terminated string.
    unsafe { libc::access(path.as_ptr(), libc::X_OK) == 0 }
}


/// Search the process' executable search path for a binary named `name`.
pub(crate) fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    /// Check that the test binary itself is reported as executable.
    #[test]
    fn executable_probing() {
        let exe = env::current_exe().unwrap();
        assert!(is_executable(&exe));
        assert!(!is_executable(Path::new("/dev/null/not-a-path")));
    }

    /// Make sure that well known binaries are discovered on $PATH and
    /// non-existent ones are not.
    #[test]
    fn path_search() {
        assert!(find_in_path("sh").is_some());
        assert_eq!(find_in_path("addrsym-no-such-helper-binary"), None);
    }
}
