use log::{debug, warn};

/// Disable core dumps so decrypted credentials never land in a core file.
///
/// Calls `prctl(PR_SET_DUMPABLE, 0)` and sets `RLIMIT_CORE` to zero. Failures
/// are logged, the run continues.
#[cfg(target_os = "linux")]
pub fn disable_core_dumps() {
    debug!("Disabling core dumps with prctl(PR_SET_DUMPABLE=0) and RLIMIT_CORE=0");

    let ret = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
    if ret != 0 {
        warn!(
            "failed to set PR_SET_DUMPABLE=0: {}",
            std::io::Error::last_os_error()
        );
    }

    // Also covers the case where dumpable is re-enabled by a setuid exec.
    let rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };
    if ret != 0 {
        warn!(
            "failed to set RLIMIT_CORE=0: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn disable_core_dumps() {
    warn!("Not disabling core dumps: only supported on Linux");
}

/// Warns when `path` is readable by group or others. Used for the plaintext
/// key-management file and the operator key.
#[cfg(unix)]
pub fn warn_if_loose_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                "'{}' is accessible to other users (mode {:04o}); consider restricting to 0600",
                path.display(),
                mode & 0o7777
            );
        }
    }
}

#[cfg(not(unix))]
pub fn warn_if_loose_permissions(_path: &std::path::Path) {}
