#[cfg(test)]
use std::sync::Mutex;

/// Mask applied while the workspace and credential files are created: no
/// group or other permission bits survive.
pub const PRIVATE_UMASK: libc::mode_t = 0o077;

/// RAII guard that temporarily sets the process umask.
///
/// Restores the previous umask when dropped.
/// **Note:** `umask` is process-global; avoid using in concurrent threads.
pub struct UmaskGuard {
    previous: libc::mode_t,
}

impl UmaskGuard {
    /// Set the process umask to `mask` and restore it on drop.
    pub fn set(mask: libc::mode_t) -> Self {
        let previous = unsafe { libc::umask(mask) };
        Self { previous }
    }

    /// Shorthand for `UmaskGuard::set(PRIVATE_UMASK)`.
    pub fn private() -> Self {
        Self::set(PRIVATE_UMASK)
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::umask(self.previous);
        }
    }
}

#[cfg(test)]
pub(crate) static UMASK_LOCK: Mutex<()> = Mutex::new(());
