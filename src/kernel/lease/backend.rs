//! Host enforcement of leases and path grants.
//!
//! OpenBSD enforces both with pledge(2)/unveil(2). Linux has no direct
//! equivalent: grants are validated against the real filesystem, and the
//! runtime lease sets `PR_SET_NO_NEW_PRIVS`. Everywhere the journal and the
//! type-state sequencer still enforce the ordering.

use super::{AccessMode, PromiseSet};
use crate::config::types::{Result, SupervisorError};
use std::path::Path;

pub trait PrivilegeBackend: Send {
    fn backend_name(&self) -> &str;
    fn pledge(&mut self, promises: PromiseSet) -> Result<()>;
    fn unveil(&mut self, path: &Path, mode: AccessMode) -> Result<()>;
}

/// Backend for the running host.
#[derive(Debug, Default)]
pub struct HostBackend;

impl HostBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "openbsd")]
impl PrivilegeBackend for HostBackend {
    fn backend_name(&self) -> &str {
        "pledge"
    }

    fn pledge(&mut self, promises: PromiseSet) -> Result<()> {
        use std::ffi::CString;

        let c_promises = CString::new(promises.to_string())
            .map_err(|_| SupervisorError::Privilege("promise string contains NUL".to_string()))?;
        // SAFETY: valid NUL-terminated promise string; NULL leaves execpromises untouched.
        let rc = unsafe { libc::pledge(c_promises.as_ptr(), std::ptr::null()) };
        if rc == -1 {
            return Err(SupervisorError::Privilege(format!(
                "pledge(\"{}\"): {}",
                promises,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn unveil(&mut self, path: &Path, mode: AccessMode) -> Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            SupervisorError::PathGrant(format!("{} contains NUL", path.display()))
        })?;
        let c_mode = CString::new(mode.as_unveil_str())
            .map_err(|_| SupervisorError::PathGrant("mode contains NUL".to_string()))?;
        // SAFETY: both arguments are valid NUL-terminated strings.
        let rc = unsafe { libc::unveil(c_path.as_ptr(), c_mode.as_ptr()) };
        if rc == -1 {
            return Err(SupervisorError::PathGrant(format!(
                "unveil({}, \"{}\"): {}",
                path.display(),
                mode.as_unveil_str(),
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

#[cfg(not(target_os = "openbsd"))]
impl PrivilegeBackend for HostBackend {
    fn backend_name(&self) -> &str {
        if cfg!(target_os = "linux") {
            "no_new_privs"
        } else {
            "journal"
        }
    }

    fn pledge(&mut self, promises: PromiseSet) -> Result<()> {
        log::debug!("Lease requested: \"{}\"", promises);

        #[cfg(target_os = "linux")]
        if !promises.contains(super::Promise::Unveil) {
            set_no_new_privs()?;
        }

        Ok(())
    }

    fn unveil(&mut self, path: &Path, mode: AccessMode) -> Result<()> {
        // unveil(2) needs the parent directory to exist; keep the same
        // failure surface so misconfigured paths fail at grant time.
        let anchor = if path.exists() {
            Some(path)
        } else {
            path.parent().filter(|p| p.as_os_str().is_empty() || p.is_dir())
        };

        if anchor.is_none() {
            return Err(SupervisorError::PathGrant(format!(
                "{}: parent directory does not exist",
                path.display()
            )));
        }

        log::debug!("Path granted: {} \"{}\"", path.display(), mode.as_unveil_str());
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn set_no_new_privs() -> Result<()> {
    let (on, unused): (libc::c_ulong, libc::c_ulong) = (1, 0);

    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) is safe and idempotent. The
    // kernel rejects nonzero trailing arguments, so they are passed full width.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, on, unused, unused, unused) };
    if rc != 0 {
        return Err(SupervisorError::Privilege(format!(
            "prctl(PR_SET_NO_NEW_PRIVS): {}",
            std::io::Error::last_os_error()
        )));
    }
    log::debug!("no_new_privs set for runtime lease");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_backend_accepts_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = HostBackend::new();
        assert!(backend.unveil(Path::new("/"), AccessMode::Discover).is_ok());
        assert!(backend.unveil(dir.path(), AccessMode::Read).is_ok());
        assert!(backend
            .unveil(&dir.path().join("new.log"), AccessMode::WriteCreate)
            .is_ok());
    }

    #[cfg(not(target_os = "openbsd"))]
    #[test]
    fn host_backend_rejects_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = HostBackend::new();
        let err = backend
            .unveil(&dir.path().join("missing/dir/opmon.pid"), AccessMode::WriteCreate)
            .unwrap_err();
        assert!(matches!(err, SupervisorError::PathGrant(_)));
    }

    #[test]
    fn host_backend_accepts_startup_lease() {
        let mut backend = HostBackend::new();
        assert!(backend.pledge(PromiseSet::startup()).is_ok());
    }
}
