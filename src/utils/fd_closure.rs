/// File descriptor hygiene across exec
///
/// Every descriptor below the soft RLIMIT_NOFILE is flagged close-on-exec
/// before the process image is replaced, so nothing leaks into the new image.
use crate::config::types::{Result, SupervisorError};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::os::unix::io::RawFd;

/// Highest descriptor number representable; RLIM_INFINITY clamps here.
fn clamp_limit(limit: u64) -> RawFd {
    limit.min(RawFd::MAX as u64) as RawFd
}

/// Call `mark` for every descriptor in `[0, limit)`.
pub fn for_each_below(limit: u64, mut mark: impl FnMut(RawFd)) {
    for fd in 0..clamp_limit(limit) {
        mark(fd);
    }
}

/// Set FD_CLOEXEC on `fd`. Closed descriptors (EBADF) are ignored.
pub fn set_cloexec(fd: RawFd) {
    let _ = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));
}

pub fn is_cloexec(fd: RawFd) -> Result<bool> {
    let bits = fcntl(fd, FcntlArg::F_GETFD)
        .map_err(|e| SupervisorError::Filesystem(format!("F_GETFD on fd {}: {}", fd, e)))?;
    Ok(FdFlag::from_bits_truncate(bits).contains(FdFlag::FD_CLOEXEC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn visits_every_descriptor_below_limit() {
        let mut seen = Vec::new();
        for_each_below(5, |fd| seen.push(fd));
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn zero_limit_visits_nothing() {
        let mut count = 0;
        for_each_below(0, |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn infinite_limit_is_clamped() {
        assert_eq!(clamp_limit(u64::MAX), RawFd::MAX);
        assert_eq!(clamp_limit(1024), 1024);
    }

    #[test]
    fn set_cloexec_marks_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(dir.path().join("held")).unwrap();
        let fd = file.as_raw_fd();

        // std opens with O_CLOEXEC already; clear it to observe the change.
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).unwrap();
        assert!(!is_cloexec(fd).unwrap());

        set_cloexec(fd);
        assert!(is_cloexec(fd).unwrap());
    }

    #[test]
    fn set_cloexec_ignores_closed_descriptor() {
        set_cloexec(RawFd::MAX - 1);
    }
}
