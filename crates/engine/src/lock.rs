//! Whole-file advisory locking.
//!
//! Readers take a shared lock, writers an exclusive one, never blocking.
//! Three primitives are tried in order: `flock`, `lockf`, `fcntl`. An answer
//! of "somebody else holds it" ends the search; any other failure moves on to
//! the next primitive. The primitive that succeeded is remembered so release
//! uses the same one.

use std::fs::File;
use std::io;

/// Which primitive holds the lock, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    None,
    Flock,
    Lockf,
    Fcntl,
}

#[cfg(unix)]
fn is_contention(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EWOULDBLOCK) | Some(libc::EAGAIN) | Some(libc::EACCES) | Some(libc::EDEADLK)
    )
}

#[cfg(unix)]
fn fcntl_lock(fd: libc::c_int, l_type: libc::c_int) -> io::Result<()> {
    // SAFETY: an all-zero flock is a valid value; the fields that matter are
    // set below. The struct outlives the call.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = 0;
    fl.l_len = 0;
    // SAFETY: fd is a valid descriptor and `fl` is a live, initialised flock.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETLK, &fl as *const libc::flock) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Locks `file` without blocking.
#[cfg(unix)]
pub(crate) fn try_lock(file: &File, exclusive: bool) -> io::Result<LockKind> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
    // SAFETY: fd is a valid descriptor owned by `file`.
    if unsafe { libc::flock(fd, op | libc::LOCK_NB) } == 0 {
        return Ok(LockKind::Flock);
    }
    let err = io::Error::last_os_error();
    if is_contention(&err) {
        return Err(err);
    }

    // lockf can only express exclusive locks.
    if exclusive {
        // SAFETY: as above.
        if unsafe { libc::lockf(fd, libc::F_TLOCK, 0) } == 0 {
            return Ok(LockKind::Lockf);
        }
        let err = io::Error::last_os_error();
        if is_contention(&err) {
            return Err(err);
        }
    }

    let l_type = if exclusive { libc::F_WRLCK } else { libc::F_RDLCK };
    fcntl_lock(fd, l_type as libc::c_int).map(|()| LockKind::Fcntl)
}

#[cfg(not(unix))]
pub(crate) fn try_lock(_file: &File, _exclusive: bool) -> io::Result<LockKind> {
    Ok(LockKind::None)
}

/// Releases a lock taken by [`try_lock`]. Failures are ignored; closing the
/// descriptor drops the lock anyway.
#[cfg(unix)]
pub(crate) fn unlock(file: &File, kind: LockKind) {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid descriptor owned by `file`.
    match kind {
        LockKind::None => {}
        LockKind::Flock => unsafe {
            libc::flock(fd, libc::LOCK_UN);
        },
        LockKind::Lockf => unsafe {
            libc::lockf(fd, libc::F_ULOCK, 0);
        },
        LockKind::Fcntl => {
            let _ = fcntl_lock(fd, libc::F_UNLCK as libc::c_int);
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn unlock(_file: &File, _kind: LockKind) {}
