//! File-descriptor limit handling for unbounded memmap pooling.
//!
//! An unbounded pool keeps every mapping open; on platforms with a soft
//! RLIMIT_NOFILE below the hard limit, the first fd-exhaustion error
//! triggers one attempt to raise the soft limit before the open is retried.

use crate::error::{QuantError, Result};

/// Whether an I/O error reports file-descriptor exhaustion.
#[cfg(unix)]
pub(crate) fn is_fd_exhausted(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(not(unix))]
pub(crate) fn is_fd_exhausted(_err: &std::io::Error) -> bool {
    false
}

/// Raise the soft RLIMIT_NOFILE to the hard limit. Returns the resulting
/// soft limit.
#[cfg(unix)]
pub(crate) fn raise_nofile_limit() -> Result<u64> {
    // SAFETY: plain getrlimit/setrlimit calls on a zero-initialized struct.
    unsafe {
        let mut lim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
            return Err(QuantError::ResourceExhausted(
                "getrlimit(RLIMIT_NOFILE) failed".into(),
            ));
        }
        if lim.rlim_cur < lim.rlim_max {
            let prev = lim.rlim_cur;
            lim.rlim_cur = lim.rlim_max;
            if libc::setrlimit(libc::RLIMIT_NOFILE, &lim) != 0 {
                return Err(QuantError::ResourceExhausted(
                    "setrlimit(RLIMIT_NOFILE) failed".into(),
                ));
            }
            log::warn!(
                "raised open-file limit from {} to {} for unbounded memmap pooling",
                prev,
                lim.rlim_cur
            );
        }
        Ok(lim.rlim_cur as u64)
    }
}

#[cfg(not(unix))]
pub(crate) fn raise_nofile_limit() -> Result<u64> {
    Err(QuantError::ResourceExhausted(
        "cannot raise the open-file limit on this platform".into(),
    ))
}

/// Size of one memory page, used to align mapping offsets.
#[cfg(unix)]
pub(crate) fn page_size() -> u64 {
    use once_cell::sync::Lazy;
    static PAGE: Lazy<u64> = Lazy::new(|| {
        // SAFETY: sysconf has no preconditions.
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 { n as u64 } else { 4096 }
    });
    *PAGE
}

#[cfg(not(unix))]
pub(crate) fn page_size() -> u64 {
    4096
}
