use std::ffi::OsStr;
use std::str::FromStr;

use nix::sys::utsname::uname;
use thiserror::Error;

/// Host compatibility gate failures.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("unsupported architecture")]
    UnsupportedArch,
    #[error("unsupported operating system")]
    UnsupportedOs,
    #[error("unsupported kernel version")]
    UnsupportedKernel,
}

const MIN_KERNEL: f32 = 4.8;

/// Verifies kernel, architecture and release before any side effect.
pub fn check_host() -> Result<(), crate::Error> {
    let uts = uname()?;
    log::debug!(
        "Detected OS: {:?} {:?} {:?}",
        uts.sysname(),
        uts.release(),
        uts.machine()
    );
    if uts.machine() != OsStr::new("x86_64") {
        return Err(ProbeError::UnsupportedArch.into());
    }
    if uts.sysname() != OsStr::new("Linux") {
        return Err(ProbeError::UnsupportedOs.into());
    }
    let release = uts.release().to_str().ok_or("Invalid kernel release")?;
    let major = kernel_major(release)
        .ok_or_else(|| format!("Cannot parse kernel release: {release}"))?;
    if major < MIN_KERNEL {
        return Err(ProbeError::UnsupportedKernel.into());
    }
    Ok(())
}

/// First two release components parsed as one float, so "4.10" orders below "4.8".
fn kernel_major(release: &str) -> Option<f32> {
    let mut parts = release.splitn(3, '.');
    let major = parts.next()?;
    let minor = parts.next()?;
    f32::from_str(&format!("{major}.{minor}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_minor_as_float() {
        assert_eq!(kernel_major("6.1.0-13-amd64"), Some(6.1));
        assert_eq!(kernel_major("4.8.0"), Some(4.8));
        assert_eq!(kernel_major("4.10.3"), Some(4.10));
        assert!(kernel_major("4.10.3").unwrap() < MIN_KERNEL);
        assert_eq!(kernel_major("sandbox"), None);
        assert_eq!(kernel_major("5"), None);
    }

    #[test]
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    fn accepts_current_host() {
        check_host().unwrap();
    }
}
