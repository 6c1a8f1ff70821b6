//! Boot disk discovery and flushing.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Flush buffer cache of a block device.
const BLKFLSBUF: nix::sys::ioctl::ioctl_num_type = nix::request_code_none!(0x12, 97);

#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    #[error("read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("boot disk not found")]
    NotFound,

    #[error("open {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("flush {path}: {source}")]
    Flush { path: String, source: io::Error },
}

/// Find the block device backing `/`.
///
/// Uses the root entry of `<proc_root>/mounts`, falling back to `root=` on
/// the kernel command line when the mount source is the `/dev/root` alias.
pub fn boot_disk(proc_root: &Path) -> Result<PathBuf, DiskError> {
    let mounts = read(&proc_root.join("mounts"))?;
    if let Some(device) = root_from_mounts(&mounts) {
        return Ok(PathBuf::from(device));
    }

    let cmdline = read(&proc_root.join("cmdline"))?;
    root_from_cmdline(&cmdline)
        .map(PathBuf::from)
        .ok_or(DiskError::NotFound)
}

/// Write back dirty pages of `device` and drop its buffer cache.
pub fn flush_disk(device: &Path) -> Result<(), DiskError> {
    let file = File::open(device).map_err(|e| DiskError::Open {
        path: device.display().to_string(),
        source: e,
    })?;
    let flush_err = |source: io::Error| DiskError::Flush {
        path: device.display().to_string(),
        source,
    };

    file.sync_all().map_err(flush_err)?;
    // SAFETY: the fd is open for the lifetime of `file`; BLKFLSBUF takes no argument.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKFLSBUF) };
    if ret < 0 {
        return Err(flush_err(io::Error::last_os_error()));
    }
    Ok(())
}

fn read(path: &Path) -> Result<String, DiskError> {
    std::fs::read_to_string(path).map_err(|e| DiskError::Read {
        path: path.display().to_string(),
        source: e,
    })
}

/// Source device of the last mount on `/`, if it is a real device node.
fn root_from_mounts(mounts: &str) -> Option<&str> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            (target == "/").then_some(source)
        })
        .next_back()
        .filter(|source| source.starts_with("/dev/") && *source != "/dev/root")
}

fn root_from_cmdline(cmdline: &str) -> Option<&str> {
    cmdline
        .split_whitespace()
        .filter_map(|arg| arg.strip_prefix("root="))
        .next_back()
        .filter(|device| device.starts_with("/dev/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
rootfs / rootfs rw 0 0
/dev/vda2 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/vdb /data ext4 rw 0 0
";

    #[test]
    fn root_device_from_mounts() {
        assert_eq!(root_from_mounts(MOUNTS), Some("/dev/vda2"));
    }

    #[test]
    fn dev_root_alias_is_not_trusted() {
        assert_eq!(root_from_mounts("/dev/root / ext4 rw 0 0\n"), None);
        assert_eq!(root_from_mounts("overlay / overlay rw 0 0\n"), None);
    }

    #[test]
    fn root_device_from_cmdline() {
        assert_eq!(
            root_from_cmdline("console=ttyS0 root=/dev/vda1 rw quiet\n"),
            Some("/dev/vda1")
        );
        assert_eq!(root_from_cmdline("root=PARTUUID=abcd rw"), None);
        assert_eq!(root_from_cmdline("console=ttyS0"), None);
    }

    #[test]
    fn boot_disk_prefers_mounts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mounts"), MOUNTS).unwrap();
        std::fs::write(dir.path().join("cmdline"), "root=/dev/vdz").unwrap();
        assert_eq!(boot_disk(dir.path()).unwrap(), PathBuf::from("/dev/vda2"));
    }

    #[test]
    fn boot_disk_falls_back_to_cmdline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mounts"), "/dev/root / ext4 rw 0 0\n").unwrap();
        std::fs::write(dir.path().join("cmdline"), "root=/dev/vda rw").unwrap();
        assert_eq!(boot_disk(dir.path()).unwrap(), PathBuf::from("/dev/vda"));
    }

    #[test]
    fn boot_disk_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mounts"), "overlay / overlay rw 0 0\n").unwrap();
        std::fs::write(dir.path().join("cmdline"), "console=ttyS0").unwrap();
        assert!(matches!(boot_disk(dir.path()), Err(DiskError::NotFound)));
    }

    #[test]
    fn boot_disk_without_procfs() {
        let err = boot_disk(Path::new("/nonexistent/proc")).unwrap_err();
        assert!(matches!(err, DiskError::Read { .. }));
    }

    #[test]
    fn flush_request_code() {
        assert_eq!(BLKFLSBUF, 0x1261);
    }

    #[test]
    fn flush_missing_device() {
        let err = flush_disk(Path::new("/nonexistent/vda")).unwrap_err();
        assert!(matches!(err, DiskError::Open { .. }));
    }

    #[test]
    fn flush_regular_file_fails_on_ioctl() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = flush_disk(file.path()).unwrap_err();
        assert!(matches!(err, DiskError::Flush { .. }));
    }
}
