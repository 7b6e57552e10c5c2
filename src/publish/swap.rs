//! Atomic replacement of a module's activation link.

use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::cache::unique_suffix;

/// Point `link_path` at `target`, replacing any existing link in one step.
///
/// The new link is created under a hidden temp name in the same directory and
/// renamed over `link_path`, so readers see the old target or the new one and
/// nothing in between. `link_path` must not be a real directory.
pub fn atomic_symlink_swap(link_path: &Path, target: &Path) -> io::Result<()> {
    let name = link_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", link_path.display()),
            )
        })?;

    // A leftover temp link from a crashed deploy just costs another suffix.
    let temp_path = loop {
        let candidate = link_path.with_file_name(format!(".{}.tmp.{}", name, unique_suffix()));
        match symlink(target, &candidate) {
            Ok(()) => break candidate,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    };

    std::fs::rename(&temp_path, link_path).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}

/// Where `link_path` points, or `None` when it is missing or not a symlink.
pub fn read_symlink_target(link_path: &Path) -> io::Result<Option<PathBuf>> {
    match std::fs::read_link(link_path) {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn creates_missing_link() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("abc123");
        let link = temp_dir.path().join("rails");

        std::fs::create_dir(&target).unwrap();
        atomic_symlink_swap(&link, &target).unwrap();
        assert!(link.is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn replaces_existing_link() {
        let temp_dir = TempDir::new().unwrap();
        let old = temp_dir.path().join("abc123");
        let new = temp_dir.path().join("def456");
        let link = temp_dir.path().join("rails");

        std::fs::create_dir(&old).unwrap();
        std::fs::create_dir(&new).unwrap();
        atomic_symlink_swap(&link, &old).unwrap();
        atomic_symlink_swap(&link, &new).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), new);
    }

    #[test]
    fn leaves_no_temp_links_behind() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("abc123");
        let link = temp_dir.path().join("jquery.js");
        std::fs::create_dir(&target).unwrap();

        atomic_symlink_swap(&link, &target).unwrap();
        atomic_symlink_swap(&link, &target).unwrap();

        let names: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(names.contains(&"jquery.js".to_string()));
    }

    #[test]
    fn concurrent_swaps_always_leave_a_valid_link() {
        let temp_dir = TempDir::new().unwrap();
        let link = temp_dir.path().join("solr");
        let revisions: Vec<PathBuf> = (1..=8)
            .map(|i| {
                let slot = temp_dir.path().join(format!("r{}", i));
                std::fs::create_dir(&slot).unwrap();
                slot
            })
            .collect();
        atomic_symlink_swap(&link, &revisions[0]).unwrap();
        let barrier = Barrier::new(revisions.len());

        thread::scope(|s| {
            for slot in &revisions {
                let (barrier, link) = (&barrier, &link);
                s.spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        atomic_symlink_swap(link, slot).unwrap();
                        assert!(link.is_dir());
                    }
                });
            }
        });

        assert!(revisions.contains(&std::fs::read_link(&link).unwrap()));
    }

    #[test]
    fn read_symlink_target_of_plain_paths() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();

        assert_eq!(read_symlink_target(&temp_dir.path().join("missing")).unwrap(), None);
        assert_eq!(read_symlink_target(&file).unwrap(), None);
    }
}
