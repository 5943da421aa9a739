//! Opening, creating and persisting container files.
//!
//! A [`ContainerFile`] reads the whole file into an in-memory object tree
//! when it is opened. Groups, datasets and attributes are changed in that
//! tree, and [`ContainerFile::flush`] or [`ContainerFile::close`] writes it
//! back as a complete file image. The image goes to a temporary file in the
//! same directory first and then replaces the target by rename, so an
//! interrupted write never leaves a truncated container behind.

use std::cell::{Cell, Ref, RefCell};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hdf5_access_format::file_writer::write_file;
use hdf5_access_format::signature::{has_signature, HDF5_SIGNATURE};
use hdf5_access_format::{FormatError, ObjectTree};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::group::GroupHandle;
use crate::handle::{HandleKind, Handles};
use crate::property_list::FileAccessProps;

/// An open container file.
pub struct ContainerFile {
    path: PathBuf,
    props: FileAccessProps,
    tree: RefCell<ObjectTree>,
    handles: Handles,
    dirty: Cell<bool>,
    closed: bool,
}

impl ContainerFile {
    /// Create a new, empty container at `path`, replacing any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with(path, FileAccessProps::default())
    }

    /// Create a new, empty container with explicit access properties.
    pub fn create_with<P: AsRef<Path>>(path: P, props: FileAccessProps) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if props.read_only {
            return Err(Error::ReadOnly(path));
        }
        let file = ContainerFile {
            path,
            props,
            tree: RefCell::new(ObjectTree::new()),
            handles: Handles::default(),
            dirty: Cell::new(false),
            closed: false,
        };
        file.save()?;
        debug!(path = %file.path.display(), "created container");
        Ok(file)
    }

    /// Open an existing container for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, FileAccessProps::default())
    }

    /// Open an existing container with explicit access properties.
    pub fn open_with<P: AsRef<Path>>(path: P, props: FileAccessProps) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut bytes = Vec::new();
        OpenOptions::new()
            .read(true)
            .write(!props.read_only)
            .open(&path)?
            .read_to_end(&mut bytes)?;

        let tree = ObjectTree::load(&bytes, props.verify_checksums).map_err(|e| match e {
            FormatError::SignatureNotFound => Error::NotHdf5 {
                path: path.clone(),
                source: e,
            },
            other => Error::Format(other),
        })?;
        for dropped in tree.dropped_attributes() {
            warn!(attribute = %dropped, "skipped attribute holding object references");
        }
        debug!(
            path = %path.display(),
            size = bytes.len(),
            read_only = props.read_only,
            "opened container"
        );
        Ok(ContainerFile {
            path,
            props,
            tree: RefCell::new(tree),
            handles: Handles::default(),
            dirty: Cell::new(false),
            closed: false,
        })
    }

    /// Whether `path` names a readable container file.
    ///
    /// Looks for the format signature at offset 0 and after a user block
    /// of 512, 1024, 2048, ... bytes. Never fails; any error reads as
    /// `false`.
    pub fn can_access<P: AsRef<Path>>(path: P) -> bool {
        sniff_signature(path.as_ref()).unwrap_or(false)
    }

    /// Persist pending changes and release the file.
    ///
    /// All group and dataset handles borrow the file, so they are
    /// necessarily closed before this can be called.
    pub fn close(mut self) -> Result<()> {
        let result = self.flush();
        self.closed = true;
        debug!(path = %self.path.display(), "closed container");
        result
    }

    /// Write pending changes to disk. A no-op when nothing changed.
    pub fn flush(&self) -> Result<()> {
        if self.dirty.get() {
            self.save()?;
            self.dirty.set(false);
        }
        Ok(())
    }

    /// The root group. It needs no separate close; closing the file is
    /// sufficient.
    pub fn root_group(&self) -> GroupHandle<'_> {
        let root = self.tree.borrow().root();
        GroupHandle::root(self, root)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.props.read_only
    }

    /// Whether there are changes not yet written to disk.
    pub fn is_modified(&self) -> bool {
        self.dirty.get()
    }

    /// Number of handles currently open on this file, the root group
    /// excluded.
    pub fn open_handle_count(&self) -> usize {
        self.handles.table().len()
    }

    /// Number of open handles of one kind.
    pub fn open_handle_count_of(&self, kind: HandleKind) -> usize {
        self.handles.table().count(kind)
    }

    pub(crate) fn handles(&self) -> &Handles {
        &self.handles
    }

    pub(crate) fn tree(&self) -> Ref<'_, ObjectTree> {
        self.tree.borrow()
    }

    /// Run `change` on the object tree. Rejected on read-only files; the
    /// file only counts as modified once `change` succeeds.
    pub(crate) fn modify<T>(&self, change: impl FnOnce(&mut ObjectTree) -> Result<T>) -> Result<T> {
        self.check_writable()?;
        let value = change(&mut *self.tree.borrow_mut())?;
        self.dirty.set(true);
        Ok(value)
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.props.read_only {
            return Err(Error::ReadOnly(self.path.clone()));
        }
        Ok(())
    }

    /// Write the tree next to the target and rename it into place. An
    /// existing target keeps its permissions, and a symlink target is
    /// followed so the link itself survives.
    fn save(&self) -> Result<()> {
        let image = write_file(&self.tree.borrow(), self.props.data_alignment)?;
        let (target, permissions) = match fs::canonicalize(&self.path) {
            Ok(real) => {
                let permissions = fs::metadata(&real)?.permissions();
                (real, permissions)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Created with the mode the umask allows for new files.
                let placeholder = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&self.path)?;
                (self.path.clone(), placeholder.metadata()?.permissions())
            }
            Err(e) => return Err(e.into()),
        };
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.as_file().set_permissions(permissions)?;
        tmp.write_all(&image)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| Error::Io(e.error))?;
        debug!(path = %target.display(), size = image.len(), "wrote container");
        Ok(())
    }
}

impl Drop for ContainerFile {
    fn drop(&mut self) {
        if self.closed || !self.dirty.get() {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush container on drop");
        }
    }
}

impl std::fmt::Debug for ContainerFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerFile")
            .field("path", &self.path)
            .field("read_only", &self.props.read_only)
            .field("dirty", &self.dirty.get())
            .field("open_handles", &self.handles.table().len())
            .finish()
    }
}

fn sniff_signature(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let sig_len = HDF5_SIGNATURE.len() as u64;
    let mut buf = [0u8; 8];
    let mut offset = 0u64;
    while offset.saturating_add(sig_len) <= len {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        if has_signature(&buf) {
            return Ok(true);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;

    #[test]
    fn create_writes_a_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.h5");
        assert!(!ContainerFile::can_access(&path));

        let file = ContainerFile::create(&path).unwrap();
        assert!(ContainerFile::can_access(&path));
        assert!(!file.is_read_only());
        assert_eq!(file.path(), path);
        file.close().unwrap();

        let reopened = ContainerFile::open(&path).unwrap();
        assert_eq!(reopened.root_group().info().unwrap().child_count, 0);
    }

    #[test]
    fn can_access_rejects_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        fs::write(&text, b"not a container").unwrap();
        assert!(!ContainerFile::can_access(&text));
        assert!(!ContainerFile::can_access(dir.path()));

        let err = ContainerFile::open(&text).unwrap_err();
        assert!(matches!(err, Error::NotHdf5 { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn can_access_finds_signature_after_user_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userblock.h5");
        let mut bytes = vec![0u8; 1024];
        bytes.extend_from_slice(&HDF5_SIGNATURE);
        fs::write(&path, &bytes).unwrap();
        assert!(ContainerFile::can_access(&path));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ContainerFile::open(dir.path().join("missing.h5")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn create_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replace.h5");
        let file = ContainerFile::create(&path).unwrap();
        file.root_group().create_group("old").unwrap();
        file.close().unwrap();

        let file = ContainerFile::create(&path).unwrap();
        assert!(!file.root_group().has_child("old"));
        drop(file);
        let file = ContainerFile::open(&path).unwrap();
        assert!(!file.root_group().has_child("old"));
    }

    #[test]
    fn drop_flushes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.h5");
        {
            let file = ContainerFile::create(&path).unwrap();
            file.root_group().create_group("kept").unwrap();
        }
        let file = ContainerFile::open(&path).unwrap();
        assert!(file.root_group().has_child("kept"));
    }

    #[test]
    fn read_only_rejects_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.h5");
        ContainerFile::create(&path).unwrap().close().unwrap();
        let before = fs::read(&path).unwrap();

        let file = ContainerFile::open_with(&path, FileAccessProps::new().read_only()).unwrap();
        assert!(file.is_read_only());
        let err = file.root_group().create_group("g").unwrap_err();
        assert!(matches!(err, Error::ReadOnly(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        file.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);

        assert!(ContainerFile::create_with(&path, FileAccessProps::new().read_only()).is_err());
    }

    #[test]
    fn failed_change_leaves_file_clean() {
        let dir = tempfile::tempdir().unwrap();
        let file = ContainerFile::create(dir.path().join("clean.h5")).unwrap();
        assert!(!file.is_modified());

        let err = file
            .modify(|_| -> Result<()> { Err(Error::InvalidName("x/y".into())) })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
        assert!(!file.is_modified());

        file.modify(|tree| Ok(tree.root())).unwrap();
        assert!(file.is_modified());
        file.flush().unwrap();
        assert!(!file.is_modified());
    }

    #[cfg(unix)]
    fn mode(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[cfg(unix)]
    #[test]
    fn save_keeps_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.h5");
        ContainerFile::create(&path).unwrap().close().unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let file = ContainerFile::open(&path).unwrap();
        file.root_group().create_group("g").unwrap();
        file.close().unwrap();
        assert_eq!(mode(&path), 0o640);
    }

    #[cfg(unix)]
    #[test]
    fn new_files_get_the_default_mode() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.bin");
        fs::write(&plain, b"").unwrap();
        let path = dir.path().join("new.h5");
        ContainerFile::create(&path).unwrap().close().unwrap();
        assert_eq!(mode(&path), mode(&plain));
    }

    #[cfg(unix)]
    #[test]
    fn save_through_symlink_keeps_the_link() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.h5");
        let link = dir.path().join("link.h5");
        ContainerFile::create(&real).unwrap().close().unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let file = ContainerFile::open(&link).unwrap();
        file.root_group().create_group("via_link").unwrap();
        file.close().unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let file = ContainerFile::open(&real).unwrap();
        assert!(file.root_group().has_child("via_link"));
    }
}
