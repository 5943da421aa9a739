//! Navigating and creating groups.

use std::fmt;

use hdf5_access_format::{Group, LinkRef, Node, NodeId, ObjectTree};
use tracing::debug;

use crate::error::{Error, Result};
use crate::file::ContainerFile;
use crate::handle::{HandleGuard, HandleKind};

/// Maximum number of soft links followed while resolving one name.
const MAX_SOFT_LINK_DEPTH: usize = 16;

/// Summary of a group's immediate children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    pub child_count: usize,
}

/// What a child name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Group,
    Dataset,
}

/// An open group of a [`ContainerFile`].
///
/// Obtained from [`ContainerFile::root_group`], [`GroupHandle::create_group`]
/// or [`GroupHandle::open_group`]. The handle is released when it is closed
/// or dropped.
pub struct GroupHandle<'f> {
    pub(crate) file: &'f ContainerFile,
    pub(crate) node: NodeId,
    pub(crate) path: String,
    _guard: Option<HandleGuard<'f>>,
}

impl<'f> GroupHandle<'f> {
    pub(crate) fn root(file: &'f ContainerFile, node: NodeId) -> Self {
        GroupHandle {
            file,
            node,
            path: "/".to_string(),
            _guard: None,
        }
    }

    fn opened(file: &'f ContainerFile, node: NodeId, path: String) -> Self {
        let guard = HandleGuard::acquire(file, HandleKind::Group, &path);
        GroupHandle {
            file,
            node,
            path,
            _guard: Some(guard),
        }
    }

    /// Create a child group named `name`.
    pub fn create_group(&self, name: &str) -> Result<GroupHandle<'f>> {
        validate_name(name)?;
        let path = self.child_path(name);
        self.file.check_writable()?;
        self.check_free(name)?;
        let node = self.file.modify(|tree| {
            Ok(tree.insert_child(self.node, name, Node::Group(Group::default()))?)
        })?;
        debug!(path = %path, "created group");
        Ok(GroupHandle::opened(self.file, node, path))
    }

    /// Open the child group named `name`. Soft links are followed.
    pub fn open_group(&self, name: &str) -> Result<GroupHandle<'f>> {
        validate_name(name)?;
        let path = self.child_path(name);
        let node = {
            let tree = self.file.tree();
            let id = self.resolve_in(&tree, name)?;
            if tree.group(id).is_none() {
                return Err(Error::ObjectNotFound(format!("group '{path}'")));
            }
            id
        };
        Ok(GroupHandle::opened(self.file, node, path))
    }

    /// Release this handle.
    pub fn close(self) {}

    /// Count the immediate children.
    pub fn info(&self) -> Result<GroupInfo> {
        let tree = self.file.tree();
        Ok(GroupInfo {
            child_count: self.group_in(&tree)?.links.len(),
        })
    }

    /// Names of the immediate children in link order.
    pub fn child_names(&self) -> Result<Vec<String>> {
        let tree = self.file.tree();
        Ok(self
            .group_in(&tree)?
            .links
            .iter()
            .map(|l| l.name.clone())
            .collect())
    }

    pub fn has_child(&self, name: &str) -> bool {
        let tree = self.file.tree();
        tree.group(self.node).is_some_and(|g| g.link(name).is_some())
    }

    /// Whether `name` is a group or a dataset; `None` if it does not resolve.
    pub fn child_kind(&self, name: &str) -> Option<ObjectKind> {
        let tree = self.file.tree();
        let id = self.resolve_in(&tree, name).ok()?;
        match tree.node(id)? {
            Node::Group(_) => Some(ObjectKind::Group),
            Node::Dataset(_) => Some(ObjectKind::Dataset),
        }
    }

    /// Last component of the path; `/` for the root group.
    pub fn name(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((_, last)) if !last.is_empty() => last,
            _ => &self.path,
        }
    }

    /// Absolute path of this group.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file(&self) -> &'f ContainerFile {
        self.file
    }

    pub(crate) fn child_path(&self, name: &str) -> String {
        if self.path.ends_with('/') {
            format!("{}{name}", self.path)
        } else {
            format!("{}/{name}", self.path)
        }
    }

    /// Fails with `AlreadyExists` if a child is linked as `name`.
    pub(crate) fn check_free(&self, name: &str) -> Result<()> {
        let tree = self.file.tree();
        if self.group_in(&tree)?.link(name).is_some() {
            return Err(Error::AlreadyExists(format!("'{}'", self.child_path(name))));
        }
        Ok(())
    }

    pub(crate) fn group_in<'t>(&self, tree: &'t ObjectTree) -> Result<&'t Group> {
        tree.group(self.node)
            .ok_or_else(|| Error::ObjectNotFound(format!("group '{}'", self.path)))
    }

    /// Id of the object `name` refers to.
    pub(crate) fn resolve_in(&self, tree: &ObjectTree, name: &str) -> Result<NodeId> {
        let not_found = || Error::ObjectNotFound(format!("'{}'", self.child_path(name)));
        let mut group = self.node;
        let mut target = self
            .group_in(tree)?
            .link(name)
            .map(|l| l.target.clone())
            .ok_or_else(not_found)?;
        for _ in 0..MAX_SOFT_LINK_DEPTH {
            match target {
                LinkRef::Object(id) => return Ok(id),
                LinkRef::Soft(path) => {
                    let (start, rest) = match path.strip_prefix('/') {
                        Some(rest) => (tree.root(), rest),
                        None => (group, path.as_str()),
                    };
                    let (parent, last) = walk(tree, start, rest).ok_or_else(not_found)?;
                    group = parent;
                    target = match last {
                        Some(last) => tree
                            .group(parent)
                            .and_then(|g| g.link(last))
                            .map(|l| l.target.clone())
                            .ok_or_else(not_found)?,
                        None => LinkRef::Object(parent),
                    };
                }
                LinkRef::Other { .. } => return Err(not_found()),
            }
        }
        Err(not_found())
    }
}

/// Follow hard links along all but the last component of `path`. Returns
/// the group holding the last component, and that component.
fn walk<'p>(tree: &ObjectTree, start: NodeId, path: &'p str) -> Option<(NodeId, Option<&'p str>)> {
    let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let last = parts.pop();
    let mut node = start;
    for part in parts {
        node = tree.group(node)?.child(part)?;
    }
    Some((node, last))
}

impl fmt::Debug for GroupHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("path", &self.path)
            .field("node", &self.node)
            .finish()
    }
}

/// Names must be non-empty, free of `/`, and not `.`.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name.contains('/') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use hdf5_access_format::Link;

    fn scratch() -> (tempfile::TempDir, ContainerFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = ContainerFile::create(dir.path().join("groups.h5")).unwrap();
        (dir, file)
    }

    #[test]
    fn create_and_open() {
        let (_dir, file) = scratch();
        let root = file.root_group();
        assert_eq!(root.name(), "/");
        let group = root.create_group("group").unwrap();
        let nested = group.create_group("nested").unwrap();
        assert_eq!(nested.path(), "/group/nested");
        assert_eq!(nested.name(), "nested");

        let opened = root.open_group("group").unwrap();
        assert_eq!(opened.info().unwrap(), GroupInfo { child_count: 1 });
        assert_eq!(opened.child_names().unwrap(), vec!["nested".to_string()]);
        assert_eq!(root.child_kind("group"), Some(ObjectKind::Group));
        assert_eq!(root.child_kind("missing"), None);
    }

    #[test]
    fn duplicate_and_missing_names() {
        let (_dir, file) = scratch();
        let root = file.root_group();
        root.create_group("group").unwrap().close();

        let err = root.create_group("group").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = root.open_group("other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(file.open_handle_count(), 0);
    }

    #[test]
    fn invalid_names() {
        let (_dir, file) = scratch();
        let root = file.root_group();
        for name in ["", ".", "a/b"] {
            let err = root.create_group(name).unwrap_err();
            assert!(matches!(err, Error::InvalidName(_)), "{name:?}");
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn handles_are_counted() {
        let (_dir, file) = scratch();
        let root = file.root_group();
        let a = root.create_group("a").unwrap();
        let b = a.create_group("b").unwrap();
        assert_eq!(file.open_handle_count(), 2);
        b.close();
        assert_eq!(file.open_handle_count_of(HandleKind::Group), 1);
        drop(a);
        assert_eq!(file.open_handle_count(), 0);
    }

    #[test]
    fn soft_links_resolve() {
        let (_dir, file) = scratch();
        let root = file.root_group();
        root.create_group("target").unwrap().create_group("leaf").unwrap();
        file.modify(|tree| {
            let root_id = tree.root();
            if let Some(Node::Group(g)) = tree.node_mut(root_id) {
                g.links.push(Link {
                    name: "alias".into(),
                    target: LinkRef::Soft("/target/leaf".into()),
                });
                g.links.push(Link {
                    name: "loop".into(),
                    target: LinkRef::Soft("loop".into()),
                });
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(root.open_group("alias").unwrap().info().unwrap().child_count, 0);
        assert_eq!(root.child_kind("alias"), Some(ObjectKind::Group));
        assert_eq!(root.open_group("loop").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
