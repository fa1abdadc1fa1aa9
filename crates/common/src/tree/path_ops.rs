//! Path-based directory operations
//!
//! Directories are nodes whose links carry names, kept sorted by name so
//! equal directories encode identically. All mutation is copy-on-write:
//! only the dir nodes along the mutated path are rebuilt, every sibling
//! subtree is shared unchanged, and the caller gets a new root CID.
//!
//! Two concurrent mutations of the same root both read-then-write; the
//! second to land wins and silently discards the first's change. Callers
//! needing atomic multi-step edits must serialize around the root.

use crate::dag::{Cid, Link, LinkKind, Node};

use super::{Loaded, Tree, TreeError};

/// A directory entry as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub cid: Cid,
    pub size: u64,
    pub kind: LinkKind,
}

impl Entry {
    fn from_link(link: &Link) -> Self {
        Entry {
            name: link.name.clone().unwrap_or_default(),
            cid: link.cid(),
            size: link.size.unwrap_or(0),
            kind: link.kind,
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

impl Tree {
    /// Load a CID that must resolve to a directory node
    async fn load_dir(&self, cid: &Cid, at: &str) -> Result<Option<Node>, TreeError> {
        match self.load_cid(cid).await? {
            None => Ok(None),
            Some(Loaded::Node(node)) if node.is_dir() => Ok(Some(node)),
            Some(_) => Err(TreeError::NotADirectory(at.to_string())),
        }
    }

    /// Walk directory components from the root, returning the chain of
    /// `(name-in-parent, node)` down to the target directory inclusive.
    ///
    /// With `create_missing`, absent components become fresh empty dirs
    /// (they only exist in the store once the spine is rebuilt). Traversal
    /// through a non-directory link is an error; an absent hash is `None`.
    async fn dir_spine(
        &self,
        root: &Cid,
        parts: &[&str],
        create_missing: bool,
    ) -> Result<Option<Vec<(String, Node)>>, TreeError> {
        let Some(root_node) = self.load_dir(root, "/").await? else {
            return Ok(None);
        };

        let mut spine = vec![(String::new(), root_node)];
        let mut consumed = String::new();
        for part in parts {
            consumed.push('/');
            consumed.push_str(part);
            let next = spine
                .last()
                .expect("non-empty spine")
                .1
                .get_entry(part)
                .cloned();
            match next {
                Some(link) if link.is_dir() => {
                    match self.load_dir(&link.cid(), &consumed).await? {
                        Some(node) => spine.push((part.to_string(), node)),
                        None => return Ok(None),
                    }
                }
                Some(_) => return Err(TreeError::NotADirectory(consumed.clone())),
                None if create_missing => spine.push((part.to_string(), Node::dir())),
                None => return Ok(None),
            }
        }
        Ok(Some(spine))
    }

    /// Re-store a mutated spine bottom-up, linking each rebuilt dir into
    /// its parent, and return the new root CID. Nothing outside the spine
    /// is touched.
    async fn rebuild_spine(
        &self,
        mut spine: Vec<(String, Node)>,
        encrypt: bool,
    ) -> Result<Cid, TreeError> {
        let (mut child_name, mut node) = spine.pop().expect("non-empty spine");
        loop {
            let encoded = node.encode()?;
            let (hash, key) = self.put_block(&encoded, encrypt).await?;
            match spine.pop() {
                None => return Ok(Cid { hash, key }),
                Some((name, mut parent)) => {
                    parent.insert_entry(Link {
                        hash,
                        kind: LinkKind::Dir,
                        name: Some(child_name),
                        size: None,
                        key,
                    });
                    child_name = name;
                    node = parent;
                }
            }
        }
    }

    /// Resolve a slash-separated path to a directory entry
    ///
    /// Returns `None` when any component (or the root itself) is absent.
    /// Resolving through a non-directory link is an error, as is an empty
    /// path (there is no entry naming the root).
    pub async fn resolve_path(&self, root: &Cid, path: &str) -> Result<Option<Entry>, TreeError> {
        let parts = split_path(path);
        let Some((name, dir_parts)) = parts.split_last() else {
            return Err(TreeError::InvalidPath(path.to_string()));
        };

        let Some(spine) = self.dir_spine(root, dir_parts, false).await? else {
            return Ok(None);
        };
        let dir = &spine.last().expect("non-empty spine").1;
        Ok(dir.get_entry(name).map(Entry::from_link))
    }

    /// List a directory's entries, ordered by name
    ///
    /// Returns `None` when the directory node is absent from the store.
    pub async fn list_directory(&self, dir: &Cid) -> Result<Option<Vec<Entry>>, TreeError> {
        let Some(node) = self.load_dir(dir, "/").await? else {
            return Ok(None);
        };
        Ok(Some(node.links().iter().map(Entry::from_link).collect()))
    }

    /// Set (or replace) an entry in the directory at `path`
    ///
    /// Copy-on-write: rebuilds only the dir nodes along `path` (creating
    /// missing intermediate directories) and returns the new root CID.
    /// Dir nodes are convergently encrypted iff the root CID carries a key.
    pub async fn set_entry(
        &self,
        root: &Cid,
        path: &str,
        name: &str,
        child: &Cid,
        size: u64,
        kind: LinkKind,
    ) -> Result<Cid, TreeError> {
        if name.is_empty() || name.contains('/') {
            return Err(TreeError::InvalidPath(name.to_string()));
        }
        let parts = split_path(path);
        let Some(mut spine) = self.dir_spine(root, &parts, true).await? else {
            return Err(TreeError::PathNotFound(path.to_string()));
        };

        spine
            .last_mut()
            .expect("non-empty spine")
            .1
            .insert_entry(Link::entry(name.to_string(), child, size, kind));

        self.rebuild_spine(spine, root.key.is_some()).await
    }

    /// Remove an entry from the directory at `path`
    ///
    /// Same copy-on-write discipline as [`Tree::set_entry`]. Removing an
    /// entry that does not exist is a [`TreeError::PathNotFound`] error.
    pub async fn remove_entry(
        &self,
        root: &Cid,
        path: &str,
        name: &str,
    ) -> Result<Cid, TreeError> {
        let parts = split_path(path);
        let Some(mut spine) = self.dir_spine(root, &parts, false).await? else {
            return Err(TreeError::PathNotFound(path.to_string()));
        };

        if spine
            .last_mut()
            .expect("non-empty spine")
            .1
            .remove_entry(name)
            .is_none()
        {
            return Err(TreeError::PathNotFound(format!("{}/{}", path, name)));
        }

        self.rebuild_spine(spine, root.key.is_some()).await
    }

    /// Store an empty directory and return its CID
    pub async fn put_empty_dir(&self, encrypt: bool) -> Result<Cid, TreeError> {
        let encoded = Node::dir().encode()?;
        let (hash, key) = self.put_block(&encoded, encrypt).await?;
        Ok(Cid { hash, key })
    }
}
