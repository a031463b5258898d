//! Segment trie resolving a lookup key to a handler chain.
//!
//! Keys are split on `/`. A key planted by a host-scoped route starts with
//! the host (`"a.example.com/x"` → `["a.example.com", "x"]`), a host-less
//! key starts with an empty segment (`"/x"` → `["", "x"]`). A trailing slash
//! produces a trailing empty segment, so `/home` and `/home/` are distinct
//! branches.
//!
//! Segment kinds, in matching priority:
//! - static: matched verbatim
//! - `:name`: captures exactly one non-empty segment
//! - `*name`: captures the rest of the key, must be last

use crate::{context::HandlerChain, errors::Error};
use memchr::memchr;
use std::{collections::HashMap, sync::Arc};

/// One captured route parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: Arc<str>,
    pub value: String,
}

/// Parameters captured while resolving a path, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<Param>);

impl Params {
    /// Returns the value captured for `key`.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|param| &*param.key == key)
            .map(|param| param.value.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|p| (&*p.key, p.value.as_str()))
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }

    #[inline]
    pub(crate) fn clone_from_slice(&mut self, other: &Params) {
        self.0.clear();
        self.0.extend_from_slice(&other.0);
    }

    #[inline]
    fn push(&mut self, key: &Arc<str>, value: &str) {
        self.0.push(Param {
            key: key.clone(),
            value: value.to_owned(),
        });
    }

    #[inline]
    fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

/// Result of [`PathTree::get_branch`].
pub(crate) struct BranchMatch<'t> {
    pub(crate) handlers: Option<&'t HandlerChain>,
    pub(crate) must_redirect: bool,
}

impl std::fmt::Debug for BranchMatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchMatch")
            .field("handlers", &self.handlers.is_some())
            .field("must_redirect", &self.must_redirect)
            .finish()
    }
}

#[derive(Clone, Default)]
struct Node {
    statics: HashMap<Box<str>, Node>,
    param: Option<(Arc<str>, Box<Node>)>,
    wildcard: Option<(Arc<str>, HandlerChain)>,
    handlers: Option<HandlerChain>,
}

/// Per-tree path index.
#[derive(Clone, Default)]
pub struct PathTree {
    root: Node,
    branches: usize,
}

impl std::fmt::Debug for PathTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathTree")
            .field("branches", &self.branches)
            .finish()
    }
}

impl PathTree {
    /// Number of distinct keys planted.
    #[inline]
    pub fn len(&self) -> usize {
        self.branches
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.branches == 0
    }

    /// Checks that `key` can be planted, without touching the tree.
    pub(crate) fn validate(key: &str) -> Result<(), Error> {
        let mut rest = key;

        loop {
            let (segment, next) = split_segment(rest);

            let reason = match (segment.strip_prefix('*'), segment.strip_prefix(':')) {
                (Some(_), _) if next.is_some() => Some("wildcard must be the last segment"),
                (Some(""), _) => Some("wildcard needs a name"),
                (_, Some("")) => Some("parameter needs a name"),
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(Error::InvalidRoute {
                    path: key.to_owned(),
                    reason,
                });
            }

            match next {
                Some(next) => rest = next,
                None => return Ok(()),
            }
        }
    }

    /// Inserts `handlers` under `key`, replacing an existing chain.
    ///
    /// A rejected key leaves the tree untouched.
    pub(crate) fn add_branch(&mut self, key: &str, handlers: HandlerChain) -> Result<(), Error> {
        PathTree::validate(key)?;

        let mut node = &mut self.root;
        let mut rest = key;

        loop {
            let (segment, next) = split_segment(rest);

            if let Some(name) = segment.strip_prefix('*') {
                let replaced = node.wildcard.replace((name.into(), handlers)).is_some();
                self.count(key, replaced);
                return Ok(());
            }

            node = match segment.strip_prefix(':') {
                Some(name) => {
                    let (current, child) = node
                        .param
                        .get_or_insert_with(|| (name.into(), Box::default()));

                    if &**current != name {
                        tracing::warn!(
                            route = key,
                            kept = &**current,
                            ignored = name,
                            "conflicting parameter name, keeping the first one"
                        );
                    }
                    child
                }
                None => node.statics.entry(segment.into()).or_default(),
            };

            match next {
                Some(next) => rest = next,
                None => {
                    let replaced = node.handlers.replace(handlers).is_some();
                    self.count(key, replaced);
                    return Ok(());
                }
            }
        }
    }

    #[inline]
    fn count(&mut self, key: &str, replaced: bool) {
        if replaced {
            tracing::debug!(route = key, "route replaced");
        } else {
            self.branches += 1;
        }
    }

    /// Resolves `key`, capturing parameters into `params`.
    ///
    /// On a miss, reports whether the key with its trailing slash toggled
    /// would have matched. Parameters captured by that probe are dropped.
    pub(crate) fn get_branch<'t>(&'t self, key: &str, params: &mut Params) -> BranchMatch<'t> {
        let mark = params.len();

        if let Some(handlers) = find(&self.root, key, params) {
            return BranchMatch {
                handlers: Some(handlers),
                must_redirect: false,
            };
        }
        params.truncate(mark);

        let must_redirect = key.len() > 1 && {
            let found = match key.strip_suffix('/') {
                Some(stripped) => find(&self.root, stripped, params).is_some(),
                None => {
                    let mut toggled = String::with_capacity(key.len() + 1);
                    toggled.push_str(key);
                    toggled.push('/');
                    find(&self.root, &toggled, params).is_some()
                }
            };
            params.truncate(mark);
            found
        };

        BranchMatch {
            handlers: None,
            must_redirect,
        }
    }
}

#[inline]
fn split_segment(key: &str) -> (&str, Option<&str>) {
    match memchr(b'/', key.as_bytes()) {
        Some(i) => (&key[..i], Some(&key[i + 1..])),
        None => (key, None),
    }
}

fn find<'n>(node: &'n Node, key: &str, params: &mut Params) -> Option<&'n HandlerChain> {
    let (segment, rest) = split_segment(key);

    if let Some(child) = node.statics.get(segment) {
        let found = match rest {
            Some(rest) => find(child, rest, params),
            None => child.handlers.as_ref(),
        };
        if found.is_some() {
            return found;
        }
    }

    if let (false, Some((name, child))) = (segment.is_empty(), &node.param) {
        let mark = params.len();
        params.push(name, segment);

        let found = match rest {
            Some(rest) => find(child, rest, params),
            None => child.handlers.as_ref(),
        };
        if found.is_some() {
            return found;
        }
        params.truncate(mark);
    }

    let (name, handlers) = node.wildcard.as_ref()?;
    params.push(name, key);
    Some(handlers)
}

#[cfg(test)]
mod tree_tests {
    use super::*;
    use crate::tools::*;

    fn tree(keys: &[&str]) -> PathTree {
        let mut tree = PathTree::default();
        for key in keys {
            tree.add_branch(key, chain_named(key)).unwrap();
        }
        tree
    }

    fn resolve(tree: &PathTree, key: &str) -> Option<(String, Params)> {
        let mut params = Params::default();
        let found = tree.get_branch(key, &mut params);
        found.handlers.map(|chain| (chain_name(chain), params))
    }

    #[test]
    fn statics_and_trailing_slash() {
        let tree = tree(&["/", "/home", "/home/", "/a/b/c"]);

        assert_eq!(tree.len(), 4);
        assert_eq!(resolve(&tree, "/").unwrap().0, "/");
        assert_eq!(resolve(&tree, "/home").unwrap().0, "/home");
        assert_eq!(resolve(&tree, "/home/").unwrap().0, "/home/");
        assert_eq!(resolve(&tree, "/a/b/c").unwrap().0, "/a/b/c");
        assert!(resolve(&tree, "/a/b").is_none());
        assert!(resolve(&tree, "").is_none());
    }

    #[test]
    fn params() {
        let tree = tree(&["/a/:id", "/a/:id/posts/:post"]);

        let (name, params) = resolve(&tree, "/a/42").unwrap();
        assert_eq!(name, "/a/:id");
        assert_eq!(params.get("id"), Some("42"));

        let (_, params) = resolve(&tree, "/a/7/posts/9").unwrap();
        assert_eq!(params.iter().collect::<Vec<_>>(), [("id", "7"), ("post", "9")]);

        assert!(resolve(&tree, "/a/").is_none());
        assert!(resolve(&tree, "/a").is_none());
    }

    #[test]
    fn static_beats_param_with_backtracking() {
        let tree = tree(&["/u/me", "/u/:id/x"]);

        assert_eq!(resolve(&tree, "/u/me").unwrap().0, "/u/me");
        let (name, params) = resolve(&tree, "/u/me/x").unwrap();
        assert_eq!(name, "/u/:id/x");
        assert_eq!(params.get("id"), Some("me"));
    }

    #[test]
    fn wildcard() {
        let tree = tree(&["/static/*file", "/static/index"]);

        assert_eq!(resolve(&tree, "/static/index").unwrap().0, "/static/index");
        let (name, params) = resolve(&tree, "/static/css/site.css").unwrap();
        assert_eq!(name, "/static/*file");
        assert_eq!(params.get("file"), Some("css/site.css"));

        let mut tree = PathTree::default();
        assert!(matches!(
            tree.add_branch("/x/*rest/more", chain_named("x")),
            Err(Error::InvalidRoute { .. })
        ));
        assert!(matches!(
            tree.add_branch("/x/:", chain_named("x")),
            Err(Error::InvalidRoute { .. })
        ));
    }

    #[test]
    fn host_prefixed_keys() {
        let tree = tree(&["a.example.com/x", "/x"]);

        assert_eq!(resolve(&tree, "a.example.com/x").unwrap().0, "a.example.com/x");
        assert_eq!(resolve(&tree, "/x").unwrap().0, "/x");
        assert!(resolve(&tree, "b.example.com/x").is_none());
    }

    #[test]
    fn redirect_probe() {
        let tree = tree(&["/home/", "/about", "/a/:id"]);
        let mut params = Params::default();

        assert!(tree.get_branch("/home", &mut params).must_redirect);
        assert!(tree.get_branch("/about/", &mut params).must_redirect);
        assert!(tree.get_branch("/a/1/", &mut params).must_redirect);
        assert!(params.is_empty());

        assert!(!tree.get_branch("/nothing", &mut params).must_redirect);
        assert!(!tree.get_branch("/", &mut params).must_redirect);
    }

    #[test]
    fn branch_match_debug() {
        let tree = tree(&["/home/"]);
        let mut params = Params::default();

        assert_eq!(
            format!("{:?}", tree.get_branch("/home/", &mut params)),
            "BranchMatch { handlers: true, must_redirect: false }"
        );
        assert_eq!(
            format!("{:?}", tree.get_branch("/home", &mut params)),
            "BranchMatch { handlers: false, must_redirect: true }"
        );
    }

    #[test]
    fn replace_keeps_count() {
        let mut tree = tree(&["/x"]);
        tree.add_branch("/x", chain_named("second")).unwrap();

        assert_eq!(tree.len(), 1);
        assert_eq!(resolve(&tree, "/x").unwrap().0, "second");
    }

    #[test]
    fn rejected_key_leaves_tree_untouched() {
        let mut tree = tree(&["/a"]);

        assert!(tree.add_branch("/b/c/:/d", chain_named("bad")).is_err());
        assert!(tree.add_branch("/b/*rest/d", chain_named("bad")).is_err());

        assert_eq!(tree.len(), 1);
        assert!(tree.root.statics[""].statics.get("b").is_none());
    }

    #[test]
    fn conflicting_param_keeps_first_name() {
        let tree = tree(&["/p/:id", "/p/:name/x"]);

        let (_, params) = resolve(&tree, "/p/5/x").unwrap();
        assert_eq!(params.get("id"), Some("5"));
        assert_eq!(params.get("name"), None);
    }
}
