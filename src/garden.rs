//! Registration-time route table: one [`Tree`] per (method, domain).

use crate::{
    context::{Handler, HandlerChain},
    errors::{Error, Result},
    tree::PathTree,
    Method,
};
use std::{fmt, sync::Arc};

/// A route waiting to be planted.
///
/// ```
/// use garden_web::{Context, Method, Route};
///
/// let route = Route::new(Method::Post, "/users/:id")
///     .domain("api.example.com")
///     .cors()
///     .handler(|ctx: &mut Context| {
///         let _ = ctx.write("updated");
///     });
///
/// assert_eq!(route.full_key(), "api.example.com/users/:id");
/// assert!(route.is_cors());
/// ```
#[derive(Clone)]
pub struct Route {
    method: Method,
    domain: String,
    path: String,
    cors: bool,
    handlers: Vec<Arc<dyn Handler>>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("cors", &self.cors)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Route {
    #[inline]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Route {
            method,
            domain: String::new(),
            path: path.into(),
            cors: false,
            handlers: Vec::new(),
        }
    }

    /// Scopes the route to requests whose `Host` equals `domain`.
    #[inline]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Lets the route answer cross-origin preflight requests.
    #[inline]
    pub fn cors(mut self) -> Self {
        self.cors = true;
        self
    }

    /// Appends a handler to the chain, run in insertion order.
    #[inline]
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn is_cors(&self) -> bool {
        self.cors
    }

    #[inline]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Key the route is stored under: `domain + path`.
    #[inline]
    pub fn full_key(&self) -> String {
        [self.domain.as_str(), self.path.as_str()].concat()
    }
}

/// Routes sharing one method and one domain.
///
/// `hosts` and `cors` are taken from the first route planted into the tree.
#[derive(Debug, Clone)]
pub struct Tree {
    pub(crate) method: Method,
    pub(crate) domain: String,
    pub(crate) hosts: bool,
    pub(crate) cors: bool,
    pub(crate) root: PathTree,
}

impl Tree {
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[inline]
    pub fn hosts(&self) -> bool {
        self.hosts
    }

    #[inline]
    pub fn cors(&self) -> bool {
        self.cors
    }

    #[inline]
    pub fn root(&self) -> &PathTree {
        &self.root
    }
}

/// Ordered collection of trees, in first-plant order.
#[derive(Debug, Clone, Default)]
pub struct Garden {
    trees: Vec<Tree>,
}

impl Garden {
    #[inline]
    pub fn new() -> Self {
        Garden::default()
    }

    /// Inserts `route` into the tree for its (method, domain), creating the
    /// tree on first use.
    pub fn plant(&mut self, route: &Route) -> Result<()> {
        if !route.path.starts_with('/') {
            return Err(Error::InvalidRoute {
                path: route.path.clone(),
                reason: "path must start with `/`",
            });
        }
        if route.handlers.is_empty() {
            return Err(Error::InvalidRoute {
                path: route.path.clone(),
                reason: "route has no handlers",
            });
        }

        let key = route.full_key();
        PathTree::validate(&key)?;

        let index = match self.position(route.method, &route.domain) {
            Some(index) => index,
            None => {
                self.trees.push(Tree {
                    method: route.method,
                    domain: route.domain.clone(),
                    hosts: !route.domain.is_empty(),
                    cors: route.cors,
                    root: PathTree::default(),
                });
                self.trees.len() - 1
            }
        };

        let chain: HandlerChain = route.handlers.as_slice().into();
        self.trees[index].root.add_branch(&key, chain)?;

        tracing::debug!(
            method = %route.method,
            domain = %route.domain,
            path = %route.path,
            handlers = route.handlers.len(),
            "route planted"
        );
        Ok(())
    }

    #[inline]
    fn position(&self, method: Method, domain: &str) -> Option<usize> {
        self.trees
            .iter()
            .position(|tree| tree.method == method && tree.domain == domain)
    }

    /// First tree planted for `method`, whatever its domain.
    #[inline]
    pub fn tree_by_method(&self, method: Method) -> Option<&Tree> {
        self.trees.iter().find(|tree| tree.method == method)
    }

    #[inline]
    pub fn tree_by_method_and_domain(&self, method: Method, domain: &str) -> Option<&Tree> {
        self.position(method, domain).map(|i| &self.trees[i])
    }

    #[inline]
    pub fn root_by_method(&self, method: Method) -> Option<&PathTree> {
        self.tree_by_method(method).map(Tree::root)
    }

    #[inline]
    pub fn root_by_method_and_domain(&self, method: Method, domain: &str) -> Option<&PathTree> {
        self.tree_by_method_and_domain(method, domain).map(Tree::root)
    }

    /// Whether any tree was created by a cross-origin route.
    #[inline]
    pub fn has_cors(&self) -> bool {
        self.trees.iter().any(|tree| tree.cors)
    }

    /// Whether any tree is scoped to a host.
    #[inline]
    pub fn has_hosts(&self) -> bool {
        self.trees.iter().any(|tree| tree.hosts)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Tree> {
        self.trees.iter()
    }

    /// Read-only copy shared by every dispatcher built from this garden.
    #[inline]
    pub(crate) fn freeze(&self) -> Arc<[Tree]> {
        self.trees.as_slice().into()
    }
}
