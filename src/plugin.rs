//! Lifecycle plugins.
//!
//! A [`Plugin`] is a name plus a set of optional hooks. The station fires
//! each hook at a fixed point; a hook that was never set is skipped.
//!
//! | Hook          | Fired                                  |
//! |---------------|----------------------------------------|
//! | `activate`    | once, when the plugin is registered    |
//! | `pre_handle`  | before a route is planted, may reject  |
//! | `post_handle` | after a route is planted               |
//! | `pre_listen`  | before serving starts                  |
//! | `post_listen` | once workers are running               |
//! | `pre_close`   | when serving stops                     |
//!
//! ```
//! use garden_web::{Plugin, Station};
//! use std::sync::{atomic::{AtomicUsize, Ordering}, Arc};
//!
//! let planted = Arc::new(AtomicUsize::new(0));
//! let counter = planted.clone();
//!
//! let mut station = Station::new();
//! station
//!     .plugin(Plugin::new("counter", "counts routes").post_handle(move |_| {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }))
//!     .unwrap();
//!
//! station.get("/", |_: &mut garden_web::Context| {}).unwrap();
//! assert_eq!(planted.load(Ordering::Relaxed), 1);
//! ```

use crate::{
    errors::{BoxError, Error, Result},
    garden::Route,
    station::Station,
};
use std::fmt;

type ActivateHook = Box<dyn FnOnce(&mut PluginContainer) -> Result<(), BoxError> + Send>;
type PreHandleHook = Box<dyn Fn(&Route) -> Result<(), BoxError> + Send + Sync>;
type RouteHook = Box<dyn Fn(&Route) + Send + Sync>;
type StationHook = Box<dyn Fn(&Station) + Send + Sync>;

/// A named set of optional lifecycle hooks.
pub struct Plugin {
    name: String,
    description: String,

    activate: Option<ActivateHook>,
    pre_handle: Option<PreHandleHook>,
    post_handle: Option<RouteHook>,
    pre_listen: Option<StationHook>,
    post_listen: Option<StationHook>,
    pre_close: Option<StationHook>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("pre_handle", &self.pre_handle.is_some())
            .field("post_handle", &self.post_handle.is_some())
            .field("pre_listen", &self.pre_listen.is_some())
            .field("post_listen", &self.post_listen.is_some())
            .field("pre_close", &self.pre_close.is_some())
            .finish()
    }
}

impl Plugin {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Plugin {
            name: name.into(),
            description: description.into(),
            activate: None,
            pre_handle: None,
            post_handle: None,
            pre_listen: None,
            post_listen: None,
            pre_close: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Runs once on registration. An error keeps the plugin out.
    pub fn activate<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut PluginContainer) -> Result<(), BoxError> + Send + 'static,
    {
        self.activate = Some(Box::new(hook));
        self
    }

    /// Runs before each route is planted. An error rejects the route.
    pub fn pre_handle<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Route) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.pre_handle = Some(Box::new(hook));
        self
    }

    pub fn post_handle<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Route) + Send + Sync + 'static,
    {
        self.post_handle = Some(Box::new(hook));
        self
    }

    pub fn pre_listen<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Station) + Send + Sync + 'static,
    {
        self.pre_listen = Some(Box::new(hook));
        self
    }

    pub fn post_listen<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Station) + Send + Sync + 'static,
    {
        self.post_listen = Some(Box::new(hook));
        self
    }

    pub fn pre_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Station) + Send + Sync + 'static,
    {
        self.pre_close = Some(Box::new(hook));
        self
    }
}

/// Registered plugins, in registration order.
#[derive(Debug, Default)]
pub struct PluginContainer {
    plugins: Vec<Plugin>,
}

impl PluginContainer {
    /// Activates and registers `plugin`.
    pub fn plugin(&mut self, mut plugin: Plugin) -> Result<()> {
        if self.get_by_name(&plugin.name).is_some() {
            return Err(Error::PluginExists(plugin.name));
        }

        if let Some(activate) = plugin.activate.take() {
            activate(self).map_err(|source| Error::PluginActivation {
                name: plugin.name.clone(),
                source,
            })?;
        }

        tracing::debug!(plugin = %plugin.name, "plugin registered");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Removes the plugin called `name`, returning whether it existed.
    pub fn remove_plugin(&mut self, name: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|plugin| plugin.name != name);
        before != self.plugins.len()
    }

    #[inline]
    pub fn get_by_name(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|plugin| plugin.name == name)
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Plugin> {
        self.plugins.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Fires `pre_handle` in order, stopping at the first error.
    pub fn do_pre_handle(&self, route: &Route) -> Result<(), BoxError> {
        self.plugins
            .iter()
            .filter_map(|plugin| plugin.pre_handle.as_ref())
            .try_for_each(|hook| hook(route))
    }

    pub fn do_post_handle(&self, route: &Route) {
        for hook in self.plugins.iter().filter_map(|p| p.post_handle.as_ref()) {
            hook(route);
        }
    }

    pub fn do_pre_listen(&self, station: &Station) {
        for hook in self.plugins.iter().filter_map(|p| p.pre_listen.as_ref()) {
            hook(station);
        }
    }

    pub fn do_post_listen(&self, station: &Station) {
        for hook in self.plugins.iter().filter_map(|p| p.post_listen.as_ref()) {
            hook(station);
        }
    }

    pub fn do_pre_close(&self, station: &Station) {
        for hook in self.plugins.iter().filter_map(|p| p.pre_close.as_ref()) {
            hook(station);
        }
    }
}

#[cfg(test)]
mod plugin_tests {
    use super::*;
    use crate::{Context, Method};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn route(path: &str) -> Route {
        Route::new(Method::Get, path).handler(|_: &mut Context| {})
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut plugins = PluginContainer::default();
        plugins.plugin(Plugin::new("log", "first")).unwrap();

        let err = plugins.plugin(Plugin::new("log", "second")).unwrap_err();
        assert!(matches!(err, Error::PluginExists(name) if name == "log"));
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins.get_by_name("log").unwrap().description(), "first");
    }

    #[test]
    fn failed_activation_is_not_registered() {
        let mut plugins = PluginContainer::default();
        let err = plugins
            .plugin(Plugin::new("broken", "").activate(|_| Err("no config".into())))
            .unwrap_err();

        assert!(matches!(err, Error::PluginActivation { ref name, .. } if name == "broken"));
        assert!(plugins.is_empty());
    }

    #[test]
    fn activation_may_register_helpers() {
        let mut plugins = PluginContainer::default();
        plugins
            .plugin(Plugin::new("main", "").activate(|container| {
                container.plugin(Plugin::new("helper", ""))?;
                Ok(())
            }))
            .unwrap();

        let names: Vec<_> = plugins.iter().map(Plugin::name).collect();
        assert_eq!(names, ["helper", "main"]);
        assert!(plugins.remove_plugin("helper"));
        assert!(!plugins.remove_plugin("helper"));
    }

    #[test]
    fn hooks_fire_when_present() {
        let fired = Arc::new(AtomicUsize::new(0));
        let (pre, post) = (fired.clone(), fired.clone());

        let mut plugins = PluginContainer::default();
        plugins.plugin(Plugin::new("empty", "")).unwrap();
        plugins
            .plugin(
                Plugin::new("guard", "")
                    .pre_handle(move |route| {
                        pre.fetch_add(1, Ordering::Relaxed);
                        match route.path().starts_with("/admin") {
                            true => Err("admin routes are disabled".into()),
                            false => Ok(()),
                        }
                    })
                    .post_handle(move |_| {
                        post.fetch_add(10, Ordering::Relaxed);
                    }),
            )
            .unwrap();

        assert!(plugins.do_pre_handle(&route("/public")).is_ok());
        assert!(plugins.do_pre_handle(&route("/admin/x")).is_err());
        plugins.do_post_handle(&route("/public"));

        assert_eq!(fired.load(Ordering::Relaxed), 12);
    }
}
