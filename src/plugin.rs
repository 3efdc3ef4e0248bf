use crate::component::{FilterClass, SinkClass, SourceClass};
use crate::error::Error;
use std::sync::Arc;

/// A named set of component classes.
///
/// Plugins are registered in-process; there is no dynamic loading.
#[derive(Clone)]
pub struct Plugin {
    name: String,
    description: String,
    sources: Vec<Arc<dyn SourceClass>>,
    filters: Vec<Arc<dyn FilterClass>>,
    sinks: Vec<Arc<dyn SinkClass>>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Plugin {
            name: name.into(),
            description: description.into(),
            sources: Vec::new(),
            filters: Vec::new(),
            sinks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn add_source_class(&mut self, class: Arc<dyn SourceClass>) -> Result<(), Error> {
        if self.source_class(class.name()).is_some() {
            return Err(Error::invalid_params(format!(
                "plugin `{}` already has a source class named `{}`",
                self.name,
                class.name()
            )));
        }
        self.sources.push(class);
        Ok(())
    }

    pub fn add_filter_class(&mut self, class: Arc<dyn FilterClass>) -> Result<(), Error> {
        if self.filter_class(class.name()).is_some() {
            return Err(Error::invalid_params(format!(
                "plugin `{}` already has a filter class named `{}`",
                self.name,
                class.name()
            )));
        }
        self.filters.push(class);
        Ok(())
    }

    pub fn add_sink_class(&mut self, class: Arc<dyn SinkClass>) -> Result<(), Error> {
        if self.sink_class(class.name()).is_some() {
            return Err(Error::invalid_params(format!(
                "plugin `{}` already has a sink class named `{}`",
                self.name,
                class.name()
            )));
        }
        self.sinks.push(class);
        Ok(())
    }

    pub fn source_classes(&self) -> &[Arc<dyn SourceClass>] {
        &self.sources
    }

    pub fn filter_classes(&self) -> &[Arc<dyn FilterClass>] {
        &self.filters
    }

    pub fn sink_classes(&self) -> &[Arc<dyn SinkClass>] {
        &self.sinks
    }

    pub fn source_class(&self, name: &str) -> Option<Arc<dyn SourceClass>> {
        self.sources.iter().find(|c| c.name() == name).cloned()
    }

    pub fn filter_class(&self, name: &str) -> Option<Arc<dyn FilterClass>> {
        self.filters.iter().find(|c| c.name() == name).cloned()
    }

    pub fn sink_class(&self, name: &str) -> Option<Arc<dyn SinkClass>> {
        self.sinks.iter().find(|c| c.name() == name).cloned()
    }
}

/// Every plugin known to this process, in registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry {
            plugins: Vec::new(),
        }
    }

    /// A registry preloaded with the built-in `utils` plugin.
    pub fn with_default_plugins() -> Self {
        let mut registry = Self::new();
        registry
            .register(crate::components::utils_plugin())
            .expect("built-in plugins register cleanly");
        registry
    }

    pub fn register(&mut self, plugin: Plugin) -> Result<(), Error> {
        if self.plugin(plugin.name()).is_some() {
            return Err(Error::invalid_params(format!(
                "a plugin named `{}` is already registered",
                plugin.name()
            )));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn plugin(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    pub fn find_source_class(
        &self,
        plugin_name: &str,
        class_name: &str,
    ) -> Result<Arc<dyn SourceClass>, Error> {
        self.plugin(plugin_name)
            .ok_or_else(|| Error::UnknownPlugin(plugin_name.to_owned()))?
            .source_class(class_name)
            .ok_or_else(|| {
                Error::UnknownComponentClass(format!("source.{plugin_name}.{class_name}"))
            })
    }

    pub fn find_filter_class(
        &self,
        plugin_name: &str,
        class_name: &str,
    ) -> Result<Arc<dyn FilterClass>, Error> {
        self.plugin(plugin_name)
            .ok_or_else(|| Error::UnknownPlugin(plugin_name.to_owned()))?
            .filter_class(class_name)
            .ok_or_else(|| {
                Error::UnknownComponentClass(format!("filter.{plugin_name}.{class_name}"))
            })
    }

    pub fn find_sink_class(
        &self,
        plugin_name: &str,
        class_name: &str,
    ) -> Result<Arc<dyn SinkClass>, Error> {
        self.plugin(plugin_name)
            .ok_or_else(|| Error::UnknownPlugin(plugin_name.to_owned()))?
            .sink_class(class_name)
            .ok_or_else(|| {
                Error::UnknownComponentClass(format!("sink.{plugin_name}.{class_name}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_carries_the_utils_plugin() {
        let registry = PluginRegistry::with_default_plugins();
        let utils = registry.plugin("utils").expect("utils plugin");
        assert!(utils.sink_class("dummy").is_some());
        assert!(utils.sink_class("counter").is_some());
        assert!(utils.filter_class("trimmer").is_some());
        assert!(utils.filter_class("muxer").is_some());
        assert!(registry.find_sink_class("utils", "dummy").is_ok());
        assert!(registry.find_source_class("utils", "dummy").is_err());
        assert!(registry.find_sink_class("nope", "dummy").is_err());
    }

    #[test]
    fn duplicate_plugin_names_are_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register(Plugin::new("p", "")).unwrap();
        assert!(registry.register(Plugin::new("p", "")).is_err());
    }
}
