//! Expands user-supplied inputs (arbitrary strings, files, directories)
//! into source component assignments by querying every candidate source
//! class with `babeltrace.support-info`.

use crate::error::{Actor, Error};
use crate::plugin::PluginRegistry;
use crate::query::{QueryExecutor, SUPPORT_INFO_QUERY_OBJECT};
use crate::value::Value;
use crate::append_cause;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One source component to materialize: a (plugin, class, group) key plus
/// every input assigned to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredSource {
    pub plugin_name: String,
    pub source_class_name: String,
    pub group: Option<String>,
    pub inputs: Vec<String>,
    /// Positions of the contributing user inputs, preserving user order so
    /// per-input options stay aligned downstream.
    pub original_input_indices: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutoSourceDiscovery {
    pub results: Vec<DiscoveredSource>,
}

impl AutoSourceDiscovery {
    fn add(
        &mut self,
        plugin_name: &str,
        source_class_name: &str,
        group: Option<&str>,
        input: &str,
        original_input_index: u64,
    ) {
        let index = self.results.iter().position(|res| {
            res.plugin_name == plugin_name
                && res.source_class_name == source_class_name
                && res.group.as_deref() == group
        });
        let index = match index {
            Some(index) => index,
            None => {
                self.results.push(DiscoveredSource {
                    plugin_name: plugin_name.to_owned(),
                    source_class_name: source_class_name.to_owned(),
                    group: group.map(str::to_owned),
                    inputs: Vec::new(),
                    original_input_indices: Vec::new(),
                });
                self.results.len() - 1
            }
        };
        let res = &mut self.results[index];
        res.inputs.push(input.to_owned());
        if res.original_input_indices.last() != Some(&original_input_index) {
            res.original_input_indices.push(original_input_index);
        }
    }
}

enum PassOutcome {
    Claimed,
    NotClaimed,
}

fn convert_weight_value(
    weight_value: &Value,
    plugin_name: &str,
    source_cc_name: &str,
    input: &str,
    input_type: &str,
) -> Option<f64> {
    let weight = match weight_value {
        Value::Real(w) => *w,
        // Accept integers as a convenience for classes returning 0 or 1.
        Value::SignedInteger(i) => *i as f64,
        Value::UnsignedInteger(u) => *u as f64,
        other => {
            warn!(
                class = %format!("source.{plugin_name}.{source_cc_name}"),
                input,
                input_type,
                actual_type = other.type_name(),
                "Unexpected type for support-info weight"
            );
            return None;
        }
    };
    if !(0.0..=1.0).contains(&weight) {
        warn!(
            class = %format!("source.{plugin_name}.{source_cc_name}"),
            input,
            input_type,
            weight,
            "Support-info weight is out of range [0.0, 1.0]"
        );
        return None;
    }
    Some(weight)
}

/// Queries every candidate source class about one input. The single
/// highest-weighted positive response wins; ties keep the first responder.
#[allow(clippy::too_many_arguments)]
fn support_info_query_all_sources(
    input: &str,
    input_type: &str,
    original_input_index: u64,
    registry: &PluginRegistry,
    plugin_restrict: Option<&str>,
    component_class_restrict: Option<&str>,
    executor: &QueryExecutor,
    discovery: &mut AutoSourceDiscovery,
) -> Result<PassOutcome, Error> {
    let mut params = Value::map();
    params.insert("input".to_owned(), input.into());
    params.insert("type".to_owned(), input_type.into());
    let params = Value::Map(params);

    struct Winner {
        plugin_name: String,
        source_cc_name: String,
        group: Option<String>,
        weight: f64,
    }
    let mut winner: Option<Winner> = None;

    for plugin in registry.plugins() {
        if let Some(restrict) = plugin_restrict {
            if restrict != plugin.name() {
                continue;
            }
        }
        for source_cc in plugin.source_classes() {
            if let Some(restrict) = component_class_restrict {
                if restrict != source_cc.name() {
                    continue;
                }
            }
            debug!(
                class = %format!("source.{}.{}", plugin.name(), source_cc.name()),
                input,
                input_type,
                "Running support-info query"
            );
            let class_ref = crate::component::ComponentClassRef::Source(source_cc.clone());
            let result = match executor.query(&class_ref, SUPPORT_INFO_QUERY_OBJECT, &params) {
                Ok(result) => result,
                Err(Error::InvalidObject(_)) | Err(Error::UnsupportedFeature(_)) => {
                    debug!(
                        class = %format!("source.{}.{}", plugin.name(), source_cc.name()),
                        input,
                        "Source class does not answer support-info queries"
                    );
                    continue;
                }
                Err(e) => {
                    append_cause!(Actor::Unknown("auto-discovery"), "support-info query failed");
                    return Err(e);
                }
            };

            let (weight, group) = match &result {
                Value::Real(_) | Value::SignedInteger(_) | Value::UnsignedInteger(_) => {
                    match convert_weight_value(
                        &result,
                        plugin.name(),
                        source_cc.name(),
                        input,
                        input_type,
                    ) {
                        Some(weight) => (weight, None),
                        None => continue,
                    }
                }
                Value::Map(map) => {
                    let weight_value = match map.get("weight") {
                        Some(weight_value) => weight_value,
                        None => {
                            warn!(
                                class = %format!("source.{}.{}", plugin.name(), source_cc.name()),
                                input,
                                input_type,
                                "Support-info result is missing its `weight` entry"
                            );
                            continue;
                        }
                    };
                    let weight = match convert_weight_value(
                        weight_value,
                        plugin.name(),
                        source_cc.name(),
                        input,
                        input_type,
                    ) {
                        Some(weight) => weight,
                        None => continue,
                    };
                    let group = match map.get("group") {
                        None | Some(Value::Null) => None,
                        Some(Value::String(group)) => Some(group.clone()),
                        Some(other) => {
                            warn!(
                                class = %format!("source.{}.{}", plugin.name(), source_cc.name()),
                                input,
                                input_type,
                                actual_type = other.type_name(),
                                "Unexpected type for support-info `group` entry"
                            );
                            continue;
                        }
                    };
                    (weight, group)
                }
                other => {
                    warn!(
                        class = %format!("source.{}.{}", plugin.name(), source_cc.name()),
                        input,
                        input_type,
                        actual_type = other.type_name(),
                        "Unexpected support-info result type"
                    );
                    continue;
                }
            };

            debug!(
                class = %format!("source.{}.{}", plugin.name(), source_cc.name()),
                input,
                input_type,
                weight,
                "Support-info query succeeded"
            );
            let beats = winner.as_ref().map(|w| weight > w.weight).unwrap_or(weight > 0.0);
            if beats {
                winner = Some(Winner {
                    plugin_name: plugin.name().to_owned(),
                    source_cc_name: source_cc.name().to_owned(),
                    group,
                    weight,
                });
            }
        }
    }

    match winner {
        Some(winner) => {
            info!(
                input,
                class = %format!("source.{}.{}", winner.plugin_name, winner.source_cc_name),
                weight = winner.weight,
                "Input awarded to source component class"
            );
            discovery.add(
                &winner.plugin_name,
                &winner.source_cc_name,
                winner.group.as_deref(),
                input,
                original_input_index,
            );
            Ok(PassOutcome::Claimed)
        }
        None => {
            info!(input, input_type, "Input not recognized by any source component class");
            Ok(PassOutcome::NotClaimed)
        }
    }
}

/// The path pass: files are queried as `file`; directories are queried as
/// `directory` and recursed into when no class claims them whole.
#[allow(clippy::too_many_arguments)]
fn discover_for_input_as_dir_or_file(
    input: &Path,
    original_input_index: u64,
    registry: &PluginRegistry,
    plugin_restrict: Option<&str>,
    component_class_restrict: Option<&str>,
    executor: &QueryExecutor,
    discovery: &mut AutoSourceDiscovery,
) -> Result<PassOutcome, Error> {
    let input_str = input.to_string_lossy();
    if input.is_file() {
        return support_info_query_all_sources(
            &input_str,
            "file",
            original_input_index,
            registry,
            plugin_restrict,
            component_class_restrict,
            executor,
            discovery,
        );
    }
    if input.is_dir() {
        if let PassOutcome::Claimed = support_info_query_all_sources(
            &input_str,
            "directory",
            original_input_index,
            registry,
            plugin_restrict,
            component_class_restrict,
            executor,
            discovery,
        )? {
            // A component class claimed the whole directory; don't recurse.
            return Ok(PassOutcome::Claimed);
        }
        let entries = match std::fs::read_dir(input) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                // Not fatal; skip the subtree.
                warn!(dir = %input.display(), "Failed to open directory: {e}");
                return Ok(PassOutcome::NotClaimed);
            }
            Err(e) => {
                warn!(dir = %input.display(), "Failed to open directory: {e}");
                append_cause!(
                    Actor::Unknown("auto-discovery"),
                    "failed to open directory {}: {e}",
                    input.display()
                );
                return Err(Error::msg(format!(
                    "failed to open directory {}",
                    input.display()
                )));
            }
        };
        let mut children: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => children.push(entry.path()),
                Err(e) => {
                    append_cause!(
                        Actor::Unknown("auto-discovery"),
                        "failed to read directory entry under {}: {e}",
                        input.display()
                    );
                    return Err(Error::msg(format!(
                        "failed to read directory entry under {}",
                        input.display()
                    )));
                }
            }
        }
        // Directory read order is platform-defined; sort for reproducible
        // discovery runs.
        children.sort();
        let mut dir_outcome = PassOutcome::NotClaimed;
        for child in children {
            if let PassOutcome::Claimed = discover_for_input_as_dir_or_file(
                &child,
                original_input_index,
                registry,
                plugin_restrict,
                component_class_restrict,
                executor,
                discovery,
            )? {
                dir_outcome = PassOutcome::Claimed;
            }
        }
        return Ok(dir_outcome);
    }
    debug!(input = %input.display(), "Skipping input, not a file or directory");
    Ok(PassOutcome::NotClaimed)
}

/// Resolves each user input to source component classes.
///
/// Every input first runs a string pass over all candidate classes; only
/// when nothing claims the string does the path pass run.
pub fn auto_discover_source_components(
    inputs: &[String],
    registry: &PluginRegistry,
    plugin_restrict: Option<&str>,
    component_class_restrict: Option<&str>,
    executor: &QueryExecutor,
) -> Result<AutoSourceDiscovery, Error> {
    let mut discovery = AutoSourceDiscovery::default();
    for (index, input) in inputs.iter().enumerate() {
        let index = index as u64;
        if let PassOutcome::Claimed = support_info_query_all_sources(
            input,
            "string",
            index,
            registry,
            plugin_restrict,
            component_class_restrict,
            executor,
            &mut discovery,
        )? {
            continue;
        }
        if let PassOutcome::Claimed = discover_for_input_as_dir_or_file(
            Path::new(input),
            index,
            registry,
            plugin_restrict,
            component_class_restrict,
            executor,
            &mut discovery,
        )? {
            continue;
        }
        warn!(input, "No trace was found based on this input");
    }
    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentClass, Source, SourceClass};
    use crate::plugin::Plugin;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// A source class answering support-info with a fixed weight when the
    /// input contains its token.
    struct TokenSource {
        name: String,
        token: String,
        weight: f64,
        group: Option<String>,
        map_response: bool,
    }

    impl ComponentClass for TokenSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn query(
            &self,
            object: &str,
            params: &Value,
            _executor: &QueryExecutor,
        ) -> Result<Value, Error> {
            if object != SUPPORT_INFO_QUERY_OBJECT {
                return Err(Error::InvalidObject(object.to_owned()));
            }
            let input = params
                .get("input")
                .and_then(Value::as_string)
                .ok_or_else(|| Error::invalid_params("missing input"))?;
            let weight = if input.contains(&self.token) {
                self.weight
            } else {
                0.0
            };
            if self.map_response {
                let mut map = Value::map();
                map.insert("weight".to_owned(), weight.into());
                map.insert(
                    "group".to_owned(),
                    self.group
                        .clone()
                        .map(Value::String)
                        .unwrap_or(Value::Null),
                );
                Ok(Value::Map(map))
            } else {
                Ok(weight.into())
            }
        }
    }

    impl SourceClass for TokenSource {
        fn instantiate(&self) -> Result<Box<dyn Source>, Error> {
            Err(Error::UnsupportedFeature("discovery-only test class"))
        }
    }

    fn registry_with(classes: Vec<TokenSource>) -> PluginRegistry {
        let mut plugin = Plugin::new("test", "discovery test plugin");
        for class in classes {
            plugin.add_source_class(Arc::new(class)).unwrap();
        }
        let mut registry = PluginRegistry::new();
        registry.register(plugin).unwrap();
        registry
    }

    fn discover(registry: &PluginRegistry, inputs: &[&str]) -> AutoSourceDiscovery {
        let inputs: Vec<String> = inputs.iter().map(|s| s.to_string()).collect();
        auto_discover_source_components(&inputs, registry, None, None, &QueryExecutor::new())
            .unwrap()
    }

    #[test]
    fn highest_weight_wins() {
        let registry = registry_with(vec![
            TokenSource {
                name: "low".to_owned(),
                token: "x".to_owned(),
                weight: 0.2,
                group: None,
                map_response: false,
            },
            TokenSource {
                name: "high".to_owned(),
                token: "x".to_owned(),
                weight: 0.8,
                group: None,
                map_response: false,
            },
            TokenSource {
                name: "mid".to_owned(),
                token: "x".to_owned(),
                weight: 0.5,
                group: None,
                map_response: false,
            },
        ]);
        let discovery = discover(&registry, &["x-trace"]);
        assert_eq!(discovery.results.len(), 1);
        let res = &discovery.results[0];
        assert_eq!(res.source_class_name, "high");
        assert_eq!(res.inputs, vec!["x-trace".to_owned()]);
        assert_eq!(res.original_input_indices, vec![0]);
    }

    #[test]
    fn ties_keep_the_first_encountered_class() {
        let registry = registry_with(vec![
            TokenSource {
                name: "first".to_owned(),
                token: "x".to_owned(),
                weight: 0.5,
                group: None,
                map_response: false,
            },
            TokenSource {
                name: "second".to_owned(),
                token: "x".to_owned(),
                weight: 0.5,
                group: None,
                map_response: false,
            },
        ]);
        let discovery = discover(&registry, &["x"]);
        assert_eq!(discovery.results[0].source_class_name, "first");
    }

    #[test]
    fn zero_weight_is_rejection() {
        let registry = registry_with(vec![TokenSource {
            name: "never".to_owned(),
            token: "zzz".to_owned(),
            weight: 0.9,
            group: None,
            map_response: false,
        }]);
        let discovery = discover(&registry, &["other"]);
        assert!(discovery.results.is_empty());
    }

    #[test]
    fn same_group_coalesces_different_groups_split() {
        let registry = registry_with(vec![TokenSource {
            name: "grouped".to_owned(),
            token: "t".to_owned(),
            weight: 1.0,
            group: Some("g0".to_owned()),
            map_response: true,
        }]);
        let discovery = discover(&registry, &["t1", "t2"]);
        assert_eq!(discovery.results.len(), 1);
        assert_eq!(
            discovery.results[0].inputs,
            vec!["t1".to_owned(), "t2".to_owned()]
        );
        assert_eq!(discovery.results[0].original_input_indices, vec![0, 1]);
        assert_eq!(discovery.results[0].group.as_deref(), Some("g0"));
    }

    #[test]
    fn null_group_is_a_distinct_key() {
        let registry = registry_with(vec![
            TokenSource {
                name: "nullgroup".to_owned(),
                token: "n".to_owned(),
                weight: 1.0,
                group: None,
                map_response: true,
            },
        ]);
        let discovery = discover(&registry, &["n1", "n2"]);
        // Both inputs land on the same (plugin, class, no-group) key.
        assert_eq!(discovery.results.len(), 1);
        assert_eq!(discovery.results[0].group, None);
        assert_eq!(discovery.results[0].inputs.len(), 2);
    }

    #[test]
    fn discovery_is_idempotent() {
        let registry = registry_with(vec![TokenSource {
            name: "stable".to_owned(),
            token: "s".to_owned(),
            weight: 0.7,
            group: Some("g".to_owned()),
            map_response: true,
        }]);
        let first = discover(&registry, &["s1", "s2", "other"]);
        let second = discover(&registry, &["s1", "s2", "other"]);
        assert_eq!(first, second);
    }

    #[test]
    fn out_of_range_weights_are_rejected() {
        let registry = registry_with(vec![
            TokenSource {
                name: "bogus".to_owned(),
                token: "x".to_owned(),
                weight: 2.0,
                group: None,
                map_response: false,
            },
            TokenSource {
                name: "sane".to_owned(),
                token: "x".to_owned(),
                weight: 0.1,
                group: None,
                map_response: false,
            },
        ]);
        let discovery = discover(&registry, &["x"]);
        assert_eq!(discovery.results.len(), 1);
        assert_eq!(discovery.results[0].source_class_name, "sane");
    }

    #[test]
    fn directory_recursion_claims_files() {
        let dir = tempfile::tempdir().unwrap();
        let trace_a = dir.path().join("a.trace");
        let trace_b = dir.path().join("nested").join("b.trace");
        std::fs::create_dir_all(trace_b.parent().unwrap()).unwrap();
        std::fs::write(&trace_a, b"x").unwrap();
        std::fs::write(&trace_b, b"x").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"x").unwrap();

        let registry = registry_with(vec![TokenSource {
            name: "filetrace".to_owned(),
            token: ".trace".to_owned(),
            weight: 0.75,
            group: Some("g".to_owned()),
            map_response: true,
        }]);
        let discovery = discover(&registry, &[dir.path().to_str().unwrap()]);
        assert_eq!(discovery.results.len(), 1);
        let res = &discovery.results[0];
        assert_eq!(res.inputs.len(), 2);
        assert!(res.inputs.iter().all(|i| i.ends_with(".trace")));
        assert_eq!(res.original_input_indices, vec![0]);
    }

    #[test]
    fn claimed_directory_is_not_recursed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.trace"), b"x").unwrap();

        // Claims any directory input outright.
        struct DirSource;
        impl ComponentClass for DirSource {
            fn name(&self) -> &str {
                "dirs"
            }
            fn query(
                &self,
                object: &str,
                params: &Value,
                _executor: &QueryExecutor,
            ) -> Result<Value, Error> {
                if object != SUPPORT_INFO_QUERY_OBJECT {
                    return Err(Error::InvalidObject(object.to_owned()));
                }
                let is_dir = params.get("type").and_then(Value::as_string) == Some("directory");
                Ok(if is_dir { 1.0 } else { 0.0 }.into())
            }
        }
        impl SourceClass for DirSource {
            fn instantiate(&self) -> Result<Box<dyn Source>, Error> {
                Err(Error::UnsupportedFeature("discovery-only test class"))
            }
        }

        let mut plugin = Plugin::new("test", "");
        plugin.add_source_class(Arc::new(DirSource)).unwrap();
        let mut registry = PluginRegistry::new();
        registry.register(plugin).unwrap();

        let inputs = vec![dir.path().to_string_lossy().into_owned()];
        let discovery = auto_discover_source_components(
            &inputs,
            &registry,
            None,
            None,
            &QueryExecutor::new(),
        )
        .unwrap();
        assert_eq!(discovery.results.len(), 1);
        assert_eq!(discovery.results[0].inputs, inputs);
    }
}
