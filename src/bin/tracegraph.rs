#![deny(warnings, clippy::all)]

use clap::{ArgMatches, CommandFactory, FromArgMatches};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracegraph::components::trimmer::format_timestamp;
use tracegraph::config::port_pattern_matches;
use tracegraph::error::take_error_causes;
use tracegraph::opts::{
    Command, ConvertOpts, HelpOpts, Opts, PrintCtfMetadataOpts, PrintLttngLiveSessionsOpts,
    QueryOpts, RunOpts,
};
use tracegraph::prelude::*;
use tracegraph::query::TRACE_INFO_QUERY_OBJECT;
use tracegraph::value::ValueMap;
use tracegraph::tracing::{env_logging_level, try_init_tracing_subscriber_with_level};
use tracing::{debug, warn};

const KNOWN_COMMANDS: &[&str] = &[
    "run",
    "convert",
    "list-plugins",
    "help",
    "query",
    "print-ctf-metadata",
    "print-lttng-live-sessions",
];

/// Set to `0` to silence the "you probably meant convert" hint.
const CLASH_WARNING_ENV_VAR: &str = "TRACEGRAPH_CLI_WARN_COMMAND_NAME_DIRECTORY_CLASH";

fn main() {
    let args = preprocess_args(std::env::args().collect());
    // The raw matches are kept around: `--params` binds to the preceding
    // `--component` by argument position.
    let matches = Opts::command().get_matches_from(args);
    let opts = match Opts::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(e) => e.exit(),
    };
    let level = opts.log_level.unwrap_or_else(env_logging_level);
    if let Err(e) = try_init_tracing_subscriber_with_level(level) {
        eprintln!("Failed to initialize the tracing subscriber: {e}");
    }

    match run_command(opts, &matches, level) {
        Ok(()) => (),
        Err(e) => {
            eprintln!("Error: {e}");
            let causes = take_error_causes();
            if !causes.is_empty() {
                eprintln!("Causes, root first:");
                for cause in causes {
                    eprintln!("  {cause}");
                }
            }
            std::process::exit(1);
        }
    }
}

/// The historical CLI treats a first argument that is no known command as
/// an input to an implicit `convert`. When the first argument names both a
/// command and a directory, point out the ambiguity.
fn preprocess_args(mut args: Vec<String>) -> Vec<String> {
    if let Some(first) = args.get(1).cloned() {
        if KNOWN_COMMANDS.contains(&first.as_str()) {
            let silenced = std::env::var(CLASH_WARNING_ENV_VAR).as_deref() == Ok("0");
            if Path::new(&first).is_dir() && !silenced {
                eprintln!(
                    "Note: `{first}` names both the `{first}` command and a directory; \
                     to convert the directory, use `tracegraph convert {first}`. \
                     (Set {CLASH_WARNING_ENV_VAR}=0 to silence this note.)"
                );
            }
        } else if !first.starts_with('-') {
            args.insert(1, "convert".to_owned());
        }
    }
    args
}

fn run_command(opts: Opts, matches: &ArgMatches, level: LoggingLevel) -> Result<(), Error> {
    let registry = PluginRegistry::with_default_plugins();
    let interruptor = Interruptor::new();
    install_signal_handler(interruptor.clone())?;
    match opts.command {
        Command::Run(o) => {
            let run_matches = matches
                .subcommand_matches("run")
                .ok_or_else(|| Error::msg("missing argument matches for the run command"))?;
            cmd_run(o, run_matches, &registry, interruptor, level)
        }
        Command::Convert(o) => cmd_convert(o, &registry, interruptor, level),
        Command::ListPlugins => cmd_list_plugins(&registry),
        Command::Help(o) => cmd_help(o, &registry),
        Command::Query(o) => cmd_query(o, &registry, interruptor),
        Command::PrintCtfMetadata(o) => cmd_print_ctf_metadata(o, &registry, interruptor),
        Command::PrintLttngLiveSessions(o) => {
            cmd_print_lttng_live_sessions(o, &registry, interruptor)
        }
    }
}

fn install_signal_handler(interruptor: Interruptor) -> Result<(), Error> {
    ctrlc::set_handler(move || {
        if interruptor.is_set() {
            // 128 (fatal error signal "n") + 2 (control-c is fatal error signal 2)
            std::process::exit(130);
        } else {
            debug!("Shutdown signal received");
            interruptor.set();
        }
    })
    .map_err(|e| Error::msg(format!("failed to install the signal handler: {e}")))
}

fn find_class_ref(
    registry: &PluginRegistry,
    spec: &ComponentSpec,
) -> Result<ComponentClassRef, Error> {
    match spec.kind {
        ComponentClassKind::Source => registry
            .find_source_class(&spec.plugin, &spec.class)
            .map(ComponentClassRef::Source),
        ComponentClassKind::Filter => registry
            .find_filter_class(&spec.plugin, &spec.class)
            .map(ComponentClassRef::Filter),
        ComponentClassKind::Sink => registry
            .find_sink_class(&spec.plugin, &spec.class)
            .map(ComponentClassRef::Sink),
    }
}

/// (component name, output port name) → intersection range in ns.
type IntersectionRanges = HashMap<(String, String), (i64, i64)>;

/// Queries `babeltrace.trace-info` on each planned source and collects, per
/// output port, the trace's stream intersection range.
fn compute_intersections(
    sources: &[(String, ComponentClassRef, Value)],
    interruptor: &Interruptor,
) -> Result<IntersectionRanges, Error> {
    let mut executor = QueryExecutor::new();
    executor.add_interruptor(interruptor.clone());
    let mut ranges = IntersectionRanges::new();
    for (name, class, params) in sources {
        let result = executor.query(class, TRACE_INFO_QUERY_OBJECT, params)?;
        let traces = result.as_array().ok_or_else(|| {
            Error::msg("trace-info query result is not an array of trace descriptions")
        })?;
        for trace in traces {
            let range = trace
                .get("intersection-range-ns")
                .and_then(|range| {
                    Some((
                        range.get("begin")?.as_signed_integer()?,
                        range.get("end")?.as_signed_integer()?,
                    ))
                })
                .ok_or_else(|| {
                    Error::msg(format!(
                        "trace reported by `{name}` has no stream intersection range"
                    ))
                })?;
            let stream_infos = trace
                .get("stream-infos")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    Error::msg(format!("trace reported by `{name}` has no stream infos"))
                })?;
            for stream_info in stream_infos {
                let port_name = stream_info
                    .get("port-name")
                    .and_then(Value::as_string)
                    .ok_or_else(|| {
                        Error::msg(format!(
                            "stream info reported by `{name}` has no port name"
                        ))
                    })?;
                ranges.insert((name.clone(), port_name.to_owned()), range);
            }
        }
    }
    Ok(ranges)
}

struct Wiring {
    rules: Vec<ConnectionRule>,
    intersections: IntersectionRanges,
    stream_intersection: bool,
    trimmer_class: Arc<dyn FilterClass>,
    level: LoggingLevel,
}

impl Wiring {
    /// Connects one upstream output port per the rules, inserting a
    /// stream-intersection trimmer in front of source ports when requested.
    ///
    /// Silently skips ports with no rule and rules whose downstream is not
    /// in the graph yet; a later pass retries those.
    fn connect_output_port(
        &self,
        graph: &Graph,
        component: &Component,
        port: &OutputPort,
    ) -> Result<(), Error> {
        if port.is_connected() {
            return Ok(());
        }
        let rule = match self.rules.iter().find(|rule| {
            rule.upstream_component == component.name()
                && port_pattern_matches(rule.upstream_port.as_deref(), port.name())
        }) {
            Some(rule) => rule,
            None => return Ok(()),
        };
        let downstream = match graph.component(&rule.downstream_component) {
            Some(downstream) => downstream,
            None => return Ok(()),
        };
        let downstream_port = downstream
            .input_ports()
            .into_iter()
            .find(|p| {
                !p.is_connected()
                    && port_pattern_matches(rule.downstream_port.as_deref(), p.name())
            })
            .ok_or_else(|| {
                Error::msg(format!(
                    "no available input port on `{}` to connect `{}.{}`",
                    downstream.name(),
                    component.name(),
                    port.name()
                ))
            })?;
        self.connect_through_trimmer(graph, component, port, &downstream_port)
    }

    /// Connects `port` to `downstream_port`, rerouting through a fresh
    /// trimmer when the port's trace has an intersection range.
    fn connect_through_trimmer(
        &self,
        graph: &Graph,
        component: &Component,
        port: &OutputPort,
        downstream_port: &InputPort,
    ) -> Result<(), Error> {
        let is_source = component.class_kind() == ComponentClassKind::Source;
        if self.stream_intersection && is_source {
            let range = self
                .intersections
                .get(&(component.name().to_owned(), port.name().to_owned()))
                .ok_or_else(|| {
                    Error::msg(format!(
                        "no stream intersection range for port `{}.{}`",
                        component.name(),
                        port.name()
                    ))
                })?;
            let trimmer_name = format!("stream-intersection-trimmer-{}", port.name());
            let mut params = Value::map();
            params.insert("begin".to_owned(), format_timestamp(range.0).into());
            params.insert("end".to_owned(), format_timestamp(range.1).into());
            let trimmer = graph.add_filter_component(
                self.trimmer_class.clone(),
                trimmer_name,
                &Value::Map(params),
                self.level,
            )?;
            let trimmer_in = trimmer.input_port("in").ok_or_else(|| Error::UnknownPort {
                component: trimmer.name().to_owned(),
                port: "in".to_owned(),
            })?;
            let trimmer_out = trimmer.output_port("out").ok_or_else(|| Error::UnknownPort {
                component: trimmer.name().to_owned(),
                port: "out".to_owned(),
            })?;
            graph.connect_ports(port, &trimmer_in)?;
            graph.connect_ports(&trimmer_out, downstream_port)?;
        } else {
            graph.connect_ports(port, downstream_port)?;
        }
        Ok(())
    }
}

/// Merges each `--params` occurrence into the component added by the
/// `--component` occurrence immediately preceding it, using clap's raw
/// argument indices to recover the interleaving.
fn pair_params_with_components(
    opts: &RunOpts,
    matches: &ArgMatches,
) -> Result<Vec<ValueMap>, Error> {
    let component_indices: Vec<usize> = matches
        .indices_of("components")
        .map(|indices| indices.collect())
        .unwrap_or_default();
    let params_indices: Vec<usize> = matches
        .indices_of("params")
        .map(|indices| indices.collect())
        .unwrap_or_default();
    let mut merged = vec![ValueMap::new(); opts.components.len()];
    for (entry, argv_index) in opts.params.iter().zip(params_indices) {
        let owner = component_indices
            .iter()
            .rposition(|component_index| *component_index < argv_index)
            .ok_or_else(|| {
                Error::invalid_params(format!(
                    "--params `{entry}` does not follow a --component to apply to"
                ))
            })?;
        if let Value::Map(parsed) = parse_params(entry)? {
            merged[owner].extend(parsed);
        }
    }
    Ok(merged)
}

fn cmd_run(
    opts: RunOpts,
    matches: &ArgMatches,
    registry: &PluginRegistry,
    interruptor: Interruptor,
    level: LoggingLevel,
) -> Result<(), Error> {
    if opts.components.is_empty() {
        return Err(Error::invalid_params(
            "at least one --component is required",
        ));
    }

    let params_by_position = pair_params_with_components(&opts, matches)?;

    // Resolve every class before touching the graph.
    let mut planned: Vec<(String, ComponentSpec, ComponentClassRef, Value)> = Vec::new();
    for (spec, params) in opts.components.iter().zip(params_by_position) {
        let name = spec.instance_name();
        if planned.iter().any(|(existing, ..)| existing == &name) {
            return Err(Error::DuplicateComponentName(name));
        }
        let class = find_class_ref(registry, spec)?;
        let params = if params.is_empty() {
            Value::Null
        } else {
            Value::Map(params)
        };
        planned.push((name, spec.clone(), class, params));
    }
    for rule in &opts.connects {
        for endpoint in [&rule.upstream_component, &rule.downstream_component] {
            if !planned.iter().any(|(name, ..)| name == endpoint) {
                return Err(Error::invalid_params(format!(
                    "--connect names unknown component `{endpoint}`"
                )));
            }
        }
    }

    let intersections = if opts.stream_intersection {
        let sources: Vec<(String, ComponentClassRef, Value)> = planned
            .iter()
            .filter(|(_, spec, ..)| spec.kind == ComponentClassKind::Source)
            .map(|(name, _, class, params)| (name.clone(), class.clone(), params.clone()))
            .collect();
        compute_intersections(&sources, &interruptor)?
    } else {
        IntersectionRanges::new()
    };

    let graph = Graph::new();
    graph.add_interruptor(interruptor);
    let wiring = Arc::new(Wiring {
        rules: opts.connects.clone(),
        intersections,
        stream_intersection: opts.stream_intersection,
        trimmer_class: registry.find_filter_class("utils", "trimmer")?,
        level,
    });

    // Ports can show up as late as downstream iterator creation; the
    // listeners keep wiring them as they appear.
    let listener_wiring = wiring.clone();
    graph.add_source_output_port_added_listener(move |graph, component, port| {
        listener_wiring.connect_output_port(graph, component, port)
    });
    let listener_wiring = wiring.clone();
    graph.add_filter_output_port_added_listener(move |graph, component, port| {
        listener_wiring.connect_output_port(graph, component, port)
    });

    for (name, spec, class, params) in &planned {
        match class {
            ComponentClassRef::Source(class) => {
                graph.add_source_component(class.clone(), name.clone(), params, level)?;
            }
            ComponentClassRef::Filter(class) => {
                graph.add_filter_component(class.clone(), name.clone(), params, level)?;
            }
            ComponentClassRef::Sink(class) => {
                graph.add_sink_component(class.clone(), name.clone(), params, level)?;
            }
        }
        debug!(component = %name, class = %format!("{}.{}.{}", spec.kind, spec.plugin, spec.class), "Added component");
    }

    // Wire the ports that existed before all components were present.
    for component in graph.components() {
        for port in component.output_ports() {
            wiring.connect_output_port(&graph, &component, &port)?;
        }
    }
    for component in graph.components() {
        for port in component.output_ports() {
            if !port.is_connected() {
                warn!(
                    component = %component.name(),
                    port = %port.name(),
                    "Output port is not connected by any --connect rule"
                );
            }
        }
    }

    run_graph(&graph, opts.retry_duration_us)
}

fn cmd_convert(
    opts: ConvertOpts,
    registry: &PluginRegistry,
    interruptor: Interruptor,
    level: LoggingLevel,
) -> Result<(), Error> {
    let mut executor = QueryExecutor::new();
    executor.add_interruptor(interruptor.clone());
    let discovery = auto_discover_source_components(
        &opts.inputs,
        registry,
        opts.source_plugin.as_deref(),
        opts.source_class.as_deref(),
        &executor,
    )?;
    if discovery.results.is_empty() {
        return Err(Error::msg(
            "no source component class recognized any of the inputs",
        ));
    }

    // Source params: the discovered inputs, keyed the way source classes
    // conventionally take them.
    let mut sources: Vec<(String, ComponentClassRef, Value)> = Vec::new();
    for (index, res) in discovery.results.iter().enumerate() {
        let class = registry.find_source_class(&res.plugin_name, &res.source_class_name)?;
        let name = format!(
            "auto-disc-{}-{}-{index}",
            res.plugin_name, res.source_class_name
        );
        let mut params = Value::map();
        params.insert(
            "inputs".to_owned(),
            Value::Array(res.inputs.iter().map(|i| i.as_str().into()).collect()),
        );
        sources.push((name, ComponentClassRef::Source(class), Value::Map(params)));
    }

    let intersections = if opts.stream_intersection {
        compute_intersections(&sources, &interruptor)?
    } else {
        IntersectionRanges::new()
    };

    let graph = Graph::new();
    graph.add_interruptor(interruptor);
    let muxer = graph.add_filter_component(
        registry.find_filter_class("utils", "muxer")?,
        "muxer",
        &Value::Null,
        level,
    )?;
    let sink = graph.add_sink_component(
        registry.find_sink_class("utils", "counter")?,
        "counter",
        &Value::Null,
        level,
    )?;
    let muxer_out = muxer.output_port("out").ok_or_else(|| Error::UnknownPort {
        component: muxer.name().to_owned(),
        port: "out".to_owned(),
    })?;
    let sink_in = sink.input_port("in").ok_or_else(|| Error::UnknownPort {
        component: sink.name().to_owned(),
        port: "in".to_owned(),
    })?;
    graph.connect_ports(&muxer_out, &sink_in)?;

    // Every source output port feeds the muxer's next available input,
    // through a trimmer when stream intersection is on.
    let wiring = Arc::new(Wiring {
        rules: Vec::new(),
        intersections,
        stream_intersection: opts.stream_intersection,
        trimmer_class: registry.find_filter_class("utils", "trimmer")?,
        level,
    });
    let muxer_name = muxer.name().to_owned();
    graph.add_source_output_port_added_listener(move |graph, component, port| {
        let muxer = graph
            .component(&muxer_name)
            .ok_or_else(|| Error::msg("muxer component is gone"))?;
        let muxer_in = muxer
            .input_ports()
            .into_iter()
            .find(|p| !p.is_connected())
            .ok_or_else(|| Error::msg("muxer has no available input port"))?;
        wiring.connect_through_trimmer(graph, component, port, &muxer_in)
    });

    for (name, class, params) in &sources {
        if let ComponentClassRef::Source(class) = class {
            graph.add_source_component(class.clone(), name.clone(), params, level)?;
        }
    }

    run_graph(&graph, opts.retry_duration_us)
}

/// Drives the graph to completion, sleeping between whole-graph `Again`s.
fn run_graph(graph: &Graph, retry_duration: RetryDurationUs) -> Result<(), Error> {
    loop {
        match graph.run()? {
            RunStatus::End => return Ok(()),
            RunStatus::Again => {
                std::thread::sleep(Duration::from_micros(retry_duration.into()));
            }
        }
    }
}

fn cmd_list_plugins(registry: &PluginRegistry) -> Result<(), Error> {
    for plugin in registry.plugins() {
        println!("{}: {}", plugin.name(), plugin.description());
        for class in plugin.source_classes() {
            println!(
                "  source.{}.{}: {}",
                plugin.name(),
                class.name(),
                class.description()
            );
        }
        for class in plugin.filter_classes() {
            println!(
                "  filter.{}.{}: {}",
                plugin.name(),
                class.name(),
                class.description()
            );
        }
        for class in plugin.sink_classes() {
            println!(
                "  sink.{}.{}: {}",
                plugin.name(),
                class.name(),
                class.description()
            );
        }
    }
    Ok(())
}

fn cmd_help(opts: HelpOpts, registry: &PluginRegistry) -> Result<(), Error> {
    if opts.what.contains('.') {
        let spec: ComponentSpec = opts.what.parse()?;
        let class = find_class_ref(registry, &spec)?;
        println!("{}.{}.{}", spec.kind, spec.plugin, spec.class);
        if !class.description().is_empty() {
            println!("{}", class.description());
        }
        if !class.help().is_empty() {
            println!();
            println!("{}", class.help());
        }
    } else {
        let plugin = registry
            .plugin(&opts.what)
            .ok_or_else(|| Error::UnknownPlugin(opts.what.clone()))?;
        println!("{}: {}", plugin.name(), plugin.description());
        for class in plugin.source_classes() {
            println!("  source.{}.{}", plugin.name(), class.name());
        }
        for class in plugin.filter_classes() {
            println!("  filter.{}.{}", plugin.name(), class.name());
        }
        for class in plugin.sink_classes() {
            println!("  sink.{}.{}", plugin.name(), class.name());
        }
    }
    Ok(())
}

fn cmd_query(
    opts: QueryOpts,
    registry: &PluginRegistry,
    interruptor: Interruptor,
) -> Result<(), Error> {
    let class = find_class_ref(registry, &opts.class)?;
    let params = opts
        .params
        .as_deref()
        .map(parse_params)
        .transpose()?
        .unwrap_or(Value::Null);
    let mut executor = QueryExecutor::new();
    executor.add_interruptor(interruptor);
    let result = executor.query(&class, &opts.object, &params)?;
    print!("{}", result.to_pretty_string());
    Ok(())
}

fn cmd_print_ctf_metadata(
    opts: PrintCtfMetadataOpts,
    registry: &PluginRegistry,
    interruptor: Interruptor,
) -> Result<(), Error> {
    let class = registry
        .find_source_class("ctf", "fs")
        .map(ComponentClassRef::Source)?;
    let mut params = Value::map();
    params.insert(
        "path".to_owned(),
        opts.path.to_string_lossy().into_owned().into(),
    );
    let mut executor = QueryExecutor::new();
    executor.add_interruptor(interruptor);
    let result = executor.query(&class, "metadata-info", &Value::Map(params))?;
    let text = result
        .get("text")
        .and_then(Value::as_string)
        .ok_or_else(|| Error::msg("metadata-info query result has no `text` entry"))?;
    print!("{text}");
    Ok(())
}

fn cmd_print_lttng_live_sessions(
    opts: PrintLttngLiveSessionsOpts,
    registry: &PluginRegistry,
    interruptor: Interruptor,
) -> Result<(), Error> {
    let class = registry
        .find_source_class("ctf", "lttng-live")
        .map(ComponentClassRef::Source)?;
    let mut params = Value::map();
    params.insert("url".to_owned(), opts.url.into());
    let mut executor = QueryExecutor::new();
    executor.add_interruptor(interruptor);
    let result = executor.query(&class, "sessions", &Value::Map(params))?;
    print!("{}", result.to_pretty_string());
    Ok(())
}
