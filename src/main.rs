use std::{fs::File, io::BufWriter, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::*;

use latency_tracer::{
    cli::manager::Args,
    graph::{
        memory::MemoryGraph,
        types::{NodeClass, NodeId, NodeState, PortId},
    },
    logger,
    metrics::{
        records::RecordKind,
        sink::{HistorySink, JsonLinesSink, TracingSink},
        MetricsRegistry,
    },
    tracer::{meta::DataUnit, LatencyTracer},
};

const PAYLOAD_SIZE: usize = 188;

fn main() -> Result<()> {
    let args = Args::parse();
    logger::manager::init(&args)?;

    let config = args.tracer_config()?;
    let registry = Arc::new(MetricsRegistry::new());

    let json_sink = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {path:?}"))?;
            let sink = Arc::new(JsonLinesSink::new(BufWriter::new(file)));
            registry.add_sink(sink.clone());
            Some(sink)
        }
        None => {
            registry.add_sink(Arc::new(TracingSink));
            None
        }
    };
    let history = (args.history > 0).then(|| Arc::new(HistorySink::new(args.history)));
    if let Some(history) = &history {
        registry.add_sink(history.clone());
    }

    let graph = Arc::new(MemoryGraph::new());
    let tracer = LatencyTracer::new(graph.clone(), config, registry.clone());
    graph.attach(&tracer);

    let pipeline = graph.add_pipeline("pipeline0");
    let starts = (0..args.branches)
        .map(|index| build_branch(&graph, pipeline, index, &args))
        .collect::<Result<Vec<_>>>()?;

    graph.set_state(pipeline, NodeState::Playing)?;
    if let Some(summary) = tracer.discovery(pipeline) {
        debug!("Discovery: {}", serde_json::to_string(&summary)?);
    }

    thread::scope(|scope| {
        for (index, start) in starts.iter().copied().enumerate() {
            let graph = &graph;
            let args = &args;
            thread::Builder::new()
                .name(format!("branch{index}"))
                .spawn_scoped(scope, move || drive_branch(graph, start, args))
                .context("Failed to spawn branch thread")?;
        }
        Ok::<_, anyhow::Error>(())
    })?;

    for (_, branch) in tracer.branches() {
        let names = branch.names();
        info!(
            "Branch {} -> {} in {}: {} frames",
            names.source,
            names.sink,
            names.pipeline,
            branch.frame_count()
        );
    }
    for kind in RecordKind::ALL {
        info!("{}: {} records", kind.class_name(), registry.emitted(kind));
    }
    info!("Counters: {}", serde_json::to_string(&tracer.counters())?);

    graph.set_state(pipeline, NodeState::Null)?;
    tracer.shutdown();

    if let Some(history) = history {
        info!("Last {} records kept in history", history.len());
        if let Some(last) = history.records().last() {
            info!("Last record: {}", serde_json::to_string(last)?);
        }
    }
    if let Some(sink) = json_sink {
        sink.flush().context("Failed to flush records")?;
    }

    Ok(())
}

/// Build `source → depth × identity → sink` and return the source port.
fn build_branch(graph: &MemoryGraph, pipeline: NodeId, index: usize, args: &Args) -> Result<PortId> {
    let source = graph.add_node(pipeline, &format!("src{index}"), NodeClass::source("testsrc"))?;
    let sink = graph.add_node(pipeline, &format!("sink{index}"), NodeClass::sink("fakesink"))?;

    let wrap = args.bin && args.depth > 0;
    let parent = if wrap {
        graph.add_bin(pipeline, &format!("bin{index}"), NodeClass::new("bin", Vec::new()))?
    } else {
        pipeline
    };

    let filters = (0..args.depth)
        .map(|depth| {
            graph.add_node(
                parent,
                &format!("filter{index}_{depth}"),
                NodeClass::filter("identity"),
            )
        })
        .collect::<latency_tracer::error::Result<Vec<_>>>()?;
    for pair in filters.windows(2) {
        graph.link_nodes(pair[0], pair[1])?;
    }

    let source_port = graph.port(source, "src").context("Source without src port")?;
    let sink_port = graph.port(sink, "sink").context("Sink without sink port")?;

    match (filters.first(), filters.last()) {
        (Some(first), Some(last)) if wrap => {
            let inner_sink = graph.port(*first, "sink").context("Filter without sink port")?;
            let inner_src = graph.port(*last, "src").context("Filter without src port")?;
            let ghost_sink = graph.add_ghost_port(parent, "sink", inner_sink)?;
            let ghost_src = graph.add_ghost_port(parent, "src", inner_src)?;
            graph.link(source_port, ghost_sink)?;
            graph.link(ghost_src, sink_port)?;
        }
        (Some(first), Some(last)) => {
            graph.link_nodes(source, *first)?;
            graph.link_nodes(*last, sink)?;
        }
        _ => graph.link(source_port, sink_port)?,
    }

    Ok(source_port)
}

fn drive_branch(graph: &MemoryGraph, start: PortId, args: &Args) {
    let work = Duration::from_micros(args.work_us);
    for frame in 0..args.frames {
        let mut unit = DataUnit::new(vec![(frame % 256) as u8; PAYLOAD_SIZE]);
        graph.run_through(start, &mut unit, |_| thread::sleep(work));
        thread::sleep(Duration::from_millis(args.frame_interval_ms));
    }
    debug!("Pushed {} frames from port {start}", args.frames);
}
