use super::{DependencyGraph, DependencyGraphBuilder};
use crate::entity::EntityKind;

use anyhow::Context;
use async_trait::async_trait;
use std::time::Instant;

/// Makes one pass over the external data source for a single tracked [`EntityKind`].
#[async_trait(?Send)]
pub trait DependencyCollector {
    fn kind(&self) -> EntityKind;

    /// Adds the stamps of every entity of [`Self::kind`] and the edges to whatever each entity references.
    async fn collect(&self, builder: &mut DependencyGraphBuilder) -> anyhow::Result<()>;
}

/// Runs every collector in order and freezes the result.
pub async fn collect_dependencies(
    collectors: &[&dyn DependencyCollector],
) -> anyhow::Result<DependencyGraph> {
    let mut builder = DependencyGraphBuilder::default();
    for collector in collectors {
        let kind = collector.kind();
        log::info!("starting {}", kind);
        let start = Instant::now();
        collector
            .collect(&mut builder)
            .await
            .with_context(|| format!("collecting {} dependencies", kind))?;
        log::info!("finished {}, duration {:?}", kind, start.elapsed());
    }
    log::info!("collected {} dependency edges", builder.num_edges());
    Ok(builder.build())
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
