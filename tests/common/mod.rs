#![allow(dead_code)]

use orokb::{InMemoryGraph, KnowledgeBase, KnowledgeConfig};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A knowledge base without background sweeper, with a 1 ms time unit.
pub fn manual_kb() -> KnowledgeBase {
    init_tracing();
    let mut config = KnowledgeConfig::default();
    config.memory.time_unit_ms = 1;
    KnowledgeBase::manual(config, Box::new(InMemoryGraph::new())).unwrap()
}
