#![allow(dead_code)]

use std::sync::Arc;

use keylatch_core::{ExecutionMode, Keylatch, MemoryStore, ModePreference};

/// Every execution mode, with the preference that forces it.
pub const MODES: [(ModePreference, ExecutionMode); 3] = [
    (ModePreference::Function, ExecutionMode::ReusableFunction),
    (ModePreference::Script, ExecutionMode::CachedScript),
    (ModePreference::Eval, ExecutionMode::RawEvaluation),
];

/// A negotiated instance over a fresh in-memory store, pinned to `preference`.
pub async fn keylatch_in(preference: ModePreference) -> (Arc<MemoryStore>, Keylatch) {
    let store = Arc::new(MemoryStore::new());
    let keylatch = Keylatch::builder()
        .store(store.clone())
        .execution_mode(preference)
        .build();
    keylatch.negotiate().await;
    (store, keylatch)
}
