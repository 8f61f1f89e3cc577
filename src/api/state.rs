use crate::history::HistoryStore;
use crate::scheduler::CycleEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: CycleEngine,
    pub store: HistoryStore,
}
