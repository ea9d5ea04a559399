use std::sync::Arc;

use crate::core::{clock::Clock, config::Settings};
use crate::services::{attempts::AttemptService, grading::GradingService};
use crate::store::AttemptStore;
use crate::tasks::scheduler::AutoSubmitScheduler;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn AttemptStore>,
    attempts: AttemptService,
    grading: GradingService,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let attempts =
            AttemptService::new(store.clone(), clock, AutoSubmitScheduler::default());
        let grading = GradingService::new(attempts.clone());
        Self { inner: Arc::new(InnerState { settings, store, attempts, grading }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn AttemptStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn attempts(&self) -> &AttemptService {
        &self.inner.attempts
    }

    pub(crate) fn grading(&self) -> &GradingService {
        &self.inner.grading
    }
}
