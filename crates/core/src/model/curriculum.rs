use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ModuleId;

/// Authoritative lesson counts per module.
///
/// Module totals come from here, never from how many lessons happen to be in
/// a cache at the moment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curriculum {
    lessons_per_module: BTreeMap<ModuleId, u32>,
}

impl Curriculum {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(mut self, module_id: ModuleId, lesson_count: u32) -> Self {
        self.lessons_per_module.insert(module_id, lesson_count);
        self
    }

    #[must_use]
    pub fn lesson_count(&self, module_id: &ModuleId) -> Option<u32> {
        self.lessons_per_module.get(module_id).copied()
    }

    #[must_use]
    pub fn total_lessons(&self) -> u32 {
        self.lessons_per_module
            .values()
            .fold(0_u32, |acc, n| acc.saturating_add(*n))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons_per_module.is_empty()
    }

    pub fn modules(&self) -> impl Iterator<Item = (&ModuleId, u32)> {
        self.lessons_per_module.iter().map(|(id, n)| (id, *n))
    }
}
