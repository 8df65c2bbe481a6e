use scene::MarkerState;
use serde::Serialize;

/// One lifecycle notification delivered to a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkerEvent {
    Created { cycle: u64, marker: MarkerState },
    Updated { cycle: u64, marker: MarkerState },
    Removed { cycle: u64, id: String },
}

impl MarkerEvent {
    pub fn cycle(&self) -> u64 {
        match self {
            MarkerEvent::Created { cycle, .. }
            | MarkerEvent::Updated { cycle, .. }
            | MarkerEvent::Removed { cycle, .. } => *cycle,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            MarkerEvent::Created { marker, .. } | MarkerEvent::Updated { marker, .. } => {
                &marker.id
            }
            MarkerEvent::Removed { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarkerEvent::Created { .. } => "created",
            MarkerEvent::Updated { .. } => "updated",
            MarkerEvent::Removed { .. } => "removed",
        }
    }
}

/// Ordered record of marker events.
///
/// Events are appended in emission order: per cycle all creations, then
/// updates, then removals, each sorted by id.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<MarkerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: MarkerEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[MarkerEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<MarkerEvent> {
        std::mem::take(&mut self.events)
    }
}
