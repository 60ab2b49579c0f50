//! Collector configuration.

/// Tuning knobs for garbage collection.
///
/// Plain reference counting reclaims acyclic garbage on its own; the
/// settings here only govern the episodic cyclic pass over frozen shared
/// graphs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcConfig {
    /// Whether `Runtime::gc` runs the cyclic pass in addition to draining
    /// the deferred-release buffer. Off by default: cyclic frozen garbage
    /// is rare and the pass scans the whole frozen rootset closure.
    pub cyclic_collector: bool,
    /// How many times one cyclic pass may restart after observing a
    /// concurrent atomic mutation before giving up for this episode.
    pub max_restarts: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            cyclic_collector: false,
            max_restarts: 8,
        }
    }
}
