pub mod loaders;
pub mod order;
pub mod stats;

pub use loaders::load_identifiers;
pub use order::{OrderId, OrderOutcome, StepOutcome};
pub use stats::{RunProgress, RunStatistics};
