//! Intent & Complexity Analyser (C1): classifies a raw query into an
//! `IntentRecord` consumed by the token budget calculator, agent router, and
//! synthesiser.

mod classifier;
mod types;

pub use classifier::IntentClassifier;
pub use types::{Entity, EntityKind, IntentClass, IntentRecord, Method, QuestionType};
