//! EnhancementPort: pre-delivery match mutators.
//!
//! Mutation is expressed via the `&mut` receiver, so the outcome only needs
//! to distinguish Kept from Dropped rather than also carrying the mutated
//! value.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementOutcome {
    Kept,
    Dropped,
}

pub trait EnhancementPort: Send + Sync {
    /// Mutate `match_body` in place. `Err(msg)` is logged and the match
    /// proceeds unmodified.
    fn apply(&self, match_body: &mut serde_json::Value) -> Result<EnhancementOutcome, String>;
}
