pub mod engine;
pub mod loader;
pub mod logging;
pub mod rule;
pub mod types;
pub mod validate;

pub use engine::{EngineConfig, EngineConfigRaw};
pub use loader::{ContentHash, RuleLoader};
pub use logging::{LogFormat, LoggingConfig};
pub use rule::{QueryMode, RuleConfig, RuleConfigRaw};
pub use types::{parse_silence_spec, HumanDuration};
