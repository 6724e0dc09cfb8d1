pub mod io;
pub mod model;
pub mod validation;

pub use io::{parse_config, read_config, write_config};
pub use model::{BenchConfig, ProxyDefinition, Scenario, ScenarioKind, Settings, TargetDefinition};
pub use validation::validate_config;
