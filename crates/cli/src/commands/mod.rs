pub mod assemble;
pub mod init;
pub mod select;

use promptweave_config::{AssemblyConfig, ConfigError};
use promptweave_engine::AssemblySession;
use std::path::Path;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AssemblyConfig, ConfigError> {
    match path {
        Some(path) => AssemblyConfig::load_from(path),
        None => AssemblyConfig::load(),
    }
}

/// A fresh session, seeded when a seed is given.
pub fn new_session(config: AssemblyConfig, seed: Option<u64>) -> AssemblySession {
    let session = AssemblySession::new(config);
    match seed {
        Some(seed) => session.with_seed(seed),
        None => session,
    }
}
