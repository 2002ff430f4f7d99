use std::env;

use crate::Env;


/// Snapshots the process environment as the environment-lookup mapping handed
/// to emission. The core never reads the environment itself; callers pass a
/// mapping like this one
pub fn process_env() -> Env {
    env::vars().collect()
}
