// src/utils/env.rs

use log::debug;

/// Loads a `.env` file into the process environment if one is present.
/// Missing files are fine; already-set variables win.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(_) => debug!("No .env file found, using system environment"),
    }
}
