use std::path::Path;

use crate::util::{config_path, load_config, print_json, usage_error};

pub fn run(file: Option<&Path>) -> i32 {
    match load_config(file) {
        Ok(config) => print_json(&config),
        Err(e) => usage_error(
            &e,
            Some(&format!(
                "Config is read from --config, then {}, then DOSEGATE_* env vars.",
                config_path().display()
            )),
        ),
    }
}
