//! Common utilities and helpers.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::{VE_NAME_PREFIX_LEN, VE_NAME_SUFFIX_LEN};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a globally unique virtual environment name.
///
/// The name is built from a zero-padded experiment-id prefix, the template
/// unit name and a random lowercase suffix, so units of different experiments
/// never collide on the backend.
pub fn unique_ve_name(experiment_id: i64, unit_name: &str) -> String {
    let prefix: String = format!("{:0width$}", experiment_id, width = VE_NAME_PREFIX_LEN)
        .chars()
        .take(VE_NAME_PREFIX_LEN)
        .collect();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VE_NAME_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    format!("{}-{}-{}", prefix, unit_name, suffix)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
