//! Guards against overwriting the listen database with stats output.

use std::path::Path;

use anyhow::{bail, Result};

/// Output name fragment every stats database must carry
pub const STATS_OUTPUT_PATTERN: &str = "stats";

/// Validates that an output path is safe to overwrite.
///
/// The output file name must contain `required_pattern` and the output must
/// not be any of `source_paths`.
pub fn validate_output_path(
    output: &Path,
    required_pattern: &str,
    source_paths: &[&Path],
) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !output_name.contains(required_pattern) {
        bail!(
            "Safety check failed: output file '{}' must contain '{}' in the name",
            output.display(),
            required_pattern
        );
    }

    for source in source_paths {
        if output == *source {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }

    Ok(())
}
