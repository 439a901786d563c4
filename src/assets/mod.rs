// Embedded shell script assets

use std::borrow::Cow;

use rust_embed::RustEmbed;

use crate::report::DeployError;

#[derive(RustEmbed)]
#[folder = "scripts/"]
#[prefix = "scripts/"]
struct Scripts;

/// Fetch an embedded script by logical path, e.g.
/// `scripts/check_memory_capacity.sh`.
pub fn open(path: &str) -> Result<Cow<'static, [u8]>, DeployError> {
    Scripts::get(path)
        .map(|file| file.data)
        .ok_or_else(|| DeployError::Asset {
            path: path.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_known_script() {
        let data = open("scripts/check_memory_capacity.sh").unwrap();
        assert!(!data.is_empty());
    }

    #[test]
    fn test_open_missing_script() {
        let err = open("scripts/does_not_exist.sh").unwrap_err();
        assert!(matches!(err, DeployError::Asset { .. }));
    }
}
