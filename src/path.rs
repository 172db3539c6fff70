// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::path::{Path, PathBuf};

/// Makes the path absolute, relative to the current working directory.
///
/// Falls back to the path as given if the working directory cannot be read.
#[allow(clippy::module_name_repetitions)]
pub fn absolute_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    std::path::absolute(path).unwrap_or_else(|_| path.into())
}

#[cfg(test)]
mod tests {
    use super::absolute_path;
    use test_log::test;

    #[test]
    fn absolute_path_keeps_absolute() {
        let dir = std::env::temp_dir();
        assert_eq!(dir, absolute_path(&dir));
    }

    #[test]
    fn absolute_path_resolves_relative() {
        let path = absolute_path("some/folder");
        assert!(path.is_absolute());
        assert!(path.ends_with("some/folder"));
    }
}
