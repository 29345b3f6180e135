use std::path::{Path, PathBuf};
use tracing::debug;

/// A dependency manifest found near the artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub path: PathBuf,
    pub contents: String,
}

impl Manifest {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Which manifest declares dependencies for an artifact of this type
pub fn manifest_file_name(artifact: &Path) -> &'static str {
    match artifact.extension().and_then(|e| e.to_str()) {
        Some("py") => "requirements.txt",
        Some("rb") => "Gemfile",
        Some("rs") => "Cargo.toml",
        Some("go") => "go.mod",
        _ => "package.json",
    }
}

/// Search `start` and each of its ancestors for `file_name`
pub fn find_upwards(start: &Path, file_name: &str) -> Option<PathBuf> {
    let start = std::fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Load the manifest for `artifact`; absence or read errors yield `None`
pub fn load_manifest_for(artifact: &Path) -> Option<Manifest> {
    let dir = artifact
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = manifest_file_name(artifact);

    let path = find_upwards(dir, file_name)?;
    match std::fs::read_to_string(&path) {
        Ok(contents) => Some(Manifest { path, contents }),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to read dependency manifest");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_by_extension() {
        assert_eq!(manifest_file_name(Path::new("a/b.py")), "requirements.txt");
        assert_eq!(manifest_file_name(Path::new("b.rb")), "Gemfile");
        assert_eq!(manifest_file_name(Path::new("src/lib.rs")), "Cargo.toml");
        assert_eq!(manifest_file_name(Path::new("main.go")), "go.mod");
        assert_eq!(manifest_file_name(Path::new("add.ts")), "package.json");
        assert_eq!(manifest_file_name(Path::new("Makefile")), "package.json");
    }

    #[test]
    fn test_found_in_ancestor() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{\"name\":\"demo\"}").unwrap();
        let nested = dir.path().join("src").join("utils");
        std::fs::create_dir_all(&nested).unwrap();

        let manifest = load_manifest_for(&nested.join("add.ts")).unwrap();
        assert_eq!(manifest.file_name(), "package.json");
        assert_eq!(manifest.contents, "{\"name\":\"demo\"}");
    }

    #[test]
    fn test_nearest_manifest_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask\n").unwrap();
        let pkg = dir.path().join("pkg");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("requirements.txt"), "numpy\n").unwrap();

        let manifest = load_manifest_for(&pkg.join("calc.py")).unwrap();
        assert_eq!(manifest.contents, "numpy\n");
    }

    #[test]
    fn test_missing_manifest_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(find_upwards(dir.path(), "definitely-absent-manifest.lock").is_none());
    }
}
