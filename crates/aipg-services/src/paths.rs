//! On-disk layout of interpreter envs, services and resources.

use std::path::{Path, PathBuf};

/// Every location the orchestrator reads or writes, derived from one base dir.
#[derive(Debug, Clone)]
pub struct ServicePaths {
    base_dir: PathBuf,
}

impl ServicePaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the resources directory (bundled tools and the prototype env).
    pub fn resources_dir(&self) -> PathBuf {
        self.base_dir.join("resources")
    }

    /// Get the prototype interpreter env cloned into every service env.
    pub fn prototype_python_env(&self) -> PathBuf {
        self.resources_dir().join("prototype-python-env")
    }

    /// Get the portable git distribution, if bundled.
    pub fn portable_git(&self) -> PathBuf {
        self.resources_dir().join("portable-git")
    }

    /// Get the directory where installed portable git lives.
    pub fn git_dir(&self) -> PathBuf {
        self.base_dir.join("portable-git")
    }

    /// Get the path to the git binary.
    pub fn git_executable(&self) -> PathBuf {
        let dir = self.git_dir();
        if cfg!(target_os = "windows") {
            dir.join("cmd").join("git.exe")
        } else {
            dir.join("bin").join("git")
        }
    }

    /// Get the requirements the device probe needs in its env.
    pub fn device_probe_requirements(&self) -> PathBuf {
        self.service_dir("service")
            .join("requirements-ls_level_zero.txt")
    }

    /// Get the probe binary copied into every env that runs it.
    pub fn device_probe_source(&self) -> PathBuf {
        let binary_name = if cfg!(target_os = "windows") {
            "ls_level_zero.exe"
        } else {
            "ls_level_zero"
        };
        self.service_dir("service").join("tools").join(binary_name)
    }

    /// Get the bundled `backend-versions.json`.
    pub fn versions_file(&self) -> PathBuf {
        self.base_dir.join("backend-versions.json")
    }

    /// Get the interpreter env directory of a service, e.g. `ai-backend-env`.
    pub fn env_dir(&self, env_name: &str) -> PathBuf {
        self.base_dir.join(env_name)
    }

    /// Get the service directory (cwd of the child process).
    pub fn service_dir(&self, dir_name: &str) -> PathBuf {
        self.base_dir.join(dir_name)
    }

    /// Get the shared model directory.
    pub fn models_dir(&self) -> PathBuf {
        self.base_dir.join("models")
    }

    /// Ensure the base directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.resources_dir())?;
        std::fs::create_dir_all(self.models_dir())?;
        Ok(())
    }
}

/// Get the python interpreter inside an env.
pub fn python_executable(env_dir: &Path) -> PathBuf {
    if cfg!(target_os = "windows") {
        env_dir.join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

/// Get the device-probe binary inside an env.
pub fn device_probe_executable(env_dir: &Path) -> PathBuf {
    let binary_name = if cfg!(target_os = "windows") {
        "ls_level_zero.exe"
    } else {
        "ls_level_zero"
    };
    env_dir.join("Library").join("bin").join(binary_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = ServicePaths::new("/srv/aipg");
        assert_eq!(paths.env_dir("comfyui-backend-env"), PathBuf::from("/srv/aipg/comfyui-backend-env"));
        assert_eq!(
            paths.prototype_python_env(),
            PathBuf::from("/srv/aipg/resources/prototype-python-env")
        );
        assert_eq!(paths.versions_file(), PathBuf::from("/srv/aipg/backend-versions.json"));
    }

    #[cfg(unix)]
    #[test]
    fn test_executables() {
        let env = Path::new("/srv/aipg/ai-backend-env");
        assert_eq!(python_executable(env), env.join("bin/python"));
        assert_eq!(device_probe_executable(env), env.join("Library/bin/ls_level_zero"));
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ServicePaths::new(dir.path().join("aipg"));
        paths.ensure_dirs().unwrap();
        assert!(paths.resources_dir().is_dir());
        assert!(paths.models_dir().is_dir());
    }
}
