use std::path::PathBuf;
use thiserror::Error;

const DEFFILE_PREFIX: &str = "deffile=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("base directory path is empty")]
    EmptyBasePath,
    #[error("default file path is empty")]
    EmptyDefaultFile,
    #[error("missing required option -o deffile=<path>")]
    MissingDefaultFile,
    #[error("option deffile= given more than once")]
    DuplicateDefaultFile,
    #[error("unknown mount option `{0}`")]
    UnknownOption(String),
}

/// Immutable overlay configuration, built once before mounting.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_path: PathBuf,
    pub default_file: PathBuf,
}

impl Config {
    pub fn new(base_path: PathBuf, default_file: PathBuf) -> Result<Self, ConfigError> {
        if base_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBasePath);
        }
        if default_file.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDefaultFile);
        }
        Ok(Self {
            base_path,
            default_file,
        })
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    pub fn default_file(&self) -> &std::path::Path {
        &self.default_file
    }
}

/// Options collected from `-o key[=value],...` on the command line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MountFlags {
    pub default_file: Option<PathBuf>,
    pub allow_other: bool,
    pub nonempty: bool,
    pub default_permissions: bool,
}

impl MountFlags {
    pub fn require_default_file(&self) -> Result<PathBuf, ConfigError> {
        self.default_file
            .clone()
            .ok_or(ConfigError::MissingDefaultFile)
    }
}

pub fn parse_mount_options(options: &[String]) -> Result<MountFlags, ConfigError> {
    let mut flags = MountFlags::default();

    for opt in options.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
        if let Some(value) = opt.strip_prefix(DEFFILE_PREFIX) {
            if flags.default_file.is_some() {
                return Err(ConfigError::DuplicateDefaultFile);
            }
            if value.is_empty() {
                return Err(ConfigError::EmptyDefaultFile);
            }
            flags.default_file = Some(PathBuf::from(value));
            continue;
        }

        match opt {
            "allow_other" => flags.allow_other = true,
            "nonempty" => flags.nonempty = true,
            "default_permissions" => flags.default_permissions = true,
            // The mount is always read-only; accept the explicit spelling.
            "ro" => {}
            other => return Err(ConfigError::UnknownOption(other.to_owned())),
        }
    }

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn deffile_and_flags_are_parsed() {
        let flags =
            parse_mount_options(&opts(&["deffile=/data/.default", "allow_other", "ro"])).unwrap();
        assert_eq!(flags.default_file, Some(PathBuf::from("/data/.default")));
        assert!(flags.allow_other);
        assert!(!flags.nonempty);
    }

    #[test]
    fn duplicate_deffile_is_rejected() {
        let err = parse_mount_options(&opts(&["deffile=a", "deffile=b"])).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateDefaultFile);
    }

    #[test]
    fn empty_deffile_is_rejected() {
        let err = parse_mount_options(&opts(&["deffile="])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyDefaultFile);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = parse_mount_options(&opts(&["deffil=x"])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownOption("deffil=x".into()));
    }

    #[test]
    fn missing_deffile_is_reported() {
        let flags = parse_mount_options(&opts(&["nonempty"])).unwrap();
        assert_eq!(
            flags.require_default_file().unwrap_err(),
            ConfigError::MissingDefaultFile
        );
    }

    #[test]
    fn config_rejects_empty_paths() {
        assert_eq!(
            Config::new(PathBuf::new(), PathBuf::from("d")).unwrap_err(),
            ConfigError::EmptyBasePath
        );
        assert_eq!(
            Config::new(PathBuf::from("/data"), PathBuf::new()).unwrap_err(),
            ConfigError::EmptyDefaultFile
        );
    }
}
