use crate::config::Config;
use crate::util::invalid_argument;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

/// Joins the configured base directory with a virtual path from the kernel.
///
/// Exactly one `/` separates the two halves: leading separators on `path` are
/// dropped and one is inserted unless the base already ends with `/`.
pub fn translate_path(config: &Config, path: &OsStr) -> Result<PathBuf, fuse3::Errno> {
    let base = config.base_path().as_os_str().as_bytes();
    let virt = path.as_bytes();
    if base.is_empty() || virt.is_empty() {
        return Err(invalid_argument());
    }

    let start = virt.iter().position(|b| *b != b'/').unwrap_or(virt.len());
    let rest = &virt[start..];

    let mut joined = Vec::with_capacity(base.len() + rest.len() + 1);
    joined.extend_from_slice(base);
    if !base.ends_with(b"/") {
        joined.push(b'/');
    }
    joined.extend_from_slice(rest);

    Ok(PathBuf::from(OsString::from_vec(joined)))
}

pub fn make_child_path(parent: &OsStr, name: &OsStr) -> OsString {
    if parent == OsStr::new("/") {
        let mut composed = OsString::from("/");
        composed.push(name);
        composed
    } else {
        let mut composed = OsString::from(parent);
        composed.push(OsStr::new("/"));
        composed.push(name);
        composed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> Config {
        Config {
            base_path: PathBuf::from(base),
            default_file: PathBuf::from("/data/.default"),
        }
    }

    fn translate(base: &str, path: &str) -> Result<PathBuf, fuse3::Errno> {
        translate_path(&config(base), OsStr::new(path))
    }

    #[test]
    fn inserts_single_separator() {
        assert_eq!(translate("/data", "a.txt").unwrap(), PathBuf::from("/data/a.txt"));
        assert_eq!(translate("/data", "/a.txt").unwrap(), PathBuf::from("/data/a.txt"));
        assert_eq!(translate("/data/", "a.txt").unwrap(), PathBuf::from("/data/a.txt"));
    }

    #[test]
    fn collapses_redundant_leading_separators() {
        assert_eq!(
            translate("/data/", "///x/y").unwrap(),
            PathBuf::from("/data/x/y")
        );
        assert_eq!(translate("/data", "//x").unwrap(), PathBuf::from("/data/x"));
    }

    #[test]
    fn root_maps_to_base_directory() {
        assert_eq!(translate("/data", "/").unwrap().as_os_str(), "/data/");
        assert_eq!(translate("rel", "/sub").unwrap(), PathBuf::from("rel/sub"));
    }

    #[test]
    fn empty_inputs_are_invalid() {
        let einval = fuse3::Errno::from(libc::EINVAL);
        assert_eq!(translate("/data", "").unwrap_err(), einval);
        assert_eq!(translate("", "/a").unwrap_err(), einval);
    }

    #[test]
    fn child_paths_compose_from_root_and_subdirs() {
        assert_eq!(
            make_child_path(OsStr::new("/"), OsStr::new("a")),
            OsString::from("/a")
        );
        assert_eq!(
            make_child_path(OsStr::new("/dir"), OsStr::new("a")),
            OsString::from("/dir/a")
        );
    }
}
