//! Module descriptors: what a live instance loads and where it comes from.
//!
//! A [`ModuleDescriptor`] enumerates the stylesheets and scripts a module
//! declares and resolves public paths to bytes and modification stamps. It is
//! shared with the resource server thread, so implementations are `Send + Sync`.
//!
//! [`DirModule`] is the on-disk form: a directory with a `module.toml`
//! manifest and a public resource directory.

use crate::error::{IoSnafu, ManifestSnafu, Result};
use serde::Deserialize;
use snafu::ResultExt;
use std::{
    io,
    path::{Component, Path, PathBuf},
    time::UNIX_EPOCH,
};

pub const MANIFEST_FILE: &str = "module.toml";

pub trait ModuleDescriptor: Send + Sync {
    /// Fully qualified module identity handed to the hosting process.
    fn id(&self) -> &str;

    /// Short name used by the bootstrap page.
    fn name(&self) -> &str;

    /// Version of the UI runtime the module is written against.
    fn runtime_version(&self) -> &str;

    fn default_locale(&self) -> &str {
        "default"
    }

    /// Public path of the primary markup page, if the module has one.
    fn host_page(&self) -> Option<&str>;

    /// Public paths of declared stylesheets, in declaration order.
    fn style_resources(&self) -> Vec<String>;

    fn script_resources(&self) -> Vec<String>;

    /// Bytes of a public resource, `None` when the module has no such path.
    fn resource(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    /// Modification stamp of a public resource.
    fn stamp(&self, path: &str) -> Option<u64>;

    /// Bytes of a resource addressed through the classpath marker.
    fn classpath_resource(&self, _path: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    pub id: String,
    pub name: Option<String>,
    pub runtime_version: String,
    #[serde(default = "default_locale")]
    pub default_locale: String,
    pub host_page: Option<String>,
    #[serde(default)]
    pub stylesheets: Vec<String>,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    pub classpath_dir: Option<PathBuf>,
}

fn default_locale() -> String {
    "default".to_string()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

/// A module laid out on disk.
#[derive(Debug, Clone)]
pub struct DirModule {
    root: PathBuf,
    name: String,
    manifest: ModuleManifest,
}

impl DirModule {
    /// Open the module rooted at `root` by reading its `module.toml`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let path = root.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path).context(IoSnafu { path: &path })?;
        let manifest: ModuleManifest =
            toml::from_str(&contents).context(ManifestSnafu { path: &path })?;
        let name = manifest
            .name
            .clone()
            .unwrap_or_else(|| short_name(&manifest.id).to_string());
        Ok(Self {
            root,
            name,
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    fn public_file(&self, path: &str) -> Option<PathBuf> {
        contained(&self.root.join(&self.manifest.public_dir), path)
    }
}

/// Last dotted segment of a module id.
fn short_name(id: &str) -> &str {
    id.rsplit('.').next().unwrap_or(id)
}

/// Join `path` under `base`, refusing anything that climbs out of it.
fn contained(base: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    (!escapes).then(|| base.join(relative))
}

fn read_optional(path: Option<PathBuf>) -> io::Result<Option<Vec<u8>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if path.is_dir() => {
            tracing::trace!(path = %path.display(), "directory is not a resource: {e}");
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

impl ModuleDescriptor for DirModule {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn runtime_version(&self) -> &str {
        &self.manifest.runtime_version
    }

    fn default_locale(&self) -> &str {
        &self.manifest.default_locale
    }

    fn host_page(&self) -> Option<&str> {
        self.manifest.host_page.as_deref()
    }

    fn style_resources(&self) -> Vec<String> {
        self.manifest.stylesheets.clone()
    }

    fn script_resources(&self) -> Vec<String> {
        self.manifest.scripts.clone()
    }

    fn resource(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        read_optional(self.public_file(path))
    }

    fn stamp(&self, path: &str) -> Option<u64> {
        let modified = std::fs::metadata(self.public_file(path)?)
            .and_then(|m| m.modified())
            .ok()?;
        let since = modified.duration_since(UNIX_EPOCH).ok()?;
        u64::try_from(since.as_nanos()).ok()
    }

    fn classpath_resource(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        let Some(dir) = &self.manifest.classpath_dir else {
            return Ok(None);
        };
        read_optional(contained(&self.root.join(dir), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_module(root: &Path, manifest: &str) {
        std::fs::write(root.join(MANIFEST_FILE), manifest).unwrap();
        std::fs::create_dir_all(root.join("public")).unwrap();
    }

    #[test]
    fn opens_minimal_manifest() {
        let tmp = tempdir().unwrap();
        write_module(
            tmp.path(),
            "id = \"com.example.Mail\"\nruntime_version = \"2.2\"\n",
        );

        let module = DirModule::open(tmp.path()).unwrap();
        assert_eq!(module.id(), "com.example.Mail");
        assert_eq!(module.name(), "Mail");
        assert_eq!(module.default_locale(), "default");
        assert!(module.style_resources().is_empty());
        assert!(module.host_page().is_none());
    }

    #[test]
    fn missing_manifest_is_io_error() {
        let tmp = tempdir().unwrap();
        let err = DirModule::open(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("module.toml"));
    }

    #[test]
    fn bad_manifest_is_parse_error() {
        let tmp = tempdir().unwrap();
        write_module(tmp.path(), "id = 3");
        let err = DirModule::open(tmp.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse module manifest"));
    }

    #[test]
    fn reads_public_resources_and_stamps() {
        let tmp = tempdir().unwrap();
        write_module(
            tmp.path(),
            "id = \"a.B\"\nruntime_version = \"2.2\"\nstylesheets = [\"B.css\"]\n",
        );
        std::fs::write(tmp.path().join("public/B.css"), "body{}").unwrap();

        let module = DirModule::open(tmp.path()).unwrap();
        assert_eq!(module.resource("B.css").unwrap().unwrap(), b"body{}");
        assert_eq!(module.resource("missing.css").unwrap(), None);
        assert!(module.stamp("B.css").is_some());
        assert!(module.stamp("missing.css").is_none());
    }

    #[test]
    fn refuses_paths_outside_public_dir() {
        let tmp = tempdir().unwrap();
        write_module(tmp.path(), "id = \"a.B\"\nruntime_version = \"2.2\"\n");

        let module = DirModule::open(tmp.path()).unwrap();
        assert_eq!(module.resource("../module.toml").unwrap(), None);
    }

    #[test]
    fn classpath_resources_need_a_directory() {
        let tmp = tempdir().unwrap();
        write_module(
            tmp.path(),
            "id = \"a.B\"\nruntime_version = \"2.2\"\nclasspath_dir = \"lib\"\n",
        );
        std::fs::create_dir_all(tmp.path().join("lib/icons")).unwrap();
        std::fs::write(tmp.path().join("lib/icons/x.png"), [1, 2, 3]).unwrap();

        let module = DirModule::open(tmp.path()).unwrap();
        assert_eq!(
            module.classpath_resource("icons/x.png").unwrap().unwrap(),
            [1, 2, 3]
        );
    }
}
