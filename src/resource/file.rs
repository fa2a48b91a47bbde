//! File resource - files and directories with content and mode
//!
//! Content is compared by blake3 checksum, so neither the desired nor the
//! current state ever carries file contents. With `recurse`, a directory
//! generates one child resource per entry below it (or below `source`,
//! copying that tree into place) right before it is applied.

use anyhow::{Context, Result, bail};
use converge::{ABSENT, ApplyContext, BoxedResource, ENSURE, PropertyMap, Resource, ResourceMeta, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::Params;

pub const TYPE: &str = "file";

const PATH: &str = "path";
const CONTENT: &str = "content";
const MODE: &str = "mode";
const RECURSE: &str = "recurse";
const SOURCE: &str = "source";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEnsure {
    File,
    Directory,
    Absent,
}

impl FileEnsure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Absent => ABSENT,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "file" | "present" => Some(Self::File),
            "directory" => Some(Self::Directory),
            ABSENT => Some(Self::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct File {
    meta: ResourceMeta,
    path: PathBuf,
    ensure: Option<FileEnsure>,
    content: Option<Vec<u8>>,
    mode: Option<u32>,
    recurse: bool,
    source: Option<PathBuf>,
}

impl File {
    pub fn from_params(meta: ResourceMeta, params: &Params<'_>) -> Result<Self> {
        params.only(&[PATH, ENSURE, CONTENT, MODE, RECURSE, SOURCE])?;
        let reference = &meta.reference;

        let path = params
            .string(PATH)?
            .unwrap_or_else(|| reference.title().to_string());
        let path = crate::paths::expand(&path);
        if !path.is_absolute() {
            bail!("{reference}: path must be absolute, got '{}'", path.display());
        }

        let ensure = match params.string(ENSURE)? {
            Some(text) => Some(
                FileEnsure::parse(&text)
                    .with_context(|| format!("{reference}: invalid ensure '{text}'"))?,
            ),
            None => None,
        };
        let mode = match params.string(MODE)? {
            Some(text) => Some(parse_mode(&text).with_context(|| format!("{reference}: invalid mode"))?),
            None => None,
        };
        let content = params.string(CONTENT)?.map(String::into_bytes);
        // Content implies a plain file
        let ensure = ensure.or(content.as_ref().map(|_| FileEnsure::File));
        let recurse = params.bool(RECURSE)?;
        let source = params.string(SOURCE)?.map(|source| crate::paths::expand(&source));

        if content.is_some() && ensure == Some(FileEnsure::Directory) {
            bail!("{reference}: a directory cannot have content");
        }
        if recurse && ensure != Some(FileEnsure::Directory) {
            bail!("{reference}: recurse requires ensure = \"directory\"");
        }
        if source.is_some() && !recurse {
            bail!("{reference}: source is only supported together with recurse");
        }

        Ok(Self {
            meta,
            path,
            ensure,
            content,
            mode,
            recurse,
            source,
        })
    }

    fn write_content(&self) -> Result<()> {
        let content = self.content.as_deref().unwrap_or_default();
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn apply_mode(&self) -> Result<()> {
        match self.mode {
            Some(mode) => set_mode(&self.path, mode),
            None => Ok(()),
        }
    }

    fn sync_ensure(&self, desired: &Value) -> Result<()> {
        let text = desired.as_str().unwrap_or_default();
        let Some(ensure) = FileEnsure::parse(text) else {
            bail!("invalid ensure value {desired}");
        };
        match ensure {
            FileEnsure::File => {
                if self.path.is_dir() {
                    bail!("Could not replace directory {} with a file", self.path.display());
                }
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create parent directory: {}", parent.display())
                    })?;
                }
                self.write_content()?;
                self.apply_mode()
            }
            FileEnsure::Directory => {
                if self.path.exists() && !self.path.is_dir() {
                    bail!("Could not replace file {} with a directory", self.path.display());
                }
                fs::create_dir_all(&self.path)
                    .with_context(|| format!("Failed to create directory: {}", self.path.display()))?;
                self.apply_mode()
            }
            FileEnsure::Absent => {
                let metadata = fs::symlink_metadata(&self.path)
                    .with_context(|| format!("Could not stat {}", self.path.display()))?;
                let removed = if metadata.is_dir() {
                    fs::remove_dir_all(&self.path)
                } else {
                    fs::remove_file(&self.path)
                };
                removed.with_context(|| format!("Failed to remove {}", self.path.display()))
            }
        }
    }

    /// Child resource managing `path`, mirroring `entry`
    fn child(&self, path: PathBuf, entry: &walkdir::DirEntry) -> Result<Self> {
        let is_dir = entry.file_type().is_dir();
        let (ensure, content) = match &self.source {
            Some(_) if is_dir => (Some(FileEnsure::Directory), None),
            Some(_) => {
                let bytes = fs::read(entry.path())
                    .with_context(|| format!("Failed to read {}", entry.path().display()))?;
                (Some(FileEnsure::File), Some(bytes))
            }
            None => (None, None),
        };
        let meta = ResourceMeta::new(TYPE, path.display().to_string()).noop(self.meta.noop);
        Ok(Self {
            meta,
            path,
            ensure,
            content,
            mode: self.mode,
            recurse: false,
            source: None,
        })
    }
}

impl Resource for File {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn can_eval_generate(&self) -> bool {
        self.recurse
    }

    fn eval_generate(&mut self) -> Result<Vec<BoxedResource>> {
        let root = self.source.clone().unwrap_or_else(|| self.path.clone());
        if !root.exists() {
            if self.source.is_some() {
                bail!("source {} does not exist", root.display());
            }
            return Ok(Vec::new());
        }

        let mut children: Vec<BoxedResource> = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Could not walk {}", root.display()))?;
            let relative = entry.path().strip_prefix(&root)?;
            let child = self.child(self.path.join(relative), &entry)?;
            children.push(Box::new(child));
        }
        log::debug!(
            "{}: generated {} resources from {}",
            self.meta.reference,
            children.len(),
            root.display()
        );
        Ok(children)
    }

    fn desired_state(&self) -> PropertyMap {
        let mut state = PropertyMap::new();
        if let Some(ensure) = self.ensure {
            state.insert(ENSURE.to_string(), Value::from(ensure.as_str()));
            if ensure == FileEnsure::Absent {
                return state;
            }
        }
        if let Some(content) = &self.content {
            state.insert(CONTENT.to_string(), Value::from(checksum(content)));
        }
        if let Some(mode) = self.mode {
            state.insert(MODE.to_string(), Value::from(format_mode(mode)));
        }
        state
    }

    fn current_state(&self, _ctx: &ApplyContext) -> Result<PropertyMap> {
        let mut state = PropertyMap::new();
        let metadata = match fs::symlink_metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                state.insert(ENSURE.to_string(), Value::from(ABSENT));
                return Ok(state);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Could not stat {}", self.path.display()));
            }
        };

        let kind = if metadata.is_dir() {
            FileEnsure::Directory
        } else {
            FileEnsure::File
        };
        state.insert(ENSURE.to_string(), Value::from(kind.as_str()));

        if self.content.is_some() && metadata.is_file() {
            let bytes = fs::read(&self.path)
                .with_context(|| format!("Failed to read {}", self.path.display()))?;
            state.insert(CONTENT.to_string(), Value::from(checksum(&bytes)));
        }
        if self.mode.is_some()
            && let Some(mode) = file_mode(&metadata)
        {
            state.insert(MODE.to_string(), Value::from(format_mode(mode)));
        }
        Ok(state)
    }

    fn sync(&mut self, property: &str, desired: &Value, _ctx: &ApplyContext) -> Result<()> {
        match property {
            ENSURE => self.sync_ensure(desired),
            CONTENT => self.write_content(),
            MODE => self.apply_mode(),
            other => bail!("{}: cannot manage '{other}'", self.meta.reference),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `{blake3}<hex>` checksum of file contents
pub fn checksum(bytes: &[u8]) -> String {
    format!("{{blake3}}{}", blake3::hash(bytes).to_hex())
}

/// Parse an octal mode such as `"0644"` or `"755"`
pub fn parse_mode(text: &str) -> Result<u32> {
    let mode = u32::from_str_radix(text.trim(), 8)
        .with_context(|| format!("'{text}' is not an octal mode"))?;
    if mode > 0o7777 {
        bail!("'{text}' is out of range for a file mode");
    }
    Ok(mode)
}

pub fn format_mode(mode: u32) -> String {
    format!("{mode:04o}")
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode {} on {}", format_mode(mode), path.display()))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, _mode: u32) -> Result<()> {
    bail!("file modes are not supported on this platform ({})", path.display())
}

// ============================================================================
// Tests
// ============================================================================
