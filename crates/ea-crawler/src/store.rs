//! Format aware file store.
//!
//! The format of an entry is decided by its path: `*.json` files hold
//! structured content, anything else is opaque and kept byte for byte.
//! An entry exists iff its file exists, whatever the value it holds.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::error::{FormatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Structured,
    Opaque,
}

impl Format {
    pub fn of(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Structured,
            _ => Self::Opaque,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Opaque => "opaque",
        }
    }
}

/// Values that can be kept in a [`Store`].
pub trait Storable: Sized {
    fn encode(&self, format: Format, path: &Path) -> Result<Vec<u8>, FormatError>;

    fn decode(bytes: Vec<u8>, format: Format, path: &Path) -> Result<Self, FormatError>;
}

/// Wrapper storing any serde type as structured content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

fn unsupported(path: &Path, what: &'static str, format: Format) -> FormatError {
    FormatError::Unsupported {
        path: path.to_path_buf(),
        what,
        format: format.name(),
    }
}

/// Serializes with a 4 spaces indentation.
pub fn to_json_bytes<T>(value: &T, path: &Path) -> Result<Vec<u8>, FormatError>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|source| FormatError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(buf)
}

fn from_json_bytes<T>(bytes: &[u8], path: &Path) -> Result<T, FormatError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(|source| FormatError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

impl Storable for Value {
    fn encode(&self, format: Format, path: &Path) -> Result<Vec<u8>, FormatError> {
        match (format, self) {
            (Format::Structured, _) => to_json_bytes(self, path),
            (Format::Opaque, Value::String(s)) => Ok(s.as_bytes().to_vec()),
            (Format::Opaque, _) => Err(unsupported(path, "a non string value", format)),
        }
    }

    fn decode(bytes: Vec<u8>, format: Format, path: &Path) -> Result<Self, FormatError> {
        match format {
            Format::Structured => from_json_bytes(&bytes, path),
            Format::Opaque => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        }
    }
}

impl Storable for String {
    fn encode(&self, format: Format, path: &Path) -> Result<Vec<u8>, FormatError> {
        match format {
            Format::Structured => to_json_bytes(self, path),
            Format::Opaque => Ok(self.as_bytes().to_vec()),
        }
    }

    fn decode(bytes: Vec<u8>, format: Format, path: &Path) -> Result<Self, FormatError> {
        match format {
            Format::Structured => from_json_bytes(&bytes, path),
            Format::Opaque => Ok(match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            }),
        }
    }
}

/// Bytes are raw in both formats, a downloaded `.json` file stays as served.
impl Storable for Vec<u8> {
    fn encode(&self, _format: Format, _path: &Path) -> Result<Vec<u8>, FormatError> {
        Ok(self.clone())
    }

    fn decode(bytes: Vec<u8>, _format: Format, _path: &Path) -> Result<Self, FormatError> {
        Ok(bytes)
    }
}

impl<T> Storable for Json<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, format: Format, path: &Path) -> Result<Vec<u8>, FormatError> {
        match format {
            Format::Structured => to_json_bytes(&self.0, path),
            Format::Opaque => Err(unsupported(path, "a typed value", format)),
        }
    }

    fn decode(bytes: Vec<u8>, format: Format, path: &Path) -> Result<Self, FormatError> {
        match format {
            Format::Structured => from_json_bytes(&bytes, path).map(Json),
            Format::Opaque => Err(unsupported(path, "a typed value", format)),
        }
    }
}

/// Files under a root directory, read and written according to [`Format`].
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths are joined to the root, absolute ones are kept as is.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn contains(&self, relative: impl AsRef<Path>) -> bool {
        self.path(relative).is_file()
    }

    pub fn read<T>(&self, relative: impl AsRef<Path>) -> Result<Option<T>>
    where
        T: Storable,
    {
        let path = self.path(relative);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        log::info!("reading {}", path.display());
        Ok(Some(T::decode(bytes, Format::of(&path), &path)?))
    }

    pub fn write<T>(&self, relative: impl AsRef<Path>, value: &T) -> Result<()>
    where
        T: Storable,
    {
        let path = self.path(relative);
        let bytes = value.encode(Format::of(&path), &path)?;
        write_file(&path, &bytes)
    }

    /// Writes `content` as is, whatever the suffix of `relative`.
    pub fn save(&self, relative: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        write_file(&self.path(relative), content.as_ref())
    }

    /// Writes `value` as indented JSON, whatever the suffix of `relative`.
    pub fn save_json<T>(&self, relative: impl AsRef<Path>, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let path = self.path(relative);
        let bytes = to_json_bytes(value, &path)?;
        write_file(&path, &bytes)
    }
}

/// Replaces `path` through a temporary sibling so readers never see a
/// truncated entry.
fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    log::info!("saving {}", path.display());
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
