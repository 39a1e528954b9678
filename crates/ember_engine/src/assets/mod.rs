//! Asset loaders
//!
//! Text and binary formats consumed by the renderer systems:
//! - `.shadercfg` shader declarations
//! - `.kmt` material configs
//! - `.ksm` binary mesh cache, generated from `.obj`/`.mtl` on first load
//! - images decoded to RGBA8
//! - compiled SPIR-V stages

pub mod image_loader;
pub mod material_config;
pub mod mesh;
pub mod obj_loader;
pub mod shader_config;

pub use image_loader::{ImageData, ImageLoadOptions};
pub use material_config::MaterialConfig;
pub use mesh::MeshData;
pub use shader_config::{ShaderAttributeConfig, ShaderConfig, ShaderCullMode, ShaderUniformConfig};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// File could not be read or written
    #[error("IO error for {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A text asset has a malformed line
    #[error("Parse error in {path} at line {line}: {reason}")]
    Parse {
        /// Source file (or a label for in-memory text)
        path: String,
        /// 1-based line number
        line: usize,
        /// What went wrong
        reason: String,
    },

    /// A binary asset is truncated or inconsistent
    #[error("Invalid data in {path}: {reason}")]
    InvalidData {
        /// Source file
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Image decoding failed
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    /// No file exists for the requested asset
    #[error("Asset not found: {0}")]
    NotFound(String),
}

/// Result type for asset loading
pub type AssetResult<T> = Result<T, AssetError>;

pub(crate) fn read_text(path: &Path) -> AssetResult<String> {
    std::fs::read_to_string(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_bytes(path: &Path, bytes: &[u8]) -> AssetResult<()> {
    std::fs::write(path, bytes).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Split a `key=value` line. Returns `None` for blank and `#` comment lines.
pub(crate) fn key_value(line: &str) -> Option<Result<(String, &str), ()>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(match line.split_once('=') {
        Some((key, value)) => Ok((key.trim().to_ascii_lowercase(), value.trim())),
        None => Err(()),
    })
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Load a compiled SPIR-V stage as 32-bit words
pub fn load_spirv(path: &Path) -> AssetResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(AssetError::InvalidData {
            path: path.display().to_string(),
            reason: format!("SPIR-V size {} is not a multiple of 4", bytes.len()),
        });
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    const SPIRV_MAGIC: u32 = 0x0723_0203;
    if words[0] != SPIRV_MAGIC {
        return Err(AssetError::InvalidData {
            path: path.display().to_string(),
            reason: format!("bad SPIR-V magic {:#010x}", words[0]),
        });
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_key_value() {
        assert!(key_value("   ").is_none());
        assert!(key_value("# comment").is_none());
        assert_eq!(key_value("Name = foo"), Some(Ok(("name".to_string(), "foo"))));
        assert_eq!(key_value("garbage"), Some(Err(())));
    }

    #[test]
    fn test_load_spirv_checks_magic() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&0x0723_0203_u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 0, 0, 0]).unwrap();
        assert_eq!(load_spirv(file.path()).unwrap().len(), 2);

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(&[1, 2, 3, 4, 5]).unwrap();
        assert!(load_spirv(bad.path()).is_err());
    }
}
