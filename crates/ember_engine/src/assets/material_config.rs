//! `.kmt` material config
//!
//! ```text
//! version=0.1
//! name=crate
//! diffuse_colour=1.0 1.0 1.0 1.0
//! diffuse_map_name=crate_diffuse
//! shader=Shader.Builtin.Material
//! ```

use super::{key_value, parse_bool, read_text, write_bytes, AssetError, AssetResult};
use crate::foundation::math::Vec4;
use std::path::Path;

/// Material definition
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialConfig {
    /// Material name
    pub name: String,
    /// Diffuse colour (RGBA)
    pub diffuse_colour: Vec4,
    /// Diffuse texture name, if any
    pub diffuse_map_name: Option<String>,
    /// Shader name, `None` for the default material shader
    pub shader_name: Option<String>,
    /// Release the material when its reference count reaches zero
    pub auto_release: bool,
}

impl MaterialConfig {
    /// White material with no texture
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diffuse_colour: Vec4::new(1.0, 1.0, 1.0, 1.0),
            diffuse_map_name: None,
            shader_name: None,
            auto_release: true,
        }
    }

    /// Load and parse a `.kmt` file
    pub fn load(path: &Path) -> AssetResult<Self> {
        let text = read_text(path)?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse `.kmt` text. `source` labels errors.
    pub fn parse(text: &str, source: &str) -> AssetResult<Self> {
        let mut config = Self::new("");
        let error = |line: usize, reason: String| AssetError::Parse {
            path: source.to_string(),
            line,
            reason,
        };

        for (index, raw) in text.lines().enumerate() {
            let line_number = index + 1;
            let (key, value) = match key_value(raw) {
                None => continue,
                Some(Ok(pair)) => pair,
                Some(Err(())) => return Err(error(line_number, "expected key=value".to_string())),
            };

            match key.as_str() {
                "version" => {}
                "name" => config.name = value.to_string(),
                "diffuse_map_name" => {
                    config.diffuse_map_name = (!value.is_empty()).then(|| value.to_string());
                }
                "diffuse_colour" | "diffuse_color" => {
                    let parts: Result<Vec<f32>, _> = value.split_whitespace().map(str::parse).collect();
                    match parts.as_deref() {
                        Ok([r, g, b, a]) => config.diffuse_colour = Vec4::new(*r, *g, *b, *a),
                        _ => {
                            return Err(error(
                                line_number,
                                format!("diffuse colour needs 4 floats, got '{value}'"),
                            ))
                        }
                    }
                }
                "shader" => config.shader_name = (!value.is_empty()).then(|| value.to_string()),
                "auto_release" => config.auto_release = parse_bool(value),
                other => log::warn!("[MATERIAL] {}:{}: unknown key '{}'", source, line_number, other),
            }
        }

        if config.name.is_empty() {
            return Err(error(0, "missing 'name'".to_string()));
        }
        Ok(config)
    }

    /// Serialize to `.kmt` text
    pub fn to_kmt_string(&self) -> String {
        let c = &self.diffuse_colour;
        let mut text = format!(
            "#material file\nversion=0.1\nname={}\ndiffuse_colour={:.6} {:.6} {:.6} {:.6}\n",
            self.name, c.x, c.y, c.z, c.w
        );
        if let Some(map) = &self.diffuse_map_name {
            text.push_str(&format!("diffuse_map_name={map}\n"));
        }
        if let Some(shader) = &self.shader_name {
            text.push_str(&format!("shader={shader}\n"));
        }
        text
    }

    /// Write to a `.kmt` file
    pub fn save(&self, path: &Path) -> AssetResult<()> {
        write_bytes(path, self.to_kmt_string().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_both_colour_spellings() {
        let text = "version=0.1\nname=red\ndiffuse_color=1 0 0 1\nshader=Shader.Builtin.Material\n";
        let config = MaterialConfig::parse(text, "test").unwrap();
        assert_eq!(config.diffuse_colour, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(config.shader_name.as_deref(), Some("Shader.Builtin.Material"));

        let text = "name=blue\n\n# comment\ndiffuse_colour=0 0 1 0.5\n";
        let config = MaterialConfig::parse(text, "test").unwrap();
        assert_eq!(config.diffuse_colour, Vec4::new(0.0, 0.0, 1.0, 0.5));
        assert!(config.diffuse_map_name.is_none());
    }

    #[test]
    fn test_bad_colour_rejected() {
        let text = "name=broken\ndiffuse_colour=1 0 0\n";
        assert!(matches!(
            MaterialConfig::parse(text, "test"),
            Err(AssetError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crate.kmt");
        let mut config = MaterialConfig::new("crate");
        config.diffuse_map_name = Some("crate_diffuse".to_string());
        config.diffuse_colour = Vec4::new(0.5, 0.25, 1.0, 1.0);
        config.save(&path).unwrap();

        let loaded = MaterialConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
