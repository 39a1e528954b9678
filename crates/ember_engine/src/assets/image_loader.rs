//! Image loading for the texture system
//!
//! Every image is decoded to tightly packed RGBA8.

use super::{AssetError, AssetResult};
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when resolving a texture name to a file
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "tga", "bmp"];

/// Cube map face suffixes in layer order: +X, -X, +Y, -Y, +Z, -Z
pub const CUBE_FACE_SUFFIXES: [&str; 6] = ["_r", "_l", "_u", "_d", "_f", "_b"];

/// Decoding options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLoadOptions {
    /// Flip rows so the first row is the bottom of the image
    pub flip_y: bool,
}

impl Default for ImageLoadOptions {
    fn default() -> Self {
        Self { flip_y: true }
    }
}

/// Decoded image ready for GPU upload
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Channel count, always 4
    pub channel_count: u8,
    /// RGBA8 pixels
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// Decode an image file
    pub fn from_file(path: &Path, options: ImageLoadOptions) -> AssetResult<Self> {
        log::debug!("[IMAGE] Loading {}", path.display());
        let image = image::open(path)?;
        let mut rgba = image.to_rgba8();
        if options.flip_y {
            image::imageops::flip_vertical_in_place(&mut rgba);
        }
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            channel_count: 4,
            pixels: rgba.into_raw(),
        })
    }

    /// Decode an in-memory encoded image
    pub fn from_bytes(bytes: &[u8], options: ImageLoadOptions) -> AssetResult<Self> {
        let image = image::load_from_memory(bytes)?;
        let mut rgba = image.to_rgba8();
        if options.flip_y {
            image::imageops::flip_vertical_in_place(&mut rgba);
        }
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            channel_count: 4,
            pixels: rgba.into_raw(),
        })
    }

    /// Whether any pixel has alpha below 255
    pub fn has_transparency(&self) -> bool {
        self.pixels.chunks_exact(4).any(|pixel| pixel[3] < 255)
    }

    /// Load the texture `name` from `directory`, trying each known extension
    pub fn load_named(directory: &Path, name: &str, options: ImageLoadOptions) -> AssetResult<Self> {
        let path = resolve_image_path(directory, name)
            .ok_or_else(|| AssetError::NotFound(format!("image '{}' in {}", name, directory.display())))?;
        Self::from_file(&path, options)
    }

    /// Load the six faces `<name>_r`, `_l`, `_u`, `_d`, `_f`, `_b` of a cube map.
    ///
    /// Faces must share one size. Pixels are concatenated in layer order.
    pub fn load_cube(directory: &Path, name: &str) -> AssetResult<Self> {
        let options = ImageLoadOptions { flip_y: false };
        let mut cube: Option<Self> = None;
        for suffix in CUBE_FACE_SUFFIXES {
            let face = Self::load_named(directory, &format!("{name}{suffix}"), options)?;
            match &mut cube {
                None => cube = Some(face),
                Some(cube) => {
                    if (face.width, face.height) != (cube.width, cube.height) {
                        return Err(AssetError::InvalidData {
                            path: format!("{name}{suffix}"),
                            reason: format!(
                                "cube face is {}x{}, expected {}x{}",
                                face.width, face.height, cube.width, cube.height
                            ),
                        });
                    }
                    cube.pixels.extend_from_slice(&face.pixels);
                }
            }
        }
        cube.ok_or_else(|| AssetError::NotFound(format!("cube map '{name}'")))
    }
}

/// First existing `<directory>/<name>.<ext>` among the known extensions
pub fn resolve_image_path(directory: &Path, name: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| directory.join(format!("{name}.{ext}")))
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, top: [u8; 4], bottom: [u8; 4]) {
        let mut image = RgbaImage::new(2, 2);
        for x in 0..2 {
            image.put_pixel(x, 0, Rgba(top));
            image.put_pixel(x, 1, Rgba(bottom));
        }
        image.save(dir.join(format!("{name}.png"))).unwrap();
    }

    #[test]
    fn test_load_named_flips_rows() {
        let dir = TempDir::new().unwrap();
        write_png(dir.path(), "stripes", [255, 0, 0, 255], [0, 0, 255, 255]);

        let flipped = ImageData::load_named(dir.path(), "stripes", ImageLoadOptions::default()).unwrap();
        assert_eq!((flipped.width, flipped.height), (2, 2));
        assert_eq!(&flipped.pixels[0..4], &[0, 0, 255, 255]);
        assert!(!flipped.has_transparency());

        let upright = ImageData::load_named(dir.path(), "stripes", ImageLoadOptions { flip_y: false }).unwrap();
        assert_eq!(&upright.pixels[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_transparency_detected() {
        let dir = TempDir::new().unwrap();
        write_png(dir.path(), "glass", [255, 255, 255, 128], [255, 255, 255, 255]);
        let image = ImageData::load_named(dir.path(), "glass", ImageLoadOptions::default()).unwrap();
        assert!(image.has_transparency());
    }

    #[test]
    fn test_missing_image() {
        let dir = TempDir::new().unwrap();
        let result = ImageData::load_named(dir.path(), "absent", ImageLoadOptions::default());
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_cube_concatenates_faces() {
        let dir = TempDir::new().unwrap();
        for suffix in CUBE_FACE_SUFFIXES {
            write_png(dir.path(), &format!("sky{suffix}"), [1, 2, 3, 255], [4, 5, 6, 255]);
        }
        let cube = ImageData::load_cube(dir.path(), "sky").unwrap();
        assert_eq!(cube.pixels.len(), 6 * 2 * 2 * 4);
    }
}
