//! Texture system
//!
//! Name-keyed, reference-counted textures. Acquiring a texture that is not
//! resident reserves a slot and queues a load request; until the load
//! completes the slot resolves to the default checkerboard texture.

use crate::assets::{AssetResult, ImageData, ImageLoadOptions};
use crate::render::backend::{BoundTexture, RendererBackend, TextureDesc, TextureHandle};
use crate::render::types::{TextureFlags, TextureId, TextureType, INVALID_ID};
use crate::render::{RenderError, RenderResult};
use std::collections::HashMap;
use std::path::PathBuf;

/// Name of the built-in fallback texture
pub const DEFAULT_TEXTURE_NAME: &str = "default";

/// Edge length of the default texture in pixels
pub const DEFAULT_TEXTURE_DIMENSION: u32 = 256;

const CHECKER_TILE: u32 = 16;

/// A texture slot
#[derive(Debug, Clone)]
pub struct Texture {
    /// Slot id
    pub id: TextureId,
    /// Unique name
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel
    pub channel_count: u8,
    /// 2D or cube
    pub texture_type: TextureType,
    /// Flags
    pub flags: TextureFlags,
    /// Bumped every time the contents change, `INVALID_ID` until loaded
    pub generation: u32,
    /// Backend object once loaded
    pub internal: Option<TextureHandle>,
}

impl Texture {
    fn unloaded(id: TextureId, name: &str, texture_type: TextureType) -> Self {
        Self {
            id,
            name: name.to_string(),
            width: 0,
            height: 0,
            channel_count: 4,
            texture_type,
            flags: TextureFlags::empty(),
            generation: INVALID_ID,
            internal: None,
        }
    }

    /// Whether the contents are resident on the GPU
    pub fn is_loaded(&self) -> bool {
        self.generation != INVALID_ID && self.internal.is_some()
    }

    fn desc(&self) -> TextureDesc {
        TextureDesc {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            channel_count: self.channel_count,
            texture_type: self.texture_type,
            flags: self.flags,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextureReference {
    id: TextureId,
    reference_count: u64,
    auto_release: bool,
}

/// Queued load for a texture slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureLoadRequest {
    /// Slot the image goes into
    pub id: TextureId,
    /// Texture name (file stem)
    pub name: String,
    /// 2D image or six cube faces
    pub texture_type: TextureType,
    /// Directory searched for the image files
    pub directory: PathBuf,
}

impl TextureLoadRequest {
    /// Decode the image(s). Safe to call from a worker thread.
    pub fn load(&self) -> AssetResult<ImageData> {
        match self.texture_type {
            TextureType::TwoD => ImageData::load_named(&self.directory, &self.name, ImageLoadOptions::default()),
            TextureType::Cube => ImageData::load_cube(&self.directory, &self.name),
        }
    }
}

/// Reference-counted texture cache
pub struct TextureSystem {
    textures: Vec<Option<Texture>>,
    lookup: HashMap<String, TextureReference>,
    default_texture: TextureId,
    textures_dir: PathBuf,
    pending: Vec<TextureLoadRequest>,
}

impl TextureSystem {
    /// Create the system and upload the default texture into slot 0
    pub fn new(backend: &mut dyn RendererBackend, max_textures: u32, textures_dir: PathBuf) -> RenderResult<Self> {
        if max_textures < 2 {
            return Err(RenderError::InitializationFailed(
                "texture system needs room for the default texture".to_string(),
            ));
        }
        let mut system = Self {
            textures: (0..max_textures).map(|_| None).collect(),
            lookup: HashMap::new(),
            default_texture: TextureId(0),
            textures_dir,
            pending: Vec::new(),
        };

        let pixels = checkerboard(DEFAULT_TEXTURE_DIMENSION);
        let mut texture = Texture::unloaded(TextureId(0), DEFAULT_TEXTURE_NAME, TextureType::TwoD);
        texture.width = DEFAULT_TEXTURE_DIMENSION;
        texture.height = DEFAULT_TEXTURE_DIMENSION;
        let handle = backend.texture_create(&texture.desc(), &pixels)?;
        texture.internal = Some(handle);
        texture.generation = 0;
        system.textures[0] = Some(texture);

        log::info!("[TEXTURE] Texture system ready ({} slots)", max_textures);
        Ok(system)
    }

    /// Id of the default texture
    pub fn default_texture(&self) -> TextureId {
        self.default_texture
    }

    /// Acquire a 2D texture by name, loading it if needed
    pub fn acquire(&mut self, name: &str, auto_release: bool) -> TextureId {
        self.acquire_typed(name, TextureType::TwoD, auto_release)
    }

    /// Acquire a cube texture from six `<name>_r/_l/_u/_d/_f/_b` images
    pub fn acquire_cube(&mut self, name: &str, auto_release: bool) -> TextureId {
        self.acquire_typed(name, TextureType::Cube, auto_release)
    }

    fn acquire_typed(&mut self, name: &str, texture_type: TextureType, auto_release: bool) -> TextureId {
        if name.eq_ignore_ascii_case(DEFAULT_TEXTURE_NAME) {
            log::warn!("[TEXTURE] Acquire of the default texture by name; use default_texture()");
            return self.default_texture;
        }
        if let Some(reference) = self.lookup.get_mut(name) {
            reference.reference_count += 1;
            return reference.id;
        }

        let Some(id) = self.free_slot() else {
            log::error!("[TEXTURE] No free slot for '{}', using default", name);
            return self.default_texture;
        };
        self.textures[id.index()] = Some(Texture::unloaded(id, name, texture_type));
        self.lookup.insert(
            name.to_string(),
            TextureReference {
                id,
                reference_count: 1,
                auto_release,
            },
        );
        self.pending.push(TextureLoadRequest {
            id,
            name: name.to_string(),
            texture_type,
            directory: self.textures_dir.clone(),
        });
        log::debug!("[TEXTURE] '{}' acquired into slot {}, load queued", name, id.0);
        id
    }

    /// Create a blank writable texture, owned by the caller until released
    pub fn create_writable(
        &mut self,
        backend: &mut dyn RendererBackend,
        name: &str,
        width: u32,
        height: u32,
        channel_count: u8,
        has_transparency: bool,
    ) -> RenderResult<TextureId> {
        let mut flags = TextureFlags::IS_WRITABLE;
        flags.set(TextureFlags::HAS_TRANSPARENCY, has_transparency);
        let id = self.register(name, width, height, channel_count, flags)?;
        let texture = self.slot_mut(id)?;
        let desc = texture.desc();
        let pixels = vec![0; desc.byte_size()];
        let handle = backend.texture_create(&desc, &pixels)?;
        texture.internal = Some(handle);
        texture.generation = 0;
        Ok(id)
    }

    /// Register a texture wrapping an image owned elsewhere. Releasing it
    /// never destroys the backend object.
    pub fn wrap_internal(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        channel_count: u8,
        internal: TextureHandle,
    ) -> RenderResult<TextureId> {
        let id = self.register(name, width, height, channel_count, TextureFlags::IS_WRAPPED)?;
        let texture = self.slot_mut(id)?;
        texture.internal = Some(internal);
        texture.generation = 0;
        Ok(id)
    }

    fn register(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        channel_count: u8,
        flags: TextureFlags,
    ) -> RenderResult<TextureId> {
        if self.lookup.contains_key(name) || name.eq_ignore_ascii_case(DEFAULT_TEXTURE_NAME) {
            return Err(RenderError::ResourceCreationFailed(format!("texture '{name}' already exists")));
        }
        let id = self
            .free_slot()
            .ok_or_else(|| RenderError::ResourceCreationFailed(format!("no free texture slot for '{name}'")))?;
        let mut texture = Texture::unloaded(id, name, TextureType::TwoD);
        texture.width = width;
        texture.height = height;
        texture.channel_count = channel_count;
        texture.flags = flags;
        self.textures[id.index()] = Some(texture);
        self.lookup.insert(
            name.to_string(),
            TextureReference {
                id,
                reference_count: 1,
                auto_release: false,
            },
        );
        Ok(id)
    }

    /// Overwrite a writable texture; bumps its generation
    pub fn write_data(
        &mut self,
        backend: &mut dyn RendererBackend,
        id: TextureId,
        offset: u32,
        pixels: &[u8],
    ) -> RenderResult<()> {
        let texture = self.slot_mut(id)?;
        if !texture.flags.contains(TextureFlags::IS_WRITABLE) {
            return Err(RenderError::RenderingFailed(format!("texture '{}' is not writable", texture.name)));
        }
        let handle = texture
            .internal
            .ok_or_else(|| RenderError::ResourceNotFound(format!("texture '{}'", texture.name)))?;
        backend.texture_write_data(handle, offset, pixels)?;
        texture.generation = next_generation(texture.generation);
        Ok(())
    }

    /// Drop one reference. At zero an auto-release texture is destroyed and
    /// its name and slot become free.
    pub fn release(&mut self, backend: &mut dyn RendererBackend, name: &str) {
        let Some(reference) = self.lookup.get_mut(name) else {
            log::warn!("[TEXTURE] Release of unknown texture '{}'", name);
            return;
        };
        reference.reference_count = reference.reference_count.saturating_sub(1);
        if reference.reference_count > 0 || !reference.auto_release {
            return;
        }

        let id = reference.id;
        self.lookup.remove(name);
        self.pending.retain(|request| request.id != id);
        if let Some(texture) = self.textures[id.index()].take() {
            destroy_texture(backend, &texture);
            log::debug!("[TEXTURE] Released '{}'", name);
        }
    }

    /// Queued loads, handed over to the caller to run
    pub fn take_load_requests(&mut self) -> Vec<TextureLoadRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Upload a decoded image into the slot a request was made for. Images
    /// for slots released since the request are discarded.
    pub fn finish_load(
        &mut self,
        backend: &mut dyn RendererBackend,
        request: &TextureLoadRequest,
        image: ImageData,
    ) -> RenderResult<()> {
        let Some(texture) = self
            .textures
            .get_mut(request.id.index())
            .and_then(Option::as_mut)
            .filter(|texture| texture.name == request.name)
        else {
            log::debug!("[TEXTURE] Discarding load of released texture '{}'", request.name);
            return Ok(());
        };

        texture.width = image.width;
        texture.height = image.height;
        texture.channel_count = image.channel_count;
        texture.texture_type = request.texture_type;
        texture.flags.set(TextureFlags::HAS_TRANSPARENCY, image.has_transparency());

        let handle = backend.texture_create(&texture.desc(), &image.pixels)?;
        if let Some(old) = texture.internal.replace(handle) {
            backend.texture_destroy(old);
        }
        texture.generation = next_generation(texture.generation);
        log::info!(
            "[TEXTURE] Loaded '{}' {}x{} generation {}",
            texture.name,
            texture.width,
            texture.height,
            texture.generation
        );
        Ok(())
    }

    /// Log a failed load; the slot keeps resolving to the default texture
    pub fn fail_load(&self, request: &TextureLoadRequest, reason: &str) {
        log::error!("[TEXTURE] Failed to load '{}': {}", request.name, reason);
    }

    /// Run every queued load on the calling thread
    pub fn load_pending_blocking(&mut self, backend: &mut dyn RendererBackend) -> RenderResult<()> {
        for request in self.take_load_requests() {
            match request.load() {
                Ok(image) => self.finish_load(backend, &request, image)?,
                Err(e) => self.fail_load(&request, &e.to_string()),
            }
        }
        Ok(())
    }

    /// Texture in slot `id`
    pub fn get(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.index()).and_then(Option::as_ref)
    }

    /// Id of a resident texture name
    pub fn id_of(&self, name: &str) -> Option<TextureId> {
        self.lookup.get(name).map(|reference| reference.id)
    }

    /// Current reference count of a name
    pub fn reference_count(&self, name: &str) -> Option<u64> {
        self.lookup.get(name).map(|reference| reference.reference_count)
    }

    /// Whether the texture's contents have an alpha below one
    pub fn has_transparency(&self, id: TextureId) -> bool {
        self.get(id)
            .is_some_and(|texture| texture.flags.contains(TextureFlags::HAS_TRANSPARENCY))
    }

    /// Backend texture to sample for `id`: the texture itself once loaded,
    /// the default texture otherwise
    pub fn bound(&self, id: TextureId) -> RenderResult<BoundTexture> {
        let texture = self
            .get(id)
            .filter(|texture| texture.is_loaded())
            .or_else(|| self.get(self.default_texture))
            .ok_or_else(|| RenderError::ResourceNotFound("default texture".to_string()))?;
        let handle = texture
            .internal
            .ok_or_else(|| RenderError::ResourceNotFound(format!("texture '{}'", texture.name)))?;
        Ok(BoundTexture {
            handle,
            generation: texture.generation,
        })
    }

    /// Destroy every backend texture
    pub fn shutdown(&mut self, backend: &mut dyn RendererBackend) {
        for texture in self.textures.iter_mut().filter_map(Option::take) {
            destroy_texture(backend, &texture);
        }
        self.lookup.clear();
        self.pending.clear();
    }

    fn free_slot(&self) -> Option<TextureId> {
        self.textures
            .iter()
            .position(Option::is_none)
            .map(|index| TextureId(index as u32))
    }

    fn slot_mut(&mut self, id: TextureId) -> RenderResult<&mut Texture> {
        self.textures
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("texture slot {}", id.0)))
    }
}

fn destroy_texture(backend: &mut dyn RendererBackend, texture: &Texture) {
    if texture.flags.contains(TextureFlags::IS_WRAPPED) {
        return;
    }
    if let Some(handle) = texture.internal {
        backend.texture_destroy(handle);
    }
}

fn next_generation(generation: u32) -> u32 {
    if generation == INVALID_ID {
        0
    } else {
        generation.wrapping_add(1) % INVALID_ID
    }
}

/// White and blue RGBA checkerboard
fn checkerboard(dimension: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((dimension * dimension * 4) as usize);
    for row in 0..dimension {
        for col in 0..dimension {
            let white = (row / CHECKER_TILE) % 2 == (col / CHECKER_TILE) % 2;
            if white {
                pixels.extend_from_slice(&[255, 255, 255, 255]);
            } else {
                pixels.extend_from_slice(&[0, 0, 255, 255]);
            }
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::null::NullBackend;

    fn system(backend: &mut NullBackend, dir: PathBuf) -> TextureSystem {
        TextureSystem::new(backend, 8, dir).unwrap()
    }

    fn write_png(dir: &std::path::Path, name: &str, alpha: u8) {
        let image = image::RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, alpha]));
        image.save(dir.join(format!("{name}.png"))).unwrap();
    }

    #[test]
    fn test_default_texture_is_checkerboard() {
        let mut backend = NullBackend::new(800, 600);
        let textures = system(&mut backend, PathBuf::new());
        let default = textures.get(textures.default_texture()).unwrap();
        assert_eq!((default.width, default.height), (256, 256));
        let pixels = backend.texture_pixels(default.internal.unwrap()).unwrap();
        assert_eq!(&pixels[0..4], &[255, 255, 255, 255]);
        let blue = (CHECKER_TILE * 4) as usize;
        assert_eq!(&pixels[blue..blue + 4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_reference_count_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "crate", 255);
        let mut backend = NullBackend::new(800, 600);
        let mut textures = system(&mut backend, dir.path().to_path_buf());

        let first = textures.acquire("crate", true);
        let second = textures.acquire("crate", true);
        assert_eq!(first, second);
        assert_eq!(textures.reference_count("crate"), Some(2));

        textures.load_pending_blocking(&mut backend).unwrap();
        assert!(textures.get(first).unwrap().is_loaded());
        assert_eq!(backend.live_objects().0, 2);

        textures.release(&mut backend, "crate");
        assert_eq!(textures.reference_count("crate"), Some(1));
        textures.release(&mut backend, "crate");
        assert_eq!(textures.reference_count("crate"), None);
        assert!(textures.get(first).is_none());
        assert_eq!(backend.live_objects().0, 1);

        let again = textures.acquire("crate", true);
        assert_eq!(again, first);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut backend = NullBackend::new(800, 600);
        let mut textures = system(&mut backend, PathBuf::new());
        textures.release(&mut backend, "missing");
        assert_eq!(backend.live_objects().0, 1);
    }

    #[test]
    fn test_unloaded_texture_binds_default() {
        let mut backend = NullBackend::new(800, 600);
        let mut textures = system(&mut backend, PathBuf::from("/nonexistent"));
        let id = textures.acquire("missing", true);
        textures.load_pending_blocking(&mut backend).unwrap();
        let default = textures.bound(textures.default_texture()).unwrap();
        assert_eq!(textures.bound(id).unwrap(), default);
    }

    #[test]
    fn test_transparency_detected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "glass", 128);
        let mut backend = NullBackend::new(800, 600);
        let mut textures = system(&mut backend, dir.path().to_path_buf());
        let id = textures.acquire("glass", true);
        textures.load_pending_blocking(&mut backend).unwrap();
        assert!(textures.has_transparency(id));
        assert_eq!(textures.get(id).unwrap().generation, 0);
    }

    #[test]
    fn test_writable_texture_generation_bumps() {
        let mut backend = NullBackend::new(800, 600);
        let mut textures = system(&mut backend, PathBuf::new());
        let id = textures.create_writable(&mut backend, "canvas", 2, 2, 4, false).unwrap();
        textures.write_data(&mut backend, id, 0, &[1; 16]).unwrap();
        assert_eq!(textures.get(id).unwrap().generation, 1);
        assert!(textures.write_data(&mut backend, textures.default_texture(), 0, &[1; 4]).is_err());
    }

    #[test]
    fn test_slots_exhausted_fall_back_to_default() {
        let mut backend = NullBackend::new(800, 600);
        let mut textures = system(&mut backend, PathBuf::new());
        for i in 0..7 {
            assert_ne!(textures.acquire(&format!("t{i}"), true), textures.default_texture());
        }
        assert_eq!(textures.acquire("overflow", true), textures.default_texture());
    }
}
