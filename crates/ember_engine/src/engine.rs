//! Core engine implementation

use crate::assets::{mesh::load_mesh, AssetError, ImageData, MeshData};
use crate::config::ConfigError;
use crate::core::{ApplicationConfig, BackendKind, RendererConfig};
use crate::foundation::{logging, math::Transform};
use crate::jobs::{JobError, JobInfo, JobPriority, JobSystem, JobType};
use crate::render::null::NullBackend;
use crate::render::packet::SkyboxRenderData;
use crate::render::systems::texture::TextureLoadRequest;
use crate::render::types::{GeometryConfig, GeometryId};
use crate::render::views::skybox::{create_skybox, destroy_skybox};
use crate::render::vulkan::{SurfaceProvider, VulkanBackend};
use crate::render::{
    Mesh, PacketData, RenderError, RenderPacket, RenderResources, RenderResult, RenderView, RenderViewPacket,
    RenderViewSystem, RendererBackend, RendererFrontend,
};
use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Renderer error
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Job system error
    #[error("Job system error: {0}")]
    Job(#[from] JobError),

    /// Engine initialization failed
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),
}

/// Which mesh list a [`MeshId`] points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshLayer {
    /// Drawn by world views
    World,
    /// Drawn by UI views
    Ui,
}

/// Handle to a mesh owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId {
    /// Mesh list
    pub layer: MeshLayer,
    /// Position in the list
    pub index: usize,
}

/// Renderer state handed to job callbacks on the main thread
pub struct RenderContext {
    /// Renderer frontend, owns the backend
    pub frontend: RendererFrontend,
    /// Texture, material, geometry and shader systems
    pub resources: RenderResources,
    /// Meshes drawn by world views
    pub meshes: Vec<Mesh>,
    /// Meshes drawn by UI views
    pub ui_meshes: Vec<Mesh>,
}

impl RenderContext {
    /// Mesh by id
    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        match id.layer {
            MeshLayer::World => self.meshes.get(id.index),
            MeshLayer::Ui => self.ui_meshes.get(id.index),
        }
    }

    /// Mutable mesh by id
    pub fn mesh_mut(&mut self, id: MeshId) -> Option<&mut Mesh> {
        match id.layer {
            MeshLayer::World => self.meshes.get_mut(id.index),
            MeshLayer::Ui => self.ui_meshes.get_mut(id.index),
        }
    }

    fn upload_mesh(&mut self, id: MeshId, data: &MeshData) {
        let Self {
            frontend,
            resources,
            meshes,
            ui_meshes,
        } = self;
        let list = match id.layer {
            MeshLayer::World => meshes,
            MeshLayer::Ui => ui_meshes,
        };
        let Some(mesh) = list.get_mut(id.index) else {
            log::warn!("[ENGINE] Loaded mesh {:?} no longer exists", id);
            return;
        };
        if let Err(e) = mesh.upload(resources, frontend.backend_mut(), data) {
            log::error!("[ENGINE] Mesh '{}' upload failed: {}", mesh.name, e);
        }
    }

    fn finish_texture(&mut self, request: &TextureLoadRequest, image: ImageData) {
        if let Err(e) = self
            .resources
            .textures
            .finish_load(self.frontend.backend_mut(), request, image)
        {
            self.resources.textures.fail_load(request, &e.to_string());
        }
    }
}

/// Build the backend named by `config`.
///
/// The Vulkan backend creates its surface through `provider`; the null
/// backend only reads the framebuffer size from it.
pub fn create_backend(
    config: &RendererConfig,
    provider: &mut dyn SurfaceProvider,
) -> RenderResult<Box<dyn RendererBackend>> {
    match config.backend {
        BackendKind::Vulkan => Ok(Box::new(VulkanBackend::new(provider, config)?)),
        BackendKind::Null => {
            let (width, height) = provider.framebuffer_size();
            Ok(Box::new(NullBackend::new(width, height)))
        }
    }
}

/// Main engine struct
///
/// Owns the renderer, its resource systems, the registered views and the job
/// system. Background jobs report back through [`Engine::update`].
pub struct Engine {
    config: ApplicationConfig,
    context: RenderContext,
    views: RenderViewSystem,
    jobs: JobSystem<RenderContext>,
    shut_down: bool,
}

impl Engine {
    /// Create an engine rendering through `backend`
    pub fn new(
        config: ApplicationConfig,
        backend: Box<dyn RendererBackend>,
        width: u32,
        height: u32,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        logging::init(&config.engine.log_level);
        log::info!("Initializing engine...");

        let mut frontend = RendererFrontend::new(backend, &config.renderer, width, height)?;
        let resources = RenderResources::new(frontend.backend_mut(), &config.renderer, &config.assets)?;
        // Backends record on the main thread only
        let jobs = JobSystem::from_config(&config.jobs, false)?;

        log::info!(
            "Engine initialized: {}x{}, {} job workers",
            width,
            height,
            jobs.worker_count()
        );
        Ok(Self {
            config,
            context: RenderContext {
                frontend,
                resources,
                meshes: Vec::new(),
                ui_meshes: Vec::new(),
            },
            views: RenderViewSystem::new(),
            jobs,
            shut_down: false,
        })
    }

    /// Create an engine on the null backend
    pub fn headless(config: ApplicationConfig, width: u32, height: u32) -> Result<Self, EngineError> {
        Self::new(config, Box::new(NullBackend::new(width, height)), width, height)
    }

    /// Create an engine on the backend the config names, presenting to `provider`
    pub fn with_surface(config: ApplicationConfig, provider: &mut dyn SurfaceProvider) -> Result<Self, EngineError> {
        config.validate()?;
        logging::init(&config.engine.log_level);
        let (width, height) = provider.framebuffer_size();
        let backend = create_backend(&config.renderer, provider)?;
        Self::new(config, backend, width, height)
    }

    /// Engine configuration
    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    /// Renderer frontend
    pub fn frontend(&self) -> &RendererFrontend {
        &self.context.frontend
    }

    /// Mutable renderer frontend
    pub fn frontend_mut(&mut self) -> &mut RendererFrontend {
        &mut self.context.frontend
    }

    /// Resource systems
    pub fn resources(&self) -> &RenderResources {
        &self.context.resources
    }

    /// Renderer state, as seen by job callbacks
    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.context
    }

    /// Resource systems together with the backend they allocate from
    pub fn resources_and_backend(&mut self) -> (&mut RenderResources, &mut dyn RendererBackend) {
        let RenderContext {
            frontend, resources, ..
        } = &mut self.context;
        (resources, frontend.backend_mut())
    }

    /// Registered views
    pub fn views(&self) -> &RenderViewSystem {
        &self.views
    }

    /// Jobs submitted but not yet reported through [`Engine::update`]
    pub fn outstanding_jobs(&self) -> usize {
        self.jobs.outstanding()
    }

    /// Submit a job whose callbacks receive the [`RenderContext`]
    pub fn submit_job<T, E>(&mut self, info: JobInfo<RenderContext, T, E>) -> Result<(), EngineError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        self.jobs.submit(info)?;
        Ok(())
    }

    /// Register and create a view
    pub fn register_view(&mut self, view: Box<dyn RenderView>) -> Result<(), EngineError> {
        let RenderContext {
            frontend, resources, ..
        } = &mut self.context;
        self.views.register(view, resources, frontend.backend_mut())?;
        Ok(())
    }

    /// Queue pending texture loads and run completed job callbacks.
    ///
    /// Returns the number of callbacks run.
    pub fn update(&mut self) -> usize {
        for request in self.context.resources.textures.take_load_requests() {
            self.queue_texture_load(request);
        }
        self.jobs.update(&mut self.context)
    }

    fn queue_texture_load(&mut self, request: TextureLoadRequest) {
        let worker_request = request.clone();
        let success_request = request.clone();
        let fail_request = request.clone();
        let info = JobInfo::new(JobType::RESOURCE_LOAD, JobPriority::Normal, move || {
            worker_request.load()
        })
        .on_success(move |ctx: &mut RenderContext, image| ctx.finish_texture(&success_request, image))
        .on_fail(move |ctx: &mut RenderContext, e: AssetError| {
            ctx.resources.textures.fail_load(&fail_request, &e.to_string());
        });

        if let Err(e) = self.jobs.submit(info) {
            self.context.resources.textures.fail_load(&request, &e.to_string());
        }
    }

    /// Load a mesh asset in the background.
    ///
    /// The mesh is drawn once its geometry has been uploaded by a later
    /// [`Engine::update`].
    pub fn load_mesh(&mut self, name: &str, transform: Transform) -> Result<MeshId, EngineError> {
        let id = MeshId {
            layer: MeshLayer::World,
            index: self.context.meshes.len(),
        };
        let assets = self.config.assets.clone();
        let asset_name = name.to_string();
        let failed_name = name.to_string();
        let info = JobInfo::new(JobType::RESOURCE_LOAD, JobPriority::Normal, move || {
            load_mesh(&assets, &asset_name)
        })
        .on_success(move |ctx: &mut RenderContext, data: MeshData| ctx.upload_mesh(id, &data))
        .on_fail(move |_ctx: &mut RenderContext, e: AssetError| {
            log::error!("[ENGINE] Failed to load mesh '{}': {}", failed_name, e);
        });
        self.jobs.submit(info)?;
        self.context.meshes.push(Mesh::new(name, transform));
        Ok(id)
    }

    /// Add a mesh whose geometry already exists
    pub fn add_mesh(&mut self, layer: MeshLayer, mesh: Mesh) -> MeshId {
        let list = match layer {
            MeshLayer::World => &mut self.context.meshes,
            MeshLayer::Ui => &mut self.context.ui_meshes,
        };
        list.push(mesh);
        MeshId {
            layer,
            index: list.len() - 1,
        }
    }

    /// Mesh by id
    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.context.mesh(id)
    }

    /// Mutable mesh by id
    pub fn mesh_mut(&mut self, id: MeshId) -> Option<&mut Mesh> {
        self.context.mesh_mut(id)
    }

    /// Meshes drawn by world views
    pub fn meshes(&self) -> &[Mesh] {
        &self.context.meshes
    }

    /// Meshes drawn by UI views
    pub fn ui_meshes(&self) -> &[Mesh] {
        &self.context.ui_meshes
    }

    /// Upload generated geometry
    pub fn create_geometry(&mut self, config: &GeometryConfig) -> RenderResult<GeometryId> {
        let (resources, backend) = self.resources_and_backend();
        let (mut ctx, materials, geometries) = resources.split(backend);
        geometries.acquire_from_config(&mut ctx, materials, config, true)
    }

    /// Create a skybox from the cube texture `cubemap_name`
    pub fn create_skybox(&mut self, cubemap_name: &str) -> RenderResult<SkyboxRenderData> {
        let (resources, backend) = self.resources_and_backend();
        create_skybox(resources, backend, cubemap_name)
    }

    /// Release a skybox made by [`Engine::create_skybox`]
    pub fn destroy_skybox(&mut self, skybox: &SkyboxRenderData) {
        let (resources, backend) = self.resources_and_backend();
        destroy_skybox(resources, backend, skybox);
    }

    /// Build the named view's packet for this frame
    pub fn build_packet(&self, view_name: &str, data: &PacketData<'_>) -> RenderResult<RenderViewPacket> {
        self.views.build_packet(view_name, &self.context.resources, data)
    }

    /// Render a frame and hand its packets back to their views
    pub fn render(&mut self, packet: RenderPacket) -> RenderResult<()> {
        let RenderContext {
            frontend, resources, ..
        } = &mut self.context;
        let result = frontend.draw_frame(&packet, &mut self.views, resources);
        for view_packet in packet.views {
            self.views.destroy_packet(view_packet);
        }
        result
    }

    /// The window framebuffer changed size
    pub fn on_resized(&mut self, width: u32, height: u32) {
        self.context.frontend.on_resized(width, height);
    }

    /// Stop the workers and release every renderer resource. Safe to call
    /// more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down engine...");

        self.jobs.shutdown();
        let RenderContext {
            frontend,
            resources,
            meshes,
            ui_meshes,
        } = &mut self.context;
        let backend = frontend.backend_mut();
        for mesh in meshes.iter_mut().chain(ui_meshes.iter_mut()) {
            mesh.unload(resources, backend);
        }
        self.views.shutdown(resources, backend);
        resources.shutdown(backend);
        frontend.shutdown();
        log::info!("Engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::types::INVALID_ID;

    fn headless() -> Engine {
        logging::init_for_tests();
        let mut config = ApplicationConfig::new("EngineTest");
        config.assets = config.assets.with_assets_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/resources"));
        config.jobs.worker_threads = 1;
        Engine::headless(config, 800, 600).expect("headless engine")
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ApplicationConfig::new("EngineTest");
        config.jobs.result_capacity = 0;
        assert!(matches!(
            Engine::headless(config, 800, 600),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_add_mesh_ids_per_layer() {
        let mut engine = headless();
        let world = engine.add_mesh(MeshLayer::World, Mesh::new("a", Transform::default()));
        let ui = engine.add_mesh(MeshLayer::Ui, Mesh::new("b", Transform::default()));
        assert_eq!(world.index, 0);
        assert_eq!(ui.index, 0);
        assert_eq!(engine.mesh(world).map(|m| m.name.as_str()), Some("a"));
        assert_eq!(engine.mesh(ui).map(|m| m.name.as_str()), Some("b"));
        assert_eq!(engine.mesh(world).map(|m| m.generation), Some(INVALID_ID));
    }

    #[test]
    fn test_missing_mesh_stays_unloaded() {
        let mut engine = headless();
        let id = engine.load_mesh("does_not_exist", Transform::default()).expect("submit");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while engine.outstanding_jobs() > 0 && std::time::Instant::now() < deadline {
            engine.update();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(engine.outstanding_jobs(), 0);
        assert!(!engine.mesh(id).is_some_and(Mesh::is_loaded));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut engine = headless();
        engine.shutdown();
        engine.shutdown();
    }
}
