//! End-to-end frame scenarios on the headless backend

use ember_engine::assets::ShaderConfig;
use ember_engine::core::{AssetConfig, RendererConfig};
use ember_engine::foundation::math::{Mat4, Transform, Vec4};
use ember_engine::render::null::{NullBackend, NullBackendStats};
use ember_engine::render::{
    Camera, Mesh, PacketData, RenderPacket, RenderResources, RenderViewSystem, RendererFrontend, UniformValue,
    WorldView, BUILTIN_UI_PASS, BUILTIN_WORLD_PASS,
};

const TINTED_SHADER: &str = "\
version=1.0
name=Shader.Test.Tinted
renderpass=Renderpass.Builtin.World
stages=vertex,fragment
stagefiles=tinted.vert.spv,tinted.frag.spv
use_instance=1
use_local=0
depth_test=1
attribute=vec3,in_position
uniform=mat4,0,projection
uniform=vec4,1,diffuse_color
";

fn renderer(config: &RendererConfig) -> (RendererFrontend, RenderResources, RenderViewSystem) {
    let mut frontend =
        RendererFrontend::new(Box::new(NullBackend::new(800, 600)), config, 800, 600).expect("frontend");
    let resources =
        RenderResources::new(frontend.backend_mut(), config, &AssetConfig::default()).expect("resources");
    (frontend, resources, RenderViewSystem::new())
}

fn null(frontend: &RendererFrontend) -> &NullBackend {
    frontend
        .backend()
        .as_any()
        .downcast_ref::<NullBackend>()
        .expect("null backend")
}

fn stats(frontend: &RendererFrontend) -> NullBackendStats {
    null(frontend).stats().clone()
}

#[test]
fn test_world_and_ui_passes_are_chained() {
    let (frontend, _resources, _views) = renderer(&RendererConfig::default());
    assert_eq!(BUILTIN_WORLD_PASS, "Renderpass.Builtin.World");
    assert_eq!(BUILTIN_UI_PASS, "Renderpass.Builtin.UI");
    // Skybox, world and UI each get one target per swapchain image
    assert_eq!(null(&frontend).live_objects().3, 9);
}

#[test]
fn test_shader_globals_and_instance_written_once() {
    let (mut frontend, mut resources, _views) = renderer(&RendererConfig::default());
    let config = ShaderConfig::parse(TINTED_SHADER, "tinted").expect("shader config");

    let backend = frontend.backend_mut();
    let id = resources.shaders.create(backend, &config).expect("create shader");
    let instance = resources
        .shaders
        .acquire_instance_resources(backend, id, &[])
        .expect("instance");
    assert!(backend.begin_frame(0.016).expect("begin frame"));
    let before = stats(&frontend);

    let backend = frontend.backend_mut();
    let projection = Mat4::identity();
    let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
    resources.shaders.use_shader(backend, id).expect("use");
    resources.shaders.bind_globals(backend, id).expect("bind globals");
    resources
        .shaders
        .set_uniform(
            backend,
            id,
            "projection",
            UniformValue::Bytes(bytemuck::cast_slice(projection.as_slice())),
        )
        .expect("projection");
    resources.shaders.apply_globals(backend, id).expect("apply globals");
    resources.shaders.bind_instance(backend, id, instance).expect("bind instance");
    resources
        .shaders
        .set_uniform(backend, id, "diffuse_color", UniformValue::Bytes(bytemuck::cast_slice(red.as_slice())))
        .expect("diffuse colour");
    resources
        .shaders
        .apply_instance(backend, id, true)
        .expect("apply instance");

    let after = stats(&frontend);
    assert_eq!(after.global_descriptor_writes - before.global_descriptor_writes, 1);
    assert_eq!(after.instance_descriptor_writes - before.instance_descriptor_writes, 1);

    let shader = resources.shaders.get(id).expect("shader");
    let handle = shader.internal.expect("backend handle");
    let backend = null(&frontend);
    assert!(backend.bound_pipeline().is_some());
    assert_eq!(backend.bound_pipeline(), backend.shader_pipeline(handle));

    let written = backend
        .uniform_bytes(handle, shader.global_ubo_offset(), 64)
        .expect("global uniform bytes");
    assert_eq!(written, bytemuck::cast_slice::<f32, u8>(projection.as_slice()));
    let written = backend
        .uniform_bytes(handle, shader.bound_ubo_offset(), 16)
        .expect("instance uniform bytes");
    assert_eq!(written, bytemuck::cast_slice::<f32, u8>(red.as_slice()));

    assert!(frontend.backend_mut().end_frame(0.016).is_ok());
}

#[test]
fn test_resize_before_frame_regenerates_targets_without_drawing() {
    let config = RendererConfig::default().with_resize_settle_frames(1);
    let (mut frontend, mut resources, mut views) = renderer(&config);
    views
        .register(
            Box::new(WorldView::new("world", &config, 800, 600)),
            &mut resources,
            frontend.backend_mut(),
        )
        .expect("register view");
    let cube = Mesh::with_geometries(
        "cube",
        Transform::default(),
        vec![resources.geometries.default_geometry()],
    );
    let camera = Camera::default();
    let meshes = [cube];
    let build = |views: &RenderViewSystem, resources: &RenderResources| {
        let mut packet = RenderPacket::new(0.016);
        packet.views.push(
            views
                .build_packet(
                    "world",
                    resources,
                    &PacketData::World {
                        meshes: &meshes,
                        camera: &camera,
                    },
                )
                .expect("packet"),
        );
        packet
    };

    let before = stats(&frontend);
    frontend.on_resized(1024, 768);
    let packet = build(&views, &resources);
    assert!(frontend.draw_frame(&packet, &mut views, &mut resources).is_ok());

    let after = stats(&frontend);
    assert_eq!(after.render_targets_created - before.render_targets_created, 9);
    assert_eq!(after.frames_begun, before.frames_begun);
    assert_eq!(after.draw_calls, before.draw_calls);
    assert!(!frontend.is_resizing());
    assert_eq!(null(&frontend).extent(), (1024, 768));

    // The next tick draws normally
    let packet = build(&views, &resources);
    frontend
        .draw_frame(&packet, &mut views, &mut resources)
        .expect("frame after resize");
    let drawn = stats(&frontend);
    assert_eq!(drawn.frames_ended, before.frames_ended + 1);
    assert_eq!(drawn.draw_calls, before.draw_calls + 1);
}
