//! Ember demo: a spinning cube over a textured plane, a UI quad and a skybox
//!
//! WASD moves the camera, QE moves it vertically, the arrow keys turn it and
//! Escape quits.

mod window;

use ember_engine::prelude::*;
use ember_engine::render::systems::geometry;
use std::time::Instant;
use window::Window;

const CONFIG_PATH: &str = "ember_demo.toml";
const WORLD_VIEW: &str = "world";
const UI_VIEW: &str = "ui";
const SKYBOX_VIEW: &str = "skybox";
const MOVE_SPEED: f32 = 5.0;
const TURN_SPEED: f32 = 1.5;

fn update_camera(camera: &mut Camera, window: &Window, delta_time: f32) {
    use glfw::Key;

    let step = MOVE_SPEED * delta_time;
    let turn = TURN_SPEED * delta_time;
    if window.is_key_down(Key::W) {
        camera.move_forward(step);
    }
    if window.is_key_down(Key::S) {
        camera.move_forward(-step);
    }
    if window.is_key_down(Key::D) {
        camera.move_right(step);
    }
    if window.is_key_down(Key::A) {
        camera.move_right(-step);
    }
    if window.is_key_down(Key::E) {
        camera.move_up(step);
    }
    if window.is_key_down(Key::Q) {
        camera.move_up(-step);
    }
    if window.is_key_down(Key::Left) {
        camera.yaw(turn);
    }
    if window.is_key_down(Key::Right) {
        camera.yaw(-turn);
    }
    if window.is_key_down(Key::Up) {
        camera.pitch(turn);
    }
    if window.is_key_down(Key::Down) {
        camera.pitch(-turn);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ApplicationConfig::load_or_default(CONFIG_PATH)?;
    let mut window = Window::new(&config.renderer.application_name, 1280, 720)?;
    let mut engine = Engine::with_surface(config, &mut window)?;
    let (width, height) = engine.frontend().size();

    let renderer_config = engine.config().renderer.clone();
    engine.register_view(Box::new(SkyboxView::new(SKYBOX_VIEW, &renderer_config, width, height)))?;
    engine.register_view(Box::new(WorldView::new(WORLD_VIEW, &renderer_config, width, height)))?;
    engine.register_view(Box::new(UiView::new(UI_VIEW, width, height)))?;

    let skybox = engine.create_skybox("skybox")?;

    let cube_geometry = engine.create_geometry(&geometry::cube(2.0, 2.0, 2.0, 1.0, 1.0, "demo_cube", None))?;
    let cube = engine.add_mesh(
        MeshLayer::World,
        Mesh::with_geometries("demo_cube", Transform::default(), vec![cube_geometry]),
    );

    let plane_geometry = engine.create_geometry(&geometry::plane(
        20.0,
        20.0,
        4,
        4,
        4.0,
        4.0,
        "demo_floor",
        Some("floor".to_string()),
    ))?;
    let mut floor = Transform::from_position(Vec3::new(0.0, -2.0, 0.0));
    floor.rotate(&Vec3::x(), -std::f32::consts::FRAC_PI_2);
    engine.add_mesh(
        MeshLayer::World,
        Mesh::with_geometries("demo_floor", floor, vec![plane_geometry]),
    );

    let quad_geometry = engine.create_geometry(&geometry::quad_2d(
        "demo_panel",
        Vec2::new(256.0, 128.0),
        Some("panel".to_string()),
    ))?;
    engine.add_mesh(
        MeshLayer::Ui,
        Mesh::with_geometries(
            "demo_panel",
            Transform::from_position(Vec3::new(16.0, 16.0, 0.0)),
            vec![quad_geometry],
        ),
    );

    engine.load_mesh("crate", Transform::from_position(Vec3::new(4.0, 0.0, -3.0)))?;

    let mut camera = Camera::new(Vec3::new(0.0, 2.0, 10.0));
    let mut last_frame = Instant::now();
    log::info!("Entering main loop");

    while !window.should_close() {
        for event in window.poll_events() {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    engine.on_resized(width.max(0) as u32, height.max(0) as u32);
                }
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    window.set_should_close(true);
                }
                _ => {}
            }
        }

        let now = Instant::now();
        let delta_time = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        engine.update();
        update_camera(&mut camera, &window, delta_time);
        if let Some(mesh) = engine.mesh_mut(cube) {
            mesh.transform.rotate(&Vec3::y(), delta_time);
        }

        let mut packet = RenderPacket::new(delta_time);
        packet.views.push(engine.build_packet(
            SKYBOX_VIEW,
            &PacketData::Skybox {
                skybox: &skybox,
                camera: &camera,
            },
        )?);
        packet.views.push(engine.build_packet(
            WORLD_VIEW,
            &PacketData::World {
                meshes: engine.meshes(),
                camera: &camera,
            },
        )?);
        packet.views.push(engine.build_packet(
            UI_VIEW,
            &PacketData::Ui {
                meshes: engine.ui_meshes(),
            },
        )?);

        if let Err(e) = engine.render(packet) {
            log::error!("Frame failed: {}", e);
            break;
        }
    }

    engine.destroy_skybox(&skybox);
    engine.shutdown();
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("Demo failed: {}", e);
        eprintln!("Demo failed: {e}");
        std::process::exit(1);
    }
    log::info!("Demo finished");
}
