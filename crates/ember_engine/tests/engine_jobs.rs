//! Background loading through the engine's job system

use ember_engine::core::ApplicationConfig;
use ember_engine::foundation::math::{Transform, Vec3};
use ember_engine::render::types::INVALID_ID;
use ember_engine::Engine;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TRIANGLE_OBJ: &str = "\
o triangle
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 0.0 1.0
vn 0.0 0.0 1.0
f 1/1/1 2/2/1 3/3/1
";

fn engine(assets: &Path) -> Engine {
    let mut config = ApplicationConfig::new("JobsTest");
    config.assets = config.assets.with_assets_dir(assets);
    config.jobs.worker_threads = 2;
    Engine::headless(config, 640, 480).expect("engine")
}

fn drain(engine: &mut Engine) {
    let deadline = Instant::now() + Duration::from_secs(10);
    engine.update();
    while engine.outstanding_jobs() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
        engine.update();
    }
    assert_eq!(engine.outstanding_jobs(), 0, "jobs did not finish in time");
}

#[test]
fn test_texture_loads_on_worker_and_uploads_on_update() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("textures")).unwrap();
    image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 128]))
        .save(dir.path().join("textures").join("glass.png"))
        .unwrap();

    let mut engine = engine(dir.path());
    let id = engine.context_mut().resources.textures.acquire("glass", true);
    assert_eq!(engine.resources().textures.get(id).unwrap().generation, INVALID_ID);

    drain(&mut engine);
    let texture = engine.resources().textures.get(id).unwrap();
    assert_ne!(texture.generation, INVALID_ID);
    assert_eq!((texture.width, texture.height), (4, 4));
    assert!(engine.resources().textures.has_transparency(id));
}

#[test]
fn test_missing_texture_keeps_default() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path());
    let id = engine.context_mut().resources.textures.acquire("missing", true);

    drain(&mut engine);
    let texture = engine.resources().textures.get(id).unwrap();
    assert_eq!(texture.generation, INVALID_ID);
    assert!(texture.internal.is_none());
}

#[test]
fn test_mesh_loads_in_background() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    std::fs::write(dir.path().join("models").join("triangle.obj"), TRIANGLE_OBJ).unwrap();

    let mut engine = engine(dir.path());
    let id = engine
        .load_mesh("triangle", Transform::from_position(Vec3::new(1.0, 2.0, 3.0)))
        .unwrap();
    assert!(!engine.mesh(id).unwrap().is_loaded());

    drain(&mut engine);
    let mesh = engine.mesh(id).unwrap();
    assert!(mesh.is_loaded());
    assert_eq!(mesh.geometries.len(), 1);
    assert_eq!(mesh.render_data().count(), 1);

    engine.shutdown();
}
