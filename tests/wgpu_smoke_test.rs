#[cfg(feature = "integration-tests")]
use std::rc::Rc;

#[cfg(feature = "integration-tests")]
use batch_ngin::{
    backend::{Gpu, WgpuBackend},
    camera::{Camera, Viewport},
    data_structures::{
        framebuffer::Framebuffer,
        instance::{Color, Transform2D},
    },
    render::{RectangleDraw, SpriteDraw},
    renderer::Renderer,
};

#[cfg(feature = "integration-tests")]
const SIZE: u32 = 64;

#[cfg(feature = "integration-tests")]
fn headless() -> (Rc<WgpuBackend>, Gpu) {
    batch_ngin::logging::init();
    let backend = Rc::new(
        WgpuBackend::headless(wgpu::TextureFormat::Rgba8UnormSrgb)
            .expect("a headless adapter is required for integration tests"),
    );
    let gpu: Gpu = backend.clone();
    (backend, gpu)
}

#[test]
#[cfg(feature = "integration-tests")]
fn clear_fills_the_whole_target() {
    let (backend, gpu) = headless();
    let renderer = Renderer::new(&gpu).unwrap();
    let target = Framebuffer::new(&gpu, [SIZE, SIZE]).unwrap();

    renderer.clear(&target, Color::WHITE);

    let image = backend.read_framebuffer(target.id().unwrap()).unwrap();
    assert_eq!(image.dimensions(), (SIZE, SIZE));
    assert!(image.pixels().all(|p| p.0 == [255, 255, 255, 255]));
}

#[test]
#[cfg(feature = "integration-tests")]
fn rectangle_covers_its_pixels_only() {
    let (backend, gpu) = headless();
    let renderer = Renderer::new(&gpu).unwrap();
    let target = Framebuffer::new(&gpu, [SIZE, SIZE]).unwrap();
    let mut pass = renderer.begin_pass();
    pass.draw(
        RectangleDraw::new(32.0, 32.0)
            .transform(Transform2D::at(16.0, 16.0))
            .color(Color::rgb(1.0, 0.0, 0.0)),
    );

    renderer.clear(&target, Color::BLACK);
    let stats = renderer.render(
        &target,
        &pass,
        Viewport::from_size(SIZE, SIZE),
        &Camera::orthographic(SIZE as f32, SIZE as f32),
    );

    assert_eq!(stats.draw_calls, 1);
    let image = backend.read_framebuffer(target.id().unwrap()).unwrap();
    assert_eq!(image.get_pixel(32, 32).0, [255, 0, 0, 255]);
    assert_eq!(image.get_pixel(17, 46).0, [255, 0, 0, 255]);
    assert_eq!(image.get_pixel(4, 4).0, [0, 0, 0, 255]);
    assert_eq!(image.get_pixel(60, 32).0, [0, 0, 0, 255]);
}

#[test]
#[cfg(feature = "integration-tests")]
fn sprites_survive_atlas_growth() {
    let (backend, gpu) = headless();
    let renderer = Renderer::new(&gpu).unwrap();
    let target = Framebuffer::new(&gpu, [SIZE, SIZE]).unwrap();
    let mut atlas = renderer.create_sprite_atlas("sprites").unwrap();
    let green = image::RgbaImage::from_pixel(8, 8, image::Rgba([0, 255, 0, 255]));
    let sprite = atlas.add_sprite(&green).unwrap();
    // Forces the atlas texture to be reallocated after the first sprite was uploaded.
    atlas.add_sprite(&image::RgbaImage::new(200, 200)).unwrap();
    assert!(atlas.resolution() > 128);

    let mut pass = renderer.begin_pass();
    pass.draw(SpriteDraw::new(&atlas, sprite).transform(Transform2D::at(8.0, 8.0)));
    renderer.clear(&target, Color::BLACK);
    renderer.render(
        &target,
        &pass,
        Viewport::from_size(SIZE, SIZE),
        &Camera::orthographic(SIZE as f32, SIZE as f32),
    );

    let image = backend.read_framebuffer(target.id().unwrap()).unwrap();
    assert_eq!(image.get_pixel(12, 12).0, [0, 255, 0, 255]);
    assert_eq!(image.get_pixel(20, 20).0, [0, 0, 0, 255]);
}
