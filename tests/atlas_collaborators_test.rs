mod common;

use std::rc::Rc;

use batch_ngin::{
    backend::{ChannelFormat, Filter, Gpu, TextureRegion},
    cgmath::Vector2,
    config::{AtlasConfig, RendererConfig},
    data_structures::{
        atlas::DynamicAtlas,
        font::{Font, GlyphBitmap},
        sprite_atlas::SpriteAtlas,
    },
    renderer::Renderer,
};
use common::mock_backend::{Call, MockBackend, setup};

const SMALL: AtlasConfig = AtlasConfig {
    initial_resolution: 32,
    padding: 1,
};

fn coverage(width: u32, height: u32) -> GlyphBitmap {
    GlyphBitmap {
        width,
        height,
        bearing: Vector2::new(0.0, 0.0),
        pixels: vec![128; (width * height) as usize],
    }
}

#[test]
fn font_atlas_is_single_channel() {
    let (mock, gpu) = setup();
    let font = Font::new(&gpu, "sans").unwrap();

    assert_eq!(
        mock.calls(),
        vec![Call::CreateTexture {
            id: font.texture_id(),
            size: [128, 128],
            format: ChannelFormat::R8,
        }]
    );
}

#[test]
fn glyphs_are_uploaded_to_their_packed_region() {
    let (mock, gpu) = setup();
    let mut font = Font::with_config(&gpu, "sans", SMALL).unwrap();

    let glyph = font.add_glyph(7, &coverage(5, 6)).unwrap();

    assert_eq!((glyph.rect.x, glyph.rect.y), (1, 1));
    assert_eq!((glyph.rect.width, glyph.rect.height), (5, 6));
    assert!(mock.calls().contains(&Call::WriteTexture {
        id: font.texture_id(),
        region: TextureRegion {
            x: 1,
            y: 1,
            width: 5,
            height: 6
        },
    }));
    assert!(font.contains(7));
}

#[test]
fn adding_a_glyph_twice_keeps_the_first() {
    let (mock, gpu) = setup();
    let mut font = Font::with_config(&gpu, "sans", SMALL).unwrap();

    let first = font.add_glyph(1, &coverage(4, 4)).unwrap();
    let again = font.add_glyph(1, &coverage(9, 9)).unwrap();

    assert_eq!(first, again);
    assert_eq!(mock.count(|c| matches!(c, Call::WriteTexture { .. })), 1);
}

#[test]
fn zero_sized_glyphs_take_no_space() {
    let (mock, gpu) = setup();
    let mut font = Font::with_config(&gpu, "sans", SMALL).unwrap();

    let space = font.add_glyph(32, &coverage(0, 0)).unwrap();

    assert!(space.rect.is_empty());
    assert!(font.contains(32));
    assert_eq!(mock.count(|c| matches!(c, Call::WriteTexture { .. })), 0);
}

#[test]
fn glyph_with_wrong_pixel_count_is_rejected() {
    let (_mock, gpu) = setup();
    let mut font = Font::with_config(&gpu, "sans", SMALL).unwrap();
    let mut bitmap = coverage(3, 3);
    bitmap.pixels.pop();

    assert!(font.add_glyph(3, &bitmap).is_err());
    assert!(!font.contains(3));
}

#[test]
fn glyph_with_overflowing_size_is_rejected() {
    let (mock, gpu) = setup();
    let mut font = Font::with_config(&gpu, "sans", SMALL).unwrap();
    let bitmap = GlyphBitmap {
        width: 70_000,
        height: 70_000,
        bearing: Vector2::new(0.0, 0.0),
        pixels: vec![255; 16],
    };
    mock.clear_calls();

    assert!(font.add_glyph(9, &bitmap).is_err());
    assert!(!font.contains(9));
    assert_eq!(font.resolution(), 32);
    assert!(mock.commands().is_empty());
}

#[test]
fn short_bitmap_is_rejected_before_packing() {
    let (mock, gpu) = setup();
    let mut atlas =
        DynamicAtlas::new(&gpu, "raw", ChannelFormat::Rgba8, Filter::Nearest, SMALL).unwrap();
    mock.clear_calls();

    assert!(atlas.insert(2, 2, &[0; 15]).is_err());
    assert!(atlas.packer().shelves().is_empty());
    assert!(mock.calls().is_empty());

    let rect = atlas.insert(2, 2, &[0; 16]).unwrap();
    assert_eq!((rect.x, rect.y), (1, 1));
}

#[test]
fn font_atlas_grows_in_place() {
    let (mock, gpu) = setup();
    let mut font = Font::with_config(&gpu, "sans", SMALL).unwrap();
    let texture = font.texture_id();
    let first = font.add_glyph(0, &coverage(10, 10)).unwrap();

    for id in 1..12 {
        font.add_glyph(id, &coverage(10, 10)).unwrap();
    }

    assert!(font.resolution() > 32);
    assert_eq!(font.texture_id(), texture);
    assert_eq!(mock.texture_size(texture), Some([font.resolution(); 2]));
    assert!(mock.count(|c| matches!(c, Call::ResizeTexture { .. })) >= 1);
    // Earlier glyphs keep their pixel placement.
    assert_eq!(font.glyph(0).unwrap().rect, first.rect);
}

#[test]
fn resize_happens_before_the_region_is_written() {
    let (mock, gpu) = setup();
    let mut atlas = SpriteAtlas::with_config(&gpu, "sprites", SMALL).unwrap();
    mock.clear_calls();

    atlas.add_sprite(&image::RgbaImage::new(40, 8)).unwrap();

    let calls = mock.calls();
    assert!(matches!(calls[0], Call::ResizeTexture { size: [64, 64], .. }));
    assert!(matches!(calls[1], Call::WriteTexture { .. }));
    assert_eq!(atlas.resolution(), 64);
}

#[test]
fn sprite_ids_are_dense_and_stable() {
    let (_mock, gpu) = setup();
    let mut atlas = SpriteAtlas::with_config(&gpu, "sprites", SMALL).unwrap();
    assert!(atlas.is_empty());

    let a = atlas.add_sprite(&image::RgbaImage::new(4, 4)).unwrap();
    let a_rect = atlas.sprite(a).unwrap();
    let b = atlas.add_sprite(&image::RgbaImage::new(60, 60)).unwrap();

    assert_eq!((a.0, b.0), (0, 1));
    assert_eq!(atlas.len(), 2);
    assert_eq!(atlas.sprite(a), Some(a_rect));
    assert_eq!(atlas.sprite(b).unwrap().width, 60);
}

#[test]
fn growth_beyond_the_backend_limit_is_an_error() {
    let mock = Rc::new(MockBackend::with_max_texture_size(64));
    let gpu: Gpu = mock.clone();
    let mut atlas = SpriteAtlas::with_config(&gpu, "sprites", SMALL).unwrap();

    let error = atlas.add_sprite(&image::RgbaImage::new(100, 100)).unwrap_err();

    assert!(format!("{error:#}").contains("exceeds the backend maximum"));
    assert!(atlas.is_empty());
}

#[test]
fn renderer_builds_atlases_from_its_config() {
    let (_mock, gpu) = setup();
    let config = RendererConfig {
        atlas: AtlasConfig {
            initial_resolution: 256,
            padding: 0,
        },
        ..Default::default()
    };
    let renderer = Renderer::with_config(&gpu, config).unwrap();

    let mut font = renderer.create_font("serif").unwrap();
    let mut sprites = renderer.create_sprite_atlas("ui").unwrap();

    assert_eq!(font.resolution(), 256);
    assert_eq!(sprites.resolution(), 256);
    assert_eq!(font.add_glyph(1, &coverage(2, 2)).unwrap().rect.x, 0);
    let sprite = sprites.add_sprite(&image::RgbaImage::new(3, 3)).unwrap();
    assert_eq!(sprites.sprite(sprite).unwrap().x, 0);
}

#[test]
fn failed_growth_leaves_the_atlas_usable() {
    let mock = Rc::new(MockBackend::with_max_texture_size(32));
    let gpu: Gpu = mock.clone();
    let mut atlas = SpriteAtlas::with_config(&gpu, "sprites", SMALL).unwrap();

    assert!(atlas.add_sprite(&image::RgbaImage::new(40, 40)).is_err());
    let sprite = atlas.add_sprite(&image::RgbaImage::new(4, 4)).unwrap();

    assert_eq!(atlas.resolution(), 32);
    assert_eq!(atlas.sprite(sprite).map(|r| (r.x, r.y)), Some((1, 1)));
}
