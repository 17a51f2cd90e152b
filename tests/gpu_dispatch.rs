use std::sync::Arc;

use image::Rgba32FImage;
use texture_node_graph::{TextureGraph, TextureGraphConfig, TextureNode, WgpuBackend};

fn gpu_graph(size: [u32; 2]) -> Option<TextureGraph<WgpuBackend>> {
    match WgpuBackend::new() {
        Ok(backend) => Some(TextureGraph::new(
            backend,
            TextureGraphConfig {
                output_size: size,
                ..Default::default()
            },
        )),
        Err(e) => {
            eprintln!("skipping GPU test: {e:#}");
            None
        }
    }
}

fn assert_all_pixels(image: &Rgba32FImage, expected: [f32; 4]) {
    for (x, y, px) in image.enumerate_pixels() {
        for (got, want) in px.0.iter().zip(expected) {
            assert!(
                (got - want).abs() < 1e-5,
                "pixel ({x}, {y}) = {:?}, expected {expected:?}",
                px.0
            );
        }
    }
}

#[test]
fn color_fills_every_pixel() {
    let Some(mut tg) = gpu_graph([2, 2]) else {
        return;
    };
    let color = tg.create(TextureNode::Color);
    let out = tg.create(TextureNode::Output);
    tg.connect(color, 0, out, 0).unwrap();
    tg.set_param(color, "Color", [1.0, 0.0, 0.0, 1.0]).unwrap();

    tg.solve().unwrap_or_else(|e| panic!("{e:#}\n{}", tg.source().unwrap_or("")));
    let image = tg.read_output().unwrap();
    assert_eq!(image.dimensions(), (2, 2));
    assert_all_pixels(&image, [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn gradient_of_constant_is_zero() {
    let Some(mut tg) = gpu_graph([16, 16]) else {
        return;
    };
    let red = tg.create(TextureNode::Color);
    let height = tg.create(TextureNode::Color);
    let grad = tg.create(TextureNode::HeightGradient);
    let out = tg.create(TextureNode::Output);

    // Start from a non-zero output so a skipped dispatch cannot pass.
    tg.set_param(red, "Color", [1.0, 0.0, 0.0, 1.0]).unwrap();
    let seed = tg.connect(red, 0, out, 0).unwrap();
    tg.solve().unwrap_or_else(|e| panic!("{e:#}\n{}", tg.source().unwrap_or("")));
    assert_all_pixels(&tg.read_output().unwrap(), [1.0, 0.0, 0.0, 1.0]);

    assert!(tg.remove_connection(&seed));
    tg.connect(height, 0, grad, 0).unwrap();
    tg.connect(grad, 0, out, 0).unwrap();

    for constant in [[0.3, 0.6, 0.9, 1.0], [0.8, 0.1, 0.45, 0.5]] {
        tg.set_param(height, "Color", constant).unwrap();
        tg.solve().unwrap_or_else(|e| panic!("{e:#}\n{}", tg.source().unwrap_or("")));
        assert_all_pixels(&tg.read_output().unwrap(), [0.0, 0.0, 0.0, 0.0]);
    }
}

#[test]
fn oversized_images_fail_instead_of_panicking() {
    let Some(mut tg) = gpu_graph([4, 4]) else {
        return;
    };
    let input = tg.create(TextureNode::ImageInput);
    tg.set_image(input, "Image", Some(Arc::new(Rgba32FImage::new(9000, 1))), None)
        .unwrap();
    let err = tg.solve().unwrap_err();
    assert!(format!("{err:#}").contains("exceeds the device limit"), "{err:#}");

    tg.set_image(input, "Image", None, None).unwrap();
    tg.set_output_size([9000, 2]);
    let err = tg.solve().unwrap_err();
    assert!(format!("{err:#}").contains("exceeds the device limit"), "{err:#}");

    tg.set_output_size([4, 4]);
    tg.solve().unwrap();
    assert_eq!(tg.read_output().unwrap().dimensions(), (4, 4));
}

#[test]
fn resolve_after_param_edit_updates_output() {
    let Some(mut tg) = gpu_graph([3, 5]) else {
        return;
    };
    let color = tg.create(TextureNode::Color);
    tg.set_param(color, "Color", [0.0, 1.0, 0.0, 1.0]).unwrap();
    tg.solve().unwrap();
    assert_all_pixels(&tg.read_output().unwrap(), [0.0, 1.0, 0.0, 1.0]);

    tg.set_param(color, "Color", [0.25, 0.5, 0.75, 1.0]).unwrap();
    tg.solve().unwrap();
    assert_all_pixels(&tg.read_output().unwrap(), [0.25, 0.5, 0.75, 1.0]);
}
