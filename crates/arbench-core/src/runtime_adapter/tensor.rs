//! Frame to tensor and tensor to frame conversion.
//!
//! These are the narrow seams a host replaces when its models expect a
//! different layout or produce outputs that need custom rendering.

use super::TensorMap;
use crate::config::{BenchConfig, VisualizationMode};
use crate::error::InferenceError;
use crate::frame::Frame;
use image::Rgba;
use ndarray::{Array4, ArrayD, ArrayView3, Axis, Ix3};
use std::collections::HashMap;

/// Converts a frame into the model input tensor.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<ArrayD<f32>, InferenceError>;
}

/// Converts an output tensor into a displayable frame.
pub trait TensorRenderer: Send + Sync {
    fn render(&self, tensor: &ArrayD<f32>, mode: VisualizationMode) -> Result<Frame, InferenceError>;
}

/// `[1, 3, H, W]` float encoder, RGB scaled to `[0, 1]` and optionally normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NchwEncoder {
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for NchwEncoder {
    fn default() -> Self {
        Self {
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }
}

impl NchwEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// ImageNet mean/std normalization.
    pub fn imagenet() -> Self {
        Self::with_normalization([0.485, 0.456, 0.406], [0.229, 0.224, 0.225])
    }

    pub fn with_normalization(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }
}

impl FrameEncoder for NchwEncoder {
    fn encode(&self, frame: &Frame) -> Result<ArrayD<f32>, InferenceError> {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return Err(InferenceError::Preprocessing("empty frame".to_string()));
        }
        if self.std.iter().any(|s| *s == 0.0) {
            return Err(InferenceError::Preprocessing("zero std".to_string()));
        }
        let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
        for (x, y, pixel) in frame.image().enumerate_pixels() {
            for c in 0..3 {
                let v = f32::from(pixel.0[c]) / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (v - self.mean[c]) / self.std[c];
            }
        }
        Ok(tensor.into_dyn())
    }
}

/// Renders outputs as grayscale, RGB, or an argmax class palette.
#[derive(Debug, Clone)]
pub struct PaletteRenderer {
    palette: Vec<[u8; 3]>,
}

impl Default for PaletteRenderer {
    fn default() -> Self {
        Self::with_classes(21)
    }
}

impl PaletteRenderer {
    /// Evenly spaced hues, one per class.
    pub fn with_classes(classes: usize) -> Self {
        let classes = classes.max(1);
        let palette = (0..classes)
            .map(|i| hue_to_rgb(i as f32 / classes as f32))
            .collect();
        Self { palette }
    }

    pub fn with_palette(palette: Vec<[u8; 3]>) -> Self {
        Self { palette }
    }

    fn class_color(&self, class: usize) -> [u8; 3] {
        if self.palette.is_empty() {
            return [0, 0, 0];
        }
        self.palette[class % self.palette.len()]
    }
}

impl TensorRenderer for PaletteRenderer {
    fn render(&self, tensor: &ArrayD<f32>, mode: VisualizationMode) -> Result<Frame, InferenceError> {
        let chw = as_chw(tensor)?;
        let (channels, height, width) = chw.dim();
        let mode = match mode {
            VisualizationMode::Default if channels >= 3 => VisualizationMode::Color,
            VisualizationMode::Default => VisualizationMode::BlackAndWhite,
            VisualizationMode::Color if channels < 3 => {
                return Err(InferenceError::Postprocessing(format!(
                    "color rendering needs 3 channels, got {}",
                    channels
                )))
            }
            other => other,
        };

        let mut frame = Frame::new(width as u32, height as u32);
        let image = frame.image_mut();
        for y in 0..height {
            for x in 0..width {
                let rgb = match mode {
                    VisualizationMode::ArgmaxColor => {
                        let class = chw
                            .index_axis(Axis(1), y)
                            .index_axis(Axis(1), x)
                            .iter()
                            .enumerate()
                            .fold((0usize, f32::NEG_INFINITY), |best, (c, v)| {
                                if *v > best.1 {
                                    (c, *v)
                                } else {
                                    best
                                }
                            })
                            .0;
                        self.class_color(class)
                    }
                    VisualizationMode::Color => [
                        to_byte(chw[[0, y, x]]),
                        to_byte(chw[[1, y, x]]),
                        to_byte(chw[[2, y, x]]),
                    ],
                    _ => {
                        let g = to_byte(chw[[0, y, x]]);
                        [g, g, g]
                    }
                };
                image.put_pixel(x as u32, y as u32, Rgba([rgb[0], rgb[1], rgb[2], 255]));
            }
        }
        Ok(frame)
    }
}

/// Render every output with the mode configured for it.
///
/// Outputs that cannot be rendered become 1x1 placeholders.
pub fn render_outputs(
    outputs: &TensorMap,
    renderer: &dyn TensorRenderer,
    config: &BenchConfig,
) -> HashMap<String, Frame> {
    outputs
        .iter()
        .map(|(name, tensor)| {
            let frame = renderer
                .render(tensor, config.visualization_for(name))
                .unwrap_or_else(|e| {
                    log::warn!("Could not render output '{}': {}", name, e);
                    Frame::placeholder()
                });
            (name.clone(), frame)
        })
        .collect()
}

/// View `[1,C,H,W]`, `[C,H,W]` or `[H,W]` as `[C,H,W]`.
fn as_chw(tensor: &ArrayD<f32>) -> Result<ArrayView3<'_, f32>, InferenceError> {
    let shape_err = || {
        InferenceError::Postprocessing(format!("unsupported output shape {:?}", tensor.shape()))
    };
    let view = tensor.view();
    let view = match view.ndim() {
        4 if view.shape()[0] == 1 => view.index_axis_move(Axis(0), 0),
        3 => view,
        2 => view.insert_axis(Axis(0)),
        _ => return Err(shape_err()),
    };
    view.into_dimensionality::<Ix3>().map_err(|_| shape_err())
}

fn to_byte(v: f32) -> u8 {
    (v * 255.0).clamp(0.0, 255.0) as u8
}

fn hue_to_rgb(h: f32) -> [u8; 3] {
    let h6 = h * 6.0;
    let x = 1.0 - ((h6 % 2.0) - 1.0).abs();
    let (r, g, b) = match h6 as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    [to_byte(r), to_byte(g), to_byte(b)]
}
