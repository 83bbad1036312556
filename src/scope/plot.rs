use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::coord::Shift;
use plotters::prelude::{
    BitMapBackend, DrawingArea, IntoDrawingArea, PathElement, RGBAColor, ShapeStyle,
};

use crate::scope::config::MAX_CANVAS_PX;
use crate::scope::error::ScopeError;
use crate::scope::render::{Color, DrawingSurface, Renderer};
use crate::scope::trace::SharedTrace;

fn rgba(color: Color) -> RGBAColor {
    let (r, g, b) = color.to_rgb8();
    RGBAColor(r, g, b, color.a.clamp(0.0, 1.0))
}

#[derive(Clone, Copy, Debug)]
struct Pen {
    color: Color,
    width: f64,
}

/// [`DrawingSurface`] over a plotters bitmap, for rendering frames without a GUI.
pub struct RasterSurface<'a> {
    area: DrawingArea<BitMapBackend<'a>, Shift>,
    pen: Pen,
    saved: Vec<Pen>,
    paths: Vec<Vec<(i32, i32)>>,
}

impl<'a> RasterSurface<'a> {
    pub fn new(area: DrawingArea<BitMapBackend<'a>, Shift>) -> Self {
        Self {
            area,
            pen: Pen {
                color: Color::WHITE,
                width: 1.0,
            },
            saved: Vec::new(),
            paths: Vec::new(),
        }
    }

    pub fn fill(&self, color: Color) -> Result<(), ScopeError> {
        self.area.fill(&rgba(color))?;
        Ok(())
    }

    pub fn present(&self) -> Result<(), ScopeError> {
        self.area.present()?;
        Ok(())
    }
}

fn pixel(x: f64, y: f64) -> (i32, i32) {
    (x.round() as i32, y.round() as i32)
}

impl DrawingSurface for RasterSurface<'_> {
    fn set_line_width(&mut self, width: f64) {
        self.pen.width = width;
    }

    fn set_color(&mut self, color: Color) {
        self.pen.color = color;
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.paths.push(vec![pixel(x, y)]);
    }

    fn line_to(&mut self, x: f64, y: f64) {
        match self.paths.last_mut() {
            Some(path) => path.push(pixel(x, y)),
            None => self.paths.push(vec![pixel(x, y)]),
        }
    }

    fn stroke(&mut self) -> Result<(), ScopeError> {
        let style = ShapeStyle {
            color: rgba(self.pen.color),
            filled: false,
            stroke_width: self.pen.width.round().max(1.0) as u32,
        };
        for path in self.paths.drain(..) {
            if path.len() < 2 {
                continue;
            }
            self.area.draw(&PathElement::new(path, style))?;
        }
        Ok(())
    }

    fn point(&mut self, x: f64, y: f64) -> Result<(), ScopeError> {
        self.area.draw_pixel(pixel(x, y), &rgba(self.pen.color))?;
        Ok(())
    }

    fn save(&mut self) {
        self.saved.push(self.pen);
    }

    fn restore(&mut self) {
        if let Some(pen) = self.saved.pop() {
            self.pen = pen;
        }
    }
}

/// Renders one frame of `traces` and encodes it as PNG.
pub fn render_png(
    renderer: &Renderer,
    traces: &[SharedTrace],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, ScopeError> {
    if width == 0 || height == 0 {
        return Err(ScopeError::Plot(format!("empty canvas {width}x{height}")));
    }
    if width > MAX_CANVAS_PX || height > MAX_CANVAS_PX {
        return Err(ScopeError::Plot(format!("canvas {width}x{height} is too large")));
    }
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or_else(|| ScopeError::Plot(format!("canvas {width}x{height} is too large")))?;
    let mut buffer = vec![0u8; len];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        let mut surface = RasterSurface::new(root);
        surface.fill(renderer.background)?;
        renderer.draw(&mut surface, width, height, traces)?;
        surface.present()?;
    }
    encode_png(&buffer, width, height)
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ScopeError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| ScopeError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::trace::{Trace, TraceStyle};
    use crate::scope::Probe;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn renders_reticle_and_traces_to_png() {
        let mut trace = Trace::new(
            Probe::pin("siggen.0.sine"),
            TraceStyle {
                vscale: 2.0,
                color: Color::GREEN,
                ..TraceStyle::default()
            },
        );
        trace.append((0..2000).map(|i| (f64::from(i) / 50.0).sin()));
        let png = render_png(&Renderer::default(), &[trace.shared()], 640, 480).unwrap();
        assert_eq!(png[..8], PNG_MAGIC);
    }

    #[test]
    fn oversized_canvas_is_rejected() {
        assert!(matches!(
            render_png(&Renderer::default(), &[], 40_000, 40_000),
            Err(ScopeError::Plot(_))
        ));
        assert!(matches!(
            render_png(&Renderer::default(), &[], u32::MAX, u32::MAX),
            Err(ScopeError::Plot(_))
        ));
    }

    #[test]
    fn empty_canvas_is_rejected() {
        assert!(matches!(
            render_png(&Renderer::default(), &[], 0, 480),
            Err(ScopeError::Plot(_))
        ));
    }
}
