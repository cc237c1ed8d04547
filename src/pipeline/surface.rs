//! 2D drawing surface used by both compositors and the illustration.
//!
//! Shapes are rasterized with `imageproc::drawing`. The surface adds a
//! current transform and blend mode with a save/restore stack, so callers can
//! flip or rescale everything drawn after a transform change without touching
//! their own coordinates.

use image::{Pixel, Rgba as RgbaPixel, RgbaImage};
use imageproc::{
    drawing::{
        Canvas, draw_filled_circle_mut, draw_filled_ellipse_mut, draw_line_segment_mut,
        draw_polygon_mut,
    },
    geometric_transformations::Projection,
    point::Point as PolyPoint,
};
use rayon::prelude::*;

use crate::types::{Frame, Point};

/// Strokes thinner than this many device pixels are drawn as plain segments.
const HAIRLINE: f32 = 0.75;

/// Affine placement of user coordinates on the surface.
#[derive(Clone, Copy)]
pub struct Transform(Projection);

impl Transform {
    pub fn identity() -> Transform {
        Transform::scale(1.0, 1.0)
    }

    pub fn scale(sx: f32, sy: f32) -> Transform {
        Transform(Projection::scale(sx, sy))
    }

    pub fn translate(tx: f32, ty: f32) -> Transform {
        Transform(Projection::translate(tx, ty))
    }

    /// Scale by `(sx, sy)` keeping `pivot` fixed.
    pub fn scale_about(sx: f32, sy: f32, pivot: Point) -> Transform {
        Transform::translate(pivot.x, pivot.y)
            .then(Transform::scale(sx, sy))
            .then(Transform::translate(-pivot.x, -pivot.y))
    }

    /// `other` is applied to points first.
    pub fn then(self, other: Transform) -> Transform {
        Transform(self.0 * other.0)
    }

    pub fn apply(&self, p: Point) -> Point {
        let (x, y) = self.0 * (p.x, p.y);
        Point::new(x, y)
    }

    /// `None` for transforms that collapse an axis.
    pub fn invert(&self) -> Option<Transform> {
        if self.determinant().abs() < f32::EPSILON {
            return None;
        }
        Some(Transform(self.0.invert()))
    }

    fn determinant(&self) -> f32 {
        let o = self.apply(Point::new(0.0, 0.0));
        let ex = self.apply(Point::new(1.0, 0.0));
        let ey = self.apply(Point::new(0.0, 1.0));
        (ex.x - o.x) * (ey.y - o.y) - (ex.y - o.y) * (ey.x - o.x)
    }

    /// Average linear scale factor, used for stroke widths.
    fn mean_scale(&self) -> f32 {
        self.determinant().abs().sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    /// New content is painted over what is already there.
    SourceOver,
    /// New content only shows through where the surface is transparent.
    DestinationOver,
}

pub type Rgba = [u8; 4];

/// Straight-alpha "over" of `top` on `bottom`, exact for opaque and empty paint.
fn over(top: RgbaPixel<u8>, bottom: RgbaPixel<u8>) -> RgbaPixel<u8> {
    match top.0[3] {
        0 => bottom,
        255 => top,
        _ => {
            let mut out = bottom;
            out.blend(&top);
            out
        }
    }
}

fn composite(dst: &mut RgbaPixel<u8>, color: RgbaPixel<u8>, blend: BlendMode) {
    *dst = match blend {
        BlendMode::SourceOver => over(color, *dst),
        BlendMode::DestinationOver => over(*dst, color),
    };
}

/// Canvas view that composites every plotted pixel with the surface blend mode.
struct Layer<'a> {
    image: &'a mut RgbaImage,
    blend: BlendMode,
}

impl Canvas for Layer<'_> {
    type Pixel = RgbaPixel<u8>;

    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn get_pixel(&self, x: u32, y: u32) -> RgbaPixel<u8> {
        *self.image.get_pixel(x, y)
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: RgbaPixel<u8>) {
        composite(self.image.get_pixel_mut(x, y), color, self.blend);
    }
}

fn device_xy(p: Point) -> (i32, i32) {
    (p.x.round() as i32, p.y.round() as i32)
}

pub struct Surface {
    image: RgbaImage,
    transform: Transform,
    blend: BlendMode,
    saved: Vec<(Transform, BlendMode)>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            transform: Transform::identity(),
            blend: BlendMode::SourceOver,
            saved: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        self.image.get_pixel(x, y).0
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(self.image.as_raw().clone(), self.width(), self.height())
    }

    /// Resets every pixel to transparent black. Transform and blend mode are kept.
    pub fn clear(&mut self) {
        let buf: &mut [u8] = &mut self.image;
        buf.fill(0);
    }

    pub fn save(&mut self) {
        self.saved.push((self.transform, self.blend));
    }

    pub fn restore(&mut self) {
        if let Some((transform, blend)) = self.saved.pop() {
            self.transform = transform;
            self.blend = blend;
        }
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn reset_transform(&mut self) {
        self.transform = Transform::identity();
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.transform = self.transform.then(Transform::scale(sx, sy));
    }

    pub fn translate(&mut self, tx: f32, ty: f32) {
        self.transform = self.transform.then(Transform::translate(tx, ty));
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend
    }

    pub fn set_blend_mode(&mut self, blend: BlendMode) {
        self.blend = blend;
    }

    fn layer(&mut self) -> Layer<'_> {
        Layer {
            image: &mut self.image,
            blend: self.blend,
        }
    }

    /// Draws `src` into the user-space rectangle `(dx, dy, dw, dh)` with nearest sampling.
    pub fn draw_image(&mut self, src: &Frame, dx: f32, dy: f32, dw: f32, dh: f32) {
        if src.width == 0 || src.height == 0 || dw <= 0.0 || dh <= 0.0 {
            return;
        }
        let expected = src.width as usize * src.height as usize * 4;
        if src.rgba.len() < expected {
            log::warn!(
                "skipping image draw: buffer holds {} bytes, expected {expected}",
                src.rgba.len()
            );
            return;
        }
        let Some(inverse) = self.transform.invert() else {
            return;
        };

        let corners = [
            Point::new(dx, dy),
            Point::new(dx + dw, dy),
            Point::new(dx, dy + dh),
            Point::new(dx + dw, dy + dh),
        ]
        .map(|p| self.transform.apply(p));
        let Some((x0, y0, x1, y1)) = self.clip_bounds(&corners) else {
            return;
        };

        let width = self.width() as usize;
        let blend = self.blend;
        let (sw, sh) = (src.width as f32, src.height as f32);
        let rows: &mut [u8] = &mut self.image;

        rows.par_chunks_mut(width * 4)
            .enumerate()
            .skip(y0)
            .take(y1 - y0)
            .for_each(|(y, row)| {
                for x in x0..x1 {
                    let user = inverse.apply(Point::new(x as f32 + 0.5, y as f32 + 0.5));
                    let u = (user.x - dx) / dw;
                    let v = (user.y - dy) / dh;
                    if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                        continue;
                    }
                    let sx = ((u * sw) as usize).min(src.width as usize - 1);
                    let sy = ((v * sh) as usize).min(src.height as usize - 1);
                    let idx = (sy * src.width as usize + sx) * 4;
                    let color = *RgbaPixel::from_slice(&src.rgba[idx..idx + 4]);
                    composite(
                        RgbaPixel::from_slice_mut(&mut row[x * 4..x * 4 + 4]),
                        color,
                        blend,
                    );
                }
            });
    }

    /// Fills a polygon given in user space.
    pub fn fill_polygon(&mut self, points: &[Point], color: Rgba) {
        let mut device: Vec<PolyPoint<i32>> = Vec::with_capacity(points.len());
        for p in points {
            let (x, y) = device_xy(self.transform.apply(*p));
            if device.last().is_none_or(|last| last.x != x || last.y != y) {
                device.push(PolyPoint::new(x, y));
            }
        }
        // imageproc rejects an explicitly closed ring
        while device.len() > 1 && device.first() == device.last() {
            device.pop();
        }
        if device.len() < 3 {
            return;
        }
        draw_polygon_mut(&mut self.layer(), &device, RgbaPixel(color));
    }

    pub fn fill_circle(&mut self, center: Point, radius: f32, color: Rgba) {
        self.fill_ellipse(center, radius, radius, color);
    }

    /// Fills an axis-aligned ellipse. Rotation in the current transform is ignored.
    pub fn fill_ellipse(&mut self, center: Point, rx: f32, ry: f32, color: Rgba) {
        if rx <= 0.0 || ry <= 0.0 {
            return;
        }
        let c = self.transform.apply(center);
        let rx = c.distance(&self.transform.apply(Point::new(center.x + rx, center.y)));
        let ry = c.distance(&self.transform.apply(Point::new(center.x, center.y + ry)));
        let center = device_xy(c);
        let pixel = RgbaPixel(color);
        if (rx - ry).abs() < 0.5 {
            draw_filled_circle_mut(&mut self.layer(), center, rx.round() as i32, pixel);
        } else {
            draw_filled_ellipse_mut(
                &mut self.layer(),
                center,
                rx.round() as i32,
                ry.round() as i32,
                pixel,
            );
        }
    }

    /// Round-capped line of user-space `width`.
    pub fn stroke_line(&mut self, p0: Point, p1: Point, width: f32, color: Rgba) {
        let a = self.transform.apply(p0);
        let b = self.transform.apply(p1);
        if !(a.x.is_finite() && a.y.is_finite() && b.x.is_finite() && b.y.is_finite()) {
            return;
        }
        let half = width * self.transform.mean_scale() * 0.5;
        let pixel = RgbaPixel(color);

        if half <= HAIRLINE {
            draw_line_segment_mut(&mut self.layer(), (a.x, a.y), (b.x, b.y), pixel);
            return;
        }

        let len = a.distance(&b);
        if len > f32::EPSILON {
            let nx = -(b.y - a.y) / len * half;
            let ny = (b.x - a.x) / len * half;
            let band = [
                Point::new(a.x + nx, a.y + ny),
                Point::new(b.x + nx, b.y + ny),
                Point::new(b.x - nx, b.y - ny),
                Point::new(a.x - nx, a.y - ny),
            ];
            self.save();
            self.reset_transform();
            self.fill_polygon(&band, color);
            self.restore();
        }
        let radius = half.round() as i32;
        draw_filled_circle_mut(&mut self.layer(), device_xy(a), radius, pixel);
        draw_filled_circle_mut(&mut self.layer(), device_xy(b), radius, pixel);
    }

    /// Connected round-capped strokes through `points`.
    pub fn stroke_path(&mut self, points: &[Point], width: f32, color: Rgba) {
        for pair in points.windows(2) {
            self.stroke_line(pair[0], pair[1], width, color);
        }
    }

    /// Integer device-space box covering `points`, clipped to the surface.
    fn clip_bounds(&self, points: &[Point]) -> Option<(usize, usize, usize, usize)> {
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for p in points {
            if !p.x.is_finite() || !p.y.is_finite() {
                return None;
            }
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let x0 = min_x.floor().max(0.0) as usize;
        let y0 = min_y.floor().max(0.0) as usize;
        let x1 = (max_x.ceil().max(0.0) as usize).min(self.width() as usize);
        let y1 = (max_y.ceil().max(0.0) as usize).min(self.height() as usize);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}
