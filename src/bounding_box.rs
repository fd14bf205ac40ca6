/// Box expressed as fractions of the frame width and height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub x_min: f32,
    pub y_min: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    pub fn new(x_min: f32, y_min: f32, width: f32, height: f32) -> Self {
        Self {
            x_min,
            y_min,
            width,
            height,
        }
    }

    /// Every component forced into [0, 1]. NaN maps to 0.
    pub fn clamped(&self) -> Self {
        Self {
            x_min: clamp_unit(self.x_min),
            y_min: clamp_unit(self.y_min),
            width: clamp_unit(self.width),
            height: clamp_unit(self.height),
        }
    }

    /// Converts to pixels for a `frame_width` x `frame_height` frame.
    ///
    /// Components are clamped first, then each product is truncated toward zero.
    /// The resulting box may still extend past the right or bottom edge.
    pub fn to_pixel_box(&self, frame_width: i32, frame_height: i32) -> PixelBox {
        let b = self.clamped();
        let fw = frame_width.max(0) as f64;
        let fh = frame_height.max(0) as f64;
        PixelBox {
            x: (b.x_min as f64 * fw) as i32,
            y: (b.y_min as f64 * fh) as i32,
            width: (b.width as f64 * fw) as i32,
            height: (b.height as f64 * fh) as i32,
        }
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub normalized_box: NormalizedBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}
