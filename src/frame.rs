use opencv::{
    core::{self, Mat, Scalar},
    prelude::*,
};

/// A BGR, 8-bit, 3-channel image owned by a single pipeline iteration.
#[derive(Debug)]
pub struct Frame {
    mat: Mat,
}

impl Frame {
    pub fn from_mat(mat: Mat) -> Self {
        Self { mat }
    }

    /// A black frame of the given size.
    pub fn blank(width: i32, height: i32) -> opencv::Result<Self> {
        let mat = Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, Scalar::all(0.0))?;
        Ok(Self { mat })
    }

    pub fn width(&self) -> i32 {
        self.mat.cols()
    }

    pub fn height(&self) -> i32 {
        self.mat.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.mat.empty()
    }

    pub fn mat(&self) -> &Mat {
        &self.mat
    }

    pub fn mat_mut(&mut self) -> &mut Mat {
        &mut self.mat
    }

    /// Pixel at column `x`, row `y` as `[b, g, r]`.
    pub fn pixel(&self, x: i32, y: i32) -> opencv::Result<[u8; 3]> {
        let px = self.mat.at_2d::<core::Vec3b>(y, x)?;
        Ok([px[0], px[1], px[2]])
    }

    pub fn try_clone(&self) -> opencv::Result<Self> {
        Ok(Self {
            mat: self.mat.try_clone()?,
        })
    }
}
