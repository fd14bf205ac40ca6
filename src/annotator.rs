use crate::{
    bounding_box::{Detection, PixelBox},
    frame::Frame,
};
use opencv::{
    core::{Point, Scalar},
    imgproc,
};
use thiserror::Error;

pub const LABEL: &str = "Unknown";

/// Gap between the label baseline and the top edge of the box.
const LABEL_OFFSET: i32 = 10;

const BOX_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const BOX_THICKNESS: i32 = 2;
const LABEL_COLOR: (f64, f64, f64) = (0.0, 0.0, 255.0);
const LABEL_FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const LABEL_SCALE: f64 = 0.8;
const LABEL_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Cannot annotate an empty frame")]
    EmptyFrame,
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Draws a box and the fixed label for every detection, in detector order.
#[derive(Debug, Clone)]
pub struct Annotator {
    label_height: i32,
}

impl Annotator {
    pub fn new() -> Result<Self, AnnotateError> {
        let mut baseline = 0;
        let size = imgproc::get_text_size(
            LABEL,
            LABEL_FONT,
            LABEL_SCALE,
            LABEL_THICKNESS,
            &mut baseline,
        )?;
        Ok(Self {
            label_height: size.height,
        })
    }

    /// Lowest baseline that still keeps the whole label inside the frame.
    pub fn label_floor(&self) -> i32 {
        self.label_height
    }

    pub fn annotate<'a>(
        &self,
        frame: &'a mut Frame,
        detections: &[Detection],
    ) -> Result<&'a mut Frame, AnnotateError> {
        if detections.is_empty() {
            return Ok(frame);
        }
        if frame.is_empty() {
            return Err(AnnotateError::EmptyFrame);
        }

        let (width, height) = (frame.width(), frame.height());
        let box_color = Scalar::new(BOX_COLOR.0, BOX_COLOR.1, BOX_COLOR.2, 0.0);
        let label_color = Scalar::new(LABEL_COLOR.0, LABEL_COLOR.1, LABEL_COLOR.2, 0.0);

        for detection in detections {
            let pixel_box = detection.normalized_box.to_pixel_box(width, height);

            imgproc::rectangle_points(
                frame.mat_mut(),
                Point::new(pixel_box.x, pixel_box.y),
                Point::new(
                    pixel_box.x.saturating_add(pixel_box.width),
                    pixel_box.y.saturating_add(pixel_box.height),
                ),
                box_color,
                BOX_THICKNESS,
                imgproc::LINE_8,
                0,
            )?;

            imgproc::put_text(
                frame.mat_mut(),
                LABEL,
                label_origin(&pixel_box, self.label_height),
                LABEL_FONT,
                LABEL_SCALE,
                label_color,
                LABEL_THICKNESS,
                imgproc::LINE_8,
                false,
            )?;
        }

        Ok(frame)
    }
}

/// Bottom-left corner of the label text.
///
/// Sits `LABEL_OFFSET` pixels above the box; when that would push the glyphs past
/// the top edge the baseline is held at `floor` (the label height).
pub fn label_origin(pixel_box: &PixelBox, floor: i32) -> Point {
    Point::new(pixel_box.x, (pixel_box.y - LABEL_OFFSET).max(floor.max(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::NormalizedBox;
    use opencv::{core::Mat, prelude::*};

    fn detection(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            normalized_box: NormalizedBox::new(x, y, w, h),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_no_detections_leaves_frame_untouched() {
        let annotator = Annotator::new().unwrap();
        let mut frame = Frame::blank(64, 48).unwrap();
        let before = frame.mat().data_bytes().unwrap().to_vec();

        annotator.annotate(&mut frame, &[]).unwrap();

        assert_eq!(frame.mat().data_bytes().unwrap(), before.as_slice());
    }

    #[test]
    fn test_label_sits_above_box() {
        let pixel_box = PixelBox {
            x: 64,
            y: 96,
            width: 192,
            height: 192,
        };
        assert_eq!(label_origin(&pixel_box, 17), Point::new(64, 86));
    }

    #[test]
    fn test_label_is_clamped_at_top_edge() {
        let pixel_box = PixelBox {
            x: 5,
            y: 4,
            width: 20,
            height: 20,
        };
        let origin = label_origin(&pixel_box, 17);
        assert_eq!(origin, Point::new(5, 17));

        let origin = label_origin(&pixel_box, -3);
        assert_eq!(origin.y, 0);
    }

    #[test]
    fn test_label_floor_is_text_height() {
        let annotator = Annotator::new().unwrap();
        assert!(annotator.label_floor() > 0);
        assert!(annotator.label_floor() < 40);
    }

    #[test]
    fn test_draws_green_box_outline() {
        let annotator = Annotator::new().unwrap();
        let mut frame = Frame::blank(640, 480).unwrap();

        annotator
            .annotate(&mut frame, &[detection(0.1, 0.2, 0.3, 0.4)])
            .unwrap();

        // left edge of the box at (64, 96)..(256, 288), away from the label
        assert_eq!(frame.pixel(64, 200).unwrap(), [0, 255, 0]);
        // bottom edge
        assert_eq!(frame.pixel(150, 288).unwrap(), [0, 255, 0]);
        // interior untouched
        assert_eq!(frame.pixel(150, 200).unwrap(), [0, 0, 0]);
    }

    #[test]
    fn test_label_is_drawn_in_red() {
        let annotator = Annotator::new().unwrap();
        let mut frame = Frame::blank(640, 480).unwrap();

        annotator
            .annotate(&mut frame, &[detection(0.25, 0.5, 0.25, 0.25)])
            .unwrap();

        // label baseline at y = 230, glyphs occupy the rows just above it
        let mut red = 0;
        for y in (230 - annotator.label_floor())..230 {
            for x in 160..260 {
                if frame.pixel(x, y).unwrap() == [0, 0, 255] {
                    red += 1;
                }
            }
        }
        assert!(red > 0);
    }

    #[test]
    fn test_overhanging_box_does_not_fail() {
        let annotator = Annotator::new().unwrap();
        let mut frame = Frame::blank(100, 100).unwrap();

        let result = annotator.annotate(
            &mut frame,
            &[detection(0.95, 0.0, 0.5, 0.5), detection(1.0, 1.0, 1.0, 1.0)],
        );

        assert!(result.is_ok());
    }

    #[test]
    fn test_overlapping_boxes_are_all_drawn() {
        let annotator = Annotator::new().unwrap();
        let mut frame = Frame::blank(200, 200).unwrap();

        annotator
            .annotate(
                &mut frame,
                &[
                    detection(0.25, 0.25, 0.5, 0.5),
                    detection(0.3, 0.3, 0.5, 0.5),
                ],
            )
            .unwrap();

        // left edges of both boxes at x = 50 and x = 60
        assert_eq!(frame.pixel(50, 120).unwrap(), [0, 255, 0]);
        assert_eq!(frame.pixel(60, 120).unwrap(), [0, 255, 0]);
    }

    #[test]
    fn test_empty_frame_with_detections_errors() {
        let annotator = Annotator::new().unwrap();
        let mut frame = Frame::from_mat(Mat::default());

        let result = annotator.annotate(&mut frame, &[detection(0.1, 0.1, 0.1, 0.1)]);

        assert!(matches!(result, Err(AnnotateError::EmptyFrame)));
    }
}
