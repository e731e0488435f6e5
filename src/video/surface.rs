use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Off-screen drawing surface the capture pipeline copies frames onto
pub struct Surface {
    canvas: RgbImage,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbImage::new(width, height),
        }
    }

    /// Draw `frame` scaled to the surface, or blank the surface if no frame
    /// has been displayed yet.
    pub fn draw(&mut self, frame: Option<&RgbImage>) {
        match frame {
            Some(frame) if frame.dimensions() == self.canvas.dimensions() => {
                self.canvas.copy_from_slice(frame.as_raw());
            }
            Some(frame) => {
                let (width, height) = self.canvas.dimensions();
                self.canvas = imageops::resize(frame, width, height, FilterType::Triangle);
            }
            None => {
                for pixel in self.canvas.pixels_mut() {
                    *pixel = Rgb([0, 0, 0]);
                }
            }
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.canvas
    }
}
