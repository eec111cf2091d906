use crate::backend::BackendError;

use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MipError {
    #[error(transparent)]
    Decode(#[from] png::DecodingError),
    #[error(transparent)]
    Encode(#[from] png::EncodingError),
    #[error("expected a {expected}x{expected} tile, got {width}x{height}")]
    SizeMismatch {
        expected: u32,
        width: u32,
        height: u32,
    },
    #[error("unsupported png color type {0:?}")]
    UnsupportedColor(png::ColorType),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// How four children are shrunk into their parent.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MipMode {
    /// Point-samples each child, whatever its size.
    Default,
    /// Box-filters each 2x2 block. Children must be exactly one tile in size.
    Avg,
}

impl Default for MipMode {
    fn default() -> Self {
        Self::Default
    }
}

/// 8-bit RGBA pixels, row-major.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl RgbaImage {
    /// A fully transparent image.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0; 4])
    }

    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn pixels_mut(&mut self) -> &mut [[u8; 4]] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels()[(y * self.width + x) as usize]
    }

    pub fn decode_png(bytes: &[u8]) -> Result<Self, MipError> {
        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;
        let raw = &buf[..info.buffer_size()];

        let data = match info.color_type {
            png::ColorType::Rgba => raw.to_vec(),
            png::ColorType::Rgb => raw
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            png::ColorType::GrayscaleAlpha => raw
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            png::ColorType::Grayscale => raw.iter().flat_map(|&g| [g, g, g, 255]).collect(),
            other => return Err(MipError::UnsupportedColor(other)),
        };
        Ok(Self {
            width: info.width,
            height: info.height,
            data,
        })
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, MipError> {
        let mut out = Vec::new();
        let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&self.data)?;
        writer.finish()?;
        Ok(out)
    }
}

/// Shrinks a child tile into one quadrant of its parent.
///
/// Quadrants are numbered `(right ? 1 : 0) + (bottom ? 2 : 0)`, so quadrant `i` starts at `(i % 2, i / 2)` half-tiles.
pub struct QuadKernel {
    mode: MipMode,
}

impl QuadKernel {
    pub fn new(mode: MipMode) -> Self {
        Self { mode }
    }

    pub fn downsample_into(
        &self,
        src: &RgbaImage,
        quadrant: usize,
        dst: &mut RgbaImage,
    ) -> Result<(), MipError> {
        let half_w = dst.width / 2;
        let half_h = dst.height / 2;
        let offset_x = (quadrant as u32 % 2) * half_w;
        let offset_y = (quadrant as u32 / 2) * half_h;
        let dst_width = dst.width;

        match self.mode {
            MipMode::Avg => {
                if src.width != dst.width || src.height != dst.height {
                    return Err(MipError::SizeMismatch {
                        expected: dst.width,
                        width: src.width,
                        height: src.height,
                    });
                }
                let strides = [0, 1, src.width, src.width + 1];
                let src_pixels = src.pixels();
                let dst_pixels = dst.pixels_mut();
                for y in 0..half_h {
                    for x in 0..half_w {
                        let src_i = 2 * y * src.width + 2 * x;
                        let mut sum = [0u32; 4];
                        for stride in strides {
                            let p = src_pixels[(src_i + stride) as usize];
                            for c in 0..4 {
                                sum[c] += u32::from(p[c]);
                            }
                        }
                        let dst_i = (offset_y + y) * dst_width + offset_x + x;
                        dst_pixels[dst_i as usize] = sum.map(|s| ((s + 2) / 4) as u8);
                    }
                }
            }
            MipMode::Default => {
                let src_pixels = src.pixels();
                let dst_pixels = dst.pixels_mut();
                for y in 0..half_h {
                    let sy = y * src.height / half_h;
                    for x in 0..half_w {
                        let sx = x * src.width / half_w;
                        let dst_i = (offset_y + y) * dst_width + offset_x + x;
                        dst_pixels[dst_i as usize] = src_pixels[(sy * src.width + sx) as usize];
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builds a `size`x`size` parent from up to four children in quadrant order. Missing children are left transparent.
pub fn compose_mip(
    children: &[Option<RgbaImage>; 4],
    size: u32,
    mode: MipMode,
) -> Result<RgbaImage, MipError> {
    let kernel = QuadKernel::new(mode);
    let mut parent = RgbaImage::new(size, size);
    for (quadrant, child) in children.iter().enumerate() {
        if let Some(child) = child {
            kernel.downsample_into(child, quadrant, &mut parent)?;
        }
    }
    Ok(parent)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    #[test]
    fn quadrants_land_in_fixed_order() {
        let children = [
            Some(RgbaImage::filled(8, 8, RED)),
            None,
            None,
            Some(RgbaImage::filled(8, 8, BLUE)),
        ];
        for mode in [MipMode::Default, MipMode::Avg] {
            let parent = compose_mip(&children, 8, mode).unwrap();
            assert_eq!(parent.pixel(0, 0), RED);
            assert_eq!(parent.pixel(3, 3), RED);
            assert_eq!(parent.pixel(7, 0), [0; 4]);
            assert_eq!(parent.pixel(0, 7), [0; 4]);
            assert_eq!(parent.pixel(4, 4), BLUE);
            assert_eq!(parent.pixel(7, 7), BLUE);
        }
    }

    #[test]
    fn avg_rounds_to_nearest() {
        let mut child = RgbaImage::new(2, 2);
        child.pixels_mut().copy_from_slice(&[[0; 4], [1; 4], [1; 4], [1; 4]]);
        let mut parent = RgbaImage::new(2, 2);
        QuadKernel::new(MipMode::Avg)
            .downsample_into(&child, 0, &mut parent)
            .unwrap();
        assert_eq!(parent.pixel(0, 0), [1; 4]);
    }

    #[test]
    fn avg_rejects_wrong_child_size() {
        let children = [Some(RgbaImage::new(4, 4)), None, None, None];
        assert!(matches!(
            compose_mip(&children, 8, MipMode::Avg),
            Err(MipError::SizeMismatch { .. })
        ));
        // Point sampling copes with any size.
        assert!(compose_mip(&children, 8, MipMode::Default).is_ok());
    }

    #[test]
    fn png_survives_encode_and_decode() {
        let mut image = RgbaImage::filled(3, 2, RED);
        image.pixels_mut()[4] = BLUE;
        let decoded = RgbaImage::decode_png(&image.encode_png().unwrap()).unwrap();
        assert_eq!(decoded, image);
    }
}
