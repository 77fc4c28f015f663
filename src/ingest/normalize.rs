use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Yuyv => 2,
        }
    }
}

/// Convert one captured buffer to packed RGB24.
///
/// `stride` is the driver's bytes per line; 0 means rows are packed. Padding
/// at the end of each row and after the last row is skipped.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    if format == PixelFormat::Yuyv && width % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", width));
    }
    let row_bytes = (width as usize)
        .checked_mul(format.bytes_per_pixel())
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    let stride = if stride == 0 { row_bytes } else { stride };
    if stride < row_bytes {
        return Err(anyhow!(
            "stride {} is shorter than a {:?} row of {} bytes",
            stride,
            format,
            row_bytes
        ));
    }

    let packed = pack_rows(pixels, row_bytes, stride, height as usize, format)?;
    match format {
        PixelFormat::Rgb24 => Ok(packed),
        PixelFormat::Yuyv => Ok(yuyv_to_rgb(&packed)),
    }
}

fn pack_rows(
    pixels: &[u8],
    row_bytes: usize,
    stride: usize,
    height: usize,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let mut packed = Vec::with_capacity(row_bytes.saturating_mul(height));
    for row in 0..height {
        let line = row
            .checked_mul(stride)
            .and_then(|start| pixels.get(start..start.checked_add(row_bytes)?));
        let line = line.ok_or_else(|| {
            anyhow!(
                "{:?} frame is truncated at row {}: {} bytes for stride {}",
                format,
                row,
                pixels.len(),
                stride
            )
        })?;
        packed.extend_from_slice(line);
    }
    Ok(packed)
}

/// Packed 4:2:2 (Y0 U Y1 V per pixel pair) to RGB24.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_produces_gray() -> Result<()> {
        let yuyv = vec![128u8, 128, 64, 128, 200, 128, 10, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 2, 0, PixelFormat::Yuyv)?;
        assert_eq!(
            rgb,
            vec![128, 128, 128, 64, 64, 64, 200, 200, 200, 10, 10, 10]
        );
        Ok(())
    }

    #[test]
    fn yuyv_rejects_odd_width_and_short_buffers() {
        assert!(normalize_to_rgb(&[0u8; 6], 3, 1, 0, PixelFormat::Yuyv).is_err());
        assert!(normalize_to_rgb(&[0u8; 4], 2, 2, 0, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn rgb_pass_through_trims_padding() -> Result<()> {
        let mut pixels = vec![1u8; 9];
        pixels.extend_from_slice(&[0, 0, 0]);
        let rgb = normalize_to_rgb(&pixels, 1, 3, 0, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![1u8; 9]);
        Ok(())
    }

    #[test]
    fn padded_rows_are_repacked() -> Result<()> {
        // 2x2 RGB with 2 bytes of padding per row.
        let pixels = vec![
            1, 1, 1, 2, 2, 2, 0xEE, 0xEE, //
            3, 3, 3, 4, 4, 4, 0xEE, 0xEE,
        ];
        let rgb = normalize_to_rgb(&pixels, 2, 2, 8, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);

        // Last row may stop at the image edge.
        let rgb = normalize_to_rgb(&pixels[..14], 2, 2, 8, PixelFormat::Rgb24)?;
        assert_eq!(rgb.len(), 12);

        let yuyv = vec![128u8, 128, 64, 128, 0xEE, 0xEE, 200, 128, 10, 128, 0xEE, 0xEE];
        let rgb = normalize_to_rgb(&yuyv, 2, 2, 6, PixelFormat::Yuyv)?;
        assert_eq!(
            rgb,
            vec![128, 128, 128, 64, 64, 64, 200, 200, 200, 10, 10, 10]
        );
        Ok(())
    }

    #[test]
    fn stride_shorter_than_row_is_rejected() {
        assert!(normalize_to_rgb(&[0u8; 12], 2, 2, 4, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
