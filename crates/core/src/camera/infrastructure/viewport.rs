use image::imageops::{self, FilterType};
use image::RgbImage;

/// Scales `img` to cover a `width × height` viewport and crops the overflow
/// evenly from both sides, like CSS `object-fit: cover`.
pub(crate) fn fit_cover(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = img.dimensions();
    if src_w == width && src_h == height {
        return img.clone();
    }
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return RgbImage::new(width, height);
    }

    let scale = (width as f64 / src_w as f64).max(height as f64 / src_h as f64);
    let scaled_w = ((src_w as f64 * scale).round() as u32).max(width);
    let scaled_h = ((src_h as f64 * scale).round() as u32).max(height);

    let scaled = imageops::resize(img, scaled_w, scaled_h, FilterType::Triangle);
    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}
