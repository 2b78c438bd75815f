use serde::{Deserialize, Serialize};

/// Axis-aligned region of one detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face descriptor vector (512-dimensional for ArcFace, L2-normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    /// Cosine similarity between two descriptors, in [-1, 1].
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One enrolled (name, descriptor) pair.
///
/// The store keeps these as a single ordered sequence; entry order is
/// enrollment order. A name may own any number of records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub name: String,
    pub descriptor: Descriptor,
}

/// Compare a probe descriptor against every enrolled record.
///
/// Returns one boolean per record, order-aligned with `known`: true where
/// cosine similarity reaches `threshold`.
pub fn match_flags(known: &[DescriptorRecord], query: &Descriptor, threshold: f32) -> Vec<bool> {
    known
        .iter()
        .map(|record| query.similarity(&record.descriptor) >= threshold)
        .collect()
}

/// Extract a face region's pixels from a grayscale frame.
///
/// The region is clamped to the frame bounds; a region entirely outside the
/// frame yields an empty crop. Returns (pixels, width, height).
pub fn crop_region(data: &[u8], width: u32, height: u32, region: &FaceRegion) -> (Vec<u8>, u32, u32) {
    let x0 = region.x.max(0.0) as u32;
    let y0 = region.y.max(0.0) as u32;
    let x1 = ((region.x + region.width).max(0.0) as u32).min(width);
    let y1 = ((region.y + region.height).max(0.0) as u32).min(height);

    if x0 >= x1 || y0 >= y1 {
        return (Vec::new(), 0, 0);
    }

    let crop_w = x1 - x0;
    let crop_h = y1 - y0;
    let mut crop = Vec::with_capacity((crop_w * crop_h) as usize);
    for y in y0..y1 {
        let row = (y * width + x0) as usize;
        crop.extend_from_slice(&data[row..row + crop_w as usize]);
    }

    (crop, crop_w, crop_h)
}
