//! Cryptographic and perceptual hash computation
//!
//! SHA-256 is streamed over the raw file bytes and succeeds for any readable
//! file, independent of decode outcome. The four perceptual families need a
//! decoded bitmap and are computed independently of each other; a failed one
//! is reported as `None`, never as a zero digest.

use image::imageops::FilterType;
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::PERCEPTUAL_HASH_SIZE;
use crate::error::IndexError;

/// Streaming chunk size for file digests
const CHUNK_SIZE: usize = 1024 * 1024;

/// The four perceptual digests for one decoded bitmap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerceptualHashes {
    pub ahash: Option<String>,
    pub dhash: Option<String>,
    pub phash: Option<String>,
    pub whash: Option<String>,
}

/// Compute the SHA-256 of a file's raw bytes as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String, IndexError> {
    let mut file = File::open(path).map_err(|e| IndexError::from(e).with_path(path.into()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| IndexError::from(e).with_path(path.into()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute all four perceptual hashes for a decoded image
pub fn perceptual_hashes(img: &DynamicImage) -> PerceptualHashes {
    PerceptualHashes {
        ahash: average_hash(img),
        dhash: difference_hash(img),
        phash: dct_hash(img),
        whash: wavelet_hash(img),
    }
}

/// Average hash: mean-threshold over a downscaled grid
pub fn average_hash(img: &DynamicImage) -> Option<String> {
    if degenerate(img) {
        return None;
    }
    let hasher = HasherConfig::new()
        .hash_size(PERCEPTUAL_HASH_SIZE, PERCEPTUAL_HASH_SIZE)
        .hash_alg(HashAlg::Mean)
        .to_hasher();
    Some(hex::encode(hasher.hash_image(img).as_bytes()))
}

/// Difference hash: horizontal gradient sign over a downscaled grid
pub fn difference_hash(img: &DynamicImage) -> Option<String> {
    if degenerate(img) {
        return None;
    }
    let hasher = HasherConfig::new()
        .hash_size(PERCEPTUAL_HASH_SIZE, PERCEPTUAL_HASH_SIZE)
        .hash_alg(HashAlg::Gradient)
        .to_hasher();
    Some(hex::encode(hasher.hash_image(img).as_bytes()))
}

/// DCT perceptual hash: mean-threshold over the low-frequency DCT block
pub fn dct_hash(img: &DynamicImage) -> Option<String> {
    if degenerate(img) {
        return None;
    }
    let hasher = HasherConfig::new()
        .hash_size(PERCEPTUAL_HASH_SIZE, PERCEPTUAL_HASH_SIZE)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher();
    Some(hex::encode(hasher.hash_image(img).as_bytes()))
}

/// Haar wavelet hash: median-threshold over the low-low band after three
/// 2D Haar decomposition levels (64x64 -> 8x8)
pub fn wavelet_hash(img: &DynamicImage) -> Option<String> {
    const SIDE: usize = (PERCEPTUAL_HASH_SIZE as usize) * 8;
    if degenerate(img) {
        return None;
    }

    let gray = img.to_luma8();
    let small = image::imageops::resize(&gray, SIDE as u32, SIDE as u32, FilterType::Triangle);
    let mut data: Vec<f64> = small.pixels().map(|p| f64::from(p.0[0])).collect();

    let mut size = SIDE;
    while size > PERCEPTUAL_HASH_SIZE as usize {
        haar_step(&mut data, SIDE, size);
        size /= 2;
    }

    let n = PERCEPTUAL_HASH_SIZE as usize;
    let mut ll = Vec::with_capacity(n * n);
    for y in 0..n {
        for x in 0..n {
            ll.push(data[y * SIDE + x]);
        }
    }

    let mut sorted = ll.clone();
    sorted.sort_by(f64::total_cmp);
    let median = (sorted[n * n / 2 - 1] + sorted[n * n / 2]) / 2.0;

    let mut bits: u64 = 0;
    for (i, v) in ll.iter().enumerate() {
        if *v > median {
            bits |= 1 << (63 - i);
        }
    }
    Some(format!("{bits:016x}"))
}

/// One in-place 2D Haar decomposition step on the `size`-square top-left
/// region of a `stride`-wide buffer. Averages land in the low half,
/// differences in the high half.
fn haar_step(data: &mut [f64], stride: usize, size: usize) {
    let half = size / 2;
    let mut tmp = vec![0.0f64; size];

    for y in 0..size {
        for x in 0..half {
            let a = data[y * stride + 2 * x];
            let b = data[y * stride + 2 * x + 1];
            tmp[x] = (a + b) / 2.0;
            tmp[half + x] = (a - b) / 2.0;
        }
        data[y * stride..y * stride + size].copy_from_slice(&tmp);
    }

    for x in 0..size {
        for y in 0..half {
            let a = data[(2 * y) * stride + x];
            let b = data[(2 * y + 1) * stride + x];
            tmp[y] = (a + b) / 2.0;
            tmp[half + y] = (a - b) / 2.0;
        }
        for (y, v) in tmp.iter().enumerate().take(size) {
            data[y * stride + x] = *v;
        }
    }
}

fn degenerate(img: &DynamicImage) -> bool {
    img.width() == 0 || img.height() == 0
}
