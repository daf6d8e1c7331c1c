// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频帧数据结构
/// Owned RGB24 frames and time-base arithmetic
use crate::error::SnapshotError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;

/// 有理数 (帧率 / 时间基)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn invert(self) -> Self {
        Self::new(self.den, self.num)
    }

    /// Lowest terms, e.g. 90000/3000 → 30/1.
    pub fn reduced(self) -> Self {
        let (mut a, mut b) = (self.num.unsigned_abs(), self.den.unsigned_abs());
        while b != 0 {
            (a, b) = (b, a % b);
        }
        if a <= 1 {
            return self;
        }
        Self::new(self.num / a as i32, self.den / a as i32)
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescales `value` from time base `from` to time base `to`, rounding to nearest.
///
/// Invalid time bases leave the value untouched.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if !from.is_valid() || !to.is_valid() {
        return value;
    }
    let n = value as i128 * from.num as i128 * to.den as i128;
    let d = from.den as i128 * to.num as i128;
    let half = d / 2;
    let q = if n >= 0 { (n + half) / d } else { (n - half) / d };
    q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// 已解码帧: 交错 RGB24, 行间距 `stride` 字节
///
/// The buffer is always owned by the frame. Decoders reuse their own buffers
/// between iterations, so every frame is copied out before it leaves the
/// decode callback.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: Vec<u8>,
    /// Source presentation timestamp in the stream time base, if the source has one.
    pub pts: Option<i64>,
}

impl VideoFrame {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// Wraps a tightly packed RGB24 buffer.
    pub fn new(width: u32, height: u32, data: Vec<u8>, pts: Option<i64>) -> Self {
        let stride = width as usize * Self::BYTES_PER_PIXEL;
        debug_assert_eq!(data.len(), stride * height as usize);
        Self {
            width,
            height,
            stride,
            data,
            pts,
        }
    }

    /// Copies a strided RGB24 plane into a new, tightly packed frame.
    ///
    /// Returns `None` if `src` is too short for the given geometry.
    pub fn copy_from_strided(
        width: u32,
        height: u32,
        src: &[u8],
        src_stride: usize,
        pts: Option<i64>,
    ) -> Option<Self> {
        let row_len = width as usize * Self::BYTES_PER_PIXEL;
        let h = height as usize;
        if src_stride < row_len || h == 0 {
            return None;
        }
        let needed = src_stride * (h - 1) + row_len;
        if src.len() < needed {
            return None;
        }

        let mut data = Vec::with_capacity(row_len * h);
        for y in 0..h {
            let start = y * src_stride;
            data.extend_from_slice(&src[start..start + row_len]);
        }
        Some(Self::new(width, height, data, pts))
    }

    pub fn row_len(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    /// Row `y` without padding, `None` if it lies outside the buffer.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let start = y as usize * self.stride;
        self.data.get(start..start + self.row_len())
    }

    /// Buffer large enough for `width` x `height` at `stride`.
    pub fn is_well_formed(&self) -> bool {
        let h = self.height as usize;
        self.stride >= self.row_len()
            && h > 0
            && self.data.len() >= self.stride * (h - 1) + self.row_len()
    }

    /// Pixel data without row padding, `None` for a malformed frame.
    pub fn packed(&self) -> Option<Cow<'_, [u8]>> {
        if !self.is_well_formed() {
            return None;
        }
        let h = self.height as usize;
        if self.stride == self.row_len() {
            return Some(Cow::Borrowed(&self.data[..self.row_len() * h]));
        }
        let mut out = Vec::with_capacity(self.row_len() * h);
        for y in 0..h {
            let start = y * self.stride;
            out.extend_from_slice(&self.data[start..start + self.row_len()]);
        }
        Some(Cow::Owned(out))
    }

    pub fn to_image(&self) -> Option<image::RgbImage> {
        let packed = self.packed()?;
        image::RgbImage::from_raw(self.width, self.height, packed.into_owned())
    }

    /// 保存截图, 格式由扩展名决定 (jpg/png/...)
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let img = self.to_image().ok_or(SnapshotError::InvalidFrame {
            width: self.width,
            height: self.height,
        })?;
        img.save(path)?;
        Ok(())
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("bytes", &self.data.len())
            .field("pts", &self.pts)
            .finish()
    }
}
