//! # 图片编解码
//!
//! ## 设计思路
//!
//! 比对引擎只处理解码后的 `RgbaImage`。本模块负责把上传的原始字节（或 Base64 文本）
//! 安全地解码为 RGBA，并把结果图编码为 PNG / JPEG 返回给调用方。
//!
//! ## 实现思路
//!
//! 解码前依次执行：
//! 1. 上传体积检查（Base64 在解码前按长度估算上界）。
//! 2. 文件签名检查（`infer`），拒绝非图片内容。
//! 3. 只读图片头取得宽高，校验像素数与预计内存，再做完整解码。
//!
//! 完整解码后再校验一次实际尺寸，防止图片头与内容不一致。

use std::io::Cursor;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};

use crate::comparer::CompareError;

/// 解码阶段的资源限制。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_upload_bytes: u64,
    pub max_decoded_pixels: u64,
    pub max_decoded_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
        }
    }
}

impl DecodeLimits {
    /// 校验上传体积（字节数或 Base64 估算上界）。
    pub fn check_upload(&self, len: u64) -> Result<(), CompareError> {
        if len > self.max_upload_bytes {
            return Err(CompareError::ResourceLimit(format!(
                "上传图片过大：{:.2} MB（限制：{:.2} MB）",
                mebibytes(len),
                mebibytes(self.max_upload_bytes)
            )));
        }
        Ok(())
    }

    /// 校验 RGBA 解码后的像素数与内存占用。
    pub fn check(&self, width: u32, height: u32) -> Result<(), CompareError> {
        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_decoded_pixels {
            return Err(CompareError::ResourceLimit(format!(
                "图片像素过大：{}x{} = {} 像素（限制：{} 像素）",
                width, height, pixels, self.max_decoded_pixels
            )));
        }

        let bytes = pixels.saturating_mul(4);
        if bytes > self.max_decoded_bytes {
            return Err(CompareError::ResourceLimit(format!(
                "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
                mebibytes(bytes),
                mebibytes(self.max_decoded_bytes)
            )));
        }

        Ok(())
    }
}

fn mebibytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// 结果图输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Png,
    Jpeg,
}

impl ResultFormat {
    pub fn from_extension(extension: &str) -> Result<Self, CompareError> {
        match extension.trim().to_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(CompareError::InvalidFormat(format!(
                "不支持的输出格式：{}（可选：png / jpg）",
                other
            ))),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CompareError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| CompareError::InvalidFormat(format!("输出路径缺少扩展名：{}", path.display())))?;
        Self::from_extension(extension)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// 把上传的原始字节解码为 RGBA。
pub fn decode_upload(bytes: &[u8], limits: &DecodeLimits) -> Result<RgbaImage, CompareError> {
    limits.check_upload(bytes.len() as u64)?;
    ensure_image_signature(bytes)?;

    // 先按图片头校验，避免为超限图片分配解码缓冲
    let (header_width, header_height) = inspect_dimensions(bytes)?;
    limits.check(header_width, header_height)?;

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| CompareError::Decode(format!("图片解码失败：{}", e)))?;

    let (width, height) = decoded.dimensions();
    if (width, height) != (header_width, header_height) {
        limits.check(width, height)?;
    }

    log::info!("✅ 图片解码成功 - 尺寸: {}x{} 字节: {}", width, height, bytes.len());

    Ok(decoded.to_rgba8())
}

/// 解码 Base64 文本（可带 `data:image/...;base64,` 前缀）形式的上传图片。
pub fn decode_base64_upload(data: &str, limits: &DecodeLimits) -> Result<RgbaImage, CompareError> {
    let payload = strip_data_url(data.trim())?;

    // 4 个字符解出至多 3 个字节
    let upper_bound = (payload.len() as u64).div_ceil(4) * 3;
    limits.check_upload(upper_bound)?;

    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| CompareError::Decode(format!("Base64 解码失败：{}", e)))?;

    decode_upload(&bytes, limits)
}

/// 把结果图编码为指定格式。JPEG 不支持透明通道，编码前转换为 RGB。
pub fn encode_result(image: &RgbaImage, format: ResultFormat) -> Result<Vec<u8>, CompareError> {
    let mut cursor = Cursor::new(Vec::new());

    let written = match format {
        ResultFormat::Png => image.write_to(&mut cursor, ImageFormat::Png),
        ResultFormat::Jpeg => DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .write_to(&mut cursor, ImageFormat::Jpeg),
    };
    written.map_err(|e| CompareError::Encode(format!("{} 编码失败：{}", format.mime_type(), e)))?;

    Ok(cursor.into_inner())
}

fn inspect_dimensions(bytes: &[u8]) -> Result<(u32, u32), CompareError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CompareError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    reader
        .into_dimensions()
        .map_err(|e| CompareError::InvalidFormat(format!("无法读取图片尺寸：{}", e)))
}

fn ensure_image_signature(bytes: &[u8]) -> Result<(), CompareError> {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(()),
        Some(kind) => Err(CompareError::InvalidFormat(format!(
            "上传内容不是图片：{}",
            kind.mime_type()
        ))),
        None if bytes.is_empty() => Err(CompareError::InvalidFormat("图片内容为空".to_string())),
        None => Err(CompareError::InvalidFormat("无法识别图片类型".to_string())),
    }
}

fn strip_data_url(data: &str) -> Result<&str, CompareError> {
    if !data.starts_with("data:image/") {
        return Ok(data);
    }

    data.split_once(";base64,")
        .map(|(_, payload)| payload)
        .ok_or_else(|| CompareError::InvalidFormat("data URL 缺少 base64 标记".to_string()))
}
