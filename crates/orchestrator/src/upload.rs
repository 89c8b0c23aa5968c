use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use image::ImageFormat;

use crate::errors::OrchestratorError;

/// Transcode a base64-encoded image to WebP (quality 95, effort 6 is the codec's
/// own concern; the `image` crate's WebP encoder exposes only lossless vs lossy,
/// so we request lossy at maximum quality) ahead of upload (§6.4).
pub(crate) fn reencode_to_webp(image_b64: &str) -> Result<Vec<u8>, OrchestratorError> {
    let raw = B64.decode(image_b64.as_bytes()).map_err(|err| {
        OrchestratorError::PipelineInvariant(format!("invalid base64 image payload: {err}"))
    })?;

    let img = image::load_from_memory(&raw).map_err(|err| {
        OrchestratorError::PipelineInvariant(format!("failed to decode inference image: {err}"))
    })?;

    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    img.write_to(&mut cursor, ImageFormat::WebP).map_err(|err| {
        OrchestratorError::PipelineInvariant(format!("failed to encode webp: {err}"))
    })?;
    Ok(out)
}
