//! CPU warp stage
//!
//! Evaluates the warp fragment program for every output texel, one frame at a
//! time. Uniforms can be uploaded from any thread; a frame in flight keeps the
//! snapshot it started with and the new values apply from the next frame.

use arc_swap::ArcSwap;
use image::{DynamicImage, RgbaImage};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use crate::artifact::CalibrationArtifact;
use crate::capture::Camera;
use crate::shader::{Rgba, ShaderUniformState, TextureSampler, WarpPolicy};

/// An RGBA frame sampled like a GL texture with linear filtering and
/// clamp-to-edge wrapping
pub struct ImageTexture<'a> {
    image: &'a RgbaImage,
}

impl<'a> ImageTexture<'a> {
    pub fn new(image: &'a RgbaImage) -> Self {
        Self { image }
    }
}

impl TextureSampler for ImageTexture<'_> {
    fn sample(&self, u: f32, v: f32) -> Rgba {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return Rgba::TRANSPARENT;
        }
        // Texel centres sit at (i + 0.5) / size
        let x = u * width as f32 - 0.5;
        let y = v * height as f32 - 0.5;
        Rgba::from_u8(bilinear_sample(self.image, x, y))
    }
}

/// Bilinear sample at pixel coordinates (texel centres on integers)
#[inline]
fn bilinear_sample(src: &RgbaImage, x: f32, y: f32) -> [u8; 4] {
    let (width, height) = src.dimensions();
    let x = x.max(0.0).min((width - 1) as f32);
    let y = y.max(0.0).min((height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut result = [0u8; 4];
    for c in 0..4 {
        let value = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    result
}

/// One camera's warp element
pub struct WarpStage {
    camera: Camera,
    uniforms: ArcSwap<ShaderUniformState>,
}

impl WarpStage {
    pub fn new(camera: Camera, state: ShaderUniformState) -> Self {
        Self {
            camera,
            uniforms: ArcSwap::from_pointee(state),
        }
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    /// Replace the uniform block; takes effect from the next frame
    pub fn upload(&self, state: ShaderUniformState) {
        debug!("{} warp: uniforms uploaded", self.camera);
        self.uniforms.store(Arc::new(state));
    }

    /// The uniform block the next frame will use
    pub fn uniforms(&self) -> Arc<ShaderUniformState> {
        self.uniforms.load_full()
    }

    /// Warp one frame into a `width x height` output
    pub fn render(&self, frame: &RgbaImage, width: u32, height: u32) -> RgbaImage {
        let mut out = RgbaImage::new(width, height);
        if width == 0 || height == 0 {
            return out;
        }

        let program = self.uniforms.load().program();
        let texture = ImageTexture::new(frame);
        let (w, h) = (width as f32, height as f32);

        let buf: &mut [u8] = &mut out;
        buf.par_chunks_mut(width as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let v = (y as f32 + 0.5) / h;
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let u = (x as f32 + 0.5) / w;
                    px.copy_from_slice(&program.evaluate(&texture, u, v).to_u8());
                }
            });
        out
    }

    pub fn render_dynamic(&self, frame: &DynamicImage, width: u32, height: u32) -> RgbaImage {
        self.render(&frame.to_rgba8(), width, height)
    }
}

/// Warp stages for both cameras, fed from one calibration artifact
pub struct StereoWarp {
    pub left: WarpStage,
    pub right: WarpStage,
}

impl StereoWarp {
    pub fn from_artifact(artifact: &CalibrationArtifact, policy: WarpPolicy) -> Self {
        let stage = |camera| {
            WarpStage::new(
                camera,
                ShaderUniformState::from_homography(artifact.homography(camera), policy),
            )
        };
        info!(
            "Warp stages configured (clamp_uv={}, {:.6} m/px)",
            policy.clamp_uv, artifact.pixel_to_meter_scale
        );
        Self {
            left: stage(Camera::Left),
            right: stage(Camera::Right),
        }
    }

    pub fn stage(&self, camera: Camera) -> &WarpStage {
        match camera {
            Camera::Left => &self.left,
            Camera::Right => &self.right,
        }
    }

    /// Push a new calibration to both stages, keeping each stage's policy
    pub fn reload(&self, artifact: &CalibrationArtifact) {
        for camera in Camera::BOTH {
            let stage = self.stage(camera);
            let policy = stage.uniforms().policy();
            stage.upload(ShaderUniformState::from_homography(artifact.homography(camera), policy));
        }
        info!("Warp stages reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homography::HomographyMatrix;

    fn pattern(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x * 17 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 7 % 256) as u8, 255])
        })
    }

    fn mirror() -> HomographyMatrix {
        HomographyMatrix::from_rows([[-1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    fn zoom_out() -> HomographyMatrix {
        // Output [0,1] reads texture [-0.5, 1.5]
        HomographyMatrix::from_rows([[2.0, 0.0, -0.5], [0.0, 2.0, -0.5], [0.0, 0.0, 1.0]])
    }

    fn stage(h: &HomographyMatrix, policy: WarpPolicy) -> WarpStage {
        WarpStage::new(Camera::Left, ShaderUniformState::from_homography(h, policy))
    }

    #[test]
    fn test_identity_warp_is_passthrough() {
        let src = pattern(32, 24);
        let out = stage(&HomographyMatrix::identity(), WarpPolicy::default()).render(&src, 32, 24);
        assert_eq!(out, src);
    }

    #[test]
    fn test_mirror_warp() {
        let src = pattern(16, 8);
        let out = stage(&mirror(), WarpPolicy::default()).render(&src, 16, 8);
        for y in 0..8 {
            for x in 0..16 {
                assert_eq!(out.get_pixel(x, y), src.get_pixel(15 - x, y));
            }
        }
    }

    #[test]
    fn test_outside_color_when_not_clamped() {
        let src = RgbaImage::from_pixel(16, 16, image::Rgba([200, 200, 200, 255]));
        let policy = WarpPolicy {
            clamp_uv: false,
            outside_color: Rgba::new(1.0, 0.0, 0.0, 1.0),
        };
        let out = stage(&zoom_out(), policy).render(&src, 16, 16);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(15, 8).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(8, 8).0, [200, 200, 200, 255]);
    }

    #[test]
    fn test_clamp_extends_edge_texels() {
        let mut src = RgbaImage::from_pixel(16, 16, image::Rgba([200, 200, 200, 255]));
        src.put_pixel(0, 0, image::Rgba([10, 20, 30, 255]));
        let out = stage(&zoom_out(), WarpPolicy::default()).render(&src, 16, 16);
        assert_eq!(out.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(out.get_pixel(15, 15).0, [200, 200, 200, 255]);
    }

    #[test]
    fn test_upload_applies_to_next_frame() {
        let src = pattern(16, 8);
        let stage = stage(&HomographyMatrix::identity(), WarpPolicy::default());

        let first = stage.render(&src, 16, 8);
        stage.upload(ShaderUniformState::from_homography(&mirror(), WarpPolicy::default()));
        let second = stage.render(&src, 16, 8);

        assert_eq!(first, src);
        assert_eq!(second.get_pixel(0, 0), src.get_pixel(15, 0));
        assert_eq!(stage.uniforms().uniform("m00"), Some(-1.0));
    }

    #[test]
    fn test_stereo_uses_each_camera_homography() {
        let artifact = CalibrationArtifact {
            left_homography: HomographyMatrix::identity(),
            right_homography: mirror(),
            pixel_to_meter_scale: 0.01,
        };
        let src = pattern(16, 8);
        let warp = StereoWarp::from_artifact(&artifact, WarpPolicy::default());

        assert_eq!(warp.stage(Camera::Left).render(&src, 16, 8), src);
        let right = warp.stage(Camera::Right).render(&src, 16, 8);
        assert_eq!(right.get_pixel(3, 2), src.get_pixel(12, 2));
    }

    #[test]
    fn test_reload_keeps_policy() {
        let artifact = CalibrationArtifact {
            left_homography: HomographyMatrix::identity(),
            right_homography: HomographyMatrix::identity(),
            pixel_to_meter_scale: 0.01,
        };
        let policy = WarpPolicy {
            clamp_uv: false,
            outside_color: Rgba::TRANSPARENT,
        };
        let warp = StereoWarp::from_artifact(&artifact, policy);
        warp.reload(&CalibrationArtifact {
            left_homography: mirror(),
            ..artifact
        });

        let left = warp.left.uniforms();
        assert_eq!(left.uniform("m00"), Some(-1.0));
        assert_eq!(left.policy(), policy);
        assert_eq!(warp.right.uniforms().uniform("m00"), Some(1.0));
    }

    #[test]
    fn test_bilinear_between_texels() {
        let mut src = RgbaImage::from_pixel(2, 1, image::Rgba([0, 0, 0, 255]));
        src.put_pixel(1, 0, image::Rgba([200, 100, 50, 255]));
        let texture = ImageTexture::new(&src);
        // Midway between the two texel centres
        assert_eq!(texture.sample(0.5, 0.5).to_u8(), [100, 50, 25, 255]);
    }

    #[test]
    fn test_empty_output() {
        let out = stage(&HomographyMatrix::identity(), WarpPolicy::default()).render(&pattern(4, 4), 0, 4);
        assert_eq!(out.dimensions(), (0, 4));
    }
}
