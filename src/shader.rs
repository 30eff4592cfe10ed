//! Perspective warp shader contract
//!
//! The fragment program applied by the media runtime to every camera frame,
//! together with a CPU evaluation of exactly the same arithmetic. For each
//! output texel `(u, v)` the shader computes `uvw = M * (u, v, 1)`, divides by
//! a floored `w`, and then either clamps the result into the texture or emits
//! the configured outside colour.
//!
//! Degenerate matrices are never rejected here. A near-zero `w` is replaced by
//! [`W_EPSILON`] so frame production never halts, at the cost of a defined but
//! possibly visually wrong result.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::homography::HomographyMatrix;

/// Floor applied to the homogeneous coordinate before the perspective divide.
///
/// Negative near-zero values are floored to this positive constant too.
pub const W_EPSILON: f32 = 1e-8;

/// Uniform slot table: `(uniform name, matrix row, matrix column)`.
///
/// The shader builds `mat3(m00, m01, m02, m10, m11, m12, m20, m21, m22)`, and
/// GLSL fills matrices column by column, so uniform `mAB` lands in column `A`,
/// row `B`:
///
/// ```text
/// row0 = [m00, m10, m20]
/// row1 = [m01, m11, m21]
/// row2 = [m02, m12, m22]
/// ```
pub const UNIFORM_LAYOUT: [(&str, usize, usize); 9] = [
    ("m00", 0, 0),
    ("m01", 1, 0),
    ("m02", 2, 0),
    ("m10", 0, 1),
    ("m11", 1, 1),
    ("m12", 2, 1),
    ("m20", 0, 2),
    ("m21", 1, 2),
    ("m22", 2, 2),
];

/// GLSL ES 1.00 vertex program (pass-through)
pub const VERTEX_SHADER: &str = r#"#version 100
attribute vec4 a_position;
attribute vec2 a_texcoord;
varying   vec2 v_texcoord;
void main () {
  gl_Position = a_position;
  v_texcoord  = a_texcoord;
}
"#;

/// GLSL ES 1.00 fragment program implementing the warp
pub const FRAGMENT_SHADER: &str = r#"#version 100
#ifdef GL_ES
precision highp float;
#endif
varying vec2 v_texcoord;
uniform sampler2D tex;
uniform float m00;
uniform float m01;
uniform float m02;
uniform float m10;
uniform float m11;
uniform float m12;
uniform float m20;
uniform float m21;
uniform float m22;
uniform bool clamp_uv;
uniform vec4 outside_color;

void main () {
  mat3 M = mat3(m00, m01, m02, m10, m11, m12, m20, m21, m22);
  vec3 uvw = M * vec3(v_texcoord, 1.0);
  float w = (abs(uvw.z) > 1e-8) ? uvw.z : 1e-8;
  vec2 uv = uvw.xy / w;
  if (clamp_uv) {
    gl_FragColor = texture2D(tex, clamp(uv, 0.0, 1.0));
  } else {
    bool oob = any(lessThan(uv, vec2(0.0))) || any(greaterThan(uv, vec2(1.0)));
    gl_FragColor = oob ? outside_color : texture2D(tex, uv);
  }
}
"#;

/// RGBA colour with components in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba(pub [f32; 4]);

impl Rgba {
    pub const BLACK: Rgba = Rgba([0.0, 0.0, 0.0, 1.0]);
    pub const TRANSPARENT: Rgba = Rgba([0.0, 0.0, 0.0, 0.0]);

    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self([r, g, b, a])
    }

    /// Quantize to 8-bit channels
    pub fn to_u8(&self) -> [u8; 4] {
        self.0.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8)
    }

    pub fn from_u8(px: [u8; 4]) -> Self {
        Self(px.map(|c| c as f32 / 255.0))
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Rgba::BLACK
    }
}

impl FromStr for Rgba {
    type Err = String;

    /// Parse `"r,g,b,a"` with components in [0, 1]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected 4 comma-separated components, got {}", parts.len()));
        }
        let mut c = [0.0f32; 4];
        for (slot, part) in c.iter_mut().zip(&parts) {
            let v: f32 = part
                .parse()
                .map_err(|_| format!("invalid colour component {:?}", part))?;
            if !(0.0..=1.0).contains(&v) {
                return Err(format!("colour component {} outside [0, 1]", v));
            }
            *slot = v;
        }
        Ok(Rgba(c))
    }
}

/// Out-of-bounds handling for a warp stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpPolicy {
    /// Clamp sample coordinates into the texture instead of emitting `outside_color`
    pub clamp_uv: bool,
    /// Colour for out-of-range samples (only used when `clamp_uv` is false)
    pub outside_color: Rgba,
}

impl Default for WarpPolicy {
    fn default() -> Self {
        Self {
            clamp_uv: true,
            outside_color: Rgba::BLACK,
        }
    }
}

/// Anything the shader can sample at normalized texture coordinates
pub trait TextureSampler {
    fn sample(&self, u: f32, v: f32) -> Rgba;
}

/// Where an output texel takes its colour from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TexelSource {
    /// Sample the texture at these (in-range) coordinates
    Texture([f32; 2]),
    /// Emit the outside colour
    Outside(Rgba),
}

/// Per-camera uniform block, the GPU-side mirror of one homography
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderUniformState {
    /// Uniform values in `UNIFORM_LAYOUT` order (m00, m01, ..., m22)
    pub coefficients: [f32; 9],
    pub clamp_uv: bool,
    pub outside_color: Rgba,
}

impl Default for ShaderUniformState {
    fn default() -> Self {
        Self::from_homography(&HomographyMatrix::identity(), WarpPolicy::default())
    }
}

impl ShaderUniformState {
    /// Pack a homography so the shader reconstructs exactly `h`
    pub fn from_homography(h: &HomographyMatrix, policy: WarpPolicy) -> Self {
        let mut coefficients = [0.0f32; 9];
        for (slot, &(_, row, col)) in coefficients.iter_mut().zip(UNIFORM_LAYOUT.iter()) {
            *slot = h.get(row, col) as f32;
        }
        Self {
            coefficients,
            clamp_uv: policy.clamp_uv,
            outside_color: policy.outside_color,
        }
    }

    pub fn policy(&self) -> WarpPolicy {
        WarpPolicy {
            clamp_uv: self.clamp_uv,
            outside_color: self.outside_color,
        }
    }

    /// Value of a named uniform (`"m00"` .. `"m22"`)
    pub fn uniform(&self, name: &str) -> Option<f32> {
        UNIFORM_LAYOUT
            .iter()
            .position(|&(n, _, _)| n == name)
            .map(|i| self.coefficients[i])
    }

    /// The matrix as the shader reconstructs it
    pub fn matrix(&self) -> Matrix3<f32> {
        let mut m = Matrix3::zeros();
        for (value, &(_, row, col)) in self.coefficients.iter().zip(UNIFORM_LAYOUT.iter()) {
            m[(row, col)] = *value;
        }
        m
    }

    /// Matrix and policy for one draw
    pub fn program(&self) -> WarpProgram {
        WarpProgram {
            matrix: self.matrix(),
            policy: self.policy(),
        }
    }

    /// Sample coordinate for output texel `(u, v)`
    pub fn transform(&self, u: f32, v: f32) -> [f32; 2] {
        self.program().transform(u, v)
    }

    /// Decide where output texel `(u, v)` gets its colour
    pub fn lookup(&self, u: f32, v: f32) -> TexelSource {
        self.program().lookup(u, v)
    }

    /// Full fragment evaluation for output texel `(u, v)`
    pub fn evaluate<S: TextureSampler + ?Sized>(&self, texture: &S, u: f32, v: f32) -> Rgba {
        self.program().evaluate(texture, u, v)
    }

    /// Render as the uniform structure accepted by the runtime's shader element
    pub fn to_uniform_structure(&self) -> String {
        let [r, g, b, a] = self.outside_color.0;
        let fields: Vec<String> = std::iter::once("uniforms".to_string())
            .chain(
                self.coefficients
                    .iter()
                    .zip(UNIFORM_LAYOUT.iter())
                    .map(|(value, &(name, _, _))| format!("{}=(float){:.9}", name, value)),
            )
            .chain([
                format!("clamp_uv=(boolean){}", self.clamp_uv),
                format!("outside_color=(float)<{:.9}, {:.9}, {:.9}, {:.9}>", r, g, b, a),
            ])
            .collect();
        fields.join(", ")
    }
}

/// A uniform block resolved for evaluation: the reconstructed matrix plus policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpProgram {
    pub matrix: Matrix3<f32>,
    pub policy: WarpPolicy,
}

impl WarpProgram {
    #[inline]
    pub fn transform(&self, u: f32, v: f32) -> [f32; 2] {
        let uvw = self.matrix * Vector3::new(u, v, 1.0);
        let w = floor_w(uvw.z);
        [uvw.x / w, uvw.y / w]
    }

    #[inline]
    pub fn lookup(&self, u: f32, v: f32) -> TexelSource {
        let [su, sv] = self.transform(u, v);
        if self.policy.clamp_uv {
            TexelSource::Texture([su.clamp(0.0, 1.0), sv.clamp(0.0, 1.0)])
        } else if !(0.0..=1.0).contains(&su) || !(0.0..=1.0).contains(&sv) {
            TexelSource::Outside(self.policy.outside_color)
        } else {
            TexelSource::Texture([su, sv])
        }
    }

    #[inline]
    pub fn evaluate<S: TextureSampler + ?Sized>(&self, texture: &S, u: f32, v: f32) -> Rgba {
        match self.lookup(u, v) {
            TexelSource::Texture([su, sv]) => texture.sample(su, sv),
            TexelSource::Outside(color) => color,
        }
    }
}

/// Epsilon floor for the homogeneous coordinate
#[inline]
pub fn floor_w(z: f32) -> f32 {
    if z.abs() > W_EPSILON {
        z
    } else {
        W_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sequential() -> HomographyMatrix {
        HomographyMatrix::from_rows([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]])
    }

    #[test]
    fn test_layout_reads_column_major() {
        let state = ShaderUniformState {
            coefficients: [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            ..Default::default()
        };
        let m = state.matrix();
        // row0 = [m00, m10, m20], row1 = [m01, m11, m21], row2 = [m02, m12, m22]
        assert_eq!([m[(0, 0)], m[(0, 1)], m[(0, 2)]], [0.0, 3.0, 6.0]);
        assert_eq!([m[(1, 0)], m[(1, 1)], m[(1, 2)]], [1.0, 4.0, 7.0]);
        assert_eq!([m[(2, 0)], m[(2, 1)], m[(2, 2)]], [2.0, 5.0, 8.0]);
    }

    #[test]
    fn test_packing_transposes_host_matrix() {
        let state = ShaderUniformState::from_homography(&sequential(), WarpPolicy::default());
        assert_eq!(state.uniform("m00"), Some(1.0));
        assert_eq!(state.uniform("m10"), Some(2.0));
        assert_eq!(state.uniform("m20"), Some(3.0));
        assert_eq!(state.uniform("m01"), Some(4.0));
        assert_eq!(state.uniform("m02"), Some(7.0));
        assert_eq!(state.uniform("m22"), Some(9.0));
        assert_eq!(state.uniform("m33"), None);

        let m = state.matrix();
        let rows = sequential().to_rows();
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                assert_eq!(m[(r, c)], *v as f32);
            }
        }
    }

    #[test]
    fn test_layout_covers_every_slot_once() {
        let mut seen = [[false; 3]; 3];
        for &(name, row, col) in UNIFORM_LAYOUT.iter() {
            assert!(!seen[row][col], "slot ({}, {}) assigned twice", row, col);
            seen[row][col] = true;
            assert!(FRAGMENT_SHADER.contains(&format!("uniform float {};", name)));
        }
        assert!(seen.iter().flatten().all(|&s| s));
    }

    #[test]
    fn test_transform_matches_matrix_product() {
        let h = HomographyMatrix::from_rows([[0.9, 0.05, 0.02], [-0.03, 1.1, 0.01], [0.1, 0.2, 1.0]]);
        let state = ShaderUniformState::from_homography(&h, WarpPolicy::default());
        let m = state.matrix();

        let (u, v) = (0.25f32, 0.75f32);
        let p = m * Vector3::new(u, v, 1.0);
        let [su, sv] = state.transform(u, v);
        assert_relative_eq!(su, p.x / p.z, epsilon = 1e-6);
        assert_relative_eq!(sv, p.y / p.z, epsilon = 1e-6);
    }

    #[test]
    fn test_epsilon_floor_boundary() {
        assert_eq!(floor_w(0.0), W_EPSILON);
        assert_eq!(floor_w(1e-9), W_EPSILON);
        assert_eq!(floor_w(-1e-9), W_EPSILON);
        assert_eq!(floor_w(1e-8), W_EPSILON);
        assert_eq!(floor_w(-0.5), -0.5);
        assert_eq!(floor_w(2.0), 2.0);
    }

    #[test]
    fn test_zero_w_row_divides_by_epsilon() {
        // Bottom row all zero: every texel hits the floor
        let h = HomographyMatrix::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]);
        let state = ShaderUniformState::from_homography(&h, WarpPolicy::default());
        let [su, sv] = state.transform(0.5, 0.25);
        assert_relative_eq!(su, 0.5 / W_EPSILON, max_relative = 1e-6);
        assert_relative_eq!(sv, 0.25 / W_EPSILON, max_relative = 1e-6);
    }

    /// Red encodes u, green encodes v
    struct Gradient;

    impl TextureSampler for Gradient {
        fn sample(&self, u: f32, v: f32) -> Rgba {
            Rgba::new(u, v, 0.0, 1.0)
        }
    }

    /// Translation in texture space: sample = (u + 1, v)
    fn shifted(policy: WarpPolicy) -> ShaderUniformState {
        let h = HomographyMatrix::from_rows([[1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        ShaderUniformState::from_homography(&h, policy)
    }

    #[test]
    fn test_clamp_samples_edge() {
        let state = shifted(WarpPolicy {
            clamp_uv: true,
            outside_color: Rgba::new(1.0, 0.0, 1.0, 1.0),
        });
        assert_eq!(state.lookup(0.5, 0.5), TexelSource::Texture([1.0, 0.5]));
        assert_eq!(state.evaluate(&Gradient, 0.5, 0.5), Rgba::new(1.0, 0.5, 0.0, 1.0));
    }

    #[test]
    fn test_outside_color_when_not_clamped() {
        let magenta = Rgba::new(1.0, 0.0, 1.0, 1.0);
        let state = shifted(WarpPolicy {
            clamp_uv: false,
            outside_color: magenta,
        });
        assert_eq!(state.lookup(0.5, 0.5), TexelSource::Outside(magenta));
        assert_eq!(state.evaluate(&Gradient, 0.5, 0.5), magenta);
        // Exactly on the edge is still in range
        assert_eq!(state.lookup(0.0, 0.5), TexelSource::Texture([1.0, 0.5]));
    }

    #[test]
    fn test_negative_coordinates_are_outside() {
        let h = HomographyMatrix::from_rows([[1.0, 0.0, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        let state = ShaderUniformState::from_homography(
            &h,
            WarpPolicy {
                clamp_uv: false,
                outside_color: Rgba::TRANSPARENT,
            },
        );
        assert_eq!(state.lookup(0.25, 0.5), TexelSource::Outside(Rgba::TRANSPARENT));
        assert_eq!(state.lookup(0.75, 0.5), TexelSource::Texture([0.25, 0.5]));
    }

    #[test]
    fn test_uniform_structure_format() {
        let state = ShaderUniformState::default();
        let s = state.to_uniform_structure();
        assert!(s.starts_with("uniforms, m00=(float)1.000000000, m01=(float)0.000000000"));
        assert!(s.contains("m22=(float)1.000000000"));
        assert!(s.contains("clamp_uv=(boolean)true"));
        assert!(s.ends_with("outside_color=(float)<0.000000000, 0.000000000, 0.000000000, 1.000000000>"));
        assert_eq!(s.matches("=(float)").count(), 10);
        assert!(!s.contains(", ,"));
    }

    #[test]
    fn test_rgba_parse() {
        assert_eq!("0, 0.5, 1, 1".parse::<Rgba>(), Ok(Rgba::new(0.0, 0.5, 1.0, 1.0)));
        assert!("0,0,0".parse::<Rgba>().is_err());
        assert!("0,0,2,1".parse::<Rgba>().is_err());
        assert!("a,0,0,1".parse::<Rgba>().is_err());
        assert_eq!(Rgba::new(1.0, 0.0, 0.5, 1.0).to_u8(), [255, 0, 128, 255]);
    }
}
