//! Materials, textures and the per-kind disposal manifest

use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::resources::ResourceId;

/// Shader sampling precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Highp,
    Mediump,
    Lowp,
}

/// Texture sampling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

/// Where a texture's pixels come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextureSource {
    /// Decoded image uploaded once
    Image {
        uri: Option<String>,
        width: u32,
        height: u32,
    },
    /// Streaming frames from a video element
    Video { url: String },
    /// Offscreen render target (reflections)
    RenderTarget { scale: f32 },
}

/// A GPU texture and its sampler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub id: ResourceId,
    pub name: Option<String>,
    pub source: TextureSource,
    pub anisotropy: u8,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub generate_mipmaps: bool,
    pub flip_y: bool,
    pub color_space: ColorSpace,
}

impl Texture {
    pub fn new(source: TextureSource) -> Self {
        Self {
            id: ResourceId::next(),
            name: None,
            source,
            anisotropy: 1,
            min_filter: Filter::LinearMipmapLinear,
            mag_filter: Filter::Linear,
            generate_mipmaps: true,
            flip_y: true,
            color_space: ColorSpace::Srgb,
        }
    }

    /// Texture fed by a video stream: linear filtering, no mipmaps, no flip
    pub fn video(url: impl Into<String>) -> Self {
        Self {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            generate_mipmaps: false,
            flip_y: false,
            ..Self::new(TextureSource::Video { url: url.into() })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blending {
    #[default]
    Normal,
    Additive,
    Multiply,
    Custom {
        src: BlendFactor,
        dst: BlendFactor,
    },
}

/// Metallic-roughness surface, the kind glTF assets decode to
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StandardMaterial {
    pub color: [f32; 4],
    pub metalness: f32,
    pub roughness: f32,
    pub emissive: [f32; 3],
    pub map: Option<Texture>,
    pub normal_map: Option<Texture>,
    pub emissive_map: Option<Texture>,
    pub metalness_roughness_map: Option<Texture>,
    pub occlusion_map: Option<Texture>,
}

/// Unlit surface
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicMaterial {
    pub color: [f32; 4],
    pub map: Option<Texture>,
}

/// Unlit surface sampling a streaming video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMaterial {
    pub texture: Texture,
}

/// Planar mirror rendered through an offscreen target
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectorMaterial {
    pub color: [f32; 3],
    pub clip_bias: f32,
    pub recursion: u32,
    pub target: Texture,
}

/// Value bound to a named shader input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec3(Vec3),
}

impl UniformValue {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Self::Vec3(v) => Some(*v),
            _ => None,
        }
    }
}

/// Named shader inputs, shared between the material and whoever animates it
pub type SharedUniforms = Arc<RwLock<BTreeMap<String, UniformValue>>>;

/// Custom shader program with live uniforms
#[derive(Debug, Clone)]
pub struct ShaderMaterial {
    pub vertex_shader: &'static str,
    pub fragment_shader: &'static str,
    pub uniforms: SharedUniforms,
    pub alpha_test: f32,
}

impl ShaderMaterial {
    /// Read a float uniform
    pub fn float(&self, name: &str) -> Option<f32> {
        self.uniforms.read().get(name).and_then(UniformValue::as_float)
    }

    /// Read a vector uniform
    pub fn vec3(&self, name: &str) -> Option<Vec3> {
        self.uniforms.read().get(name).and_then(UniformValue::as_vec3)
    }
}

#[derive(Debug, Clone)]
pub enum MaterialKind {
    Standard(StandardMaterial),
    Basic(BasicMaterial),
    Video(VideoMaterial),
    Reflector(ReflectorMaterial),
    Shader(ShaderMaterial),
}

/// Surface description attached to a mesh
#[derive(Debug, Clone)]
pub struct Material {
    pub id: ResourceId,
    pub name: Option<String>,
    /// `None` lets the renderer pick its default
    pub precision: Option<Precision>,
    pub side: Side,
    pub transparent: bool,
    pub opacity: f32,
    pub visible: bool,
    pub tone_mapped: bool,
    pub blending: Blending,
    pub depth_write: bool,
    pub depth_test: bool,
    pub kind: MaterialKind,
}

impl Material {
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            id: ResourceId::next(),
            name: None,
            precision: None,
            side: Side::Front,
            transparent: false,
            opacity: 1.0,
            visible: true,
            tone_mapped: true,
            blending: Blending::Normal,
            depth_write: true,
            depth_test: true,
            kind,
        }
    }

    pub fn standard(standard: StandardMaterial) -> Self {
        Self::new(MaterialKind::Standard(standard))
    }

    pub fn basic(color: [f32; 4]) -> Self {
        Self::new(MaterialKind::Basic(BasicMaterial { color, map: None }))
    }

    /// Invisible material, used for hit-test-only geometry
    pub fn invisible() -> Self {
        Self {
            visible: false,
            ..Self::basic([1.0, 1.0, 1.0, 1.0])
        }
    }

    /// Copy of this material with a fresh GPU id; textures stay shared
    pub fn duplicate(&self) -> Self {
        Self {
            id: ResourceId::next(),
            ..self.clone()
        }
    }

    /// The base color texture, if this kind has one
    pub fn primary_map(&self) -> Option<&Texture> {
        match &self.kind {
            MaterialKind::Standard(m) => m.map.as_ref(),
            MaterialKind::Basic(m) => m.map.as_ref(),
            MaterialKind::Video(m) => Some(&m.texture),
            MaterialKind::Reflector(_) | MaterialKind::Shader(_) => None,
        }
    }

    pub fn primary_map_mut(&mut self) -> Option<&mut Texture> {
        match &mut self.kind {
            MaterialKind::Standard(m) => m.map.as_mut(),
            MaterialKind::Basic(m) => m.map.as_mut(),
            MaterialKind::Video(m) => Some(&mut m.texture),
            MaterialKind::Reflector(_) | MaterialKind::Shader(_) => None,
        }
    }

    /// Every texture this material owns on the GPU
    pub fn texture_slots(&self) -> Vec<&Texture> {
        match &self.kind {
            MaterialKind::Standard(m) => [
                &m.map,
                &m.normal_map,
                &m.emissive_map,
                &m.metalness_roughness_map,
                &m.occlusion_map,
            ]
            .into_iter()
            .flatten()
            .collect(),
            MaterialKind::Basic(m) => m.map.iter().collect(),
            MaterialKind::Video(m) => vec![&m.texture],
            MaterialKind::Reflector(m) => vec![&m.target],
            MaterialKind::Shader(_) => Vec::new(),
        }
    }

    pub fn as_shader(&self) -> Option<&ShaderMaterial> {
        match &self.kind {
            MaterialKind::Shader(s) => Some(s),
            _ => None,
        }
    }
}

/// Material binding of a mesh: one material or one per geometry group
#[derive(Debug, Clone)]
pub enum MaterialSlot {
    Single(Arc<Material>),
    Multi(Vec<Arc<Material>>),
}

impl MaterialSlot {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Material>> {
        let slice: &[Arc<Material>] = match self {
            Self::Single(m) => std::slice::from_ref(m),
            Self::Multi(ms) => ms,
        };
        slice.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Arc<Material>> {
        let slice: &mut [Arc<Material>] = match self {
            Self::Single(m) => std::slice::from_mut(m),
            Self::Multi(ms) => ms,
        };
        slice.iter_mut()
    }

    /// Rebuild the slot by mapping every material, keeping its shape
    pub fn map(&self, mut f: impl FnMut(&Arc<Material>) -> Arc<Material>) -> Self {
        match self {
            Self::Single(m) => Self::Single(f(m)),
            Self::Multi(ms) => Self::Multi(ms.iter().map(f).collect()),
        }
    }

    /// Same shape and the very same material allocations
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Single(a), Self::Single(b)) => Arc::ptr_eq(a, b),
            (Self::Multi(a), Self::Multi(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            _ => false,
        }
    }

    pub fn first(&self) -> Option<&Arc<Material>> {
        self.iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Texture {
        Texture::new(TextureSource::Image {
            uri: None,
            width: 4,
            height: 4,
        })
    }

    #[test]
    fn test_standard_texture_manifest() {
        let material = Material::standard(StandardMaterial {
            map: Some(image()),
            occlusion_map: Some(image()),
            ..Default::default()
        });
        assert_eq!(material.texture_slots().len(), 2);
        assert!(material.primary_map().is_some());
    }

    #[test]
    fn test_video_and_reflector_manifest() {
        let video = Material::new(MaterialKind::Video(VideoMaterial {
            texture: Texture::video("/video/clip.mp4"),
        }));
        assert_eq!(video.texture_slots().len(), 1);
        assert!(!video.primary_map().unwrap().generate_mipmaps);

        let reflector = Material::new(MaterialKind::Reflector(ReflectorMaterial {
            color: [0.5, 0.5, 0.5],
            clip_bias: 0.003,
            recursion: 0,
            target: Texture::new(TextureSource::RenderTarget { scale: 0.5 }),
        }));
        assert_eq!(reflector.texture_slots().len(), 1);
        assert!(reflector.primary_map().is_none());
    }

    #[test]
    fn test_duplicate_gets_fresh_id_and_shares_textures() {
        let material = Material::standard(StandardMaterial {
            map: Some(image()),
            ..Default::default()
        });
        let copy = material.duplicate();
        assert_ne!(copy.id, material.id);
        assert_eq!(copy.primary_map().unwrap().id, material.primary_map().unwrap().id);
    }

    #[test]
    fn test_slot_ptr_eq() {
        let a = Arc::new(Material::basic([1.0; 4]));
        let slot = MaterialSlot::Single(a.clone());
        assert!(slot.ptr_eq(&MaterialSlot::Single(a.clone())));

        let cloned = slot.map(|m| Arc::new(m.duplicate()));
        assert!(!slot.ptr_eq(&cloned));
        assert!(!slot.ptr_eq(&MaterialSlot::Multi(vec![a])));
    }
}
