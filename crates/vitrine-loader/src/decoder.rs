//! glTF decoding into the Vitrine scene model
//!
//! Decoding happens in two steps so external buffers can be fetched through
//! whatever source produced the document: [`GltfDecoder::parse`] validates the
//! JSON (or GLB container) and lists the buffers it references, then
//! [`GltfDecoder::decode`] builds the scene graph once their bytes are known.

use glam::{Quat, Vec3};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use vitrine_core::geometry::{BufferUsage, IndexBuffer, NORMAL, POSITION, UV};
use vitrine_core::material::{ColorSpace, Filter, Side, StandardMaterial, TextureSource};
use vitrine_core::model::{AnimationClip, AssetMetadata, CameraDef, Projection};
use vitrine_core::{
    BufferAttribute, Geometry, LoadedModel, Material, MaterialSlot, MeshData, Node, NodeId,
    SceneGraph, Texture, Transform,
};

use crate::error::FetchError;

/// Draco decoder location the viewer has always pointed at
pub const DEFAULT_DECODER_PATH: &str = "https://www.gstatic.com/draco/versioned/decoders/1.5.6/";

/// Mesh compression extensions that need the external decoder
const COMPRESSION_EXTENSIONS: &[&str] = &["KHR_draco_mesh_compression", "EXT_meshopt_compression"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Location of the mesh decompression backend
    pub decoder_path: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            decoder_path: DEFAULT_DECODER_PATH.to_string(),
        }
    }
}

/// Compute SHA256 hash of data, hex encoded
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// A validated document waiting for its external buffers
pub struct ParsedAsset {
    gltf: gltf::Gltf,
    byte_size: usize,
    sha256: String,
}

impl ParsedAsset {
    /// `(buffer index, uri)` of every buffer stored outside the document
    pub fn external_buffers(&self) -> Vec<(usize, String)> {
        self.gltf
            .document
            .buffers()
            .filter_map(|buffer| match buffer.source() {
                gltf::buffer::Source::Uri(uri) if !uri.starts_with("data:") => {
                    Some((buffer.index(), uri.to_string()))
                }
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GltfDecoder {
    config: DecoderConfig,
}

impl GltfDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Validate glTF JSON or GLB bytes
    pub fn parse(&self, bytes: &[u8]) -> Result<ParsedAsset, FetchError> {
        let gltf = gltf::Gltf::from_slice(bytes)?;

        if let Some(ext) = gltf
            .document
            .extensions_required()
            .find(|ext| COMPRESSION_EXTENSIONS.contains(ext))
        {
            return Err(FetchError::Decode(format!(
                "{} requires the mesh decoder at {}, which this build cannot run",
                ext, self.config.decoder_path
            )));
        }

        Ok(ParsedAsset {
            gltf,
            byte_size: bytes.len(),
            sha256: sha256_hex(bytes),
        })
    }

    /// Build the model. `external` holds the bytes of every buffer listed by
    /// [`ParsedAsset::external_buffers`], keyed by buffer index.
    pub fn decode(
        &self,
        parsed: ParsedAsset,
        mut external: HashMap<usize, Vec<u8>>,
    ) -> Result<LoadedModel, FetchError> {
        let needs_external = !parsed.external_buffers().is_empty();
        let ParsedAsset {
            gltf,
            byte_size,
            sha256,
        } = parsed;
        let gltf::Gltf { document, blob } = gltf;

        let buffers = if !needs_external {
            gltf::import_buffers(&document, None, blob)?
        } else {
            let mut blob = blob;
            let mut buffers = Vec::new();
            for buffer in document.buffers() {
                let data = match buffer.source() {
                    gltf::buffer::Source::Bin => blob.take().ok_or_else(|| {
                        FetchError::Decode("GLB binary chunk missing".to_string())
                    })?,
                    gltf::buffer::Source::Uri(uri) if uri.starts_with("data:") => {
                        return Err(FetchError::Decode(
                            "mixing data URI and external buffers is not supported".to_string(),
                        ));
                    }
                    gltf::buffer::Source::Uri(uri) => {
                        external.remove(&buffer.index()).ok_or_else(|| {
                            FetchError::Decode(format!("external buffer {} was not provided", uri))
                        })?
                    }
                };
                if data.len() < buffer.length() {
                    return Err(FetchError::Decode(format!(
                        "buffer {} holds {} bytes, expected {}",
                        buffer.index(),
                        data.len(),
                        buffer.length()
                    )));
                }
                buffers.push(gltf::buffer::Data(data));
            }
            buffers
        };

        let mut builder = GraphBuilder {
            buffers: &buffers,
            graph: SceneGraph::new(),
            geometries: HashMap::new(),
            materials: HashMap::new(),
            textures: HashMap::new(),
        };

        if let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) {
            let root = builder
                .graph
                .add_root(Node::new(scene.name().unwrap_or("Scene")));
            for node in scene.nodes() {
                builder.add_node(root, &node)?;
            }
        }

        let animations = document
            .animations()
            .map(|animation| animation_clip(&animation, &buffers))
            .collect();

        let cameras = document.cameras().map(|camera| camera_def(&camera)).collect();

        let asset = &document.as_json().asset;
        let metadata = AssetMetadata {
            generator: asset.generator.clone(),
            version: asset.version.clone(),
            byte_size,
            sha256: Some(sha256),
        };

        debug!(
            nodes = builder.graph.len(),
            geometries = builder.geometries.len(),
            materials = builder.materials.len(),
            textures = builder.textures.len(),
            "Decoded glTF asset"
        );

        Ok(LoadedModel {
            scene: builder.graph,
            animations,
            cameras,
            metadata,
        })
    }

    /// Parse and decode a document that carries all of its buffers
    pub fn decode_slice(&self, bytes: &[u8]) -> Result<LoadedModel, FetchError> {
        let parsed = self.parse(bytes)?;
        self.decode(parsed, HashMap::new())
    }
}

/// Converts glTF nodes, sharing geometry per primitive and material per index
struct GraphBuilder<'a> {
    buffers: &'a [gltf::buffer::Data],
    graph: SceneGraph,
    geometries: HashMap<(usize, usize), Arc<Geometry>>,
    materials: HashMap<Option<usize>, Arc<Material>>,
    textures: HashMap<usize, Texture>,
}

impl GraphBuilder<'_> {
    fn add_node(&mut self, parent: NodeId, node: &gltf::Node) -> Result<(), FetchError> {
        let (t, r, s) = node.transform().decomposed();
        let transform = Transform::from_trs(Vec3::from(t), Quat::from_array(r), Vec3::from(s));
        let name = node.name().unwrap_or_default().to_string();

        let mut primitives = Vec::new();
        if let Some(mesh) = node.mesh() {
            for primitive in mesh.primitives() {
                primitives.push(self.primitive(&mesh, &primitive)?);
            }
        }

        // A single primitive renders on the node itself; several become
        // child meshes under a group node
        let mut out = Node::new(name.clone()).with_transform(transform);
        if primitives.len() == 1 {
            out.mesh = primitives.pop();
        }
        let id = self.graph.add_child(parent, out);
        for (i, data) in primitives.into_iter().enumerate() {
            let child = Node::new(format!("{}_{}", name, i)).with_mesh(data);
            self.graph.add_child(id, child);
        }

        for child in node.children() {
            self.add_node(id, &child)?;
        }
        Ok(())
    }

    fn primitive(
        &mut self,
        mesh: &gltf::Mesh,
        primitive: &gltf::Primitive,
    ) -> Result<MeshData, FetchError> {
        let key = (mesh.index(), primitive.index());
        let geometry = match self.geometries.get(&key) {
            Some(geometry) => geometry.clone(),
            None => {
                let geometry = Arc::new(self.geometry(mesh, primitive)?);
                self.geometries.insert(key, geometry.clone());
                geometry
            }
        };
        let material = self.material(&primitive.material());
        Ok(MeshData {
            geometry,
            material: MaterialSlot::Single(material),
        })
    }

    fn geometry(
        &self,
        mesh: &gltf::Mesh,
        primitive: &gltf::Primitive,
    ) -> Result<Geometry, FetchError> {
        let buffers = self.buffers;
        let reader =
            primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let positions: Vec<f32> = reader
            .read_positions()
            .ok_or_else(|| {
                FetchError::Decode(format!(
                    "mesh {} primitive {} has no positions",
                    mesh.name().unwrap_or("<unnamed>"),
                    primitive.index()
                ))
            })?
            .flatten()
            .collect();

        let mut geometry = Geometry::new().with_attribute(POSITION, BufferAttribute::new(3, positions));
        if let Some(normals) = reader.read_normals() {
            geometry = geometry.with_attribute(NORMAL, BufferAttribute::new(3, normals.flatten().collect()));
        }
        if let Some(uvs) = reader.read_tex_coords(0) {
            geometry = geometry.with_attribute(UV, BufferAttribute::new(2, uvs.into_f32().flatten().collect()));
        }
        if let Some(indices) = reader.read_indices() {
            geometry.index = Some(IndexBuffer {
                data: indices.into_u32().collect(),
                usage: BufferUsage::default(),
            });
        }
        Ok(geometry)
    }

    fn material(&mut self, material: &gltf::Material) -> Arc<Material> {
        let key = material.index();
        if let Some(existing) = self.materials.get(&key) {
            return existing.clone();
        }

        let pbr = material.pbr_metallic_roughness();
        let color = pbr.base_color_factor();
        let standard = StandardMaterial {
            color,
            metalness: pbr.metallic_factor(),
            roughness: pbr.roughness_factor(),
            emissive: material.emissive_factor(),
            map: pbr
                .base_color_texture()
                .map(|info| self.texture(&info.texture(), ColorSpace::Srgb)),
            normal_map: material
                .normal_texture()
                .map(|normal| self.texture(&normal.texture(), ColorSpace::Linear)),
            emissive_map: material
                .emissive_texture()
                .map(|info| self.texture(&info.texture(), ColorSpace::Srgb)),
            metalness_roughness_map: pbr
                .metallic_roughness_texture()
                .map(|info| self.texture(&info.texture(), ColorSpace::Linear)),
            occlusion_map: material
                .occlusion_texture()
                .map(|occlusion| self.texture(&occlusion.texture(), ColorSpace::Linear)),
        };

        let out = Arc::new(Material {
            name: material.name().map(str::to_string),
            side: if material.double_sided() {
                Side::Double
            } else {
                Side::Front
            },
            transparent: material.alpha_mode() == gltf::material::AlphaMode::Blend,
            opacity: color[3],
            ..Material::standard(standard)
        });
        self.materials.insert(key, out.clone());
        out
    }

    fn texture(&mut self, texture: &gltf::Texture, color_space: ColorSpace) -> Texture {
        if let Some(existing) = self.textures.get(&texture.index()) {
            return existing.clone();
        }

        let uri = match texture.source().source() {
            gltf::image::Source::Uri { uri, .. } => Some(uri.to_string()),
            gltf::image::Source::View { .. } => None,
        };
        let sampler = texture.sampler();

        // Dimensions are unknown until the renderer uploads the image
        let out = Texture {
            name: texture.name().map(str::to_string),
            min_filter: sampler.min_filter().map(min_filter).unwrap_or(Filter::LinearMipmapLinear),
            mag_filter: sampler.mag_filter().map(mag_filter).unwrap_or(Filter::Linear),
            flip_y: false,
            color_space,
            ..Texture::new(TextureSource::Image {
                uri,
                width: 0,
                height: 0,
            })
        };
        self.textures.insert(texture.index(), out.clone());
        out
    }
}

fn min_filter(filter: gltf::texture::MinFilter) -> Filter {
    use gltf::texture::MinFilter;
    match filter {
        MinFilter::Nearest => Filter::Nearest,
        MinFilter::Linear => Filter::Linear,
        MinFilter::NearestMipmapNearest => Filter::NearestMipmapNearest,
        MinFilter::LinearMipmapNearest => Filter::LinearMipmapNearest,
        MinFilter::NearestMipmapLinear => Filter::NearestMipmapLinear,
        MinFilter::LinearMipmapLinear => Filter::LinearMipmapLinear,
    }
}

fn mag_filter(filter: gltf::texture::MagFilter) -> Filter {
    match filter {
        gltf::texture::MagFilter::Nearest => Filter::Nearest,
        gltf::texture::MagFilter::Linear => Filter::Linear,
    }
}

fn animation_clip(animation: &gltf::Animation, buffers: &[gltf::buffer::Data]) -> AnimationClip {
    let mut duration = 0.0f32;
    let mut channels = 0;
    for channel in animation.channels() {
        channels += 1;
        let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
        if let Some(inputs) = reader.read_inputs() {
            for time in inputs {
                duration = duration.max(time);
            }
        }
    }
    AnimationClip {
        name: animation.name().unwrap_or_default().to_string(),
        duration,
        channels,
    }
}

fn camera_def(camera: &gltf::Camera) -> CameraDef {
    let projection = match camera.projection() {
        gltf::camera::Projection::Perspective(p) => Projection::Perspective {
            yfov: p.yfov(),
            aspect: p.aspect_ratio(),
            znear: p.znear(),
            zfar: p.zfar(),
        },
        gltf::camera::Projection::Orthographic(o) => Projection::Orthographic {
            xmag: o.xmag(),
            ymag: o.ymag(),
            znear: o.znear(),
            zfar: o.zfar(),
        },
    };
    CameraDef {
        name: camera.name().map(str::to_string),
        projection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn decode_showroom() -> LoadedModel {
        GltfDecoder::default()
            .decode_slice(fixtures::embedded_showroom().as_bytes())
            .unwrap()
    }

    fn mesh_of<'a>(model: &'a LoadedModel, name: &str) -> &'a MeshData {
        let id = model.scene.find_by_name(name).unwrap();
        model.scene.get(id).unwrap().mesh.as_ref().unwrap()
    }

    #[test]
    fn test_decode_builds_named_nodes() {
        let model = decode_showroom();
        let scene = &model.scene;

        let root = scene.roots()[0];
        assert_eq!(scene.get(root).unwrap().name, "Scene");
        for name in ["Root", "Cables", "VideoPlane", "Wall"] {
            assert!(scene.find_by_name(name).is_some(), "missing {name}");
        }

        let cables = scene.get(scene.find_by_name("Cables").unwrap()).unwrap();
        assert_eq!(cables.transform.position, Vec3::new(1.0, 2.0, 3.0));

        let geometry = &mesh_of(&model, "Cables").geometry;
        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.index.as_ref().unwrap().data, vec![0, 1, 2]);
    }

    #[test]
    fn test_instanced_mesh_shares_resources() {
        let model = decode_showroom();
        let cables = mesh_of(&model, "Cables");
        let video = mesh_of(&model, "VideoPlane");
        assert!(Arc::ptr_eq(&cables.geometry, &video.geometry));
        assert!(cables.material.ptr_eq(&video.material));

        let material = cables.material.first().unwrap();
        assert_eq!(material.name.as_deref(), Some("Paint"));
        assert_eq!(material.side, Side::Double);
    }

    #[test]
    fn test_multi_primitive_mesh_becomes_children() {
        let model = decode_showroom();
        let wall = model.scene.find_by_name("Wall").unwrap();
        let node = model.scene.get(wall).unwrap();
        assert!(node.mesh.is_none());
        assert_eq!(node.children.len(), 2);

        let painted = mesh_of(&model, "Wall_0");
        let plain = mesh_of(&model, "Wall_1");
        assert!(painted.material.ptr_eq(&mesh_of(&model, "Cables").material));
        assert!(!plain.material.ptr_eq(&painted.material));
    }

    #[test]
    fn test_metadata_and_cameras() {
        let source = fixtures::embedded_showroom();
        let model = decode_showroom();
        assert_eq!(model.metadata.generator.as_deref(), Some("vitrine-tests"));
        assert_eq!(model.metadata.version, "2.0");
        assert_eq!(model.metadata.byte_size, source.len());
        assert_eq!(model.metadata.sha256, Some(sha256_hex(source.as_bytes())));
        assert_eq!(model.cameras.len(), 1);
        assert!(model.animations.is_empty());
    }

    #[test]
    fn test_external_buffer_supplied_separately() {
        let decoder = GltfDecoder::default();
        let doc = fixtures::showroom_gltf("model.bin");
        let parsed = decoder.parse(doc.as_bytes()).unwrap();
        assert_eq!(parsed.external_buffers(), vec![(0, "model.bin".to_string())]);

        let missing = decoder.decode(decoder.parse(doc.as_bytes()).unwrap(), HashMap::new());
        assert!(missing.is_err());

        let model = decoder
            .decode(parsed, HashMap::from([(0, fixtures::triangle_bin())]))
            .unwrap();
        assert_eq!(mesh_of(&model, "Cables").geometry.vertex_count(), 3);
    }

    #[test]
    fn test_malformed_asset_is_terminal() {
        let err = GltfDecoder::default().decode_slice(b"{ not gltf").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        assert!(!err.is_transient());
    }
}
