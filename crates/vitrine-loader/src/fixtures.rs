//! Small glTF documents shared by the tests

/// One triangle: 36 bytes of positions then three u16 indices and padding
pub const TRIANGLE_BIN_BASE64: &str = "AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIAAAA=";

/// Showroom-like document: `Cables` and `VideoPlane` instance the same mesh,
/// `Wall` carries a two-primitive mesh, and one unreferenced camera
pub fn showroom_gltf(buffer_uri: &str) -> String {
    format!(
        r#"{{
  "asset": {{ "version": "2.0", "generator": "vitrine-tests" }},
  "scene": 0,
  "scenes": [{{ "name": "Scene", "nodes": [3] }}],
  "nodes": [
    {{ "name": "Cables", "mesh": 0, "translation": [1.0, 2.0, 3.0] }},
    {{ "name": "VideoPlane", "mesh": 0 }},
    {{ "name": "Wall", "mesh": 1 }},
    {{ "name": "Root", "children": [0, 1, 2] }}
  ],
  "meshes": [
    {{ "name": "Tri", "primitives": [{{ "attributes": {{ "POSITION": 0 }}, "indices": 1, "material": 0 }}] }},
    {{ "name": "Split", "primitives": [
      {{ "attributes": {{ "POSITION": 0 }}, "indices": 1, "material": 0 }},
      {{ "attributes": {{ "POSITION": 0 }}, "indices": 1 }}
    ] }}
  ],
  "materials": [{{
    "name": "Paint",
    "pbrMetallicRoughness": {{ "baseColorFactor": [1.0, 0.0, 0.0, 1.0], "metallicFactor": 0.5 }},
    "doubleSided": true
  }}],
  "cameras": [{{ "type": "perspective", "perspective": {{ "yfov": 0.8, "znear": 0.1 }} }}],
  "buffers": [{{ "byteLength": 44, "uri": "{buffer_uri}" }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
       "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }}
  ]
}}"#
    )
}

/// Self-contained document with the buffer inlined as a data URI
pub fn embedded_showroom() -> String {
    showroom_gltf(&format!(
        "data:application/octet-stream;base64,{}",
        TRIANGLE_BIN_BASE64
    ))
}

/// Raw bytes of the triangle buffer
pub fn triangle_bin() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(44);
    for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    for i in [0u16, 1, 2] {
        bytes.extend_from_slice(&i.to_le_bytes());
    }
    bytes.extend_from_slice(&[0, 0]);
    bytes
}
