use std::path::Path;

use anyhow::{anyhow, Context};

use super::{TriangleMesh, Vertex};

/// Loads the first triangle primitive of a glTF or GLB file.
pub fn load_triangle_mesh(path: impl AsRef<Path>) -> anyhow::Result<TriangleMesh> {
    let path = path.as_ref();
    let (document, buffers, _images) =
        gltf::import(path).with_context(|| format!("Failed to import {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Mesh".to_string());
    first_triangle_mesh(name, &document, &buffers)
}

/// Same as [`load_triangle_mesh`], for a file that is already in memory.
pub fn triangle_mesh_from_slice(name: &str, bytes: &[u8]) -> anyhow::Result<TriangleMesh> {
    let (document, buffers, _images) = gltf::import_slice(bytes).context("Invalid glTF data")?;
    first_triangle_mesh(name.to_string(), &document, &buffers)
}

fn first_triangle_mesh(
    fallback_name: String,
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
) -> anyhow::Result<TriangleMesh> {
    let (mesh, primitive) = document
        .meshes()
        .flat_map(|mesh| {
            mesh.primitives()
                .map(move |primitive| (mesh.clone(), primitive))
        })
        .find(|(_, primitive)| primitive.mode() == gltf::mesh::Mode::Triangles)
        .ok_or_else(|| anyhow!("No triangle primitive found"))?;

    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|v| &v.0[..]));
    let positions = reader
        .read_positions()
        .ok_or_else(|| anyhow!("Primitive has no positions"))?;
    let normals = reader
        .read_normals()
        .ok_or_else(|| anyhow!("Primitive has no normals"))?;
    let tex_coords: Box<dyn Iterator<Item = [f32; 2]>> =
        if let Some(read_tex_coords) = reader.read_tex_coords(0) {
            Box::new(read_tex_coords.into_f32())
        } else {
            Box::new(std::iter::repeat([0.0f32, 0.0f32]))
        };

    let vertices: Vec<Vertex> = positions
        .zip(normals.zip(tex_coords))
        .map(|(position, (normal, uv))| Vertex {
            position,
            normal,
            uv,
        })
        .collect();

    let indices: Vec<u32> = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_else(|| (0..(vertices.len() as u32)).collect());
    if indices.len() % 3 != 0 {
        return Err(anyhow!(
            "Index count {} is not a multiple of three",
            indices.len()
        ));
    }
    if let Some(index) = indices.iter().find(|&&index| index as usize >= vertices.len()) {
        return Err(anyhow!(
            "Index {} is out of range for {} vertices",
            index,
            vertices.len()
        ));
    }

    let name = mesh.name().map(str::to_string).unwrap_or(fallback_name);
    log::info!(
        "Imported mesh \"{}\" with {} vertices and {} triangles",
        name,
        vertices.len(),
        indices.len() / 3
    );
    Ok(TriangleMesh::new(name, &vertices, indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A single triangle as a binary glTF file.
    fn triangle_glb(indices: [u32; 3]) -> Vec<u8> {
        let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let normals: [[f32; 3]; 3] = [[0.0, 0.0, 1.0]; 3];

        let mut bin = Vec::new();
        bin.extend_from_slice(bytemuck::cast_slice(&positions));
        bin.extend_from_slice(bytemuck::cast_slice(&normals));
        bin.extend_from_slice(bytemuck::cast_slice(&indices));

        let json = serde_json::json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 72, "byteLength": 12 }
            ],
            "accessors": [
                {
                    "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                    "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
                },
                { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3" },
                { "bufferView": 2, "componentType": 5125, "count": 3, "type": "SCALAR" }
            ],
            "meshes": [{
                "name": "Triangle",
                "primitives": [{ "attributes": { "POSITION": 0, "NORMAL": 1 }, "indices": 2 }]
            }]
        });
        let mut json = serde_json::to_vec(&json).unwrap();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }

        let total_length = 12 + 8 + json.len() + 8 + bin.len();
        let mut glb = Vec::with_capacity(total_length);
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total_length as u32).to_le_bytes());
        glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"JSON");
        glb.extend_from_slice(&json);
        glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"BIN\0");
        glb.extend_from_slice(&bin);
        glb
    }

    #[test]
    fn imports_first_triangle_primitive() {
        let mesh = triangle_mesh_from_slice("Fallback", &triangle_glb([0, 1, 2])).unwrap();
        assert_eq!(mesh.name, "Triangle");
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_stride, Vertex::STRIDE);
        let vertices = mesh.vertices();
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(vertices[2].normal, [0.0, 0.0, 1.0]);
        assert_eq!(vertices[0].uv, [0.0, 0.0]);
    }

    #[test]
    fn rejects_indices_past_the_last_vertex() {
        let error = triangle_mesh_from_slice("Fallback", &triangle_glb([0, 1, 99])).unwrap_err();
        assert!(format!("{:#}", error).contains("Index 99 is out of range"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(triangle_mesh_from_slice("Broken", b"not a gltf file").is_err());
    }
}
