use crate::device::{
    BlasBoxDesc, BlasBuild, BlasBuildData, BlasDesc, BlasGeometryDesc, BlasHandle,
    BlasTriangleDesc, BufferDesc, BufferHandle, BufferUsage, BuildFlags, IndexType,
    RayTracingDevice,
};
use crate::error::{RayTracingError, Result};
use crate::scene::{BoxAttribs, Geometry, MeshAttribs, TriangleMesh, Vertex};

/// A built BLAS. Instances refer to it by handle only.
#[derive(Debug, Clone, PartialEq)]
pub struct BottomLevelStructure {
    pub handle: BlasHandle,
    pub geometry_name: String,
    pub primitive_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryBuffers {
    Triangles {
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        /// Per-vertex UVs and normals plus per-triangle indices for closest hit shaders.
        attribs_buffer: BufferHandle,
    },
    Boxes {
        box_buffer: BufferHandle,
    },
}

/// Everything produced from one geometry. The BLAS keeps the geometry it was built from.
#[derive(Debug, Clone)]
pub struct CompiledGeometry {
    pub geometry: Geometry,
    pub buffers: GeometryBuffers,
    pub blas: BottomLevelStructure,
}

impl CompiledGeometry {
    pub fn handle(&self) -> BlasHandle {
        self.blas.handle
    }
}

/// Turns geometry into device buffers and a built BLAS. Runs once per distinct geometry.
pub struct GeometryCompiler;

impl GeometryCompiler {
    pub fn compile<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        geometry: Geometry,
    ) -> Result<CompiledGeometry> {
        let (buffers, blas) = match &geometry {
            Geometry::Triangles(mesh) => Self::compile_triangles(device, mesh)?,
            Geometry::Procedural { name, boxes } => Self::compile_boxes(device, name, boxes)?,
        };

        log::info!(
            "Built BLAS \"{}\" with {} primitives",
            blas.geometry_name,
            blas.primitive_count
        );

        Ok(CompiledGeometry {
            geometry,
            buffers,
            blas,
        })
    }

    fn compile_triangles<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        mesh: &TriangleMesh,
    ) -> Result<(GeometryBuffers, BottomLevelStructure)> {
        if mesh.vertex_stride != Vertex::STRIDE {
            return Err(RayTracingError::LayoutMismatch {
                geometry: mesh.name.clone(),
                declared: Vertex::STRIDE,
                actual: mesh.vertex_stride,
            });
        }

        let trailing = mesh.vertex_data.len() % Vertex::STRIDE as usize;
        if trailing != 0 {
            return Err(RayTracingError::LayoutMismatch {
                geometry: mesh.name.clone(),
                declared: Vertex::STRIDE,
                actual: trailing as u32,
            });
        }

        let vertices = mesh.vertices();
        let positions: Vec<[f32; 3]> = vertices.iter().map(|v| v.position).collect();
        let vertex_count = positions.len() as u32;
        if let Some(&index) = mesh.indices.iter().find(|&&index| index >= vertex_count) {
            return Err(RayTracingError::IndexOutOfRange {
                geometry: mesh.name.clone(),
                index,
                vertex_count,
            });
        }
        let primitive_count = mesh.triangle_count();

        let vertex_buffer = device.create_buffer(
            &BufferDesc {
                name: &format!("{} vertices", mesh.name),
                size: std::mem::size_of_val(positions.as_slice()) as u64,
                usage: BufferUsage::BuildInput,
            },
            Some(bytemuck::cast_slice(&positions)),
        )?;
        let index_buffer = device.create_buffer(
            &BufferDesc {
                name: &format!("{} indices", mesh.name),
                size: std::mem::size_of_val(mesh.indices.as_slice()) as u64,
                usage: BufferUsage::BuildInput,
            },
            Some(bytemuck::cast_slice(&mesh.indices)),
        )?;
        let attribs = MeshAttribs::from_mesh(mesh).to_bytes();
        let attribs_buffer = device.create_buffer(
            &BufferDesc {
                name: &format!("{} attribs", mesh.name),
                size: attribs.len() as u64,
                usage: BufferUsage::ShaderResource,
            },
            Some(&attribs),
        )?;

        let blas = device.create_blas(&BlasDesc {
            name: format!("{} BLAS", mesh.name),
            geometry: BlasGeometryDesc::Triangles(BlasTriangleDesc {
                geometry_name: mesh.name.clone(),
                max_vertex_count: vertex_count,
                vertex_format: Vertex::POSITION_FORMAT,
                max_primitive_count: primitive_count,
                index_type: IndexType::Uint32,
            }),
            flags: BuildFlags::FAST_TRACE,
        })?;

        let data = BlasBuildData::Triangles {
            geometry_name: mesh.name.clone(),
            vertex_buffer,
            vertex_stride: Vertex::POSITION_FORMAT.size(),
            vertex_count,
            vertex_format: Vertex::POSITION_FORMAT,
            index_buffer,
            primitive_count,
            index_type: IndexType::Uint32,
            opaque: true,
        };
        Self::build(device, blas, &mesh.name, &data)?;

        Ok((
            GeometryBuffers::Triangles {
                vertex_buffer,
                index_buffer,
                attribs_buffer,
            },
            BottomLevelStructure {
                handle: blas,
                geometry_name: mesh.name.clone(),
                primitive_count,
            },
        ))
    }

    fn compile_boxes<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        name: &str,
        boxes: &[BoxAttribs],
    ) -> Result<(GeometryBuffers, BottomLevelStructure)> {
        let box_count = boxes.len() as u32;
        let box_buffer = device.create_buffer(
            &BufferDesc {
                name: &format!("{} boxes", name),
                size: std::mem::size_of_val(boxes) as u64,
                usage: BufferUsage::BuildInput,
            },
            Some(bytemuck::cast_slice(boxes)),
        )?;

        let blas = device.create_blas(&BlasDesc {
            name: format!("{} BLAS", name),
            geometry: BlasGeometryDesc::Boxes(BlasBoxDesc {
                geometry_name: name.to_string(),
                max_box_count: box_count,
            }),
            flags: BuildFlags::FAST_TRACE,
        })?;

        let data = BlasBuildData::Boxes {
            geometry_name: name.to_string(),
            box_buffer,
            box_count,
            box_stride: BoxAttribs::STRIDE,
        };
        Self::build(device, blas, name, &data)?;

        Ok((
            GeometryBuffers::Boxes { box_buffer },
            BottomLevelStructure {
                handle: blas,
                geometry_name: name.to_string(),
                primitive_count: box_count,
            },
        ))
    }

    /// Records the build with a scratch buffer sized for this BLAS alone.
    fn build<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        blas: BlasHandle,
        name: &str,
        data: &BlasBuildData,
    ) -> Result<()> {
        let scratch_size = device.blas_scratch_sizes(blas)?.build;
        let scratch = device.create_buffer(
            &BufferDesc {
                name: &format!("{} BLAS scratch", name),
                size: scratch_size,
                usage: BufferUsage::Scratch,
            },
            None,
        )?;
        device.build_blas(&BlasBuild {
            blas,
            data,
            scratch,
        })
    }
}
