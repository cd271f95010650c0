//! LOD-aware terrain mesh construction
//!
//! Converts a bordered height grid into vertex/triangle data. The outermost
//! ring of the grid becomes border geometry that participates in normal
//! accumulation but is excluded from the final mesh, so edge normals match
//! those of neighboring chunks. Border and interior vertices live in two
//! explicit containers addressed through [`VertexId`].

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::curve::HeightCurve;
use crate::grid::Grid;

pub const NUM_SUPPORTED_LODS: usize = 5;
pub const NUM_SUPPORTED_CHUNK_SIZES: usize = 10;
pub const NUM_SUPPORTED_FLAT_SHADED_CHUNK_SIZES: usize = 4;

/// Supported chunk sizes in quads per side. Every entry + 4 is a multiple of
/// 24, so each simplification stride (1, 2, 4, 6, 8) tiles the bordered
/// vertex grid exactly.
pub const SUPPORTED_CHUNK_SIZES: [usize; NUM_SUPPORTED_CHUNK_SIZES] =
    [20, 44, 68, 92, 116, 140, 164, 188, 212, 236];

/// Chunk sizing and shading configuration shared by the streamer and the
/// mesh builder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshSettings {
    pub mesh_scale: f32,
    pub use_flat_shading: bool,
    /// Index into [`SUPPORTED_CHUNK_SIZES`].
    pub chunk_size_index: usize,
    /// Index used instead when flat shading; limited to the smaller sizes
    /// because unwelding triples the vertex count.
    pub flat_shaded_chunk_size_index: usize,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            mesh_scale: 3.0,
            use_flat_shading: false,
            chunk_size_index: 0,
            flat_shaded_chunk_size_index: 0,
        }
    }
}

impl MeshSettings {
    /// Vertices per line of the bordered height grid at LOD 0, including the
    /// border ring that never reaches the final mesh.
    pub fn num_verts_per_line(&self) -> usize {
        let index = if self.use_flat_shading {
            assert!(
                self.flat_shaded_chunk_size_index < NUM_SUPPORTED_FLAT_SHADED_CHUNK_SIZES,
                "flat-shaded chunk size index {} out of range",
                self.flat_shaded_chunk_size_index
            );
            self.flat_shaded_chunk_size_index
        } else {
            assert!(
                self.chunk_size_index < NUM_SUPPORTED_CHUNK_SIZES,
                "chunk size index {} out of range",
                self.chunk_size_index
            );
            self.chunk_size_index
        };
        SUPPORTED_CHUNK_SIZES[index] + 5
    }

    /// Chunk extent in world units.
    pub fn mesh_world_size(&self) -> f32 {
        (self.num_verts_per_line() as f32 - 3.0) * self.mesh_scale
    }

    /// Vertices per line of the emitted (border-free) mesh at the given LOD.
    pub fn vertices_per_line(&self, lod: usize) -> usize {
        assert!(lod < NUM_SUPPORTED_LODS, "lod {} out of range", lod);
        let increment = simplification_increment(lod);
        let mesh_size = self.num_verts_per_line() - 2 * increment;
        (mesh_size - 1) / increment + 1
    }
}

/// Vertex stride for a LOD level: 1 at full detail, doubling per level after.
pub fn simplification_increment(lod: usize) -> usize {
    if lod == 0 {
        1
    } else {
        lod * 2
    }
}

/// Address of a vertex in either the interior or the border container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexId {
    Interior(u32),
    Border(u32),
}

/// Intermediate mesh representation: interior geometry destined for the
/// renderable mesh plus the border geometry used only for edge normals.
/// Immutable once built; convert with [`MeshData::into_mesh`].
#[derive(Clone, Debug)]
pub struct MeshData {
    vertices: Vec<Vec3>,
    uvs: Vec<Vec2>,
    triangles: Vec<u32>,
    border_vertices: Vec<Vec3>,
    border_triangles: Vec<[VertexId; 3]>,
    flat_shading: bool,
}

/// Final renderable mesh. Never contains border geometry.
#[derive(Clone, Debug)]
pub struct TerrainMesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub triangles: Vec<u32>,
}

impl MeshData {
    fn new(vertices_per_line: usize, flat_shading: bool) -> Self {
        let vertex_count = vertices_per_line * vertices_per_line;
        Self {
            vertices: vec![Vec3::ZERO; vertex_count],
            uvs: vec![Vec2::ZERO; vertex_count],
            triangles: Vec::with_capacity((vertices_per_line - 1) * (vertices_per_line - 1) * 6),
            border_vertices: vec![Vec3::ZERO; vertices_per_line * 4 + 4],
            border_triangles: Vec::with_capacity(vertices_per_line * 8),
            flat_shading,
        }
    }

    fn add_vertex(&mut self, position: Vec3, uv: Vec2, id: VertexId) {
        match id {
            VertexId::Border(i) => self.border_vertices[i as usize] = position,
            VertexId::Interior(i) => {
                self.vertices[i as usize] = position;
                self.uvs[i as usize] = uv;
            }
        }
    }

    fn add_triangle(&mut self, a: VertexId, b: VertexId, c: VertexId) {
        match (a, b, c) {
            (VertexId::Interior(a), VertexId::Interior(b), VertexId::Interior(c)) => {
                self.triangles.extend_from_slice(&[a, b, c]);
            }
            _ => self.border_triangles.push([a, b, c]),
        }
    }

    fn position(&self, id: VertexId) -> Vec3 {
        match id {
            VertexId::Interior(i) => self.vertices[i as usize],
            VertexId::Border(i) => self.border_vertices[i as usize],
        }
    }

    fn surface_normal(&self, a: VertexId, b: VertexId, c: VertexId) -> Vec3 {
        let point_a = self.position(a);
        let side_ab = self.position(b) - point_a;
        let side_ac = self.position(c) - point_a;
        side_ab.cross(side_ac).normalize()
    }

    /// Per-vertex smooth normals: face normals accumulated into each touched
    /// interior vertex, border triangles included, then normalized.
    fn calculate_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::ZERO; self.vertices.len()];

        for tri in self.triangles.chunks_exact(3) {
            let normal = self.surface_normal(
                VertexId::Interior(tri[0]),
                VertexId::Interior(tri[1]),
                VertexId::Interior(tri[2]),
            );
            for &i in tri {
                normals[i as usize] += normal;
            }
        }

        // Border triangles contribute to the interior vertices they touch but
        // are themselves discarded.
        for &[a, b, c] in &self.border_triangles {
            let normal = self.surface_normal(a, b, c);
            for id in [a, b, c] {
                if let VertexId::Interior(i) = id {
                    normals[i as usize] += normal;
                }
            }
        }

        for normal in &mut normals {
            *normal = normal.normalize();
        }
        normals
    }

    /// Number of emitted (interior) triangles.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    /// Convert into a renderable mesh, baking smooth normals or unwelding
    /// into flat-shaded triangles.
    pub fn into_mesh(self) -> TerrainMesh {
        if self.flat_shading {
            self.into_flat_shaded_mesh()
        } else {
            let normals = self.calculate_normals();
            TerrainMesh {
                vertices: self.vertices,
                normals,
                uvs: self.uvs,
                triangles: self.triangles,
            }
        }
    }

    /// Give every triangle its own three vertices so each vertex normal is
    /// the triangle's face normal. Trades memory for faceted shading.
    fn into_flat_shaded_mesh(self) -> TerrainMesh {
        let count = self.triangles.len();
        let mut vertices = Vec::with_capacity(count);
        let mut uvs = Vec::with_capacity(count);
        let mut normals = Vec::with_capacity(count);

        for tri in self.triangles.chunks_exact(3) {
            let normal = self.surface_normal(
                VertexId::Interior(tri[0]),
                VertexId::Interior(tri[1]),
                VertexId::Interior(tri[2]),
            );
            for &i in tri {
                vertices.push(self.vertices[i as usize]);
                uvs.push(self.uvs[i as usize]);
                normals.push(normal);
            }
        }

        TerrainMesh {
            vertices,
            normals,
            uvs,
            triangles: (0..count as u32).collect(),
        }
    }
}

/// Build mesh data from a bordered height grid.
///
/// The grid's outermost ring is treated as border. Vertex heights run through
/// `height_curve.evaluate(h) * height_multiplier`; the curve is snapshotted so
/// concurrent builds never share evaluation state. Positions are in local
/// chunk space centered on the origin (consumers apply chunk placement and
/// `mesh_scale`), with texture coordinates computed against the unsimplified
/// span so they agree across LOD levels.
pub fn generate_terrain_mesh(
    heights: &Grid<f32>,
    height_multiplier: f32,
    height_curve: &HeightCurve,
    lod: usize,
    flat_shading: bool,
) -> MeshData {
    let height_curve = height_curve.clone();
    build_mesh(
        heights,
        |h| height_curve.evaluate(h) * height_multiplier,
        lod,
        flat_shading,
    )
}

/// Build mesh data from a height grid whose values already carry the response
/// curve and multiplier (the output of `generate_height_map`). Vertex heights
/// are used as-is.
pub fn generate_chunk_mesh(heights: &Grid<f32>, lod: usize, flat_shading: bool) -> MeshData {
    build_mesh(heights, |h| h, lod, flat_shading)
}

fn build_mesh<F: Fn(f32) -> f32>(
    heights: &Grid<f32>,
    map_height: F,
    lod: usize,
    flat_shading: bool,
) -> MeshData {
    assert_eq!(heights.width, heights.height, "bordered height grid must be square");
    assert!(lod < NUM_SUPPORTED_LODS, "lod {} out of range", lod);

    let increment = simplification_increment(lod);
    let bordered_size = heights.width;
    assert!(
        (bordered_size - 1) % increment == 0,
        "grid of {} verts per line does not support stride {}",
        bordered_size,
        increment
    );

    let mesh_size = bordered_size - 2 * increment;
    let mesh_size_unsimplified = bordered_size - 2;

    let top_left_x = (mesh_size_unsimplified - 1) as f32 / -2.0;
    let top_left_z = (mesh_size_unsimplified - 1) as f32 / 2.0;

    let vertices_per_line = (mesh_size - 1) / increment + 1;
    let mut mesh_data = MeshData::new(vertices_per_line, flat_shading);

    // First pass assigns every sampled grid position to one of the two index
    // spaces: the outer ring to the border container, the rest to the mesh.
    let mut vertex_ids = Grid::new_with(bordered_size, bordered_size, VertexId::Interior(0));
    let mut interior_index = 0u32;
    let mut border_index = 0u32;
    for y in (0..bordered_size).step_by(increment) {
        for x in (0..bordered_size).step_by(increment) {
            let is_border = y == 0 || y == bordered_size - 1 || x == 0 || x == bordered_size - 1;
            if is_border {
                vertex_ids.set(x, y, VertexId::Border(border_index));
                border_index += 1;
            } else {
                vertex_ids.set(x, y, VertexId::Interior(interior_index));
                interior_index += 1;
            }
        }
    }

    for y in (0..bordered_size).step_by(increment) {
        for x in (0..bordered_size).step_by(increment) {
            let id = *vertex_ids.get(x, y);

            // Percent across the simplified span, shifted one cell inward so
            // uvs stay consistent across LOD levels.
            let percent = Vec2::new(
                (x as f32 - increment as f32) / mesh_size as f32,
                (y as f32 - increment as f32) / mesh_size as f32,
            );
            let height = map_height(*heights.get(x, y));
            let position = Vec3::new(
                top_left_x + percent.x * mesh_size_unsimplified as f32,
                height,
                top_left_z - percent.y * mesh_size_unsimplified as f32,
            );
            mesh_data.add_vertex(position, percent, id);

            if x < bordered_size - 1 && y < bordered_size - 1 {
                let a = *vertex_ids.get(x, y);
                let b = *vertex_ids.get(x + increment, y);
                let c = *vertex_ids.get(x, y + increment);
                let d = *vertex_ids.get(x + increment, y + increment);
                mesh_data.add_triangle(a, d, c);
                mesh_data.add_triangle(d, a, b);
            }
        }
    }

    mesh_data
}
